//! Sandbox executor: run code inside a managed container.
//!
//! A single container per tool instance, started lazily on first use via the
//! `docker` CLI and shared by subsequent calls. Supported languages: python,
//! nodejs, typescript, shell. Timeout is capped at 300 seconds.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::safety::SafetyGate;
use crate::tools::{NetworkTag, Tool, ToolCategory, ToolError, ToolResult, ToolSpec};

pub const TOOL_SANDBOX_EXECUTE: &str = "sandbox_execute";

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_TIMEOUT_SECS: u64 = 300;

/// Container settings, typically read from `SANDBOX_*` env vars.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub image: String,
    pub port: Option<u16>,
    pub memory: Option<String>,
    pub cpu: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "python:3.11-slim".to_string(),
            port: None,
            memory: None,
            cpu: None,
        }
    }
}

impl SandboxConfig {
    /// Builds the config from `SANDBOX_IMAGE`, `SANDBOX_PORT`,
    /// `SANDBOX_MEMORY`, and `SANDBOX_CPU`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            image: std::env::var("SANDBOX_IMAGE").unwrap_or(defaults.image),
            port: std::env::var("SANDBOX_PORT")
                .ok()
                .and_then(|p| p.parse().ok()),
            memory: std::env::var("SANDBOX_MEMORY").ok(),
            cpu: std::env::var("SANDBOX_CPU").ok(),
        }
    }
}

/// Runs code snippets inside a managed, isolated container.
pub struct SandboxExecuteTool {
    gate: Arc<SafetyGate>,
    config: SandboxConfig,
    /// Container name once started; guarded so concurrent first calls race safely.
    container: Mutex<Option<String>>,
}

impl SandboxExecuteTool {
    pub fn new(gate: Arc<SafetyGate>, config: SandboxConfig) -> Self {
        Self {
            gate,
            config,
            container: Mutex::new(None),
        }
    }

    /// Starts the container when missing; returns its name.
    async fn ensure_container(&self) -> Result<String, ToolError> {
        let mut guard = self.container.lock().await;
        if let Some(name) = guard.as_ref() {
            return Ok(name.clone());
        }
        let name = format!("strand-sandbox-{}", uuid::Uuid::new_v4().simple());
        let mut cmd = Command::new("docker");
        cmd.args(["run", "-d", "--name", &name, "--rm"]);
        if let Some(ref mem) = self.config.memory {
            cmd.args(["--memory", mem]);
        }
        if let Some(ref cpu) = self.config.cpu {
            cmd.args(["--cpus", cpu]);
        }
        if let Some(port) = self.config.port {
            cmd.args(["-p", &format!("{port}:{port}")]);
        }
        cmd.args([
            "-v",
            &format!("{}:/workspace", self.gate.workspace().display()),
            "-w",
            "/workspace",
            &self.config.image,
            "sleep",
            "infinity",
        ]);
        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ToolError::Execution(format!("docker spawn failed: {e}")))?;
        if !output.status.success() {
            return Err(ToolError::Execution(format!(
                "container start failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        tracing::info!(container = %name, image = %self.config.image, "sandbox container started");
        *guard = Some(name.clone());
        Ok(name)
    }
}

/// Argv tail for executing `code` in the given language inside the container.
fn language_argv(language: &str, code: &str) -> Result<Vec<String>, ToolError> {
    let argv = match language {
        "python" => vec!["python3".into(), "-c".into(), code.into()],
        "nodejs" => vec!["node".into(), "-e".into(), code.into()],
        "typescript" => vec!["npx".into(), "ts-node".into(), "-e".into(), code.into()],
        "shell" => vec!["sh".into(), "-c".into(), code.into()],
        other => {
            return Err(ToolError::InvalidInput(format!(
                "unsupported language: {other} (use python, nodejs, typescript, shell)"
            )))
        }
    };
    Ok(argv)
}

#[async_trait]
impl Tool for SandboxExecuteTool {
    fn name(&self) -> &str {
        TOOL_SANDBOX_EXECUTE
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Code
    }

    fn network(&self) -> NetworkTag {
        // Pulling the image and talking to the daemon may require network.
        NetworkTag::Remote
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_SANDBOX_EXECUTE.to_string(),
            description: Some(
                "Run code inside the managed sandbox container. Languages: \
                 python, nodejs, typescript, shell. Timeout capped at 300s."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string" },
                    "language": { "type": "string", "enum": ["python", "nodejs", "typescript", "shell"] },
                    "timeout": { "type": "integer", "default": DEFAULT_TIMEOUT_SECS, "maximum": MAX_TIMEOUT_SECS },
                    "working_dir": { "type": "string", "description": "Directory inside the container.", "default": "/workspace" }
                },
                "required": ["code", "language"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let code = args
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing code".to_string()))?;
        let language = args
            .get("language")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing language".to_string()))?;
        let timeout_secs = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .min(MAX_TIMEOUT_SECS);
        let working_dir = args
            .get("working_dir")
            .and_then(|v| v.as_str())
            .unwrap_or("/workspace");

        let argv = language_argv(language, code)?;
        let container = self.ensure_container().await?;

        let mut cmd = Command::new("docker");
        cmd.args(["exec", "-w", working_dir, &container])
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| ToolError::Execution(format!("docker exec failed: {e}")))?;
        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ToolError::Execution(format!("wait failed: {e}"))),
            Err(_) => {
                return Ok(ToolResult::fail(format!(
                    "sandbox execution timed out after {timeout_secs}s"
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);
        Ok(ToolResult {
            success: exit_code == 0,
            output: json!({
                "stdout": stdout,
                "stderr": stderr,
                "exit_code": exit_code,
            }),
            error: if exit_code == 0 {
                None
            } else {
                Some(format!("exit code {exit_code}"))
            },
            metadata: Some(json!({ "container": container, "language": language })),
        })
    }
}
