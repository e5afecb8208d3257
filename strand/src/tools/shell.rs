//! Shell tool: run a command line in a subprocess under the workspace.
//!
//! Every command passes the safety gate first. Uses `sh -c` on Unix and
//! `cmd /C` on Windows, with the workspace as working directory. The process
//! is killed when the timeout elapses.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::safety::SafetyGate;
use crate::tools::{Tool, ToolCategory, ToolError, ToolResult, ToolSpec};

pub const TOOL_EXECUTE_COMMAND: &str = "execute_command";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Runs a shell command and returns merged stdout+stderr plus the return code.
pub struct ExecuteCommandTool {
    gate: Arc<SafetyGate>,
}

impl ExecuteCommandTool {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self { gate }
    }
}

/// Spawns `command` through the platform shell in `workdir`, enforcing the
/// timeout. Returns (merged output, return code, timed_out).
pub(crate) async fn run_shell(
    command: &str,
    workdir: &std::path::Path,
    timeout: Duration,
) -> Result<(String, i32, bool), ToolError> {
    #[cfg(unix)]
    let mut cmd = {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };
    #[cfg(windows)]
    let mut cmd = {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    };
    cmd.current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| ToolError::Execution(format!("spawn failed: {e}")))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut merged = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.is_empty() {
                if !merged.is_empty() && !merged.ends_with('\n') {
                    merged.push('\n');
                }
                merged.push_str(&stderr);
            }
            let code = output.status.code().unwrap_or(-1);
            Ok((merged, code, false))
        }
        Ok(Err(e)) => Err(ToolError::Execution(format!("wait failed: {e}"))),
        // Timeout: the child was moved into wait_with_output, but kill_on_drop
        // reaps it when the future is dropped here.
        Err(_) => Ok((String::new(), -1, true)),
    }
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        TOOL_EXECUTE_COMMAND
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Code
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_EXECUTE_COMMAND.to_string(),
            description: Some(
                "Execute a shell command in the workspace. Returns merged \
                 stdout+stderr and the return code; killed on timeout \
                 (default 60s). Dangerous commands are refused by policy."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The shell command to run." },
                    "timeout": { "type": "integer", "description": "Seconds before the process is killed.", "default": DEFAULT_TIMEOUT_SECS },
                    "capture_output": { "type": "boolean", "default": true }
                },
                "required": ["command"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing command".to_string()))?;
        let timeout_secs = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let capture = args
            .get("capture_output")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        self.gate.check_command(command)?;

        let (output, code, timed_out) = run_shell(
            command,
            self.gate.workspace(),
            Duration::from_secs(timeout_secs),
        )
        .await?;

        if timed_out {
            return Ok(ToolResult::fail(format!(
                "command timed out after {timeout_secs}s"
            )));
        }
        let shown = if capture { output } else { String::new() };
        let result = ToolResult {
            success: code == 0,
            output: Value::String(shown),
            error: if code == 0 {
                None
            } else {
                Some(format!("exit code {code}"))
            },
            metadata: Some(json!({ "return_code": code })),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::SafetyPolicy;

    fn fixture() -> (tempfile::TempDir, ExecuteCommandTool) {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(SafetyGate::new(SafetyPolicy::default(), dir.path()));
        (dir, ExecuteCommandTool::new(gate))
    }

    /// **Scenario**: successful command returns output and return_code 0.
    #[tokio::test]
    async fn echo_succeeds() {
        let (_dir, tool) = fixture();
        let r = tool
            .execute(json!({"command": "echo hello"}))
            .await
            .unwrap();
        assert!(r.success);
        assert!(r.output.as_str().unwrap().contains("hello"));
        assert_eq!(r.metadata.unwrap()["return_code"], 0);
    }

    /// **Scenario**: non-zero exit is an in-contract failure with stderr merged.
    #[tokio::test]
    async fn nonzero_exit_is_failure_with_merged_output() {
        let (_dir, tool) = fixture();
        let r = tool
            .execute(json!({"command": "echo out; echo err >&2; exit 3"}))
            .await
            .unwrap();
        assert!(!r.success);
        let merged = r.output.as_str().unwrap();
        assert!(merged.contains("out"));
        assert!(merged.contains("err"));
        assert_eq!(r.metadata.unwrap()["return_code"], 3);
    }

    /// **Scenario**: timeout kills the process and reports failure.
    #[tokio::test]
    async fn timeout_kills_process() {
        let (_dir, tool) = fixture();
        let r = tool
            .execute(json!({"command": "sleep 5", "timeout": 1}))
            .await
            .unwrap();
        assert!(!r.success);
        assert!(r.error.unwrap().contains("timed out"));
    }

    /// **Scenario**: a denied command is a policy error before any spawn.
    #[tokio::test]
    async fn denied_command_is_policy_error() {
        let (_dir, tool) = fixture();
        let err = tool
            .execute(json!({"command": "rm -rf / --no-preserve-root"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Policy(_)));
    }

    /// **Scenario**: commands run with the workspace as cwd.
    #[tokio::test]
    async fn command_runs_in_workspace() {
        let (dir, tool) = fixture();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let r = tool.execute(json!({"command": "ls"})).await.unwrap();
        assert!(r.output.as_str().unwrap().contains("marker.txt"));
    }
}
