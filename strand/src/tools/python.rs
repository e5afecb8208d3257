//! Python execution tool: run a code snippet in a `python3` subprocess.
//!
//! The code is passed as a single argv element (no shell involved), with the
//! workspace as working directory. Killed on timeout like the shell tool.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::safety::SafetyGate;
use crate::tools::{Tool, ToolCategory, ToolError, ToolResult, ToolSpec};

pub const TOOL_EXECUTE_PYTHON: &str = "execute_python";

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Runs Python code in a subprocess and returns merged stdout+stderr.
pub struct ExecutePythonTool {
    gate: Arc<SafetyGate>,
}

impl ExecutePythonTool {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Tool for ExecutePythonTool {
    fn name(&self) -> &str {
        TOOL_EXECUTE_PYTHON
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Code
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_EXECUTE_PYTHON.to_string(),
            description: Some(
                "Run Python code in a python3 subprocess rooted at the \
                 workspace. Returns merged stdout+stderr and the return code."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "Python source to execute." },
                    "timeout": { "type": "integer", "default": DEFAULT_TIMEOUT_SECS }
                },
                "required": ["code"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let code = args
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing code".to_string()))?;
        let timeout_secs = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut cmd = Command::new("python3");
        cmd.arg("-c")
            .arg(code)
            .current_dir(self.gate.workspace())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| ToolError::Execution(format!("python3 spawn failed: {e}")))?;

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
                    "python timed out after {timeout_secs}s"
                )))
            }
        };

        let mut merged = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !merged.is_empty() && !merged.ends_with('\n') {
                merged.push('\n');
            }
            merged.push_str(&stderr);
        }
        let code_num = output.status.code().unwrap_or(-1);
        Ok(ToolResult {
            success: code_num == 0,
            output: Value::String(merged),
            error: if code_num == 0 {
                None
            } else {
                Some(format!("exit code {code_num}"))
            },
            metadata: Some(json!({ "return_code": code_num })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::SafetyPolicy;

    fn fixture() -> (tempfile::TempDir, ExecutePythonTool) {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(SafetyGate::new(SafetyPolicy::default(), dir.path()));
        (dir, ExecutePythonTool::new(gate))
    }

    /// **Scenario**: stdout is captured on success.
    #[tokio::test]
    async fn prints_to_stdout() {
        let (_dir, tool) = fixture();
        let r = tool
            .execute(json!({"code": "print(21 * 2)"}))
            .await
            .unwrap();
        assert!(r.success);
        assert!(r.output.as_str().unwrap().contains("42"));
    }

    /// **Scenario**: an exception produces a failure with the traceback merged in.
    #[tokio::test]
    async fn exception_is_failure() {
        let (_dir, tool) = fixture();
        let r = tool
            .execute(json!({"code": "raise ValueError('nope')"}))
            .await
            .unwrap();
        assert!(!r.success);
        assert!(r.output.as_str().unwrap().contains("ValueError"));
    }
}
