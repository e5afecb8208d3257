//! Tool abstraction: specs, the universal result contract, and the registry.
//!
//! Each tool exposes `execute(args) -> ToolResult` with argument validation
//! and a wall-clock measured by the registry. Tools carry a category and a
//! network requirement tag; offline mode refuses `remote` tools at
//! registration time. Write-capable tools consult the safety gate before
//! touching anything.

pub mod file;
mod git;
mod grep;
mod python;
mod sandbox;
mod shell;

pub use file::{ListDirectoryTool, ReadFileTool, SearchFilesTool, WriteFileTool};
pub use git::{GitBranchTool, GitCommitTool, GitDiffTool, GitLogTool, GitStatusTool};
pub use grep::GrepTool;
pub use python::ExecutePythonTool;
pub use sandbox::{SandboxConfig, SandboxExecuteTool};
pub use shell::ExecuteCommandTool;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::safety::{GateViolation, SafetyGate};

/// Tool category used for prompt grouping and admission decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    File,
    Code,
    Git,
    Web,
    Search,
}

/// Whether a tool needs network access. Offline mode refuses `Remote` tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTag {
    Local,
    Remote,
}

/// Tool specification: name, description for the LLM, JSON schema for args.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Universal result contract across all tools.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<Value>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            metadata: None,
        }
    }

    pub fn ok_with_metadata(output: impl Into<Value>, metadata: Value) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            metadata: Some(metadata),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            metadata: None,
        }
    }

    fn with_duration(mut self, seconds: f64) -> Self {
        let mut meta = self
            .metadata
            .take()
            .and_then(|m| m.as_object().cloned())
            .unwrap_or_default();
        meta.insert("duration_seconds".into(), serde_json::json!(seconds));
        self.metadata = Some(Value::Object(meta));
        self
    }
}

/// Errors from validating or dispatching a tool call.
///
/// Operational failures inside a tool's contract (missing file, non-zero
/// exit) come back as `ToolResult { success: false, .. }`, not as errors.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid arguments: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Policy(#[from] GateViolation),
    #[error("execution error: {0}")]
    Execution(String),
}

/// A single tool callable by the workflow engine.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within a registry (e.g. `"read_file"`).
    fn name(&self) -> &str;

    fn category(&self) -> ToolCategory;

    fn network(&self) -> NetworkTag {
        NetworkTag::Local
    }

    /// Specification used to describe the tool to the LLM.
    fn spec(&self) -> ToolSpec;

    /// Executes the tool. Invalid arguments and gate rejections are errors;
    /// in-contract failures return `ToolResult { success: false, .. }`.
    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError>;
}

/// Registry of tools by name.
///
/// Built per task by the orchestrator; the execute node dispatches decoded
/// actions through it. Registration enforces offline-mode admission.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    offline: bool,
}

impl ToolRegistry {
    pub fn new(offline: bool) -> Self {
        Self {
            tools: HashMap::new(),
            offline,
        }
    }

    /// Registers a tool. Returns false (and skips) when offline mode refuses
    /// a remote tool; replaces any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> bool {
        if self.offline && tool.network() == NetworkTag::Remote {
            tracing::warn!(tool = tool.name(), "offline mode: remote tool not registered");
            return false;
        }
        self.tools.insert(tool.name().to_string(), tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Dispatches a call and stamps the measured wall-clock into the result
    /// metadata.
    pub async fn execute(&self, name: &str, args: Value) -> Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let started = Instant::now();
        let result = tool.execute(args).await?;
        let elapsed = started.elapsed().as_secs_f64();
        tracing::debug!(tool = name, success = result.success, elapsed, "tool executed");
        Ok(result.with_duration(elapsed))
    }
}

/// Registers the standard tool set against one gate/workspace pair.
///
/// `sandbox` is optional; when `None` the sandbox executor is not offered.
pub fn register_default_tools(
    registry: &mut ToolRegistry,
    gate: Arc<SafetyGate>,
    sandbox: Option<SandboxConfig>,
) {
    registry.register(Arc::new(ReadFileTool::new(gate.clone())));
    registry.register(Arc::new(WriteFileTool::new(gate.clone())));
    registry.register(Arc::new(ListDirectoryTool::new(gate.clone())));
    registry.register(Arc::new(SearchFilesTool::new(gate.clone())));
    registry.register(Arc::new(GrepTool::new(gate.clone())));
    registry.register(Arc::new(ExecuteCommandTool::new(gate.clone())));
    registry.register(Arc::new(ExecutePythonTool::new(gate.clone())));
    registry.register(Arc::new(GitStatusTool::new(gate.clone())));
    registry.register(Arc::new(GitDiffTool::new(gate.clone())));
    registry.register(Arc::new(GitLogTool::new(gate.clone())));
    registry.register(Arc::new(GitBranchTool::new(gate.clone())));
    registry.register(Arc::new(GitCommitTool::new(gate.clone())));
    if let Some(cfg) = sandbox {
        registry.register(Arc::new(SandboxExecuteTool::new(gate, cfg)));
    }
}
