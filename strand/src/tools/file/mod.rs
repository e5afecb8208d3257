//! File tools: read, write, list, and glob search under the workspace.
//!
//! Every path parameter goes through the safety gate, which canonicalizes it
//! under the workspace and applies the protected-path policy to writes.

mod search;

pub use search::SearchFilesTool;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::safety::{AccessMode, SafetyGate};
use crate::tools::{Tool, ToolCategory, ToolError, ToolResult, ToolSpec};

pub const TOOL_READ_FILE: &str = "read_file";
pub const TOOL_WRITE_FILE: &str = "write_file";
pub const TOOL_LIST_DIRECTORY: &str = "list_directory";

/// Default read size cap: 10 MiB.
const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;

/// Default recursion depth for directory listing.
const DEFAULT_MAX_DEPTH: usize = 3;

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidInput(format!("missing {key}")))
}

/// Reads text content of a file under the workspace.
///
/// Refuses binary content (UTF-8 decode failure) and files over `max_size`
/// as in-contract failures.
pub struct ReadFileTool {
    gate: Arc<SafetyGate>,
}

impl ReadFileTool {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        TOOL_READ_FILE
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_READ_FILE.to_string(),
            description: Some(
                "Read text content of a file. Path relative to the workspace. \
                 Refuses binary files and files over max_size (default 10 MiB)."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "File path relative to the workspace." },
                    "max_size": { "type": "integer", "description": "Size cap in bytes.", "default": DEFAULT_MAX_SIZE }
                },
                "required": ["file_path"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let path_param = require_str(&args, "file_path")?;
        let max_size = args
            .get("max_size")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_SIZE);
        let path = self.gate.check_file_access(path_param, AccessMode::Read)?;

        if !path.exists() {
            return Ok(ToolResult::fail(format!("file not found: {path_param}")));
        }
        if path.is_dir() {
            return Ok(ToolResult::fail(format!(
                "is a directory, not a file: {path_param}"
            )));
        }
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ToolError::Execution(format!("stat failed: {e}")))?;
        if meta.len() > max_size {
            return Ok(ToolResult::fail(format!(
                "file too large: {} bytes (max {max_size})",
                meta.len()
            )));
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::Execution(format!("read failed: {e}")))?;
        match String::from_utf8(bytes) {
            Ok(content) => Ok(ToolResult::ok_with_metadata(
                content,
                json!({ "path": path_param, "size": meta.len() }),
            )),
            Err(_) => Ok(ToolResult::fail(format!(
                "binary file refused: {path_param}"
            ))),
        }
    }
}

/// Writes text content to a file under the workspace.
///
/// Parent directories are created when `create_dirs` is set; otherwise the
/// parent must already exist.
pub struct WriteFileTool {
    gate: Arc<SafetyGate>,
}

impl WriteFileTool {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        TOOL_WRITE_FILE
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_WRITE_FILE.to_string(),
            description: Some(
                "Write text content to a file. Path relative to the workspace; \
                 protected paths are refused. Set create_dirs to create parents."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_path": { "type": "string", "description": "Target path relative to the workspace." },
                    "content": { "type": "string", "description": "Text content to write." },
                    "create_dirs": { "type": "boolean", "description": "Create missing parent directories.", "default": false }
                },
                "required": ["file_path", "content"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let path_param = require_str(&args, "file_path")?;
        let content = require_str(&args, "content")?;
        let create_dirs = args
            .get("create_dirs")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let path = self.gate.check_file_access(path_param, AccessMode::Write)?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if create_dirs {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| ToolError::Execution(format!("create dirs failed: {e}")))?;
                } else {
                    return Ok(ToolResult::fail(format!(
                        "parent directory does not exist: {path_param} (pass create_dirs)"
                    )));
                }
            }
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::Execution(format!("write failed: {e}")))?;
        let bytes = content.len();
        Ok(ToolResult::ok_with_metadata(
            format!("wrote {bytes} bytes to {path_param}"),
            json!({ "path": path_param, "bytes_written": bytes }),
        ))
    }
}

/// Lists directory entries under the workspace.
///
/// Entries whose stat fails are skipped. Recursive listing is bounded by
/// `max_depth` (default 3).
pub struct ListDirectoryTool {
    gate: Arc<SafetyGate>,
}

impl ListDirectoryTool {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        TOOL_LIST_DIRECTORY
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::File
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_LIST_DIRECTORY.to_string(),
            description: Some(
                "List directory contents as {name, type, size}. \
                 Optional recursive walk bounded by max_depth (default 3)."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory relative to the workspace.", "default": "." },
                    "recursive": { "type": "boolean", "default": false },
                    "max_depth": { "type": "integer", "default": DEFAULT_MAX_DEPTH }
                }
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let path_param = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let recursive = args
            .get("recursive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let max_depth = args
            .get("max_depth")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_DEPTH);
        let path = self.gate.check_file_access(path_param, AccessMode::Read)?;

        if !path.is_dir() {
            return Ok(ToolResult::fail(format!("not a directory: {path_param}")));
        }

        let depth = if recursive { max_depth } else { 1 };
        let mut entries = Vec::new();
        for entry in WalkDir::new(&path)
            .min_depth(1)
            .max_depth(depth)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let Ok(meta) = entry.metadata() else {
                continue; // skip entries whose stat fails
            };
            let name = entry
                .path()
                .strip_prefix(&path)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            entries.push(json!({
                "name": name,
                "type": if meta.is_dir() { "directory" } else { "file" },
                "size": meta.len(),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        let count = entries.len();
        Ok(ToolResult::ok_with_metadata(
            Value::Array(entries),
            json!({ "path": path_param, "count": count }),
        ))
    }
}
