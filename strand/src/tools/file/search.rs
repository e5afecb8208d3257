//! Glob search tool: find files under the workspace by pattern.
//!
//! Recursive walk with `walkdir`, filename matching with `glob::Pattern`.
//! Results are workspace-relative paths, capped at `max_results` with a
//! `truncated` flag when the cap hits.

use std::sync::Arc;

use async_trait::async_trait;
use glob::Pattern;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::safety::{AccessMode, SafetyGate};
use crate::tools::{Tool, ToolCategory, ToolError, ToolResult, ToolSpec};

pub const TOOL_SEARCH_FILES: &str = "search_files";

const DEFAULT_MAX_RESULTS: usize = 100;

/// Finds files whose workspace-relative path matches a glob pattern.
pub struct SearchFilesTool {
    gate: Arc<SafetyGate>,
}

impl SearchFilesTool {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        TOOL_SEARCH_FILES
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Search
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_SEARCH_FILES.to_string(),
            description: Some(
                "Find files by glob pattern (e.g. '*.md', 'src/**/*.rs'). \
                 Returns workspace-relative paths, capped at max_results."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Glob pattern matched against relative paths." },
                    "path": { "type": "string", "description": "Subdirectory to search.", "default": "." },
                    "max_results": { "type": "integer", "default": DEFAULT_MAX_RESULTS }
                },
                "required": ["pattern"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let pattern_param = args
            .get("pattern")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing pattern".to_string()))?;
        let path_param = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        let root = self.gate.check_file_access(path_param, AccessMode::Read)?;
        if !root.is_dir() {
            return Ok(ToolResult::fail(format!("not a directory: {path_param}")));
        }
        let pattern = Pattern::new(pattern_param)
            .map_err(|e| ToolError::InvalidInput(format!("bad glob pattern: {e}")))?;

        let mut matches = Vec::new();
        let mut truncated = false;
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            let file_name = entry.file_name().to_string_lossy();
            if pattern.matches(&relative) || pattern.matches(&file_name) {
                if matches.len() >= max_results {
                    truncated = true;
                    break;
                }
                matches.push(Value::String(relative));
            }
        }
        matches.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        let count = matches.len();
        Ok(ToolResult::ok_with_metadata(
            Value::Array(matches),
            json!({ "pattern": pattern_param, "count": count, "truncated": truncated }),
        ))
    }
}
