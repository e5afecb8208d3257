//! Grep tool: search file contents under the workspace.
//!
//! Pure-Rust implementation using `regex` for line matching, `walkdir` for
//! traversal, and `glob::Pattern` for the file filter. Literal mode escapes
//! the pattern before compiling. Binary files (null byte sniff) and files
//! that cannot be read are skipped.

use std::sync::Arc;

use async_trait::async_trait;
use glob::Pattern;
use regex::RegexBuilder;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::safety::{AccessMode, SafetyGate};
use crate::tools::{Tool, ToolCategory, ToolError, ToolResult, ToolSpec};

pub const TOOL_GREP: &str = "grep";

const DEFAULT_MAX_MATCHES: usize = 100;

/// Max bytes per matched line before truncation (char-boundary safe).
const MAX_LINE_LENGTH: usize = 2000;

/// Searches file contents by pattern under the workspace.
pub struct GrepTool {
    gate: Arc<SafetyGate>,
}

impl GrepTool {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self { gate }
    }
}

fn truncate_line(line: &str) -> String {
    if line.len() <= MAX_LINE_LENGTH {
        return line.to_string();
    }
    let mut end = MAX_LINE_LENGTH;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        TOOL_GREP
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Search
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GREP.to_string(),
            description: Some(
                "Search file contents. Pattern is a regex unless regex=false \
                 (literal). Optional file_glob filter, case sensitivity, and \
                 context_lines around each match. Capped at max_matches."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Search pattern." },
                    "file_glob": { "type": "string", "description": "Glob filter on relative paths (e.g. '*.rs')." },
                    "case_sensitive": { "type": "boolean", "default": true },
                    "regex": { "type": "boolean", "description": "Treat pattern as regex; literal when false.", "default": true },
                    "max_matches": { "type": "integer", "default": DEFAULT_MAX_MATCHES },
                    "context_lines": { "type": "integer", "default": 0 }
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
        let file_glob = args.get("file_glob").and_then(|v| v.as_str());
        let case_sensitive = args
            .get("case_sensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let use_regex = args.get("regex").and_then(|v| v.as_bool()).unwrap_or(true);
        let max_matches = args
            .get("max_matches")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_MATCHES);
        let context_lines = args
            .get("context_lines")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(0);

        let root = self.gate.check_file_access(".", AccessMode::Read)?;

        let source = if use_regex {
            pattern_param.to_string()
        } else {
            regex::escape(pattern_param)
        };
        let re = RegexBuilder::new(&source)
            .case_insensitive(!case_sensitive)
            .build()
            .map_err(|e| ToolError::InvalidInput(format!("bad pattern: {e}")))?;
        let glob_filter = match file_glob {
            Some(g) => Some(
                Pattern::new(g)
                    .map_err(|e| ToolError::InvalidInput(format!("bad file_glob: {e}")))?,
            ),
            None => None,
        };

        let mut matches = Vec::new();
        let mut truncated = false;
        'walk: for entry in WalkDir::new(&root)
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
            if let Some(ref g) = glob_filter {
                let file_name = entry.file_name().to_string_lossy();
                if !g.matches(&relative) && !g.matches(&file_name) {
                    continue;
                }
            }
            // Skip unreadable and binary files.
            let Ok(content) = std::fs::read(entry.path()) else {
                continue;
            };
            if content.contains(&0u8) {
                continue;
            }
            let Ok(text) = String::from_utf8(content) else {
                continue;
            };

            let lines: Vec<&str> = text.lines().collect();
            for (idx, line) in lines.iter().enumerate() {
                let Some(m) = re.find(line) else {
                    continue;
                };
                if matches.len() >= max_matches {
                    truncated = true;
                    break 'walk;
                }
                let mut entry_json = json!({
                    "file": relative,
                    "line": idx + 1,
                    "content": truncate_line(line),
                    "start": m.start(),
                    "end": m.end(),
                });
                if context_lines > 0 {
                    let from = idx.saturating_sub(context_lines);
                    let before: Vec<String> =
                        lines[from..idx].iter().map(|l| truncate_line(l)).collect();
                    let to = (idx + 1 + context_lines).min(lines.len());
                    let after: Vec<String> =
                        lines[idx + 1..to].iter().map(|l| truncate_line(l)).collect();
                    entry_json["before"] = json!(before);
                    entry_json["after"] = json!(after);
                }
                matches.push(entry_json);
            }
        }
        let count = matches.len();
        Ok(ToolResult::ok_with_metadata(
            Value::Array(matches),
            json!({ "count": count, "truncated": truncated }),
        ))
    }
}
