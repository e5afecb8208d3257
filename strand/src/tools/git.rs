//! Git tools: status, diff, log, branch, and commit against the workspace repo.
//!
//! All subcommands run `git` directly (no shell) with the workspace as the
//! working directory; none of them require network access. Output is parsed
//! into structured JSON where the porcelain formats allow it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::safety::SafetyGate;
use crate::tools::{Tool, ToolCategory, ToolError, ToolResult, ToolSpec};

pub const TOOL_GIT_STATUS: &str = "git_status";
pub const TOOL_GIT_DIFF: &str = "git_diff";
pub const TOOL_GIT_LOG: &str = "git_log";
pub const TOOL_GIT_BRANCH: &str = "git_branch";
pub const TOOL_GIT_COMMIT: &str = "git_commit";

const DEFAULT_LOG_LIMIT: u64 = 10;

/// Runs `git <args>` in the workspace. Returns (stdout, stderr, code).
async fn run_git(
    gate: &SafetyGate,
    args: &[&str],
) -> Result<(String, String, i32), ToolError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(gate.workspace())
        .output()
        .await
        .map_err(|e| ToolError::Execution(format!("git spawn failed: {e}")))?;
    Ok((
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    ))
}

fn git_failure(stderr: &str, code: i32) -> ToolResult {
    ToolResult::fail(format!("git failed (exit {code}): {}", stderr.trim()))
}

/// Parsed `git status --porcelain --branch`.
pub struct GitStatusTool {
    gate: Arc<SafetyGate>,
}

impl GitStatusTool {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        TOOL_GIT_STATUS
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GIT_STATUS.to_string(),
            description: Some(
                "Show working tree status: branch, staged, modified, untracked.".to_string(),
            ),
            input_schema: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(&self, _args: Value) -> Result<ToolResult, ToolError> {
        let (stdout, stderr, code) =
            run_git(&self.gate, &["status", "--porcelain", "--branch"]).await?;
        if code != 0 {
            return Ok(git_failure(&stderr, code));
        }
        let mut branch = String::new();
        let mut staged = Vec::new();
        let mut modified = Vec::new();
        let mut untracked = Vec::new();
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix("## ") {
                branch = rest.split("...").next().unwrap_or(rest).to_string();
                continue;
            }
            if line.len() < 3 {
                continue;
            }
            let (flags, path) = line.split_at(2);
            let path = path.trim().to_string();
            let index = flags.chars().next().unwrap_or(' ');
            let worktree = flags.chars().nth(1).unwrap_or(' ');
            if flags == "??" {
                untracked.push(path);
            } else {
                if index != ' ' {
                    staged.push(path.clone());
                }
                if worktree != ' ' {
                    modified.push(path);
                }
            }
        }
        let clean = staged.is_empty() && modified.is_empty() && untracked.is_empty();
        Ok(ToolResult::ok(json!({
            "branch": branch,
            "staged": staged,
            "modified": modified,
            "untracked": untracked,
            "clean": clean,
        })))
    }
}

/// `git diff` (optionally `--cached` and path-scoped).
pub struct GitDiffTool {
    gate: Arc<SafetyGate>,
}

impl GitDiffTool {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Tool for GitDiffTool {
    fn name(&self) -> &str {
        TOOL_GIT_DIFF
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GIT_DIFF.to_string(),
            description: Some("Show unstaged (or staged with staged=true) changes.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "staged": { "type": "boolean", "default": false },
                    "path": { "type": "string", "description": "Limit the diff to one path." }
                }
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let staged = args.get("staged").and_then(|v| v.as_bool()).unwrap_or(false);
        let path = args.get("path").and_then(|v| v.as_str());
        let mut argv = vec!["diff"];
        if staged {
            argv.push("--cached");
        }
        if let Some(p) = path {
            argv.push("--");
            argv.push(p);
        }
        let (stdout, stderr, code) = run_git(&self.gate, &argv).await?;
        if code != 0 {
            return Ok(git_failure(&stderr, code));
        }
        let changed = stdout
            .lines()
            .filter(|l| l.starts_with("diff --git"))
            .count();
        Ok(ToolResult::ok_with_metadata(
            stdout,
            json!({ "files_changed": changed, "staged": staged }),
        ))
    }
}

/// `git log` with a bounded entry count, parsed into structured entries.
pub struct GitLogTool {
    gate: Arc<SafetyGate>,
}

impl GitLogTool {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Tool for GitLogTool {
    fn name(&self) -> &str {
        TOOL_GIT_LOG
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GIT_LOG.to_string(),
            description: Some("Show recent commits as {hash, author, date, message}.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "default": DEFAULT_LOG_LIMIT }
                }
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LOG_LIMIT);
        let count = format!("-{limit}");
        let (stdout, stderr, code) = run_git(
            &self.gate,
            &["log", &count, "--pretty=format:%H%x1f%an%x1f%aI%x1f%s"],
        )
        .await?;
        if code != 0 {
            return Ok(git_failure(&stderr, code));
        }
        let entries: Vec<Value> = stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.split('\u{1f}');
                Some(json!({
                    "hash": parts.next()?,
                    "author": parts.next()?,
                    "date": parts.next()?,
                    "message": parts.next()?,
                }))
            })
            .collect();
        let count = entries.len();
        Ok(ToolResult::ok_with_metadata(
            Value::Array(entries),
            json!({ "count": count }),
        ))
    }
}

/// `git branch` listing with the current branch flagged.
pub struct GitBranchTool {
    gate: Arc<SafetyGate>,
}

impl GitBranchTool {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Tool for GitBranchTool {
    fn name(&self) -> &str {
        TOOL_GIT_BRANCH
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GIT_BRANCH.to_string(),
            description: Some("List local branches and the current one.".to_string()),
            input_schema: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(&self, _args: Value) -> Result<ToolResult, ToolError> {
        let (stdout, stderr, code) = run_git(&self.gate, &["branch", "--list"]).await?;
        if code != 0 {
            return Ok(git_failure(&stderr, code));
        }
        let mut current = None;
        let mut branches = Vec::new();
        for line in stdout.lines() {
            let name = line.trim_start_matches("* ").trim().to_string();
            if name.is_empty() {
                continue;
            }
            if line.starts_with('*') {
                current = Some(name.clone());
            }
            branches.push(name);
        }
        Ok(ToolResult::ok(json!({
            "current": current,
            "branches": branches,
        })))
    }
}

/// `git commit` with an optional `add_all` pass; rejects empty staging.
pub struct GitCommitTool {
    gate: Arc<SafetyGate>,
}

impl GitCommitTool {
    pub fn new(gate: Arc<SafetyGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Tool for GitCommitTool {
    fn name(&self) -> &str {
        TOOL_GIT_COMMIT
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Git
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GIT_COMMIT.to_string(),
            description: Some(
                "Create a commit from staged changes. Set add_all to stage \
                 everything first; refuses to commit an empty staging area."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "description": "Commit message." },
                    "add_all": { "type": "boolean", "default": false }
                },
                "required": ["message"]
            }),
        }
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, ToolError> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidInput("missing commit message".to_string()))?;
        let add_all = args
            .get("add_all")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if add_all {
            let (_, stderr, code) = run_git(&self.gate, &["add", "-A"]).await?;
            if code != 0 {
                return Ok(git_failure(&stderr, code));
            }
        }

        // diff --cached --quiet exits 1 when something is staged.
        let (_, _, staged_code) = run_git(&self.gate, &["diff", "--cached", "--quiet"]).await?;
        if staged_code == 0 {
            return Ok(ToolResult::fail(
                "nothing staged to commit (pass add_all to stage everything)",
            ));
        }

        let (stdout, stderr, code) = run_git(&self.gate, &["commit", "-m", message]).await?;
        if code != 0 {
            return Ok(git_failure(&stderr, code));
        }
        let (hash, _, _) = run_git(&self.gate, &["rev-parse", "--short", "HEAD"]).await?;
        Ok(ToolResult::ok_with_metadata(
            stdout.trim().to_string(),
            json!({ "commit": hash.trim() }),
        ))
    }
}
