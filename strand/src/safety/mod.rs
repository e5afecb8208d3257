//! Tool safety gate: policy checks for every filesystem and shell operation.
//!
//! The gate admits or refuses tool invocations before they run. File targets
//! are canonicalized and confined to the workspace; commands pass a denylist
//! (including a hardcoded dangerous minimum), then an optional allowlist.
//! A violation is non-retryable: callers record it in the tool log with
//! `success=false` and move on.

mod path;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub(crate) use path::resolve_path_under;

/// File access mode the gate distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// Gate rejection. The kind tags mirror the policy surface.
#[derive(Debug, Clone, Error)]
pub enum GateViolation {
    /// Target path resolves outside the workspace.
    #[error("path escape: {path} ({reason})")]
    PathEscape { path: String, reason: String },

    /// Write target matches a protected file or pattern.
    #[error("protected path: {path} (matched {rule})")]
    ProtectedPath { path: String, rule: String },

    /// Command matched the denylist.
    #[error("denied command: {command} (matched {rule})")]
    DeniedCommand { command: String, rule: String },

    /// Allowlist is active and the command matched nothing on it.
    #[error("command not allowlisted: {command}")]
    NotAllowlisted { command: String },
}

impl GateViolation {
    pub fn kind(&self) -> &'static str {
        match self {
            GateViolation::PathEscape { .. } => "path_escape",
            GateViolation::ProtectedPath { .. } => "protected_path",
            GateViolation::DeniedCommand { .. } => "denied_command",
            GateViolation::NotAllowlisted { .. } => "not_allowlisted",
        }
    }
}

/// Configurable gate policy.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    /// Master switch; when false only workspace confinement is enforced.
    pub enabled: bool,
    /// Ordered prefix list; when non-empty, a command must match one entry.
    pub command_allowlist: Vec<String>,
    /// Ordered prefix/substring list, evaluated before the allowlist.
    pub command_denylist: Vec<String>,
    /// Exact workspace-relative paths that must not be written.
    pub protected_files: Vec<String>,
    /// Glob patterns (workspace-relative) that must not be written.
    pub protected_patterns: Vec<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            command_allowlist: Vec::new(),
            command_denylist: Vec::new(),
            protected_files: Vec::new(),
            protected_patterns: Vec::new(),
        }
    }
}

/// Hardcoded dangerous-command minimum; matched against normalized segments
/// regardless of the configured denylist.
const DANGEROUS_PATTERNS: &[(&str, &str)] = &[
    ("rm -rf /", "recursive root deletion"),
    ("rm -fr /", "recursive root deletion"),
    ("mkfs", "filesystem formatting"),
    ("format ", "filesystem formatting"),
    ("diskpart", "filesystem formatting"),
    (":(){", "fork bomb"),
    (":() {", "fork bomb"),
    ("dd if=", "raw block-device write"),
    ("> /dev/sd", "raw block-device write"),
    ("of=/dev/", "raw block-device write"),
];

/// Interpreter `-c` forms refused unless explicitly allowlisted.
const INTERPRETER_DASH_C: &[&str] = &["python -c", "python3 -c", "perl -e", "ruby -e", "node -e", "sh -c", "bash -c"];

/// Remote-download-to-shell pipes.
const PIPE_TO_SHELL: &[&str] = &["curl", "wget"];

/// The tool safety gate bound to one workspace.
///
/// Constructed per task by the orchestrator; all file tools and the shell
/// tools consult it before touching anything.
#[derive(Debug, Clone)]
pub struct SafetyGate {
    policy: SafetyPolicy,
    workspace: PathBuf,
}

impl SafetyGate {
    pub fn new(policy: SafetyPolicy, workspace: impl Into<PathBuf>) -> Self {
        Self {
            policy,
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Validates a file target: canonicalizes under the workspace, and for
    /// writes checks the protected file/pattern sets. Returns the resolved
    /// absolute path on success.
    pub fn check_file_access(
        &self,
        path_param: &str,
        mode: AccessMode,
    ) -> Result<PathBuf, GateViolation> {
        let resolved = resolve_path_under(&self.workspace, path_param)?;
        if !self.policy.enabled || mode == AccessMode::Read {
            return Ok(resolved);
        }

        let relative = resolved
            .strip_prefix(
                self.workspace
                    .canonicalize()
                    .unwrap_or_else(|_| self.workspace.clone()),
            )
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|_| resolved.to_string_lossy().to_string());

        for protected in &self.policy.protected_files {
            if relative == *protected {
                return Err(GateViolation::ProtectedPath {
                    path: relative,
                    rule: protected.clone(),
                });
            }
        }
        for pattern in &self.policy.protected_patterns {
            if let Ok(glob) = glob::Pattern::new(pattern) {
                if glob.matches(&relative) {
                    return Err(GateViolation::ProtectedPath {
                        path: relative,
                        rule: pattern.clone(),
                    });
                }
            }
        }
        Ok(resolved)
    }

    /// Validates a shell command line. Denylist (configured + hardcoded
    /// minimum) is evaluated first; then, when an allowlist is configured,
    /// the command must match one of its prefixes.
    pub fn check_command(&self, command: &str) -> Result<(), GateViolation> {
        if !self.policy.enabled {
            return Ok(());
        }
        let lower = command.to_lowercase();

        for deny in &self.policy.command_denylist {
            if lower.contains(&deny.to_lowercase()) {
                return Err(GateViolation::DeniedCommand {
                    command: command.to_string(),
                    rule: deny.clone(),
                });
            }
        }

        for (pattern, rule) in DANGEROUS_PATTERNS {
            if lower.contains(pattern) {
                return Err(GateViolation::DeniedCommand {
                    command: command.to_string(),
                    rule: (*rule).to_string(),
                });
            }
        }

        // Piping a remote download into a shell.
        for segment in split_segments(&lower) {
            if PIPE_TO_SHELL.iter().any(|d| segment.trim_start().starts_with(d))
                && lower.contains('|')
                && (lower.contains("| sh") || lower.contains("|sh") || lower.contains("| bash") || lower.contains("|bash"))
            {
                return Err(GateViolation::DeniedCommand {
                    command: command.to_string(),
                    rule: "remote download piped to shell".to_string(),
                });
            }
        }

        // Arbitrary interpreter -c invocations unless explicitly whitelisted.
        for form in INTERPRETER_DASH_C {
            if lower.contains(form) && !self.allowlisted(&lower) {
                return Err(GateViolation::DeniedCommand {
                    command: command.to_string(),
                    rule: format!("interpreter invocation: {form}"),
                });
            }
        }

        if !self.policy.command_allowlist.is_empty() && !self.allowlisted(&lower) {
            return Err(GateViolation::NotAllowlisted {
                command: command.to_string(),
            });
        }
        Ok(())
    }

    fn allowlisted(&self, lower: &str) -> bool {
        self.policy
            .command_allowlist
            .iter()
            .any(|prefix| lower.trim_start().starts_with(&prefix.to_lowercase()))
    }
}

/// Splits a command line on `&&`, `||`, `;`, and `|` into segments so each
/// chained command is checked on its own.
fn split_segments(command: &str) -> Vec<&str> {
    command
        .split(|c| c == ';' || c == '|')
        .flat_map(|part| part.split("&&"))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
