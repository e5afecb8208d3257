//! Workflow state and satellite types.
//!
//! `WorkflowState` is the engine's working set: a single mutable value threaded
//! through graph nodes. Nodes receive it by value and return the updated value;
//! sub-agents get a scoped copy, never the original. Mutating methods here
//! uphold the state invariants (append-only tool log, monotone iteration,
//! terminal status stickiness).

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Workflow domain a request is routed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Coding,
    Research,
    Data,
    General,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Coding => "coding",
            Domain::Research => "research",
            Domain::Data => "data",
            Domain::General => "general",
        }
    }
}

impl std::str::FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "coding" => Ok(Domain::Coding),
            "research" => Ok(Domain::Research),
            "data" => Ok(Domain::Data),
            "general" => Ok(Domain::General),
            other => Err(format!("unknown domain: {other}")),
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle status. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Complexity estimate attached to a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
            Complexity::VeryComplex => "very_complex",
        }
    }
}

impl std::str::FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" => Ok(Complexity::Simple),
            "moderate" => Ok(Complexity::Moderate),
            "complex" => Ok(Complexity::Complex),
            "very_complex" => Ok(Complexity::VeryComplex),
            other => Err(format!("unknown complexity: {other}")),
        }
    }
}

/// Intent Router output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub domain: Domain,
    /// Router confidence in [0, 1].
    pub confidence: f64,
    pub reasoning: String,
    pub estimated_complexity: Complexity,
    pub requires_sub_agents: bool,
}

/// One entry of the append-only tool log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Action name as decided by the LLM (e.g. `WRITE_FILE`).
    pub action: String,
    pub parameters: Value,
    pub result: Value,
    pub iteration: u32,
    pub success: bool,
}

/// Timestamped error log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Preview of one LLM response, kept for streaming diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponsePreview {
    pub node: String,
    pub iteration: u32,
    pub preview: String,
    pub thinking: Option<String>,
}

/// Structured plan produced by the plan node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub estimated_steps: usize,
    #[serde(default)]
    pub tools_needed: Vec<String>,
}

impl Plan {
    /// Number of steps the plan expects: explicit estimate or step count.
    pub fn total_steps(&self) -> usize {
        if self.estimated_steps > 0 {
            self.estimated_steps
        } else {
            self.steps.len()
        }
    }
}

/// Number of LLM response previews retained in the context.
const LLM_RESPONSE_WINDOW: usize = 10;

/// Node-to-node working context inside the state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub plan: Option<Plan>,
    /// Action names that succeeded at least once (set semantics).
    pub completed_steps: Vec<String>,
    pub last_action: Option<Value>,
    pub last_tool_execution: Option<Value>,
    /// Last-N previews of LLM responses for streaming.
    pub llm_responses: Vec<LlmResponsePreview>,
    pub classification: Option<Classification>,
    /// Consecutive execute-node JSON parse failures; 3 fails the task.
    pub consecutive_parse_failures: u32,
    pub complexity_score: Option<f64>,
    pub use_sub_agents: bool,
    /// Aggregated sub-agent outcome, set by the spawn node.
    pub sub_agent_results: Option<Value>,
    /// Free-form values handed in by the caller at entry.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// The engine's working set for one task.
///
/// `task_id`, `workspace`, `domain`, `max_iterations`, and `recursion_limit`
/// are fixed at construction; everything else evolves while nodes run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub task_id: String,
    pub task_description: String,
    pub workspace: PathBuf,
    pub domain: Domain,
    pub max_iterations: u32,
    pub recursion_limit: u32,
    pub iteration: u32,
    pub task_status: TaskStatus,
    pub should_continue: bool,
    pub tool_calls: Vec<ToolCallRecord>,
    pub context: WorkflowContext,
    pub errors: Vec<ErrorEntry>,
    pub task_result: Option<String>,
    pub task_error: Option<String>,
}

impl WorkflowState {
    pub fn new(
        task_id: impl Into<String>,
        task_description: impl Into<String>,
        workspace: PathBuf,
        domain: Domain,
        max_iterations: u32,
        recursion_limit: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            task_description: task_description.into(),
            workspace,
            domain,
            max_iterations,
            recursion_limit,
            iteration: 0,
            task_status: TaskStatus::Pending,
            should_continue: true,
            tool_calls: Vec::new(),
            context: WorkflowContext::default(),
            errors: Vec::new(),
            task_result: None,
            task_error: None,
        }
    }

    /// Appends one entry to the tool log and refreshes the streaming mirrors.
    /// Successful actions are added to `completed_steps` once.
    pub fn record_tool_call(&mut self, record: ToolCallRecord) {
        self.context.last_action = Some(serde_json::json!({
            "action": record.action,
            "parameters": record.parameters,
            "iteration": record.iteration,
        }));
        self.context.last_tool_execution = Some(serde_json::json!({
            "action": record.action,
            "params": record.parameters,
            "success": record.success,
            "result": record.result,
            "iteration": record.iteration,
        }));
        if record.success && !self.context.completed_steps.contains(&record.action) {
            self.context.completed_steps.push(record.action.clone());
        }
        self.tool_calls.push(record);
    }

    /// Appends a timestamped error message.
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(ErrorEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    /// Records one LLM response preview, bounded to the last N.
    pub fn record_llm_response(&mut self, preview: LlmResponsePreview) {
        self.context.llm_responses.push(preview);
        let overflow = self
            .context
            .llm_responses
            .len()
            .saturating_sub(LLM_RESPONSE_WINDOW);
        if overflow > 0 {
            self.context.llm_responses.drain(..overflow);
        }
    }

    /// Marks the task completed with a result. No-op once terminal.
    pub fn mark_completed(&mut self, result: impl Into<String>) {
        if self.task_status.is_terminal() {
            return;
        }
        self.task_status = TaskStatus::Completed;
        self.task_result = Some(result.into());
        self.should_continue = false;
    }

    /// Marks the task failed with an error. No-op once terminal.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        if self.task_status.is_terminal() {
            return;
        }
        let error = error.into();
        self.task_status = TaskStatus::Failed;
        self.task_error = Some(error.clone());
        if self.task_result.is_none() {
            self.task_result = Some(error);
        }
        self.should_continue = false;
    }

    /// Increments the iteration counter. Monotone by construction.
    pub fn increment_iteration(&mut self) {
        self.iteration += 1;
    }

    /// Action names of the last `n` tool calls, oldest first.
    pub fn recent_actions(&self, n: usize) -> Vec<&str> {
        let start = self.tool_calls.len().saturating_sub(n);
        self.tool_calls[start..]
            .iter()
            .map(|c| c.action.as_str())
            .collect()
    }

    /// The last `n` tool-call records, oldest first.
    pub fn recent_calls(&self, n: usize) -> &[ToolCallRecord] {
        let start = self.tool_calls.len().saturating_sub(n);
        &self.tool_calls[start..]
    }

    /// Tool calls recorded at or after the given iteration.
    pub fn calls_since_iteration(&self, iteration: u32) -> usize {
        self.tool_calls
            .iter()
            .filter(|c| c.iteration >= iteration)
            .count()
    }

    /// Short diagnostic excerpt for terminal failure messages: the last tool
    /// call and the last LLM response preview.
    pub fn diagnostic_excerpt(&self) -> String {
        let last_call = self
            .tool_calls
            .last()
            .map(|c| format!("last tool call: {} (success={})", c.action, c.success))
            .unwrap_or_else(|| "no tool calls".to_string());
        let last_llm = self
            .context
            .llm_responses
            .last()
            .map(|r| {
                let preview: String = r.preview.chars().take(120).collect();
                format!("last llm response: {preview}")
            })
            .unwrap_or_else(|| "no llm responses".to_string());
        match self.errors.last() {
            Some(entry) => format!("{last_call}; {last_llm}; last error: {}", entry.message),
            None => format!("{last_call}; {last_llm}"),
        }
    }
}

/// Final outcome of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub iterations: u32,
    pub metadata: Value,
}

impl WorkflowResult {
    /// Builds the result from a finished state.
    pub fn from_state(state: &WorkflowState, duration_seconds: f64) -> Self {
        let metadata = serde_json::json!({
            "duration_seconds": duration_seconds,
            "workflow_domain": state.domain.as_str(),
            "task_id": state.task_id,
            "tool_calls": state.tool_calls,
            "errors": state.errors,
            "context": {
                "plan": state.context.plan,
                "completed_steps": state.context.completed_steps,
            },
        });
        Self {
            success: state.task_status == TaskStatus::Completed,
            output: state.task_result.clone(),
            error: state.task_error.clone(),
            iterations: state.iteration,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> WorkflowState {
        WorkflowState::new(
            "t1",
            "write a file",
            PathBuf::from("/tmp/ws"),
            Domain::General,
            10,
            100,
        )
    }

    /// **Scenario**: record_tool_call appends and tracks completed steps once.
    #[test]
    fn tool_log_is_append_only_and_steps_deduped() {
        let mut s = state();
        for i in 0..3 {
            s.record_tool_call(ToolCallRecord {
                action: "WRITE_FILE".into(),
                parameters: serde_json::json!({}),
                result: serde_json::json!({"ok": true}),
                iteration: i,
                success: true,
            });
        }
        assert_eq!(s.tool_calls.len(), 3);
        assert_eq!(s.context.completed_steps, vec!["WRITE_FILE".to_string()]);
        assert!(s.context.last_tool_execution.is_some());
    }

    /// **Scenario**: terminal status is sticky; later marks are no-ops.
    #[test]
    fn terminal_status_is_sticky() {
        let mut s = state();
        s.mark_completed("done");
        s.mark_failed("should not apply");
        assert_eq!(s.task_status, TaskStatus::Completed);
        assert_eq!(s.task_result.as_deref(), Some("done"));
        assert!(s.task_error.is_none());
    }

    /// **Scenario**: failed state keeps result mirroring the error for display.
    #[test]
    fn mark_failed_sets_error_and_result() {
        let mut s = state();
        s.mark_failed("boom");
        assert_eq!(s.task_status, TaskStatus::Failed);
        assert_eq!(s.task_error.as_deref(), Some("boom"));
        assert_eq!(s.task_result.as_deref(), Some("boom"));
        assert!(!s.should_continue);
    }

    /// **Scenario**: recent_actions returns the last N in order.
    #[test]
    fn recent_actions_window() {
        let mut s = state();
        for (i, a) in ["A", "B", "C", "D"].iter().enumerate() {
            s.record_tool_call(ToolCallRecord {
                action: a.to_string(),
                parameters: Value::Null,
                result: Value::Null,
                iteration: i as u32,
                success: false,
            });
        }
        assert_eq!(s.recent_actions(3), vec!["B", "C", "D"]);
        assert_eq!(s.recent_actions(10).len(), 4);
    }

    /// **Scenario**: llm response previews are bounded to the window.
    #[test]
    fn llm_previews_bounded() {
        let mut s = state();
        for i in 0..15 {
            s.record_llm_response(LlmResponsePreview {
                node: "execute".into(),
                iteration: i,
                preview: format!("r{i}"),
                thinking: None,
            });
        }
        assert_eq!(s.context.llm_responses.len(), 10);
        assert_eq!(s.context.llm_responses.first().unwrap().preview, "r5");
    }

    /// **Scenario**: WorkflowResult reflects terminal state.
    #[test]
    fn result_from_state() {
        let mut s = state();
        s.increment_iteration();
        s.mark_completed("all good");
        let r = WorkflowResult::from_state(&s, 1.25);
        assert!(r.success);
        assert_eq!(r.output.as_deref(), Some("all good"));
        assert_eq!(r.iterations, 1);
        assert_eq!(r.metadata["workflow_domain"], "general");
    }

    #[test]
    fn domain_round_trips_from_str() {
        for d in [Domain::Coding, Domain::Research, Domain::Data, Domain::General] {
            assert_eq!(d.as_str().parse::<Domain>().unwrap(), d);
        }
        assert!("video".parse::<Domain>().is_err());
    }
}
