//! Protocol-level event types: `type` tag + `data` payload.
//!
//! Serializes as `{"type": "<snake_case>", "data": {...}}`; the envelope
//! (task_id, node, iteration, event_id, timestamp) is applied separately.

use serde::Serialize;
use serde_json::Value;

/// Protocol event: wire shape for one stream event.
///
/// A stream carries exactly one terminal event: `WorkflowComplete` or
/// `WorkflowError`.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProtocolEvent {
    WorkflowStart {
        task: String,
        domain: String,
        max_iterations: u32,
    },
    Classification {
        domain: String,
        confidence: f64,
        reasoning: String,
    },
    PlanCreated {
        plan: Value,
        complexity: String,
    },
    ActionDecided {
        action: String,
        iteration: u32,
        parameters: Value,
    },
    ToolExecuted {
        tool: String,
        params: Value,
        success: bool,
        result: Value,
        error: Option<String>,
    },
    LlmResponse {
        node: String,
        iteration: u32,
        preview: String,
        thinking: Option<String>,
    },
    NodeExecuted {
        node: String,
        iteration: u32,
        status: String,
        should_continue: bool,
    },
    SubTaskStart {
        subtask_id: String,
        agent_name: String,
    },
    CodeChunk {
        subtask_id: String,
        content: String,
    },
    SubTaskComplete {
        subtask_id: String,
        success: bool,
        duration_seconds: f64,
    },
    WorkflowComplete {
        success: bool,
        output: Value,
        iterations: u32,
        metadata: Value,
    },
    WorkflowError {
        error_type: String,
        message: String,
    },
    TaskComplete {
        task_id: String,
        total_duration_seconds: f64,
    },
}

impl ProtocolEvent {
    /// Serializes this event to a JSON object (type + data only; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Returns true for the two terminal event kinds.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProtocolEvent::WorkflowComplete { .. } | ProtocolEvent::WorkflowError { .. }
        )
    }
}
