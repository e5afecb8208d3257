//! Workflow execution error types.
//!
//! The closed set of error kinds every node, tool wrapper, and the engine
//! report through. Individual tool and sub-agent errors are absorbed into the
//! workflow state; only `PolicyViolation`, `LlmBadRequest`, and `Internal`
//! propagate out of the engine as task failures.

use thiserror::Error;

use crate::safety::GateViolation;

/// Workflow execution error.
///
/// Returned by graph nodes and by `Workflow::run` when a step fails in a way
/// the state cannot absorb.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Safety gate rejected a tool invocation. Non-retryable.
    #[error("policy violation: {0}")]
    PolicyViolation(#[from] GateViolation),

    /// A tool returned failure within its contract. Recoverable by the engine
    /// deciding the next action.
    #[error("tool failure: {0}")]
    ToolFailure(String),

    /// LLM timeout, 5xx, or empty response; retried by the client.
    #[error("llm transient failure: {0}")]
    LlmTransient(String),

    /// LLM retries exhausted across all endpoints.
    #[error("llm unavailable: {0}")]
    LlmUnavailable(String),

    /// LLM rejected the request (4xx). Non-retryable.
    #[error("llm bad request: {0}")]
    LlmBadRequest(String),

    /// JSON extraction failed after lenient recovery.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// `max_iterations` reached.
    #[error("iteration limit reached after {iterations} iterations")]
    IterationExhausted { iterations: u32 },

    /// Graph transition limit reached. Fatal.
    #[error("graph transition limit reached ({limit} transitions)")]
    RecursionExhausted { limit: u32 },

    /// A sub-agent failed; contained per-subtask and aggregated.
    #[error("sub-agent failure: {0}")]
    SubAgentFailure(String),

    /// Unexpected failure; task is marked failed and the context logged.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// Short kind tag used in terminal `workflow_error` events and messages.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::PolicyViolation(_) => "PolicyViolation",
            WorkflowError::ToolFailure(_) => "ToolFailure",
            WorkflowError::LlmTransient(_) => "LLMTransient",
            WorkflowError::LlmUnavailable(_) => "LLMUnavailable",
            WorkflowError::LlmBadRequest(_) => "LLMBadRequest",
            WorkflowError::ParseFailure(_) => "ParseFailure",
            WorkflowError::IterationExhausted { .. } => "IterationExhausted",
            WorkflowError::RecursionExhausted { .. } => "RecursionExhausted",
            WorkflowError::SubAgentFailure(_) => "SubAgentFailure",
            WorkflowError::Internal(_) => "InternalError",
        }
    }
}
