//! LLM client abstraction used by every node that talks to a model.
//!
//! Nodes depend on the [`LlmClient`] trait; the production implementation is
//! [`FailoverClient`] (ordered endpoints, health tracking, retry/backoff,
//! response cache) and tests use [`MockLlm`] with scripted replies.

mod adapter;
mod cache;
mod endpoint;
mod failover;
mod mock;

pub use adapter::ModelFamily;
pub use cache::{FsKvStore, KvStore, ResponseCache};
pub use endpoint::{spawn_health_probe, EndpointConfig, EndpointHealth, HealthTracker};
pub use failover::{FailoverClient, RetryPolicy};
pub use mock::MockLlm;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::WorkflowError;

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call sampling options.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 2000,
            top_p: None,
            stop: None,
        }
    }
}

impl ChatOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token usage for one call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Normalized reply: user-visible content with provider wrappers stripped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmReply {
    /// Assistant content after the adapter removed reasoning wrappers.
    pub content: String,
    /// Hidden chain-of-thought extracted by the adapter, when present.
    pub thinking: Option<String>,
    /// Provider tool_calls structure, passed through untouched.
    pub tool_calls: Vec<Value>,
    pub usage: Option<LlmUsage>,
    pub finish_reason: Option<String>,
}

/// LLM call failure split by retry semantics.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Timeout, 5xx, or empty content; the client retries these.
    #[error("transient: {0}")]
    Transient(String),
    /// All retries exhausted across endpoints.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// 4xx; not retried.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<LlmError> for WorkflowError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Transient(m) => WorkflowError::LlmTransient(m),
            LlmError::Unavailable(m) => WorkflowError::LlmUnavailable(m),
            LlmError::BadRequest(m) => WorkflowError::LlmBadRequest(m),
        }
    }
}

/// LLM client: messages in, normalized reply out.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<LlmReply, LlmError>;
}
