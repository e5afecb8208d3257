//! Scripted LLM mock for tests: fixed or queued replies, optional failures,
//! and a call log for assertions.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ChatMessage, ChatOptions, LlmClient, LlmError, LlmReply};

/// One scripted step.
enum ScriptStep {
    Reply(String),
    BadRequest(String),
    Unavailable(String),
}

/// Mock client: pops scripted steps in order, then repeats the fallback reply.
///
/// Records every call's messages so tests can assert on prompts.
pub struct MockLlm {
    script: Mutex<VecDeque<ScriptStep>>,
    fallback: String,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockLlm {
    /// A mock that always answers with `reply`.
    pub fn fixed(reply: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: reply.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A mock that pops `replies` in order, then repeats the last one.
    pub fn scripted(replies: Vec<String>) -> Self {
        let fallback = replies.last().cloned().unwrap_or_default();
        Self {
            script: Mutex::new(replies.into_iter().map(ScriptStep::Reply).collect()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queues a reply at the end of the script.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.script
            .lock()
            .expect("mock script lock")
            .push_back(ScriptStep::Reply(reply.into()));
    }

    /// Queues a BadRequest failure.
    pub fn push_bad_request(&self, message: impl Into<String>) {
        self.script
            .lock()
            .expect("mock script lock")
            .push_back(ScriptStep::BadRequest(message.into()));
    }

    /// Queues an Unavailable failure.
    pub fn push_unavailable(&self, message: impl Into<String>) {
        self.script
            .lock()
            .expect("mock script lock")
            .push_back(ScriptStep::Unavailable(message.into()));
    }

    /// Number of chat calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock calls lock").len()
    }

    /// Messages of the `n`-th call.
    pub fn call(&self, n: usize) -> Option<Vec<ChatMessage>> {
        self.calls.lock().expect("mock calls lock").get(n).cloned()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<LlmReply, LlmError> {
        self.calls
            .lock()
            .expect("mock calls lock")
            .push(messages.to_vec());
        let step = self.script.lock().expect("mock script lock").pop_front();
        match step {
            Some(ScriptStep::Reply(content)) => Ok(LlmReply {
                content,
                ..LlmReply::default()
            }),
            Some(ScriptStep::BadRequest(m)) => Err(LlmError::BadRequest(m)),
            Some(ScriptStep::Unavailable(m)) => Err(LlmError::Unavailable(m)),
            None => Ok(LlmReply {
                content: self.fallback.clone(),
                ..LlmReply::default()
            }),
        }
    }
}
