//! Plan node: analyze the task and produce a structured plan.
//!
//! Trivial conversational inputs (short greetings) complete immediately with
//! a canned response and zero tool calls. An unparseable plan also completes
//! with a "please be more specific" result; only an unreachable LLM fails the
//! task here.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkflowError;
use crate::graph::{Next, Node};
use crate::json_extract::extract_json;
use crate::llm::{ChatMessage, ChatOptions, LlmClient, LlmError};
use crate::state::{LlmResponsePreview, Plan, TaskStatus, WorkflowState};
use crate::stream::{EventSender, ProtocolEvent};

use super::prompts::plan_prompt;

pub const NODE_PLAN: &str = "plan";

const GREETING_KEYWORDS: &[&str] = &["hello", "hi", "hey", "greetings"];

/// Maximum length for a message to count as a bare greeting.
const GREETING_MAX_LEN: usize = 20;

pub struct PlanNode {
    llm: Arc<dyn LlmClient>,
    events: EventSender,
}

impl PlanNode {
    pub fn new(llm: Arc<dyn LlmClient>, events: EventSender) -> Self {
        Self { llm, events }
    }
}

fn is_greeting(task: &str) -> bool {
    let lower = task.trim().to_lowercase();
    lower.len() < GREETING_MAX_LEN && GREETING_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[async_trait]
impl Node<WorkflowState> for PlanNode {
    fn id(&self) -> &str {
        NODE_PLAN
    }

    async fn run(&self, mut state: WorkflowState) -> Result<(WorkflowState, Next), WorkflowError> {
        tracing::info!(task = %state.task_description, "planning task");
        state.iteration = 0;
        state.context.completed_steps.clear();

        if is_greeting(&state.task_description) {
            tracing::info!("greeting detected; completing immediately");
            state.mark_completed("Hello! How can I help you today?");
            return Ok((state, Next::Continue));
        }

        state.task_status = TaskStatus::InProgress;

        let messages = [
            ChatMessage::system("You are a task planning assistant. Respond with only JSON."),
            ChatMessage::user(plan_prompt(&state)),
        ];
        let options = ChatOptions::default()
            .with_temperature(0.3)
            .with_max_tokens(1000);

        let reply = match self.llm.chat_completion(&messages, &options).await {
            Ok(reply) => reply,
            Err(LlmError::BadRequest(m)) => {
                // Non-retryable; fails the task at the engine level.
                return Err(WorkflowError::LlmBadRequest(m));
            }
            Err(e) => {
                let message = format!(
                    "Planning failed: the LLM backend is unreachable ({e}). \
                     Check the configured endpoints."
                );
                state.add_error(message.clone());
                state.mark_failed(message);
                return Ok((state, Next::Continue));
            }
        };

        state.record_llm_response(LlmResponsePreview {
            node: NODE_PLAN.to_string(),
            iteration: 0,
            preview: reply.content.chars().take(500).collect(),
            thinking: reply.thinking.clone(),
        });

        match extract_json(&reply.content)
            .and_then(|v| {
                serde_json::from_value::<Plan>(v)
                    .map_err(|e| WorkflowError::ParseFailure(e.to_string()))
            }) {
            Ok(plan) => {
                tracing::info!(task_type = %plan.task_type, steps = plan.steps.len(), "plan created");
                let complexity = state
                    .context
                    .classification
                    .as_ref()
                    .map(|c| c.estimated_complexity.as_str())
                    .unwrap_or("moderate");
                self.events
                    .emit(ProtocolEvent::PlanCreated {
                        plan: serde_json::to_value(&plan).unwrap_or_default(),
                        complexity: complexity.to_string(),
                    })
                    .await;
                let conversational = plan.task_type == "conversational";
                state.context.plan = Some(plan);
                if conversational {
                    tracing::info!("conversational task; completing");
                    state.mark_completed(
                        "I'm ready to assist. Let me know what specific task you need help with.",
                    );
                }
            }
            Err(e) => {
                // An unusable plan means the request itself was too vague.
                tracing::warn!(error = %e, "plan response unparseable; completing as conversational");
                state.mark_completed(
                    "I'm ready to help. Please provide more specific details about \
                     what you'd like me to do.",
                );
            }
        }
        Ok((state, Next::Continue))
    }
}
