//! Execute node: ask the LLM for one action, run it through the gate and
//! tools, and log the outcome.
//!
//! The LLM answers with a single `{action, parameters}` object decoded into
//! the closed action set below. Policy violations and tool failures become
//! failed tool-log entries rather than engine errors; only a 4xx from the
//! LLM aborts the task from here. Three consecutive JSON parse failures fail
//! the task.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::WorkflowError;
use crate::graph::{Next, Node};
use crate::json_extract::extract_json;
use crate::llm::{ChatMessage, ChatOptions, LlmClient, LlmError};
use crate::state::{LlmResponsePreview, ToolCallRecord, WorkflowState};
use crate::stream::{EventSender, ProtocolEvent};
use crate::tools::{ToolError, ToolRegistry};

use super::prompts::execute_prompt;

pub const NODE_EXECUTE: &str = "execute";

/// Consecutive unparseable responses that fail the task.
const MAX_PARSE_FAILURES: u32 = 3;

/// Synthetic action names recorded for non-action outcomes.
const ACTION_JSON_PARSE_ERROR: &str = "JSON_PARSE_ERROR";
const ACTION_LLM_ERROR: &str = "LLM_ERROR";

/// Maps a decoded action name onto a registry tool.
fn tool_for_action(action: &str) -> Option<&'static str> {
    match action {
        "READ_FILE" => Some("read_file"),
        "WRITE_FILE" => Some("write_file"),
        "LIST_DIRECTORY" => Some("list_directory"),
        "SEARCH_FILES" => Some("search_files"),
        "SEARCH_CODE" => Some("grep"),
        "RUN_COMMAND" => Some("execute_command"),
        "RUN_PYTHON" => Some("execute_python"),
        "GIT_STATUS" => Some("git_status"),
        "GIT_DIFF" => Some("git_diff"),
        "GIT_LOG" => Some("git_log"),
        "GIT_BRANCH" => Some("git_branch"),
        "GIT_COMMIT" => Some("git_commit"),
        "SANDBOX_EXECUTE" => Some("sandbox_execute"),
        _ => None,
    }
}

pub struct ExecuteNode {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    events: EventSender,
}

impl ExecuteNode {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, events: EventSender) -> Self {
        Self {
            llm,
            registry,
            events,
        }
    }

    /// Runs one decoded action and records it in the tool log.
    async fn dispatch(&self, state: &mut WorkflowState, action: String, params: Value) {
        let (success, result, error) = match tool_for_action(&action) {
            None => (
                false,
                Value::Null,
                Some(format!("unknown action: {action}")),
            ),
            Some(tool) => match self.registry.execute(tool, params.clone()).await {
                Ok(result) => {
                    let error = result.error.clone();
                    (result.success, serde_json::to_value(&result).unwrap_or_default(), error)
                }
                Err(ToolError::Policy(violation)) => {
                    let message = format!("policy violation ({}): {violation}", violation.kind());
                    state.add_error(message.clone());
                    (false, Value::Null, Some(message))
                }
                Err(e) => (false, Value::Null, Some(e.to_string())),
            },
        };

        if success {
            tracing::info!(%action, "action succeeded");
        } else {
            tracing::warn!(%action, error = error.as_deref().unwrap_or(""), "action failed");
        }
        self.events
            .emit(ProtocolEvent::ToolExecuted {
                tool: action.clone(),
                params: params.clone(),
                success,
                result: result.clone(),
                error: error.clone(),
            })
            .await;
        state.record_tool_call(ToolCallRecord {
            action,
            parameters: params,
            result,
            iteration: state.iteration,
            success,
        });
    }
}

#[async_trait]
impl Node<WorkflowState> for ExecuteNode {
    fn id(&self) -> &str {
        NODE_EXECUTE
    }

    async fn run(&self, mut state: WorkflowState) -> Result<(WorkflowState, Next), WorkflowError> {
        tracing::info!(iteration = state.iteration, "execute step");

        let messages = [
            ChatMessage::system("You are a task execution assistant. Respond with only JSON."),
            ChatMessage::user(execute_prompt(&state)),
        ];
        let options = ChatOptions::default()
            .with_temperature(0.2)
            .with_max_tokens(2000);

        let reply = match self.llm.chat_completion(&messages, &options).await {
            Ok(reply) => reply,
            Err(LlmError::BadRequest(m)) => return Err(WorkflowError::LlmBadRequest(m)),
            Err(e) => {
                // Surface as a failed tool-call entry; reflect's repeated-
                // failure rule terminates if this keeps happening.
                let message = format!("llm call failed: {e}");
                state.add_error(message.clone());
                state.record_tool_call(ToolCallRecord {
                    action: ACTION_LLM_ERROR.to_string(),
                    parameters: Value::Null,
                    result: Value::Null,
                    iteration: state.iteration,
                    success: false,
                });
                state.increment_iteration();
                return Ok((state, Next::Continue));
            }
        };

        state.record_llm_response(LlmResponsePreview {
            node: NODE_EXECUTE.to_string(),
            iteration: state.iteration,
            preview: reply.content.chars().take(500).collect(),
            thinking: reply.thinking.clone(),
        });
        self.events
            .emit(ProtocolEvent::LlmResponse {
                node: NODE_EXECUTE.to_string(),
                iteration: state.iteration,
                preview: reply.content.chars().take(200).collect(),
                thinking: reply.thinking.clone(),
            })
            .await;

        let decoded = extract_json(&reply.content);
        let action_value = match decoded {
            Ok(v) => {
                state.context.consecutive_parse_failures = 0;
                v
            }
            Err(e) => {
                state.context.consecutive_parse_failures += 1;
                tracing::warn!(
                    failures = state.context.consecutive_parse_failures,
                    "action response unparseable"
                );
                state.record_tool_call(ToolCallRecord {
                    action: ACTION_JSON_PARSE_ERROR.to_string(),
                    parameters: Value::Null,
                    result: json!({ "error": e.to_string() }),
                    iteration: state.iteration,
                    success: false,
                });
                if state.context.consecutive_parse_failures >= MAX_PARSE_FAILURES {
                    state.add_error("unable to parse LLM response as JSON");
                    state.mark_failed(format!(
                        "Unable to parse LLM responses as JSON after {MAX_PARSE_FAILURES} \
                         consecutive attempts; {}",
                        state.diagnostic_excerpt()
                    ));
                }
                state.increment_iteration();
                return Ok((state, Next::Continue));
            }
        };

        let action = action_value
            .get("action")
            .and_then(|a| a.as_str())
            .unwrap_or("UNKNOWN")
            .to_string();
        let params = action_value
            .get("parameters")
            .cloned()
            .unwrap_or_else(|| json!({}));

        self.events
            .emit(ProtocolEvent::ActionDecided {
                action: action.clone(),
                iteration: state.iteration,
                parameters: params.clone(),
            })
            .await;

        if action == "COMPLETE" {
            let summary = params
                .get("summary")
                .and_then(|s| s.as_str())
                .unwrap_or("Task completed")
                .to_string();
            tracing::info!(%summary, "completion requested");
            state.record_tool_call(ToolCallRecord {
                action,
                parameters: params,
                result: json!({ "success": true }),
                iteration: state.iteration,
                success: true,
            });
            state.mark_completed(summary);
            state.increment_iteration();
            return Ok((state, Next::Continue));
        }

        self.dispatch(&mut state, action, params).await;
        state.increment_iteration();
        Ok((state, Next::Continue))
    }
}
