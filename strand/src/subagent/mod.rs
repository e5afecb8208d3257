//! Sub-agents: bounded LLM loops scoped to one sub-task.
//!
//! A sub-agent owns its own context copy, sees only an allow-listed subset of
//! tools, and runs at most `max_iterations` turns under a wall-clock timeout
//! enforced by the pool. Completion is detected by a `TASK_COMPLETE:` prefix
//! or one of the completion phrases in the reply.

mod pool;

pub use pool::{ExecutionResult, ExecutionStatus, SubAgentPool};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json_extract::extract_json;
use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::stream::{EventSender, ProtocolEvent};
use crate::tools::ToolRegistry;

/// Completion marker prefix a sub-agent looks for in replies.
pub const TASK_COMPLETE_MARKER: &str = "TASK_COMPLETE:";

/// Case-insensitive phrases that also count as completion.
const COMPLETION_PHRASES: &[&str] = &["task is complete", "task completed successfully", "all done"];

/// Closed set of sub-agent specializations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubAgentType {
    CodeReader,
    CodeWriter,
    TestRunner,
    Researcher,
    DataAnalyst,
    TaskExecutor,
}

impl SubAgentType {
    pub fn all() -> &'static [SubAgentType] {
        &[
            SubAgentType::CodeReader,
            SubAgentType::CodeWriter,
            SubAgentType::TestRunner,
            SubAgentType::Researcher,
            SubAgentType::DataAnalyst,
            SubAgentType::TaskExecutor,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubAgentType::CodeReader => "code_reader",
            SubAgentType::CodeWriter => "code_writer",
            SubAgentType::TestRunner => "test_runner",
            SubAgentType::Researcher => "researcher",
            SubAgentType::DataAnalyst => "data_analyst",
            SubAgentType::TaskExecutor => "task_executor",
        }
    }

    /// Default tool allowlist per specialization.
    pub fn default_allowed_tools(&self) -> Vec<String> {
        let tools: &[&str] = match self {
            SubAgentType::CodeReader => &["read_file", "list_directory", "search_files", "grep"],
            SubAgentType::CodeWriter => &["read_file", "write_file", "list_directory", "grep"],
            SubAgentType::TestRunner => &["read_file", "execute_command", "execute_python"],
            SubAgentType::Researcher => &["read_file", "list_directory", "search_files", "grep"],
            SubAgentType::DataAnalyst => &["read_file", "execute_python", "search_files"],
            SubAgentType::TaskExecutor => &[
                "read_file",
                "write_file",
                "list_directory",
                "search_files",
                "grep",
                "execute_command",
                "execute_python",
            ],
        };
        tools.iter().map(|t| t.to_string()).collect()
    }
}

impl std::str::FromStr for SubAgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "code_reader" => Ok(SubAgentType::CodeReader),
            "code_writer" => Ok(SubAgentType::CodeWriter),
            "test_runner" => Ok(SubAgentType::TestRunner),
            "researcher" => Ok(SubAgentType::Researcher),
            "data_analyst" => Ok(SubAgentType::DataAnalyst),
            "task_executor" => Ok(SubAgentType::TaskExecutor),
            other => Err(format!("unknown agent type: {other}")),
        }
    }
}

/// Per-agent settings.
#[derive(Debug, Clone)]
pub struct SubAgentConfig {
    pub name: String,
    pub agent_type: SubAgentType,
    pub max_iterations: u32,
    pub timeout_seconds: u64,
    pub allowed_tools: Vec<String>,
    pub temperature: f32,
}

impl SubAgentConfig {
    pub fn for_type(agent_type: SubAgentType, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_type,
            max_iterations: 10,
            timeout_seconds: 300,
            allowed_tools: agent_type.default_allowed_tools(),
            temperature: 0.3,
        }
    }
}

/// Outcome of one sub-agent run (pool wraps this into `ExecutionResult`).
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub success: bool,
    pub result: String,
    pub iterations: u32,
    pub error: Option<String>,
}

/// A bounded LLM loop bound to one sub-task. Created per sub-task and freed
/// after it completes; never reused across tasks.
pub struct SubAgent {
    config: SubAgentConfig,
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    events: EventSender,
}

impl SubAgent {
    pub fn new(
        config: SubAgentConfig,
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            llm,
            registry,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Runs the loop: build prompt → call LLM → execute an allow-listed
    /// action when the reply contains one → check the completion marker →
    /// next iteration. Hitting `max_iterations` fails with an "incomplete"
    /// result. The wall-clock timeout is enforced by the caller.
    pub async fn execute_task(
        &self,
        description: &str,
        task_id: &str,
        parent_context: Option<&Value>,
    ) -> TaskOutcome {
        let mut transcript: Vec<String> = Vec::new();
        let mut iteration: u32 = 0;

        while iteration < self.config.max_iterations {
            let prompt = self.build_prompt(description, iteration, &transcript, parent_context);
            let messages = [
                ChatMessage::system(format!(
                    "You are {}, a specialized {} agent. Work step by step. \
                     When the task is done, reply with a summary starting with '{}'.",
                    self.config.name,
                    self.config.agent_type.as_str(),
                    TASK_COMPLETE_MARKER
                )),
                ChatMessage::user(prompt),
            ];
            let options = ChatOptions::default()
                .with_temperature(self.config.temperature)
                .with_max_tokens(2000);

            let reply = match self.llm.chat_completion(&messages, &options).await {
                Ok(reply) => reply,
                Err(e) => {
                    return TaskOutcome {
                        success: false,
                        result: String::new(),
                        iterations: iteration,
                        error: Some(format!("llm call failed: {e}")),
                    }
                }
            };

            let preview: String = reply.content.chars().take(400).collect();
            self.events
                .emit(ProtocolEvent::CodeChunk {
                    subtask_id: task_id.to_string(),
                    content: preview,
                })
                .await;

            if let Some(summary) = completion_summary(&reply.content) {
                return TaskOutcome {
                    success: true,
                    result: summary,
                    iterations: iteration + 1,
                    error: None,
                };
            }

            // A reply may carry one tool action; execute it when allowed.
            if let Some((action, params)) = parse_action(&reply.content) {
                if self.config.allowed_tools.iter().any(|t| t == &action) {
                    match self.registry.execute(&action, params).await {
                        Ok(result) => transcript.push(format!(
                            "[{action}] success={} output={}",
                            result.success,
                            truncate(&result.output.to_string(), 500),
                        )),
                        Err(e) => transcript.push(format!("[{action}] error: {e}")),
                    }
                } else {
                    transcript.push(format!("[{action}] refused: not in this agent's allowlist"));
                }
            } else {
                transcript.push(truncate(&reply.content, 500));
            }

            iteration += 1;
        }

        TaskOutcome {
            success: false,
            result: format!(
                "Task incomplete after {} iterations",
                self.config.max_iterations
            ),
            iterations: iteration,
            error: Some("max iterations reached".to_string()),
        }
    }

    fn build_prompt(
        &self,
        description: &str,
        iteration: u32,
        transcript: &[String],
        parent_context: Option<&Value>,
    ) -> String {
        let tools = self.config.allowed_tools.join(", ");
        let history = if transcript.is_empty() {
            "none yet".to_string()
        } else {
            transcript.join("\n")
        };
        let context = parent_context
            .map(|c| c.to_string())
            .unwrap_or_else(|| "{}".to_string());
        format!(
            "Task: {description}\n\
             Iteration: {}/{}\n\
             Shared context: {context}\n\
             Available tools: {tools}\n\
             Progress so far:\n{history}\n\
             \n\
             Either respond with ONE tool action as JSON \
             {{\"action\": \"tool_name\", \"parameters\": {{...}}}} or, when \
             the task is finished, a summary starting with '{}'.",
            iteration + 1,
            self.config.max_iterations,
            TASK_COMPLETE_MARKER
        )
    }
}

/// Extracts the completion summary when the reply signals completion.
fn completion_summary(content: &str) -> Option<String> {
    if let Some(pos) = content.find(TASK_COMPLETE_MARKER) {
        return Some(content[pos + TASK_COMPLETE_MARKER.len()..].trim().to_string());
    }
    let lower = content.to_lowercase();
    if COMPLETION_PHRASES.iter().any(|p| lower.contains(p)) {
        return Some(content.trim().to_string());
    }
    None
}

/// Parses a `{action, parameters}` object out of a reply, if present.
fn parse_action(content: &str) -> Option<(String, Value)> {
    let value = extract_json(content).ok()?;
    let action = value.get("action")?.as_str()?.to_string();
    let params = value.get("parameters").cloned().unwrap_or(Value::Null);
    Some((action, params))
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect::<String>() + "…"
    }
}
