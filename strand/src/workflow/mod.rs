//! Workflow engine: the plan → check_complexity → (spawn_sub_agents |
//! execute → reflect ⟲) state machine.
//!
//! ```text
//! START → plan → check_complexity
//! check_complexity → (complex?) → spawn_sub_agents → END
//! check_complexity → (else)     → execute
//! execute → reflect
//! reflect → (continue?) → execute
//! reflect → (else)      → END
//! ```
//!
//! A fresh `Workflow` is built per task; nothing is shared across tasks
//! except the injected LLM client and tool registry.

mod complexity_node;
mod execute_node;
mod limits;
mod plan_node;
mod prompts;
mod reflect_node;
mod spawn_node;

pub use complexity_node::{ComplexityNode, NODE_CHECK_COMPLEXITY};
pub use execute_node::{ExecuteNode, NODE_EXECUTE};
pub use limits::{limits_for, IterationLimits};
pub use plan_node::{PlanNode, NODE_PLAN};
pub use reflect_node::{NODE_REFLECT, ReflectNode};
pub use spawn_node::{SpawnSubAgentsNode, NODE_SPAWN_SUB_AGENTS};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::aggregate::AggregationStrategy;
use crate::error::WorkflowError;
use crate::graph::{CompilationError, CompiledGraph, RunObserver, StateGraph, END, START};
use crate::llm::LlmClient;
use crate::state::{Domain, WorkflowResult, WorkflowState};
use crate::stream::{EventSender, ProtocolEvent};
use crate::tools::ToolRegistry;

/// Per-workflow policy knobs.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub domain: Domain,
    pub max_iterations: u32,
    pub recursion_limit: u32,
    pub sub_agents_enabled: bool,
    pub complexity_threshold: f64,
    pub max_parallel: usize,
    pub aggregation: AggregationStrategy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            domain: Domain::General,
            max_iterations: 10,
            recursion_limit: 100,
            sub_agents_enabled: false,
            complexity_threshold: 0.7,
            max_parallel: 5,
            aggregation: AggregationStrategy::Concatenate,
        }
    }
}

/// Emits `node_executed` after every node.
struct NodeEventObserver {
    events: EventSender,
}

#[async_trait]
impl RunObserver<WorkflowState> for NodeEventObserver {
    async fn on_node_end(&self, node_id: &str, state: &WorkflowState) {
        self.events
            .emit(ProtocolEvent::NodeExecuted {
                node: node_id.to_string(),
                iteration: state.iteration,
                status: state.task_status.as_str().to_string(),
                should_continue: state.should_continue,
            })
            .await;
    }
}

/// One compiled workflow instance, bound to a task's event sender.
pub struct Workflow {
    compiled: CompiledGraph<WorkflowState>,
    events: EventSender,
    config: WorkflowConfig,
}

impl Workflow {
    /// Builds and compiles the graph for one task.
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        events: EventSender,
        config: WorkflowConfig,
    ) -> Result<Self, CompilationError> {
        let plan = PlanNode::new(Arc::clone(&llm), events.clone());
        let check = ComplexityNode::new(
            Arc::clone(&llm),
            config.sub_agents_enabled,
            config.complexity_threshold,
        );
        let execute = ExecuteNode::new(Arc::clone(&llm), Arc::clone(&registry), events.clone());
        let reflect = ReflectNode::new();
        let spawn = SpawnSubAgentsNode::new(
            llm,
            registry,
            events.clone(),
            config.max_parallel,
            config.aggregation,
        );

        let mut graph =
            StateGraph::<WorkflowState>::new().with_transition_limit(config.recursion_limit);
        graph
            .add_node(NODE_PLAN, Arc::new(plan))
            .add_node(NODE_CHECK_COMPLEXITY, Arc::new(check))
            .add_node(NODE_EXECUTE, Arc::new(execute))
            .add_node(NODE_REFLECT, Arc::new(reflect))
            .add_node(NODE_SPAWN_SUB_AGENTS, Arc::new(spawn))
            .add_edge(START, NODE_PLAN)
            .add_edge(NODE_EXECUTE, NODE_REFLECT)
            .add_edge(NODE_SPAWN_SUB_AGENTS, END);

        // Planning may terminate the task (greeting, conversational, failure).
        graph.add_conditional_edges(
            NODE_PLAN,
            Arc::new(|s: &WorkflowState| {
                if s.task_status.is_terminal() {
                    END.to_string()
                } else {
                    NODE_CHECK_COMPLEXITY.to_string()
                }
            }),
            None,
        );
        graph.add_conditional_edges(
            NODE_CHECK_COMPLEXITY,
            Arc::new(|s: &WorkflowState| {
                if s.context.use_sub_agents {
                    NODE_SPAWN_SUB_AGENTS.to_string()
                } else {
                    NODE_EXECUTE.to_string()
                }
            }),
            None,
        );
        graph.add_conditional_edges(
            NODE_REFLECT,
            Arc::new(|s: &WorkflowState| {
                if s.should_continue && !s.task_status.is_terminal() {
                    NODE_EXECUTE.to_string()
                } else {
                    END.to_string()
                }
            }),
            None,
        );

        Ok(Self {
            compiled: graph.compile()?,
            events,
            config,
        })
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Runs the workflow to completion, emitting `workflow_start`, progress
    /// events, and exactly one terminal event (`workflow_complete` or
    /// `workflow_error`).
    pub async fn run(&self, state: WorkflowState) -> WorkflowResult {
        let started = Instant::now();
        self.events
            .emit(ProtocolEvent::WorkflowStart {
                task: state.task_description.clone(),
                domain: state.domain.as_str().to_string(),
                max_iterations: state.max_iterations,
            })
            .await;

        let observer = NodeEventObserver {
            events: self.events.clone(),
        };
        let cancel = self.events.cancel_token();
        let iterations_hint = state.iteration;
        let outcome = self
            .compiled
            .invoke_observed(state, Some(&observer), Some(&cancel))
            .await;
        let duration = started.elapsed().as_secs_f64();

        match outcome {
            Ok(final_state) => {
                let result = WorkflowResult::from_state(&final_state, duration);
                tracing::info!(
                    success = result.success,
                    iterations = result.iterations,
                    duration,
                    "workflow finished"
                );
                self.events
                    .emit(ProtocolEvent::WorkflowComplete {
                        success: result.success,
                        output: serde_json::to_value(&result.output).unwrap_or_default(),
                        iterations: result.iterations,
                        metadata: result.metadata.clone(),
                    })
                    .await;
                result
            }
            Err(e) => {
                tracing::error!(error = %e, "workflow failed");
                self.events
                    .emit(ProtocolEvent::WorkflowError {
                        error_type: e.kind().to_string(),
                        message: e.to_string(),
                    })
                    .await;
                WorkflowResult {
                    success: false,
                    output: None,
                    error: Some(format!("{}: {e}", e.kind())),
                    iterations: iterations_hint,
                    metadata: serde_json::json!({ "duration_seconds": duration }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::safety::{SafetyGate, SafetyPolicy};
    use crate::tools::register_default_tools;
    use std::path::PathBuf;

    fn workflow_with(
        llm: MockLlm,
        workspace: &std::path::Path,
        events: EventSender,
    ) -> (Workflow, WorkflowState) {
        let gate = Arc::new(SafetyGate::new(SafetyPolicy::default(), workspace));
        let mut registry = ToolRegistry::new(false);
        register_default_tools(&mut registry, gate, None);
        let config = WorkflowConfig::default();
        let workflow = Workflow::new(
            Arc::new(llm),
            Arc::new(registry),
            events,
            config,
        )
        .expect("workflow compiles");
        let state = WorkflowState::new(
            "t1",
            "create greeting.txt with a greeting",
            PathBuf::from(workspace),
            Domain::General,
            10,
            100,
        );
        (workflow, state)
    }

    /// **Scenario**: plan → execute (write) → execute (complete) runs end to
    /// end and reports success.
    #[tokio::test]
    async fn plan_execute_complete_flow() {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockLlm::scripted(vec![
            r#"{"task_type": "file_organization", "steps": ["write file"], "estimated_steps": 2, "tools_needed": ["filesystem"]}"#.to_string(),
            r#"{"action": "WRITE_FILE", "parameters": {"file_path": "greeting.txt", "content": "hello there"}}"#.to_string(),
            r#"{"action": "COMPLETE", "parameters": {"summary": "file written"}}"#.to_string(),
        ]);
        let (workflow, state) = workflow_with(llm, dir.path(), EventSender::null());
        let result = workflow.run(state).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.output.as_deref(), Some("file written"));
        assert!(dir.path().join("greeting.txt").exists());
    }

    /// **Scenario**: the stream carries workflow_start first and exactly one
    /// terminal event last.
    #[tokio::test]
    async fn stream_has_exactly_one_terminal_event() {
        let dir = tempfile::tempdir().unwrap();
        let (events, mut rx) = EventSender::channel(64);
        let llm = MockLlm::scripted(vec![
            r#"{"task_type": "mixed", "steps": ["s"], "estimated_steps": 1, "tools_needed": []}"#.to_string(),
            r#"{"action": "COMPLETE", "parameters": {"summary": "done"}}"#.to_string(),
        ]);
        let (workflow, state) = workflow_with(llm, dir.path(), events);
        let result = workflow.run(state).await;
        assert!(result.success);

        let mut collected = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            collected.push(ev);
        }
        assert!(matches!(
            collected.first(),
            Some(ProtocolEvent::WorkflowStart { .. })
        ));
        let terminal_count = collected.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminal_count, 1);
        assert!(collected.last().unwrap().is_terminal());
    }

    /// **Scenario**: a plan-time 4xx produces exactly one workflow_error
    /// terminal event and a failed result.
    #[tokio::test]
    async fn plan_bad_request_emits_workflow_error() {
        let dir = tempfile::tempdir().unwrap();
        let (events, mut rx) = EventSender::channel(64);
        let llm = MockLlm::fixed("unused");
        llm.push_bad_request("model rejected");
        let (workflow, state) = workflow_with(llm, dir.path(), events);
        let result = workflow.run(state).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("LLMBadRequest"));

        let mut errors = 0;
        let mut completes = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                ProtocolEvent::WorkflowError { .. } => errors += 1,
                ProtocolEvent::WorkflowComplete { .. } => completes += 1,
                _ => {}
            }
        }
        assert_eq!(errors, 1);
        assert_eq!(completes, 0);
    }
}
