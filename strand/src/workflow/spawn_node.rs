//! Spawn node: decompose the task, run sub-agents, aggregate, and finish.
//!
//! Invoked only when the complexity check routed here. Decomposition
//! failures degrade to a single sub-task; the aggregate outcome decides the
//! terminal status. Sub-agent failures never propagate as engine errors.

use std::sync::Arc;

use async_trait::async_trait;

use crate::aggregate::{AggregationStrategy, ResultAggregator};
use crate::decompose::{get_execution_order, ExecutionStrategy, SubTask, TaskDecomposer};
use crate::error::WorkflowError;
use crate::graph::{Next, Node};
use crate::llm::LlmClient;
use crate::state::WorkflowState;
use crate::stream::EventSender;
use crate::subagent::{SubAgentPool, SubAgentType};
use crate::tools::ToolRegistry;

pub const NODE_SPAWN_SUB_AGENTS: &str = "spawn_sub_agents";

pub struct SpawnSubAgentsNode {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    events: EventSender,
    max_parallel: usize,
    aggregation: AggregationStrategy,
}

impl SpawnSubAgentsNode {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        events: EventSender,
        max_parallel: usize,
        aggregation: AggregationStrategy,
    ) -> Self {
        Self {
            llm,
            registry,
            events,
            max_parallel,
            aggregation,
        }
    }
}

#[async_trait]
impl Node<WorkflowState> for SpawnSubAgentsNode {
    fn id(&self) -> &str {
        NODE_SPAWN_SUB_AGENTS
    }

    async fn run(&self, mut state: WorkflowState) -> Result<(WorkflowState, Next), WorkflowError> {
        tracing::info!("spawning sub-agents for complex task");

        let decomposer = TaskDecomposer::new(Arc::clone(&self.llm));
        let context = serde_json::json!({
            "workspace": state.workspace.display().to_string(),
            "domain": state.domain.as_str(),
        });
        let breakdown = decomposer
            .decompose(&state.task_description, &context)
            .await;

        // A breakdown with nothing to run still executes the original task
        // as one sub-task rather than silently doing nothing.
        let subtasks: Vec<SubTask> = if breakdown.subtasks.is_empty() {
            vec![SubTask {
                id: "task_1".to_string(),
                description: state.task_description.clone(),
                agent_type: SubAgentType::TaskExecutor,
                priority: 0,
                dependencies: Vec::new(),
                estimated_iterations: 5,
                context: serde_json::Value::Null,
            }]
        } else {
            breakdown.subtasks.clone()
        };

        let pool = SubAgentPool::new(
            Arc::clone(&self.llm),
            Arc::clone(&self.registry),
            self.events.clone(),
        )
        .with_max_parallel(self.max_parallel);

        let results = match breakdown.execution_strategy {
            ExecutionStrategy::Sequential => {
                let (layers, cycle) = get_execution_order(&subtasks);
                if cycle {
                    state.add_error("dependency cycle detected in decomposition");
                }
                pool.execute_with_dependencies(&subtasks, &layers, &context)
                    .await
            }
            _ => pool.execute_batch(&subtasks, &context).await,
        };

        let aggregator = ResultAggregator::new(Some(Arc::clone(&self.llm)));
        let aggregate = aggregator
            .aggregate(&results, &state.task_description, self.aggregation)
            .await;

        state.context.sub_agent_results = Some(serde_json::json!({
            "success": aggregate.success,
            "success_count": aggregate.success_count,
            "failure_count": aggregate.failure_count,
            "total_subtasks": aggregate.individual_results.len(),
            "duration_seconds": aggregate.total_duration_seconds,
            "summary": aggregate.summary,
            "errors": aggregate.errors,
        }));

        let combined = match aggregate.combined_result {
            serde_json::Value::String(ref s) => s.clone(),
            ref other => other.to_string(),
        };
        if aggregate.success {
            state.mark_completed(combined);
        } else {
            for error in &aggregate.errors {
                state.add_error(error.clone());
            }
            state.mark_failed(format!(
                "Sub-agent execution failed ({}): {}",
                aggregate.summary,
                aggregate.errors.join("; ")
            ));
        }
        Ok((state, Next::End))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::state::{Domain, TaskStatus};
    use std::path::PathBuf;

    fn state() -> WorkflowState {
        WorkflowState::new(
            "t1",
            "build an entire reporting pipeline",
            PathBuf::from("/tmp/ws"),
            Domain::Coding,
            10,
            100,
        )
    }

    fn node(llm: MockLlm) -> SpawnSubAgentsNode {
        SpawnSubAgentsNode::new(
            Arc::new(llm),
            Arc::new(ToolRegistry::new(false)),
            EventSender::null(),
            4,
            AggregationStrategy::Concatenate,
        )
    }

    /// **Scenario**: parallel decomposition runs every sub-task and completes
    /// with the combined result.
    #[tokio::test]
    async fn parallel_breakdown_completes() {
        let llm = MockLlm::scripted(vec![
            // complexity verdict
            r#"{"complexity": "complex", "reasoning": "many parts"}"#.to_string(),
            // breakdown: two independent sub-tasks
            r#"{"subtasks": [
                {"id": "s1", "description": "part one", "agent_type": "task_executor",
                 "priority": 1, "dependencies": [], "estimated_iterations": 1},
                {"id": "s2", "description": "part two", "agent_type": "task_executor",
                 "priority": 1, "dependencies": [], "estimated_iterations": 1}
            ]}"#
            .to_string(),
            // both sub-agents complete on their first turn
            "TASK_COMPLETE: ok-s1".to_string(),
            "TASK_COMPLETE: ok-s2".to_string(),
        ]);
        let (out, next) = node(llm).run(state()).await.unwrap();
        assert_eq!(next, Next::End);
        assert_eq!(out.task_status, TaskStatus::Completed);
        let combined = out.task_result.unwrap();
        assert!(combined.contains("ok-s1") && combined.contains("ok-s2"));
        let summary = out.context.sub_agent_results.unwrap();
        assert_eq!(summary["success_count"], 2);
        assert_eq!(summary["failure_count"], 0);
    }

    /// **Scenario**: an empty decomposition still runs the original task once.
    #[tokio::test]
    async fn empty_breakdown_runs_single_task() {
        let llm = MockLlm::scripted(vec![
            r#"{"complexity": "complex", "reasoning": "r"}"#.to_string(),
            r#"{"subtasks": []}"#.to_string(),
            "TASK_COMPLETE: single run done".to_string(),
        ]);
        let (out, _) = node(llm).run(state()).await.unwrap();
        assert_eq!(out.task_status, TaskStatus::Completed);
        assert!(out.task_result.unwrap().contains("single run done"));
    }

    /// **Scenario**: sub-agent failures fail the task with aggregated errors
    /// but never as an engine error.
    #[tokio::test]
    async fn failures_fail_task_with_detail() {
        let llm = MockLlm::scripted(vec![
            r#"{"complexity": "complex", "reasoning": "r"}"#.to_string(),
            r#"{"subtasks": [
                {"id": "s1", "description": "one", "agent_type": "task_executor",
                 "priority": 1, "dependencies": [], "estimated_iterations": 1}
            ]}"#
            .to_string(),
            // Sub-agent never completes within its single iteration.
            "still working".to_string(),
        ]);
        let (out, _) = node(llm).run(state()).await.unwrap();
        assert_eq!(out.task_status, TaskStatus::Failed);
        assert!(out.task_error.unwrap().contains("Sub-agent execution failed"));
        assert!(!out.errors.is_empty());
    }
}
