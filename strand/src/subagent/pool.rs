//! Sub-agent pool: bounded parallel execution of sub-tasks.
//!
//! Each dispatched sub-task acquires a semaphore permit, so at most
//! `max_parallel` run concurrently. A failing or panicking sub-task never
//! cancels its siblings; it becomes `ExecutionResult { success: false }`.
//! Results are returned in input order regardless of completion order.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::decompose::SubTask;
use crate::llm::LlmClient;
use crate::stream::{EventSender, ProtocolEvent};
use crate::tools::ToolRegistry;

use super::{SubAgent, SubAgentConfig};

/// Default concurrency cap.
pub const DEFAULT_MAX_PARALLEL: usize = 5;

/// Sub-task execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Result of one sub-agent execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub subtask_id: String,
    pub agent_name: String,
    pub status: ExecutionStatus,
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub iterations: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    fn failed(subtask_id: &str, agent_name: &str, error: impl Into<String>) -> Self {
        Self {
            subtask_id: subtask_id.to_string(),
            agent_name: agent_name.to_string(),
            status: ExecutionStatus::Failed,
            success: false,
            result: None,
            error: Some(error.into()),
            duration_seconds: 0.0,
            iterations: 0,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Bounded parallel sub-task executor.
pub struct SubAgentPool {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    events: EventSender,
    max_parallel: usize,
    task_timeout: Duration,
}

impl SubAgentPool {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
        events: EventSender,
    ) -> Self {
        Self {
            llm,
            registry,
            events,
            max_parallel: DEFAULT_MAX_PARALLEL,
            task_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Runs a batch concurrently under the permit cap. Results come back in
    /// input order; a failure in one sub-task never cancels the others.
    pub async fn execute_batch(
        &self,
        sub_tasks: &[SubTask],
        parent_context: &Value,
    ) -> Vec<ExecutionResult> {
        if sub_tasks.is_empty() {
            return Vec::new();
        }
        tracing::info!(
            count = sub_tasks.len(),
            max_parallel = self.max_parallel,
            "executing sub-task batch"
        );
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut handles = Vec::with_capacity(sub_tasks.len());

        for task in sub_tasks {
            let task = task.clone();
            let semaphore = Arc::clone(&semaphore);
            let llm = Arc::clone(&self.llm);
            let registry = Arc::clone(&self.registry);
            let events = self.events.clone();
            let parent_context = parent_context.clone();
            let timeout = self.task_timeout;

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    // Semaphore closed: the pool is shutting down.
                    Err(_) => {
                        return ExecutionResult::failed(&task.id, "unknown", "pool closed")
                    }
                };
                run_one(task, llm, registry, events, parent_context, timeout).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (outcome, task) in futures::future::join_all(handles).await.into_iter().zip(sub_tasks) {
            match outcome {
                Ok(result) => results.push(result),
                // A panic inside a sub-task is isolated here.
                Err(e) => {
                    tracing::error!(subtask = %task.id, error = %e, "sub-task join failed");
                    results.push(ExecutionResult::failed(
                        &task.id,
                        "unknown",
                        format!("sub-task panicked: {e}"),
                    ));
                }
            }
        }
        results
    }

    /// Runs sub-tasks one at a time, in order.
    pub async fn execute_sequential(
        &self,
        sub_tasks: &[SubTask],
        parent_context: &Value,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(sub_tasks.len());
        for task in sub_tasks {
            let result = run_one(
                task.clone(),
                Arc::clone(&self.llm),
                Arc::clone(&self.registry),
                self.events.clone(),
                parent_context.clone(),
                self.task_timeout,
            )
            .await;
            results.push(result);
        }
        results
    }

    /// Runs dependency layers in order: every task in layer N completes
    /// before layer N+1 begins. Successful results are added to an
    /// accumulated context (keyed by subtask_id) visible to later layers.
    pub async fn execute_with_dependencies(
        &self,
        sub_tasks: &[SubTask],
        layers: &[Vec<String>],
        parent_context: &Value,
    ) -> Vec<ExecutionResult> {
        let mut accumulated = match parent_context {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        let mut all_results = Vec::with_capacity(sub_tasks.len());

        for layer in layers {
            let batch: Vec<SubTask> = layer
                .iter()
                .filter_map(|id| sub_tasks.iter().find(|t| &t.id == id))
                .cloned()
                .collect();
            let context = Value::Object(accumulated.clone());
            let results = self.execute_batch(&batch, &context).await;
            for result in &results {
                if result.success {
                    if let Some(ref output) = result.result {
                        accumulated.insert(
                            result.subtask_id.clone(),
                            Value::String(output.clone()),
                        );
                    }
                }
            }
            all_results.extend(results);
        }
        all_results
    }
}

/// Executes one sub-task to an `ExecutionResult`, enforcing the wall-clock
/// timeout. Never returns an error.
async fn run_one(
    task: SubTask,
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    events: EventSender,
    parent_context: Value,
    timeout: Duration,
) -> ExecutionResult {
    let mut config = SubAgentConfig::for_type(task.agent_type, format!("agent-{}", task.id));
    config.max_iterations = task.estimated_iterations.clamp(1, 10);
    let agent_name = config.name.clone();
    let agent = SubAgent::new(config, llm, registry, events.clone());

    events
        .emit(ProtocolEvent::SubTaskStart {
            subtask_id: task.id.clone(),
            agent_name: agent_name.clone(),
        })
        .await;

    let started_at = Utc::now();
    let start = std::time::Instant::now();
    let context = if parent_context.is_null() {
        None
    } else {
        Some(&parent_context)
    };

    let result = match tokio::time::timeout(
        timeout,
        agent.execute_task(&task.description, &task.id, context),
    )
    .await
    {
        Ok(outcome) => {
            let status = if outcome.success {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            };
            ExecutionResult {
                subtask_id: task.id.clone(),
                agent_name: agent_name.clone(),
                status,
                success: outcome.success,
                result: Some(outcome.result),
                error: outcome.error,
                duration_seconds: start.elapsed().as_secs_f64(),
                iterations: outcome.iterations,
                started_at: Some(started_at),
                completed_at: Some(Utc::now()),
            }
        }
        Err(_) => {
            tracing::warn!(subtask = %task.id, timeout = ?timeout, "sub-task timed out");
            ExecutionResult {
                subtask_id: task.id.clone(),
                agent_name: agent_name.clone(),
                status: ExecutionStatus::Failed,
                success: false,
                result: None,
                error: Some(format!("timeout after {}s", timeout.as_secs())),
                duration_seconds: start.elapsed().as_secs_f64(),
                iterations: 0,
                started_at: Some(started_at),
                completed_at: Some(Utc::now()),
            }
        }
    };

    events
        .emit(ProtocolEvent::SubTaskComplete {
            subtask_id: task.id.clone(),
            success: result.success,
            duration_seconds: result.duration_seconds,
        })
        .await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::subagent::SubAgentType;

    fn subtask(id: &str) -> SubTask {
        SubTask {
            id: id.to_string(),
            description: format!("do {id}"),
            agent_type: SubAgentType::TaskExecutor,
            priority: 0,
            dependencies: Vec::new(),
            estimated_iterations: 1,
            context: Value::Null,
        }
    }

    fn pool(reply: &str, max_parallel: usize) -> SubAgentPool {
        SubAgentPool::new(
            Arc::new(MockLlm::fixed(reply.to_string())),
            Arc::new(ToolRegistry::new(false)),
            EventSender::null(),
        )
        .with_max_parallel(max_parallel)
    }

    /// **Scenario**: batch results come back in input order with success.
    #[tokio::test]
    async fn batch_preserves_input_order() {
        let pool = pool("TASK_COMPLETE: ok", 3);
        let tasks = vec![subtask("a"), subtask("b"), subtask("c")];
        let results = pool.execute_batch(&tasks, &Value::Null).await;
        let ids: Vec<&str> = results.iter().map(|r| r.subtask_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(results.iter().all(|r| r.success));
        assert!(results
            .iter()
            .all(|r| r.status == ExecutionStatus::Completed));
    }

    /// **Scenario**: one failing sub-task never breaks its siblings.
    #[tokio::test]
    async fn failure_is_isolated() {
        let llm = MockLlm::fixed("TASK_COMPLETE: fine");
        llm.push_unavailable("llm down for the first task");
        let pool = SubAgentPool::new(
            Arc::new(llm),
            Arc::new(ToolRegistry::new(false)),
            EventSender::null(),
        )
        .with_max_parallel(1);
        // max_parallel=1 makes the scripted failure hit the first task.
        let tasks = vec![subtask("first"), subtask("second")];
        let results = pool.execute_batch(&tasks, &Value::Null).await;
        assert!(!results[0].success);
        assert!(results[0].error.as_ref().unwrap().contains("llm"));
        assert!(results[1].success);
    }

    /// **Scenario**: the wall-clock timeout fails the task with a timeout error.
    #[tokio::test]
    async fn timeout_fails_task() {
        struct SlowLlm;

        #[async_trait::async_trait]
        impl LlmClient for SlowLlm {
            async fn chat_completion(
                &self,
                _messages: &[crate::llm::ChatMessage],
                _options: &crate::llm::ChatOptions,
            ) -> Result<crate::llm::LlmReply, crate::llm::LlmError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(crate::llm::LlmReply::default())
            }
        }

        let pool = SubAgentPool::new(
            Arc::new(SlowLlm),
            Arc::new(ToolRegistry::new(false)),
            EventSender::null(),
        )
        .with_task_timeout(Duration::from_millis(50));
        let results = pool.execute_batch(&[subtask("slow")], &Value::Null).await;
        assert!(!results[0].success);
        assert_eq!(results[0].status, ExecutionStatus::Failed);
        assert!(results[0].error.as_ref().unwrap().contains("timeout"));
    }

    /// **Scenario**: dependency layers run in order and later layers see
    /// earlier results in their context.
    #[tokio::test]
    async fn layers_accumulate_context() {
        let llm = Arc::new(MockLlm::fixed("TASK_COMPLETE: layer output"));
        let pool = SubAgentPool::new(
            Arc::clone(&llm) as Arc<dyn LlmClient>,
            Arc::new(ToolRegistry::new(false)),
            EventSender::null(),
        );
        let tasks = vec![subtask("a"), subtask("b")];
        let layers = vec![vec!["a".to_string()], vec!["b".to_string()]];
        let results = pool
            .execute_with_dependencies(&tasks, &layers, &Value::Null)
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        // The second call's prompt contains the first task's output.
        let second_call = llm.call(1).expect("two calls");
        assert!(second_call[1].content.contains("layer output"));
    }

    /// **Scenario**: pool emits start and complete events per sub-task.
    #[tokio::test]
    async fn pool_emits_progress_events() {
        let (events, mut rx) = EventSender::channel(16);
        let pool = SubAgentPool::new(
            Arc::new(MockLlm::fixed("TASK_COMPLETE: ok")),
            Arc::new(ToolRegistry::new(false)),
            events,
        );
        let _ = pool.execute_batch(&[subtask("s1")], &Value::Null).await;
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(match ev {
                ProtocolEvent::SubTaskStart { .. } => "start",
                ProtocolEvent::CodeChunk { .. } => "chunk",
                ProtocolEvent::SubTaskComplete { .. } => "complete",
                _ => "other",
            });
        }
        assert_eq!(kinds.first(), Some(&"start"));
        assert_eq!(kinds.last(), Some(&"complete"));
        assert!(kinds.contains(&"chunk"));
    }
}
