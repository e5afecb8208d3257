//! Sub-agent pool concurrency, ordering, and aggregation behavior.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use strand::aggregate::{AggregationStrategy, ResultAggregator};
use strand::decompose::{get_execution_order, SubTask};
use strand::llm::{ChatMessage, ChatOptions, LlmClient, LlmError, LlmReply};
use strand::stream::{EventSender, ProtocolEvent};
use strand::subagent::{SubAgentPool, SubAgentType};
use strand::tools::ToolRegistry;

/// LLM stub that sleeps, then completes.
struct SleepyLlm {
    delay: Duration,
}

#[async_trait]
impl LlmClient for SleepyLlm {
    async fn chat_completion(
        &self,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<LlmReply, LlmError> {
        tokio::time::sleep(self.delay).await;
        Ok(LlmReply {
            content: "TASK_COMPLETE: ok".to_string(),
            ..LlmReply::default()
        })
    }
}

fn subtask(id: &str, deps: &[&str]) -> SubTask {
    SubTask {
        id: id.to_string(),
        description: format!("work on {id}"),
        agent_type: SubAgentType::TaskExecutor,
        priority: 0,
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        estimated_iterations: 1,
        context: Value::Null,
    }
}

fn pool(delay: Duration, max_parallel: usize, events: EventSender) -> SubAgentPool {
    SubAgentPool::new(
        Arc::new(SleepyLlm { delay }),
        Arc::new(ToolRegistry::new(false)),
        events,
    )
    .with_max_parallel(max_parallel)
}

/// **Scenario**: max_parallel=1 with 5 independent sub-tasks produces
/// results in input order and the aggregator reports the sum of durations.
#[tokio::test]
async fn serial_pool_orders_results_and_sums_duration() {
    let tasks: Vec<SubTask> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|id| subtask(id, &[]))
        .collect();
    let pool = pool(Duration::from_millis(40), 1, EventSender::null());
    let results = pool.execute_batch(&tasks, &Value::Null).await;

    let ids: Vec<&str> = results.iter().map(|r| r.subtask_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    assert!(results.iter().all(|r| r.success));

    let agg = ResultAggregator::new(None)
        .aggregate(&results, "serial batch", AggregationStrategy::Concatenate)
        .await;
    let sum: f64 = results.iter().map(|r| r.duration_seconds).sum();
    // Serial execution: total ≈ sum of individual durations.
    assert!(
        (agg.total_duration_seconds - sum).abs() < 0.05,
        "expected ≈{sum}, got {}",
        agg.total_duration_seconds
    );
    assert!(agg.total_duration_seconds >= 0.18);
}

/// **Scenario**: max_parallel=5 with 5 sub-tasks finishes in roughly one
/// task's time and the aggregator reports the parallel span, not the sum.
#[tokio::test]
async fn parallel_pool_overlaps_and_reports_span() {
    let tasks: Vec<SubTask> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|id| subtask(id, &[]))
        .collect();
    let pool = pool(Duration::from_millis(100), 5, EventSender::null());

    let started = Instant::now();
    let results = pool.execute_batch(&tasks, &Value::Null).await;
    let wall = started.elapsed();

    assert!(results.iter().all(|r| r.success));
    assert!(
        wall < Duration::from_millis(400),
        "expected ≈100ms wall clock, got {wall:?}"
    );

    let agg = ResultAggregator::new(None)
        .aggregate(&results, "parallel batch", AggregationStrategy::Concatenate)
        .await;
    let sum: f64 = results.iter().map(|r| r.duration_seconds).sum();
    assert!(
        agg.total_duration_seconds < sum * 0.6,
        "span {} should be well under sum {sum}",
        agg.total_duration_seconds
    );
    // All five sub-task headers present in the combined output.
    let combined = agg.combined_result.as_str().unwrap().to_string();
    for id in ["a", "b", "c", "d", "e"] {
        assert!(combined.contains(&format!("=== {id}")));
    }
}

/// **Scenario**: the diamond DAG runs layer by layer; the event sequence
/// proves every layer-N task finishes before any layer-N+1 task starts.
#[tokio::test]
async fn dependency_layers_respected_in_event_order() {
    let tasks = vec![
        subtask("a", &[]),
        subtask("b", &["a"]),
        subtask("c", &["a"]),
        subtask("d", &["b", "c"]),
    ];
    let (layers, cycle) = get_execution_order(&tasks);
    assert!(!cycle);
    assert_eq!(layers.len(), 3);

    let (events, mut rx) = EventSender::channel(64);
    let pool = pool(Duration::from_millis(20), 4, events);
    let results = pool
        .execute_with_dependencies(&tasks, &layers, &Value::Null)
        .await;
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.success));

    let mut sequence: Vec<(String, String)> = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        match ev {
            ProtocolEvent::SubTaskStart { subtask_id, .. } => {
                sequence.push(("start".into(), subtask_id))
            }
            ProtocolEvent::SubTaskComplete { subtask_id, .. } => {
                sequence.push(("complete".into(), subtask_id))
            }
            _ => {}
        }
    }
    let index_of = |kind: &str, id: &str| {
        sequence
            .iter()
            .position(|(k, i)| k == kind && i == id)
            .unwrap_or_else(|| panic!("missing {kind} for {id}"))
    };
    // Layer barriers: a completes before b and c start; both complete before d starts.
    assert!(index_of("complete", "a") < index_of("start", "b"));
    assert!(index_of("complete", "a") < index_of("start", "c"));
    assert!(index_of("complete", "b") < index_of("start", "d"));
    assert!(index_of("complete", "c") < index_of("start", "d"));
}
