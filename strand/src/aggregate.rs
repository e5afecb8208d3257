//! Result aggregator: merge sub-agent outputs into one result.
//!
//! Strategies: plain concatenation with per-sub-task headers, an LLM summary
//! (falling back to concatenation when the LLM is unavailable), JSON merge
//! keyed by subtask id, or the raw list. Total duration reports the parallel
//! span (max end − min start) when executions overlapped, otherwise the sum.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::subagent::ExecutionResult;

/// How sub-agent outputs are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    Concatenate,
    Summarize,
    MergeJson,
    List,
}

/// Combined outcome of a sub-task batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub original_task: String,
    pub success: bool,
    pub combined_result: Value,
    pub individual_results: Vec<ExecutionResult>,
    pub total_duration_seconds: f64,
    pub success_count: usize,
    pub failure_count: usize,
    pub summary: String,
    pub errors: Vec<String>,
}

/// Aggregates sub-agent execution results.
///
/// The LLM is optional; without one the `Summarize` strategy degrades to
/// concatenation.
pub struct ResultAggregator {
    llm: Option<Arc<dyn LlmClient>>,
}

impl ResultAggregator {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm }
    }

    pub async fn aggregate(
        &self,
        results: &[ExecutionResult],
        original_task: &str,
        strategy: AggregationStrategy,
    ) -> AggregatedResult {
        let successful: Vec<&ExecutionResult> = results.iter().filter(|r| r.success).collect();
        let success_count = successful.len();
        let failure_count = results.len() - success_count;
        let errors: Vec<String> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| {
                format!(
                    "{}: {}",
                    r.subtask_id,
                    r.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect();
        let total_duration = total_duration_seconds(results);

        let combined_result = match strategy {
            AggregationStrategy::Concatenate => Value::String(concatenate(&successful)),
            AggregationStrategy::Summarize => {
                Value::String(self.summarize(&successful, original_task).await)
            }
            AggregationStrategy::MergeJson => merge_json(&successful),
            AggregationStrategy::List => Value::Array(
                successful
                    .iter()
                    .map(|r| Value::String(r.result.clone().unwrap_or_default()))
                    .collect(),
            ),
        };

        let summary = format!(
            "{success_count}/{} subtasks succeeded in {total_duration:.2}s",
            results.len()
        );
        tracing::info!(%summary, failures = failure_count, "aggregated sub-task results");

        AggregatedResult {
            original_task: original_task.to_string(),
            success: failure_count == 0 && !results.is_empty(),
            combined_result,
            individual_results: results.to_vec(),
            total_duration_seconds: total_duration,
            success_count,
            failure_count,
            summary,
            errors,
        }
    }

    /// LLM summary over the concatenation; concatenation when no LLM is
    /// available or the call fails.
    async fn summarize(&self, successful: &[&ExecutionResult], original_task: &str) -> String {
        let combined = concatenate(successful);
        if successful.is_empty() {
            return "No successful results to summarize".to_string();
        }
        let Some(ref llm) = self.llm else {
            return combined;
        };
        let prompt = format!(
            "Original task: {original_task}\n\
             \n\
             Sub-task results:\n{combined}\n\
             \n\
             Write a concise summary of what was accomplished."
        );
        let messages = [
            ChatMessage::system("You summarize work results clearly and briefly."),
            ChatMessage::user(prompt),
        ];
        let options = ChatOptions::default()
            .with_temperature(0.3)
            .with_max_tokens(1000);
        match llm.chat_completion(&messages, &options).await {
            Ok(reply) => reply.content,
            Err(e) => {
                tracing::warn!(error = %e, "summary call failed; falling back to concatenation");
                combined
            }
        }
    }
}

/// Ordered text concatenation with per-sub-task headers.
fn concatenate(successful: &[&ExecutionResult]) -> String {
    successful
        .iter()
        .map(|r| {
            format!(
                "=== {} ({}) ===\n{}",
                r.subtask_id,
                r.agent_name,
                r.result.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Each parseable result lands under its subtask id; unparseable results are
/// kept as strings.
fn merge_json(successful: &[&ExecutionResult]) -> Value {
    let mut merged = serde_json::Map::new();
    for r in successful {
        let text = r.result.as_deref().unwrap_or("");
        let value = serde_json::from_str::<Value>(text)
            .unwrap_or_else(|_| Value::String(text.to_string()));
        merged.insert(r.subtask_id.clone(), value);
    }
    Value::Object(merged)
}

/// Parallel span when any two executions overlap, sum of durations otherwise
/// (or when timestamps are missing).
fn total_duration_seconds(results: &[ExecutionResult]) -> f64 {
    let sum: f64 = results.iter().map(|r| r.duration_seconds).sum();
    let spans: Vec<_> = results
        .iter()
        .filter_map(|r| Some((r.started_at?, r.completed_at?)))
        .collect();
    if spans.len() != results.len() || spans.len() < 2 {
        return sum;
    }
    let overlapping = spans.iter().enumerate().any(|(i, (s1, e1))| {
        spans
            .iter()
            .skip(i + 1)
            .any(|(s2, e2)| s1 < e2 && s2 < e1)
    });
    if overlapping {
        let min_start = spans.iter().map(|(s, _)| *s).min().expect("non-empty");
        let max_end = spans.iter().map(|(_, e)| *e).max().expect("non-empty");
        (max_end - min_start).num_milliseconds() as f64 / 1000.0
    } else {
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;
    use crate::subagent::ExecutionStatus;
    use chrono::{Duration as ChronoDuration, Utc};

    fn result(id: &str, success: bool, output: &str) -> ExecutionResult {
        ExecutionResult {
            subtask_id: id.to_string(),
            agent_name: format!("agent-{id}"),
            status: if success {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            },
            success,
            result: if success {
                Some(output.to_string())
            } else {
                None
            },
            error: if success {
                None
            } else {
                Some("boom".to_string())
            },
            duration_seconds: 1.0,
            iterations: 1,
            started_at: None,
            completed_at: None,
        }
    }

    /// **Scenario**: concatenate keeps input order with headers.
    #[tokio::test]
    async fn concatenate_orders_and_headers() {
        let results = vec![result("s1", true, "first"), result("s2", true, "second")];
        let agg = ResultAggregator::new(None)
            .aggregate(&results, "task", AggregationStrategy::Concatenate)
            .await;
        let text = agg.combined_result.as_str().unwrap();
        assert!(text.find("=== s1").unwrap() < text.find("=== s2").unwrap());
        assert!(text.contains("first") && text.contains("second"));
        assert!(agg.success);
        assert_eq!(agg.summary, "2/2 subtasks succeeded in 2.00s");
    }

    /// **Scenario**: a failure flips success and lands in errors.
    #[tokio::test]
    async fn failures_reported() {
        let results = vec![result("ok", true, "fine"), result("bad", false, "")];
        let agg = ResultAggregator::new(None)
            .aggregate(&results, "task", AggregationStrategy::List)
            .await;
        assert!(!agg.success);
        assert_eq!(agg.success_count, 1);
        assert_eq!(agg.failure_count, 1);
        assert_eq!(agg.errors, vec!["bad: boom"]);
        assert_eq!(agg.combined_result.as_array().unwrap().len(), 1);
    }

    /// **Scenario**: merge_json parses JSON results and keeps plain text.
    #[tokio::test]
    async fn merge_json_by_subtask_id() {
        let results = vec![
            result("a", true, r#"{"count": 3}"#),
            result("b", true, "not json"),
        ];
        let agg = ResultAggregator::new(None)
            .aggregate(&results, "task", AggregationStrategy::MergeJson)
            .await;
        assert_eq!(agg.combined_result["a"]["count"], 3);
        assert_eq!(agg.combined_result["b"], "not json");
    }

    /// **Scenario**: summarize uses the LLM when present and falls back to
    /// concatenation when it fails.
    #[tokio::test]
    async fn summarize_with_fallback() {
        let results = vec![result("s1", true, "wrote code")];

        let llm = Arc::new(MockLlm::fixed("A tidy summary."));
        let agg = ResultAggregator::new(Some(llm))
            .aggregate(&results, "task", AggregationStrategy::Summarize)
            .await;
        assert_eq!(agg.combined_result, "A tidy summary.");

        let failing = MockLlm::fixed("unused");
        failing.push_unavailable("down");
        let agg = ResultAggregator::new(Some(Arc::new(failing)))
            .aggregate(&results, "task", AggregationStrategy::Summarize)
            .await;
        assert!(agg.combined_result.as_str().unwrap().contains("wrote code"));
    }

    /// **Scenario**: overlapping executions report the parallel span, not
    /// the sum; disjoint ones report the sum.
    #[tokio::test]
    async fn duration_parallel_span_vs_sum() {
        let t0 = Utc::now();
        let mut a = result("a", true, "x");
        let mut b = result("b", true, "y");
        // Overlap: both run within the same second.
        a.started_at = Some(t0);
        a.completed_at = Some(t0 + ChronoDuration::milliseconds(1000));
        b.started_at = Some(t0 + ChronoDuration::milliseconds(100));
        b.completed_at = Some(t0 + ChronoDuration::milliseconds(1100));
        let agg = ResultAggregator::new(None)
            .aggregate(&[a.clone(), b.clone()], "t", AggregationStrategy::List)
            .await;
        assert!((agg.total_duration_seconds - 1.1).abs() < 0.01);

        // Disjoint: sum of durations.
        b.started_at = Some(t0 + ChronoDuration::milliseconds(2000));
        b.completed_at = Some(t0 + ChronoDuration::milliseconds(3000));
        let agg = ResultAggregator::new(None)
            .aggregate(&[a, b], "t", AggregationStrategy::List)
            .await;
        assert!((agg.total_duration_seconds - 2.0).abs() < f64::EPSILON);
    }

    /// **Scenario**: empty input is not a success.
    #[tokio::test]
    async fn empty_results_not_success() {
        let agg = ResultAggregator::new(None)
            .aggregate(&[], "t", AggregationStrategy::Concatenate)
            .await;
        assert!(!agg.success);
        assert_eq!(agg.summary, "0/0 subtasks succeeded in 0.00s");
    }
}
