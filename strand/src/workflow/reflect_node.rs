//! Reflect node: the termination decision table.
//!
//! Evaluated in order, first match wins:
//! 1. terminal status → end
//! 2. hard limit → completed with "reached limit" when progress exists, else failed
//! 3. last 3 tool calls share one action → completed "loop detected"
//! 4. iteration ≥ 5 with an empty tool log → completed "no activity"
//! 5. ≥4 of the last 5 tool calls failed → failed with aggregated errors
//! 6. every planned step completed → completed
//! 7. past the soft limit with a quiet recent window → completed
//! 8. otherwise continue
//!
//! Rules 3 and 5 are the safety nets against unbounded model spending.

use async_trait::async_trait;

use crate::error::WorkflowError;
use crate::graph::{Next, Node};
use crate::state::WorkflowState;

use super::limits::limits_for;

pub const NODE_REFLECT: &str = "reflect";

pub struct ReflectNode;

impl ReflectNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReflectNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node<WorkflowState> for ReflectNode {
    fn id(&self) -> &str {
        NODE_REFLECT
    }

    async fn run(&self, mut state: WorkflowState) -> Result<(WorkflowState, Next), WorkflowError> {
        decide(&mut state);
        Ok((state, Next::Continue))
    }
}

/// Applies the decision table to the state, setting `should_continue` and a
/// terminal status when a rule fires.
pub(crate) fn decide(state: &mut WorkflowState) {
    let limits = limits_for(&state.task_description);
    let hard = limits.hard.min(state.max_iterations);
    let soft = limits.soft.min(hard);

    // Rule 1: already terminal.
    if state.task_status.is_terminal() {
        tracing::info!(status = state.task_status.as_str(), "workflow done");
        state.should_continue = false;
        return;
    }

    // Rule 2: hard iteration limit.
    if state.iteration >= hard {
        let progress = state.tool_calls.iter().any(|c| c.success);
        tracing::warn!(hard, progress, "hard iteration limit reached");
        if progress {
            state.mark_completed(format!(
                "Task reached the iteration limit after {} iterations with {} tool calls; \
                 completed steps: {}",
                state.iteration,
                state.tool_calls.len(),
                state.context.completed_steps.join(", "),
            ));
        } else {
            state.mark_failed(format!(
                "No progress after {} iterations; the task may be too vague, too complex, \
                 or the LLM backend may be misbehaving",
                state.iteration
            ));
        }
        return;
    }

    // Rule 3: the same action three times in a row.
    let last3 = state.recent_actions(3);
    if last3.len() == 3 && last3.iter().all(|a| *a == last3[0]) {
        tracing::warn!(action = last3[0], "loop detected");
        state.mark_completed(format!(
            "Task stopped: loop detected ({} repeated 3 times) after {} iterations",
            last3[0], state.iteration
        ));
        return;
    }

    // Rule 4: iterations spent with no tool activity at all.
    if state.iteration >= 5 && state.tool_calls.is_empty() {
        tracing::warn!("no activity after {} iterations", state.iteration);
        state.mark_completed(format!(
            "Task completed with no tool activity after {} iterations; \
             it may need to be more specific",
            state.iteration
        ));
        return;
    }

    // Rule 5: repeated failures in the recent window.
    let recent = state.recent_calls(5);
    if recent.len() == 5 {
        let failures = recent.iter().filter(|c| !c.success).count();
        if failures >= 4 {
            let detail: Vec<String> = recent
                .iter()
                .filter(|c| !c.success)
                .map(|c| c.action.clone())
                .collect();
            tracing::error!(failures, "repeated tool failures; stopping");
            state.mark_failed(format!(
                "Task stopped after repeated tool failures ({failures} of the last 5: {}); {}",
                detail.join(", "),
                state.diagnostic_excerpt()
            ));
            return;
        }
    }

    // Rule 6: every planned step done.
    if let Some(ref plan) = state.context.plan {
        let total = plan.total_steps();
        if total > 0 && state.context.completed_steps.len() >= total {
            tracing::info!(total, "all planned steps completed");
            state.mark_completed(format!(
                "Task completed successfully; completed steps: {}",
                state.context.completed_steps.join(", ")
            ));
            return;
        }
    }

    // Rule 7: past the soft limit and recently quiet.
    if state.iteration >= soft {
        let since = state.iteration.saturating_sub(3);
        if state.calls_since_iteration(since) < 2 {
            tracing::info!(soft, "soft limit reached with little recent activity");
            state.mark_completed(format!(
                "Task completed after {} iterations with {} tool calls",
                state.iteration,
                state.tool_calls.len()
            ));
            return;
        }
        tracing::debug!(soft, hard, "past soft limit but still active");
    }

    // Rule 8: keep going.
    state.should_continue = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Domain, Plan, TaskStatus, ToolCallRecord};
    use serde_json::Value;
    use std::path::PathBuf;

    fn state(task: &str) -> WorkflowState {
        let mut s = WorkflowState::new("t1", task, PathBuf::from("/ws"), Domain::General, 50, 100);
        s.task_status = TaskStatus::InProgress;
        s
    }

    fn call(action: &str, iteration: u32, success: bool) -> ToolCallRecord {
        ToolCallRecord {
            action: action.to_string(),
            parameters: Value::Null,
            result: Value::Null,
            iteration,
            success,
        }
    }

    /// **Scenario (rule 1)**: terminal status stops immediately.
    #[test]
    fn rule1_terminal_stops() {
        let mut s = state("investigate the queue");
        s.mark_completed("done early");
        decide(&mut s);
        assert!(!s.should_continue);
        assert_eq!(s.task_status, TaskStatus::Completed);
    }

    /// **Scenario (rule 2)**: hard limit with progress completes; without
    /// progress it fails.
    #[test]
    fn rule2_hard_limit() {
        // "investigate" → default limits 10/20.
        let mut s = state("investigate the queue");
        s.iteration = 20;
        s.record_tool_call(call("READ_FILE", 1, true));
        decide(&mut s);
        assert_eq!(s.task_status, TaskStatus::Completed);
        assert!(s.task_result.unwrap().contains("iteration limit"));

        let mut s = state("investigate the queue");
        s.iteration = 20;
        decide(&mut s);
        assert_eq!(s.task_status, TaskStatus::Failed);
        assert!(s.task_error.unwrap().contains("No progress"));
    }

    /// **Scenario (rule 3)**: three identical actions in a row end the
    /// workflow as completed with "loop detected".
    #[test]
    fn rule3_loop_detection() {
        let mut s = state("investigate the queue");
        s.iteration = 3;
        for i in 0..3 {
            s.record_tool_call(call("READ_FILE", i, true));
        }
        decide(&mut s);
        assert_eq!(s.task_status, TaskStatus::Completed);
        assert!(s.task_result.unwrap().contains("loop detected"));
    }

    /// **Scenario (rule 3 negative)**: mixed recent actions keep going.
    #[test]
    fn rule3_requires_identical_actions() {
        let mut s = state("investigate the queue");
        s.iteration = 3;
        s.record_tool_call(call("READ_FILE", 0, true));
        s.record_tool_call(call("WRITE_FILE", 1, true));
        s.record_tool_call(call("READ_FILE", 2, true));
        decide(&mut s);
        assert!(s.should_continue);
        assert_eq!(s.task_status, TaskStatus::InProgress);
    }

    /// **Scenario (rule 4)**: five iterations with an empty tool log end it.
    #[test]
    fn rule4_no_activity() {
        let mut s = state("investigate the queue");
        s.iteration = 5;
        decide(&mut s);
        assert_eq!(s.task_status, TaskStatus::Completed);
        assert!(s.task_result.unwrap().contains("no tool activity"));
    }

    /// **Scenario (rule 5)**: 4 failures among the last 5 calls fail the
    /// task with aggregated detail.
    #[test]
    fn rule5_repeated_failures() {
        let mut s = state("investigate the queue");
        s.iteration = 5;
        s.record_tool_call(call("RUN_COMMAND", 0, true));
        for i in 1..5 {
            s.record_tool_call(call("RUN_COMMAND", i, false));
        }
        decide(&mut s);
        assert_eq!(s.task_status, TaskStatus::Failed);
        assert!(s.task_error.unwrap().contains("repeated tool failures"));
    }

    /// **Scenario (rule 5 ordering)**: identical failing actions trip the
    /// loop rule (3) before the failure rule (5).
    #[test]
    fn rule3_wins_over_rule5() {
        let mut s = state("investigate the queue");
        s.iteration = 5;
        for i in 0..5 {
            s.record_tool_call(call("RUN_COMMAND", i, false));
        }
        decide(&mut s);
        assert_eq!(s.task_status, TaskStatus::Completed);
        assert!(s.task_result.unwrap().contains("loop detected"));
    }

    /// **Scenario (rule 6)**: completing all planned steps ends the workflow.
    #[test]
    fn rule6_all_steps_done() {
        let mut s = state("investigate the queue");
        s.iteration = 2;
        s.context.plan = Some(Plan {
            task_type: "mixed".into(),
            steps: vec!["a".into(), "b".into()],
            estimated_steps: 2,
            tools_needed: vec![],
        });
        s.record_tool_call(call("READ_FILE", 0, true));
        s.record_tool_call(call("WRITE_FILE", 1, true));
        decide(&mut s);
        assert_eq!(s.task_status, TaskStatus::Completed);
        assert!(s.task_result.unwrap().contains("completed successfully"));
    }

    /// **Scenario (rule 7)**: past the soft limit with a quiet window
    /// completes; an active window keeps going.
    #[test]
    fn rule7_soft_limit_quiet() {
        // Default limits: soft 10. One old call only → quiet.
        let mut s = state("investigate the queue");
        s.iteration = 10;
        s.record_tool_call(call("READ_FILE", 1, true));
        decide(&mut s);
        assert_eq!(s.task_status, TaskStatus::Completed);

        // Still active: two calls in the last 3 iterations.
        let mut s = state("investigate the queue");
        s.iteration = 10;
        s.record_tool_call(call("READ_FILE", 8, true));
        s.record_tool_call(call("WRITE_FILE", 9, true));
        decide(&mut s);
        assert!(s.should_continue);
    }

    /// **Scenario (rule 8)**: nothing fires → continue.
    #[test]
    fn rule8_continue() {
        let mut s = state("investigate the queue");
        s.iteration = 2;
        s.record_tool_call(call("READ_FILE", 0, true));
        s.record_tool_call(call("WRITE_FILE", 1, true));
        decide(&mut s);
        assert!(s.should_continue);
        assert_eq!(s.task_status, TaskStatus::InProgress);
    }

    /// **Scenario**: simple tasks use the shorter hard limit.
    #[test]
    fn simple_task_hard_limit_is_ten() {
        let mut s = state("create a calculator script");
        s.iteration = 10;
        s.record_tool_call(call("WRITE_FILE", 1, true));
        decide(&mut s);
        assert_eq!(s.task_status, TaskStatus::Completed);
    }

    /// **Scenario**: the engine-level max_iterations caps the hard limit.
    #[test]
    fn max_iterations_caps_hard_limit() {
        let mut s = state("investigate the queue");
        s.max_iterations = 8;
        s.iteration = 8;
        s.record_tool_call(call("READ_FILE", 1, true));
        decide(&mut s);
        assert_eq!(s.task_status, TaskStatus::Completed);
    }
}
