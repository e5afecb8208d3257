//! Iteration limits derived from task-description heuristics.
//!
//! Reflect uses a soft and a hard limit: simple-looking tasks get a short
//! leash, complex-looking ones a longer one. Simple indicators win when both
//! match.

/// Soft/hard iteration limits for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationLimits {
    pub soft: u32,
    pub hard: u32,
}

const SIMPLE_INDICATORS: &[&str] = &[
    "create", "make", "write", "add", "simple", "basic", "hello", "calculator",
];
const COMPLEX_INDICATORS: &[&str] = &[
    "refactor", "optimize", "migrate", "architecture", "system", "framework",
];

/// Limits for a task description: simple → 5/10, complex → 15/25, else 10/20.
pub fn limits_for(task: &str) -> IterationLimits {
    let lower = task.to_lowercase();
    if SIMPLE_INDICATORS.iter().any(|k| lower.contains(k)) {
        IterationLimits { soft: 5, hard: 10 }
    } else if COMPLEX_INDICATORS.iter().any(|k| lower.contains(k)) {
        IterationLimits { soft: 15, hard: 25 }
    } else {
        IterationLimits { soft: 10, hard: 20 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_task_short_leash() {
        assert_eq!(
            limits_for("Create calculator.py with add and subtract"),
            IterationLimits { soft: 5, hard: 10 }
        );
    }

    #[test]
    fn complex_task_long_leash() {
        assert_eq!(
            limits_for("Refactor the storage layer for the new architecture"),
            IterationLimits { soft: 15, hard: 25 }
        );
    }

    #[test]
    fn default_limits_otherwise() {
        assert_eq!(
            limits_for("Investigate why the queue drains slowly"),
            IterationLimits { soft: 10, hard: 20 }
        );
    }

    #[test]
    fn simple_wins_over_complex_when_both_match() {
        assert_eq!(
            limits_for("create a refactor plan"),
            IterationLimits { soft: 5, hard: 10 }
        );
    }
}
