//! Task decomposer: break a complex task into a sub-task DAG.
//!
//! Two LLM steps: a complexity verdict (simple tasks skip decomposition),
//! then a sub-task breakdown validated for unique ids, known agent types,
//! and resolvable dependencies. Execution order is a Kahn topological
//! layering; a dependency cycle releases the remaining tasks into one final
//! layer and flags a warning instead of failing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::json_extract::extract_json;
use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::state::Complexity;
use crate::subagent::SubAgentType;

/// Seconds a sub-task iteration is assumed to take when estimating duration.
const SECONDS_PER_ITERATION: u64 = 10;

/// One unit of decomposed work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    pub description: String,
    pub agent_type: SubAgentType,
    pub priority: i32,
    /// Ids of sub-tasks that must complete first.
    pub dependencies: Vec<String>,
    pub estimated_iterations: u32,
    #[serde(default)]
    pub context: Value,
}

/// How the pool should run the breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    Direct,
    Parallel,
    Sequential,
}

impl ExecutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStrategy::Direct => "direct",
            ExecutionStrategy::Parallel => "parallel",
            ExecutionStrategy::Sequential => "sequential",
        }
    }
}

/// Result of decomposing one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskBreakdown {
    pub original_task: String,
    pub complexity: Complexity,
    pub requires_decomposition: bool,
    pub subtasks: Vec<SubTask>,
    pub execution_strategy: ExecutionStrategy,
    pub estimated_duration_seconds: u64,
    pub reasoning: String,
}

impl TaskBreakdown {
    fn direct(original_task: &str, reasoning: impl Into<String>) -> Self {
        Self {
            original_task: original_task.to_string(),
            complexity: Complexity::Simple,
            requires_decomposition: false,
            subtasks: Vec::new(),
            execution_strategy: ExecutionStrategy::Direct,
            estimated_duration_seconds: 30,
            reasoning: reasoning.into(),
        }
    }
}

/// Kahn topological layering of sub-tasks.
///
/// Each layer holds every remaining task whose unmet dependencies are empty;
/// within a layer no task depends on another in the same layer. A cycle
/// releases all remaining tasks into one final layer and sets the warning
/// flag. Dependency ids not present in the breakdown are ignored as unmet
/// constraints (they were already dropped in validation).
pub fn get_execution_order(subtasks: &[SubTask]) -> (Vec<Vec<String>>, bool) {
    let known: HashSet<&str> = subtasks.iter().map(|t| t.id.as_str()).collect();
    let mut remaining: HashMap<String, HashSet<String>> = subtasks
        .iter()
        .map(|t| {
            let deps: HashSet<String> = t
                .dependencies
                .iter()
                .filter(|d| known.contains(d.as_str()))
                .cloned()
                .collect();
            (t.id.clone(), deps)
        })
        .collect();
    // Preserve breakdown order within a layer.
    let order: Vec<String> = subtasks.iter().map(|t| t.id.clone()).collect();

    let mut layers = Vec::new();
    let mut cycle_warning = false;
    while !remaining.is_empty() {
        let mut layer: Vec<String> = order
            .iter()
            .filter(|id| remaining.get(*id).is_some_and(HashSet::is_empty))
            .cloned()
            .collect();
        if layer.is_empty() {
            // Cycle: release everything left into one final layer.
            tracing::warn!("dependency cycle detected; releasing remaining tasks");
            cycle_warning = true;
            layer = order
                .iter()
                .filter(|id| remaining.contains_key(*id))
                .cloned()
                .collect();
        }
        for id in &layer {
            remaining.remove(id);
        }
        for deps in remaining.values_mut() {
            for id in &layer {
                deps.remove(id);
            }
        }
        layers.push(layer);
        if cycle_warning {
            break;
        }
    }
    (layers, cycle_warning)
}

/// Decomposes tasks into sub-task DAGs via the LLM.
pub struct TaskDecomposer {
    llm: Arc<dyn LlmClient>,
}

impl TaskDecomposer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Decomposes a task. Never fails: LLM trouble degrades to a direct or
    /// single-task breakdown.
    pub async fn decompose(&self, task: &str, context: &Value) -> TaskBreakdown {
        let (complexity, reasoning) = self.analyze_complexity(task, context).await;
        if complexity == Complexity::Simple {
            tracing::info!("simple task; no decomposition");
            return TaskBreakdown::direct(task, "task is simple enough for direct execution");
        }

        let subtasks = self.break_down(task, complexity, context).await;
        let strategy = determine_strategy(&subtasks);
        let duration = estimate_duration(&subtasks, strategy);
        tracing::info!(
            count = subtasks.len(),
            strategy = strategy.as_str(),
            "task decomposed"
        );
        TaskBreakdown {
            original_task: task.to_string(),
            complexity,
            requires_decomposition: true,
            subtasks,
            execution_strategy: strategy,
            estimated_duration_seconds: duration,
            reasoning,
        }
    }

    async fn analyze_complexity(&self, task: &str, context: &Value) -> (Complexity, String) {
        let prompt = format!(
            "Analyze the complexity of this task.\n\
             \n\
             Task: {task}\n\
             Context: {context}\n\
             \n\
             Levels: simple (single operation), moderate (2-3 steps), \
             complex (4+ steps), very_complex (many steps, parallel work helps).\n\
             \n\
             Respond with ONLY JSON:\n\
             {{\"complexity\": \"simple|moderate|complex|very_complex\", \"reasoning\": \"why\"}}"
        );
        let messages = [
            ChatMessage::system("You are a task analysis expert. Respond with only JSON."),
            ChatMessage::user(prompt),
        ];
        let options = ChatOptions::default()
            .with_temperature(0.3)
            .with_max_tokens(500);
        let fallback = (
            Complexity::Moderate,
            "default assessment after analysis failure".to_string(),
        );
        let Ok(reply) = self.llm.chat_completion(&messages, &options).await else {
            return fallback;
        };
        let Ok(value) = extract_json(&reply.content) else {
            return fallback;
        };
        let complexity = value
            .get("complexity")
            .and_then(|c| c.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(Complexity::Moderate);
        let reasoning = value
            .get("reasoning")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string();
        (complexity, reasoning)
    }

    async fn break_down(&self, task: &str, complexity: Complexity, context: &Value) -> Vec<SubTask> {
        let agent_types = SubAgentType::all()
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = format!(
            "Break down this task into concrete subtasks.\n\
             \n\
             Task: {task}\n\
             Complexity: {}\n\
             Context: {context}\n\
             \n\
             For each subtask give: id (unique), description, agent_type \
             (one of: {agent_types}), priority (0-10, higher first), \
             dependencies (ids that must finish first), estimated_iterations (1-10).\n\
             \n\
             Respond with ONLY JSON:\n\
             {{\"subtasks\": [{{\"id\": \"subtask_1\", \"description\": \"...\", \
             \"agent_type\": \"task_executor\", \"priority\": 5, \
             \"dependencies\": [], \"estimated_iterations\": 3}}]}}",
            complexity.as_str()
        );
        let messages = [
            ChatMessage::system("You are a task breakdown expert. Respond with only JSON."),
            ChatMessage::user(prompt),
        ];
        let options = ChatOptions::default()
            .with_temperature(0.3)
            .with_max_tokens(2000);

        let fallback = vec![SubTask {
            id: "fallback_1".to_string(),
            description: task.to_string(),
            agent_type: SubAgentType::TaskExecutor,
            priority: 0,
            dependencies: Vec::new(),
            estimated_iterations: 5,
            context: Value::Null,
        }];

        let Ok(reply) = self.llm.chat_completion(&messages, &options).await else {
            tracing::warn!("breakdown call failed; using single-task fallback");
            return fallback;
        };
        let Ok(value) = extract_json(&reply.content) else {
            tracing::warn!("breakdown response unparseable; using single-task fallback");
            return fallback;
        };
        let raw = value
            .get("subtasks")
            .and_then(|s| s.as_array())
            .cloned()
            .unwrap_or_default();
        let subtasks = validate_subtasks(raw);
        if subtasks.is_empty() {
            return fallback;
        }
        subtasks
    }
}

/// Validates raw sub-task JSON: duplicate ids are skipped, unknown agent
/// types degrade to `task_executor`, dependencies that reference nothing in
/// the breakdown are dropped.
fn validate_subtasks(raw: Vec<Value>) -> Vec<SubTask> {
    let mut seen = HashSet::new();
    let mut subtasks = Vec::new();
    for item in &raw {
        let Some(id) = item.get("id").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(description) = item.get("description").and_then(|v| v.as_str()) else {
            continue;
        };
        if !seen.insert(id.to_string()) {
            tracing::warn!(id, "duplicate subtask id skipped");
            continue;
        }
        let agent_type = item
            .get("agent_type")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(SubAgentType::TaskExecutor);
        subtasks.push(SubTask {
            id: id.to_string(),
            description: description.to_string(),
            agent_type,
            priority: item.get("priority").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
            dependencies: item
                .get("dependencies")
                .and_then(|v| v.as_array())
                .map(|deps| {
                    deps.iter()
                        .filter_map(|d| d.as_str())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            estimated_iterations: item
                .get("estimated_iterations")
                .and_then(|v| v.as_u64())
                .unwrap_or(3) as u32,
            context: item.get("context").cloned().unwrap_or(Value::Null),
        });
    }
    // Drop dependencies that reference ids outside this breakdown.
    let known: HashSet<String> = subtasks.iter().map(|t| t.id.clone()).collect();
    for task in &mut subtasks {
        task.dependencies.retain(|d| {
            let ok = known.contains(d) && *d != task.id;
            if !ok {
                tracing::warn!(task = %task.id, dep = %d, "unresolvable dependency dropped");
            }
            ok
        });
    }
    subtasks
}

/// `parallel` when nothing depends on anything, else `sequential`.
fn determine_strategy(subtasks: &[SubTask]) -> ExecutionStrategy {
    if subtasks.is_empty() {
        ExecutionStrategy::Direct
    } else if subtasks.iter().any(|t| !t.dependencies.is_empty()) {
        ExecutionStrategy::Sequential
    } else {
        ExecutionStrategy::Parallel
    }
}

/// Duration estimate: max over tasks when parallel, sum when sequential.
fn estimate_duration(subtasks: &[SubTask], strategy: ExecutionStrategy) -> u64 {
    if subtasks.is_empty() {
        return 30;
    }
    let per_task = subtasks
        .iter()
        .map(|t| u64::from(t.estimated_iterations) * SECONDS_PER_ITERATION);
    match strategy {
        ExecutionStrategy::Parallel => per_task.max().unwrap_or(30),
        _ => per_task.sum(),
    }
}
