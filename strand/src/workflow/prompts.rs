//! Prompt builders for the plan and execute nodes.
//!
//! Only the contract matters here: what is sent (task, plan, progress,
//! bounded tool-call window, action vocabulary) and what must come back
//! (a single JSON object).

use crate::state::{Domain, WorkflowState};

/// Tool-call entries from the log included in the execute prompt.
const TOOL_CALL_WINDOW: usize = 5;

/// One action the LLM may choose, with a usage example.
pub struct ActionSpec {
    pub name: &'static str,
    pub example: &'static str,
}

const BASE_ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: "LIST_DIRECTORY",
        example: r#"{"action": "LIST_DIRECTORY", "parameters": {"path": "."}}"#,
    },
    ActionSpec {
        name: "SEARCH_FILES",
        example: r#"{"action": "SEARCH_FILES", "parameters": {"pattern": "*.md"}}"#,
    },
    ActionSpec {
        name: "SEARCH_CODE",
        example: r#"{"action": "SEARCH_CODE", "parameters": {"pattern": "fn main", "file_glob": "*.rs"}}"#,
    },
    ActionSpec {
        name: "READ_FILE",
        example: r#"{"action": "READ_FILE", "parameters": {"file_path": "README.md"}}"#,
    },
    ActionSpec {
        name: "WRITE_FILE",
        example: r#"{"action": "WRITE_FILE", "parameters": {"file_path": "out.txt", "content": "..."}}"#,
    },
    ActionSpec {
        name: "RUN_COMMAND",
        example: r#"{"action": "RUN_COMMAND", "parameters": {"command": "ls -la"}}"#,
    },
    ActionSpec {
        name: "RUN_PYTHON",
        example: r#"{"action": "RUN_PYTHON", "parameters": {"code": "print(1)"}}"#,
    },
    ActionSpec {
        name: "GIT_STATUS",
        example: r#"{"action": "GIT_STATUS", "parameters": {}}"#,
    },
    ActionSpec {
        name: "COMPLETE",
        example: r#"{"action": "COMPLETE", "parameters": {"summary": "what was accomplished"}}"#,
    },
];

const CODING_ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: "GIT_DIFF",
        example: r#"{"action": "GIT_DIFF", "parameters": {}}"#,
    },
    ActionSpec {
        name: "GIT_LOG",
        example: r#"{"action": "GIT_LOG", "parameters": {"limit": 5}}"#,
    },
    ActionSpec {
        name: "GIT_COMMIT",
        example: r#"{"action": "GIT_COMMIT", "parameters": {"message": "...", "add_all": true}}"#,
    },
];

/// Actions offered for a domain: the base set plus domain additions.
pub fn actions_for(domain: Domain) -> Vec<&'static ActionSpec> {
    let mut actions: Vec<&ActionSpec> = BASE_ACTIONS.iter().collect();
    if domain == Domain::Coding {
        actions.extend(CODING_ACTIONS.iter());
    }
    actions
}

/// Planning prompt: analyze the task and emit a structured plan.
pub fn plan_prompt(state: &WorkflowState) -> String {
    format!(
        "You are planning a {} task.\n\
         \n\
         Task: {}\n\
         Workspace: {}\n\
         \n\
         Analyze the task: what type is it, what operations are needed, and in\n\
         what order?\n\
         \n\
         Respond with ONLY JSON:\n\
         {{\n\
           \"task_type\": \"file_organization|coding|analysis|system_admin|mixed|conversational\",\n\
           \"steps\": [\"step 1\", \"step 2\"],\n\
           \"estimated_steps\": 2,\n\
           \"tools_needed\": [\"filesystem\", \"git\"]\n\
         }}",
        state.domain,
        state.task_description,
        state.workspace.display()
    )
}

/// Execution prompt: pick exactly one action for this iteration.
pub fn execute_prompt(state: &WorkflowState) -> String {
    let plan = state
        .context
        .plan
        .as_ref()
        .and_then(|p| serde_json::to_string_pretty(p).ok())
        .unwrap_or_else(|| "none".to_string());
    let completed = if state.context.completed_steps.is_empty() {
        "none".to_string()
    } else {
        state.context.completed_steps.join(", ")
    };
    let recent: Vec<String> = state
        .recent_calls(TOOL_CALL_WINDOW)
        .iter()
        .map(|c| {
            format!(
                "- {} (iteration {}, success={})",
                c.action, c.iteration, c.success
            )
        })
        .collect();
    let recent = if recent.is_empty() {
        "none".to_string()
    } else {
        recent.join("\n")
    };
    let actions = actions_for(state.domain)
        .iter()
        .enumerate()
        .map(|(i, a)| format!("{}. {}: {}", i + 1, a.name, a.example))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are executing a {} task one step at a time.\n\
         \n\
         Task: {}\n\
         Plan: {plan}\n\
         Iteration: {}/{}\n\
         Completed steps: {completed}\n\
         Recent tool calls:\n{recent}\n\
         \n\
         Choose ONE action:\n{actions}\n\
         \n\
         When every required step is done you MUST use COMPLETE.\n\
         Respond with ONLY the JSON for one action.",
        state.domain,
        state.task_description,
        state.iteration,
        state.max_iterations,
    )
}
