//! Complexity-check node: decide whether to spawn sub-agents.
//!
//! Routes to sub-agents only when they are enabled by config AND the LLM's
//! complexity estimate reaches the threshold. Estimation failure takes the
//! safe path: normal execution.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkflowError;
use crate::graph::{Next, Node};
use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::state::WorkflowState;

pub const NODE_CHECK_COMPLEXITY: &str = "check_complexity";

pub struct ComplexityNode {
    llm: Arc<dyn LlmClient>,
    sub_agents_enabled: bool,
    complexity_threshold: f64,
}

impl ComplexityNode {
    pub fn new(llm: Arc<dyn LlmClient>, sub_agents_enabled: bool, complexity_threshold: f64) -> Self {
        Self {
            llm,
            sub_agents_enabled,
            complexity_threshold,
        }
    }

    /// Asks for a single float in [0, 1]. Tolerates decimal commas; clamps.
    async fn estimate_complexity(&self, task: &str) -> Option<f64> {
        let prompt = format!(
            "Estimate the complexity of this task on a scale of 0.0 to 1.0.\n\
             \n\
             Task: {task}\n\
             \n\
             Guide: 0.0-0.3 simple (1-2 files), 0.4-0.6 moderate (3-5 files), \
             0.7-0.9 complex (6-10 files, several components), 0.9-1.0 very \
             complex (full stack, many files).\n\
             \n\
             Respond with ONLY a single number between 0.0 and 1.0. Example: 0.75"
        );
        let messages = [ChatMessage::user(prompt)];
        let options = ChatOptions::default()
            .with_temperature(0.2)
            .with_max_tokens(10);
        let reply = self.llm.chat_completion(&messages, &options).await.ok()?;
        let score: f64 = reply.content.trim().replace(',', ".").parse().ok()?;
        Some(score.clamp(0.0, 1.0))
    }
}

#[async_trait]
impl Node<WorkflowState> for ComplexityNode {
    fn id(&self) -> &str {
        NODE_CHECK_COMPLEXITY
    }

    async fn run(&self, mut state: WorkflowState) -> Result<(WorkflowState, Next), WorkflowError> {
        if !self.sub_agents_enabled {
            tracing::debug!("sub-agents disabled; normal execution");
            state.context.use_sub_agents = false;
            return Ok((state, Next::Continue));
        }

        match self.estimate_complexity(&state.task_description).await {
            Some(score) => {
                tracing::info!(
                    score,
                    threshold = self.complexity_threshold,
                    "task complexity estimated"
                );
                state.context.complexity_score = Some(score);
                state.context.use_sub_agents = score >= self.complexity_threshold;
            }
            None => {
                // Safe path on estimation failure.
                tracing::warn!("complexity estimation failed; using normal execution");
                state.context.use_sub_agents = false;
            }
        }
        Ok((state, Next::Continue))
    }
}
