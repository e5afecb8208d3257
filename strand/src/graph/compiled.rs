//! Compiled graph: immutable, supports invoke with an optional observer and
//! cancellation.
//!
//! Built by `StateGraph::compile`. Runs from the first node; after each node,
//! a conditional router (when present) or the node's returned `Next` chooses
//! the next node. The transition limit bounds total node executions per run
//! independent of any domain-level iteration budget.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::WorkflowError;

use super::conditional::NextEntry;
use super::node::Node;
use super::state_graph::END;
use super::Next;

/// Observer of graph progress; called after every node completes.
#[async_trait]
pub trait RunObserver<S>: Send + Sync {
    async fn on_node_end(&self, node_id: &str, state: &S);
}

/// Immutable, executable graph.
pub struct CompiledGraph<S> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    first_node_id: String,
    next_map: HashMap<String, NextEntry<S>>,
    transition_limit: u32,
}

impl<S> Clone for CompiledGraph<S> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            first_node_id: self.first_node_id.clone(),
            next_map: self.next_map.clone(),
            transition_limit: self.transition_limit,
        }
    }
}

impl<S> Debug for CompiledGraph<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("first_node_id", &self.first_node_id)
            .field("transition_limit", &self.transition_limit)
            .finish()
    }
}

impl<S> CompiledGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub(super) fn new(
        nodes: HashMap<String, Arc<dyn Node<S>>>,
        first_node_id: String,
        next_map: HashMap<String, NextEntry<S>>,
        transition_limit: u32,
    ) -> Self {
        Self {
            nodes,
            first_node_id,
            next_map,
            transition_limit,
        }
    }

    /// Runs the graph to completion and returns the final state.
    pub async fn invoke(&self, state: S) -> Result<S, WorkflowError> {
        self.invoke_observed(state, None, None).await
    }

    /// Runs the graph with an optional observer (called after every node) and
    /// an optional cancellation token checked before each node entry.
    pub async fn invoke_observed(
        &self,
        state: S,
        observer: Option<&dyn RunObserver<S>>,
        cancel: Option<&CancellationToken>,
    ) -> Result<S, WorkflowError> {
        if self.nodes.is_empty() || !self.nodes.contains_key(&self.first_node_id) {
            return Err(WorkflowError::Internal("empty graph".into()));
        }
        let mut state = state;
        let mut current_id = self.first_node_id.clone();
        let mut transitions: u32 = 0;

        tracing::debug!(first = %current_id, "graph run start");
        loop {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    tracing::debug!(node = %current_id, "graph run cancelled");
                    return Err(WorkflowError::Internal("cancelled by consumer".into()));
                }
            }
            if transitions >= self.transition_limit {
                tracing::error!(limit = self.transition_limit, "transition limit reached");
                return Err(WorkflowError::RecursionExhausted {
                    limit: self.transition_limit,
                });
            }
            transitions += 1;

            let node = self
                .nodes
                .get(&current_id)
                .ok_or_else(|| WorkflowError::Internal(format!("unknown node: {current_id}")))?
                .clone();
            tracing::debug!(node = %current_id, transitions, "node start");
            let (new_state, next) = node.run(state).await?;
            state = new_state;
            tracing::debug!(node = %current_id, next = ?next, "node end");

            if let Some(obs) = observer {
                obs.on_node_end(&current_id, &state).await;
            }

            let next_id: Option<String> = match self.next_map.get(&current_id) {
                Some(NextEntry::Conditional(router)) => Some(router.resolve_next(&state)),
                Some(NextEntry::Unconditional(to)) => match next {
                    Next::End => None,
                    Next::Node(id) => Some(id),
                    Next::Continue => Some(to.clone()),
                },
                None => match next {
                    Next::Node(id) => Some(id),
                    _ => None,
                },
            };

            match next_id {
                None => return Ok(state),
                Some(id) if id == END => return Ok(state),
                Some(id) => current_id = id,
            }
        }
    }
}
