//! Graph node trait: one step in a workflow graph.
//!
//! Receives state `S`, returns updated `S` and [`Next`] (continue, jump, or
//! end). Nodes own their collaborators (LLM client, tool registry, event
//! sender) via constructor injection; the graph only sees state in, state out.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::WorkflowError;

use super::Next;

/// One step in a graph: state in, (state out, next step).
#[async_trait]
pub trait Node<S>: Send + Sync
where
    S: Clone + Send + Sync + Debug + 'static,
{
    /// Node id (e.g. `"plan"`, `"execute"`). Must be unique within a graph.
    fn id(&self) -> &str;

    /// One step. Return `Next::Continue` to follow the unconditional edge,
    /// `Next::Node(id)` to jump, `Next::End` to stop.
    async fn run(&self, state: S) -> Result<(S, Next), WorkflowError>;
}
