//! Graph compilation errors.

use thiserror::Error;

/// Raised by `StateGraph::compile` when the graph shape is invalid.
#[derive(Debug, Error)]
pub enum CompilationError {
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("no edge from START")]
    MissingStart,
    #[error("no edge or conditional path reaches END")]
    MissingEnd,
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    #[error("node has both an edge and conditional edges: {0}")]
    NodeHasBothEdgeAndConditional(String),
    #[error("conditional path map references unknown node: {0}")]
    InvalidConditionalPathMap(String),
}
