//! Workflow state graph: nodes + explicit edges and conditional routing.
//!
//! Build with [`StateGraph`]: `add_node`, `add_edge(from, to)` using [`START`]
//! and [`END`] sentinels, `add_conditional_edges` for state-based routing,
//! then `compile()` into an immutable [`CompiledGraph`] that supports
//! `invoke`. The run loop enforces a transition limit independent of any
//! domain-level iteration budget.

mod compile_error;
mod compiled;
mod conditional;
mod node;
mod state_graph;

pub use compile_error::CompilationError;
pub use compiled::{CompiledGraph, RunObserver};
pub use conditional::{ConditionalRouter, ConditionalRouterFn, NextEntry};
pub use node::Node;
pub use state_graph::{StateGraph, END, START};

/// Routing outcome of one node run.
///
/// `Continue` follows the node's unconditional edge; `Node(id)` jumps;
/// `End` stops the graph. A conditional router on the node, when present,
/// overrides all three.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    Continue,
    Node(String),
    End,
}
