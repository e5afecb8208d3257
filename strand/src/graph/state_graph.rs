//! State graph builder: nodes + explicit edges (from → to) and optional
//! conditional edges.
//!
//! Add nodes with `add_node`, define edges with `add_edge(from, to)` using
//! `START` and `END` for graph entry/exit, and `add_conditional_edges` to
//! route on state. Then `compile()` to get a [`CompiledGraph`].
//!
//! A node must have either one outgoing `add_edge` or conditional edges, not
//! both. Cycles are allowed (conditional edges route back); unbounded runs
//! are stopped by the transition limit.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use super::compile_error::CompilationError;
use super::compiled::CompiledGraph;
use super::conditional::{ConditionalRouter, ConditionalRouterFn, NextEntry};
use super::node::Node;

/// Sentinel for graph entry: use as `from_id` in `add_edge(START, first)`.
pub const START: &str = "__start__";

/// Sentinel for graph exit: use as `to_id` in `add_edge(last, END)`.
pub const END: &str = "__end__";

/// Default bound on node transitions per run.
const DEFAULT_TRANSITION_LIMIT: u32 = 100;

/// Mutable graph under construction. Generic over state type `S`.
pub struct StateGraph<S> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    /// Edges (from_id, to_id). One outgoing edge per node at most.
    edges: Vec<(String, String)>,
    /// Conditional edges: source node id → router.
    conditional_edges: HashMap<String, ConditionalRouter<S>>,
    /// Bound on node transitions per run (the recursion limit).
    transition_limit: u32,
}

impl<S> Default for StateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> StateGraph<S>
where
    S: Clone + Send + Sync + Debug + 'static,
{
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            conditional_edges: HashMap::new(),
            transition_limit: DEFAULT_TRANSITION_LIMIT,
        }
    }

    /// Overrides the transition limit (default 100).
    pub fn with_transition_limit(mut self, limit: u32) -> Self {
        self.transition_limit = limit;
        self
    }

    /// Adds a node; id must be unique. Replaces if same id.
    pub fn add_node(&mut self, id: impl Into<String>, node: Arc<dyn Node<S>>) -> &mut Self {
        self.nodes.insert(id.into(), node);
        self
    }

    /// Adds an edge from `from_id` to `to_id`. Use `START`/`END` for
    /// entry/exit. A node may have one outgoing edge or conditional edges,
    /// not both.
    pub fn add_edge(&mut self, from_id: impl Into<String>, to_id: impl Into<String>) -> &mut Self {
        self.edges.push((from_id.into(), to_id.into()));
        self
    }

    /// Adds conditional edges from `source`: after the node runs, `path` is
    /// called with the updated state; its return value is the next node id,
    /// or a key into `path_map` when provided.
    pub fn add_conditional_edges(
        &mut self,
        source: impl Into<String>,
        path: ConditionalRouterFn<S>,
        path_map: Option<HashMap<String, String>>,
    ) -> &mut Self {
        self.conditional_edges
            .insert(source.into(), ConditionalRouter::new(path, path_map));
        self
    }

    /// Validates the graph and builds the executable form.
    ///
    /// Checks: every edge endpoint exists, exactly one edge leaves START,
    /// END is reachable by some edge or conditional path, no node carries
    /// both an edge and conditional edges, no duplicate outgoing edges.
    pub fn compile(self) -> Result<CompiledGraph<S>, CompilationError> {
        for (from, to) in &self.edges {
            if from != START && !self.nodes.contains_key(from) {
                return Err(CompilationError::NodeNotFound(from.clone()));
            }
            if to != END && !self.nodes.contains_key(to) {
                return Err(CompilationError::NodeNotFound(to.clone()));
            }
        }
        for (source, router) in &self.conditional_edges {
            if !self.nodes.contains_key(source) {
                return Err(CompilationError::NodeNotFound(source.clone()));
            }
            if let Some(ref path_map) = router.path_map {
                for target in path_map.values() {
                    if target != END && !self.nodes.contains_key(target) {
                        return Err(CompilationError::InvalidConditionalPathMap(target.clone()));
                    }
                }
            }
        }

        let start_edges: Vec<_> = self
            .edges
            .iter()
            .filter(|(f, _)| f == START)
            .map(|(_, t)| t.clone())
            .collect();
        let first = match start_edges.len() {
            0 => return Err(CompilationError::MissingStart),
            1 => start_edges.into_iter().next().expect("one start edge"),
            _ => {
                return Err(CompilationError::InvalidGraph(
                    "multiple edges from START".into(),
                ))
            }
        };

        let reaches_end = self.edges.iter().any(|(_, t)| t == END)
            || self.conditional_edges.values().any(|r| {
                r.path_map
                    .as_ref()
                    .map_or(true, |m| m.values().any(|v| v == END))
            });
        if !reaches_end {
            return Err(CompilationError::MissingEnd);
        }

        let mut seen_from: HashSet<&str> = HashSet::new();
        for (from, _) in self.edges.iter().filter(|(f, _)| f != START) {
            if !seen_from.insert(from) {
                return Err(CompilationError::InvalidGraph(format!(
                    "duplicate outgoing edge from {from}"
                )));
            }
        }
        for source in self.conditional_edges.keys() {
            if seen_from.contains(source.as_str()) {
                return Err(CompilationError::NodeHasBothEdgeAndConditional(
                    source.clone(),
                ));
            }
        }

        let mut next_map: HashMap<String, NextEntry<S>> = self
            .edges
            .iter()
            .filter(|(f, _)| f != START)
            .map(|(f, t)| (f.clone(), NextEntry::Unconditional(t.clone())))
            .collect();
        for (source, router) in &self.conditional_edges {
            next_map.insert(source.clone(), NextEntry::Conditional(router.clone()));
        }

        Ok(CompiledGraph::new(
            self.nodes,
            first,
            next_map,
            self.transition_limit,
        ))
    }
}
