//! Conditional edges: route to the next node based on state.

use std::collections::HashMap;
use std::sync::Arc;

/// Routing function `(state) -> key`; the key is the next node id, or a key
/// into the router's path map when one is provided.
pub type ConditionalRouterFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

/// A conditional router attached to a source node.
pub struct ConditionalRouter<S> {
    pub path: ConditionalRouterFn<S>,
    pub path_map: Option<HashMap<String, String>>,
}

impl<S> Clone for ConditionalRouter<S> {
    fn clone(&self) -> Self {
        Self {
            path: Arc::clone(&self.path),
            path_map: self.path_map.clone(),
        }
    }
}

impl<S> ConditionalRouter<S> {
    pub fn new(path: ConditionalRouterFn<S>, path_map: Option<HashMap<String, String>>) -> Self {
        Self { path, path_map }
    }

    /// Resolves the next node id from state: the router's key, mapped through
    /// `path_map` when present (an unmapped key is used as the node id).
    pub fn resolve_next(&self, state: &S) -> String {
        let key = (self.path)(state);
        match &self.path_map {
            Some(map) => map.get(&key).cloned().unwrap_or(key),
            None => key,
        }
    }
}

/// How to find the node after a given node.
pub enum NextEntry<S> {
    Unconditional(String),
    Conditional(ConditionalRouter<S>),
}

impl<S> Clone for NextEntry<S> {
    fn clone(&self) -> Self {
        match self {
            NextEntry::Unconditional(id) => NextEntry::Unconditional(id.clone()),
            NextEntry::Conditional(router) => NextEntry::Conditional(router.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_uses_path_map_when_present() {
        let router = ConditionalRouter::<i32>::new(
            Arc::new(|s| if *s > 0 { "pos".into() } else { "neg".into() }),
            Some(
                [("pos".to_string(), "a".to_string())]
                    .into_iter()
                    .collect(),
            ),
        );
        assert_eq!(router.resolve_next(&1), "a");
        // Unmapped key falls through as a node id.
        assert_eq!(router.resolve_next(&-1), "neg");
    }
}
