//! Envelope (task_id, node, iteration, event_id, timestamp) merged into each
//! event object. EnvelopeState tracks the current node and sequences event ids.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::event::ProtocolEvent;

/// Envelope fields attached to each message.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Task ID; constant within a stream.
    pub task_id: Option<String>,
    /// Graph node the event was produced in, when applicable.
    pub node: Option<String>,
    /// Workflow iteration at emission time, when applicable.
    pub iteration: Option<u32>,
    /// Per-message sequence number; monotonically increasing within a stream.
    pub event_id: Option<u64>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task_id(mut self, id: impl Into<String>) -> Self {
        self.task_id = Some(id.into());
        self
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_event_id(mut self, id: u64) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Merges envelope fields plus an ISO-8601 timestamp into the given JSON
    /// object (top-level only). Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.task_id {
            obj.entry("task_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref node) = self.node {
            obj.entry("node")
                .or_insert_with(|| Value::String(node.clone()));
        }
        if let Some(iteration) = self.iteration {
            obj.entry("iteration")
                .or_insert_with(|| Value::Number(serde_json::Number::from(iteration)));
        }
        if let Some(id) = self.event_id {
            obj.entry("event_id")
                .or_insert_with(|| Value::Number(serde_json::Number::from(id)));
        }
        obj.entry("timestamp").or_insert_with(|| {
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
        });
    }
}

/// Envelope state for one stream: task_id, current node, next event_id.
pub struct EnvelopeState {
    pub task_id: String,
    pub current_node: Option<String>,
    pub current_iteration: Option<u32>,
    pub next_event_id: u64,
}

impl EnvelopeState {
    pub fn new(task_id: String) -> Self {
        Self {
            task_id,
            current_node: None,
            current_iteration: None,
            next_event_id: 1,
        }
    }

    /// Updates the current node/iteration span. Subsequent events carry them
    /// until the next update.
    pub fn enter_node(&mut self, node: impl Into<String>, iteration: u32) {
        self.current_node = Some(node.into());
        self.current_iteration = Some(iteration);
    }

    /// Injects envelope into the event value and advances the sequence number.
    pub fn inject_into(&mut self, value: &mut Value) {
        let mut env = Envelope::new()
            .with_task_id(&self.task_id)
            .with_event_id(self.next_event_id);
        if let Some(ref node) = self.current_node {
            env = env.with_node(node.clone());
        }
        if let Some(iteration) = self.current_iteration {
            env = env.with_iteration(iteration);
        }
        self.next_event_id += 1;
        env.inject_into(value);
    }
}

/// Converts a protocol event to JSON and injects the envelope using the given
/// state. Returns the final value (type + data + envelope fields).
pub fn to_json(
    event: &ProtocolEvent,
    state: &mut EnvelopeState,
) -> Result<Value, serde_json::Error> {
    let mut value = event.to_value()?;
    state.inject_into(&mut value);
    Ok(value)
}
