//! Stream event protocol: type + payload + envelope.
//!
//! This crate defines the wire shape of a single progress event emitted while a
//! workflow runs, and the envelope (task_id, node, iteration, event_id,
//! timestamp) injected around it. It does not depend on strand; strand bridges
//! its internal events into [`ProtocolEvent`] and calls [`to_json`].

mod envelope;
mod event;

pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::ProtocolEvent;
