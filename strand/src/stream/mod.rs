//! Event bridge between workflow internals and the stream consumer.
//!
//! Every node, the engine, and the sub-agent pool emit [`ProtocolEvent`]s
//! through an [`EventSender`]. The channel is bounded: when the consumer
//! cannot keep up, producers block at the next emission, slowing the workflow
//! rather than dropping events. A consumer that drops its receiver trips the
//! cancellation token, which the run loop checks at the next suspension point.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use stream_event::ProtocolEvent;

/// Default event channel capacity.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Cloneable handle producers use to emit events.
#[derive(Clone)]
pub struct EventSender {
    tx: Option<mpsc::Sender<ProtocolEvent>>,
    cancel: CancellationToken,
}

impl EventSender {
    /// Creates a bounded event channel; the receiver side feeds the stream
    /// consumer.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProtocolEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx: Some(tx),
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    /// A sender that drops every event; used for non-streaming runs.
    pub fn null() -> Self {
        Self {
            tx: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Emits one event, applying backpressure. A closed consumer cancels the
    /// run token instead of erroring here.
    pub async fn emit(&self, event: ProtocolEvent) {
        let Some(ref tx) = self.tx else {
            return;
        };
        if tx.send(event).await.is_err() {
            tracing::debug!("event consumer dropped; cancelling run");
            self.cancel.cancel();
        }
    }

    /// Token tripped when the consumer goes away.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
