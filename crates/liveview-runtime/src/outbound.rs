//! The session's single outbound envelope channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use liveview_core::Envelope;
use tokio::sync::mpsc;

/// Cloneable sending half of a session's outbound channel.
///
/// Every driver in a session holds a clone; the writer loop owns the only
/// receiver. Sends never block and never wait for a reply, so patch emitters
/// can be called from synchronous code. The channel is unbounded so that no
/// patch is ever discarded while the session is alive.
#[derive(Clone, Debug)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Envelope>,
    dropped: Arc<AtomicU64>,
}

impl Outbound {
    /// Create a channel, returning the sender and the writer's receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Enqueue an envelope.
    ///
    /// Returns `false` once the receiver is gone, and counts the drop.
    pub fn send(&self, envelope: Envelope) -> bool {
        if self.tx.send(envelope).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Envelopes discarded because the session had already closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
