//! Correlation table: synchronous reads over the asynchronous outbound channel.
//!
//! A `get` is a fire-and-forget envelope like any other patch. To give callers
//! a call-like API, each request registers a one-shot reply slot keyed by a
//! fresh [`RequestId`], sends the envelope carrying that id as `id_ret`, and
//! awaits the slot. The reader loop resolves slots through
//! [`CorrelationTable::deliver`] when the client's reply arrives.

use std::time::Duration;

use dashmap::DashMap;
use liveview_core::constants::{GET_REQUESTS_TOTAL, GET_TIMEOUTS_TOTAL};
use liveview_core::{Envelope, GetKind, RequestId};
use metrics::counter;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::GetError;
use crate::outbound::Outbound;

/// Outstanding requests of one session, keyed by request id.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    slots: DashMap<RequestId, oneshot::Sender<Value>>,
}

/// Removes the slot when the waiting side finishes, however it finishes.
struct SlotGuard<'a> {
    table: &'a CorrelationTable,
    id: RequestId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let _ = self.table.slots.remove(&self.id);
    }
}

impl CorrelationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a `get` envelope and wait for the correlated reply.
    ///
    /// The slot is removed on every exit path: reply, timeout, closed
    /// outbound, session cancellation, or the caller dropping this future.
    pub async fn request(
        &self,
        outbound: &Outbound,
        target: &str,
        kind: GetKind,
        sub_target: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, GetError> {
        let id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        let _ = self.slots.insert(id.clone(), tx);
        let _guard = SlotGuard {
            table: self,
            id: id.clone(),
        };

        counter!(GET_REQUESTS_TOTAL, "sub_type" => kind.as_str()).increment(1);
        debug!(request_id = %id, target, sub_type = kind.as_str(), "sending get request");

        let sent = outbound.send(Envelope::Get {
            id: target.to_owned(),
            value: sub_target.to_owned(),
            id_ret: id.clone(),
            sub_type: kind,
        });
        if !sent {
            return Err(GetError::Closed);
        }

        tokio::select! {
            reply = tokio::time::timeout(timeout, rx) => match reply {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(GetError::Closed),
                Err(_) => {
                    counter!(GET_TIMEOUTS_TOTAL).increment(1);
                    warn!(request_id = %id, target, timeout_ms = timeout.as_millis() as u64, "get request timed out");
                    Err(GetError::Timeout(timeout))
                }
            },
            () = cancel.cancelled() => Err(GetError::Cancelled),
        }
    }

    /// Resolve a pending request with the client's payload.
    ///
    /// Returns `false` for unknown ids (late or duplicate replies); the slot is
    /// consumed, so a request is resolved at most once.
    pub fn deliver(&self, id: &RequestId, data: Value) -> bool {
        match self.slots.remove(id) {
            Some((_, tx)) => tx.send(data).is_ok(),
            None => false,
        }
    }

    /// Whether a request is still waiting.
    pub fn contains(&self, id: &RequestId) -> bool {
        self.slots.contains_key(id)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no request is outstanding.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
