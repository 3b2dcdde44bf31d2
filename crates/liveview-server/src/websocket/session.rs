//! WebSocket session lifecycle, from upgrade through disconnect.
//!
//! Each connection gets a fresh root driver and [`SessionScope`]. One writer
//! task drains the outbound channel onto the socket (plus heartbeat pings);
//! the upgrade task itself runs the reader loop, routing `data` frames to the
//! driver registry and `get` replies to the correlation table.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, Stream, StreamExt};
use liveview_core::constants::{
    FRAMES_UNMATCHED_TOTAL, PATCHES_TOTAL, SESSIONS_ACTIVE, SESSIONS_TOTAL,
    SESSION_DURATION_SECONDS,
};
use liveview_core::{Envelope, Inbound, ProtocolError, SessionId};
use liveview_runtime::{DriverNode, Outbound, RuntimeConfig, SessionScope};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::page::Page;

/// Per-session settings handed over by the upgrade handler.
#[derive(Clone, Debug)]
pub struct SessionParams {
    /// Runtime timeouts for this session.
    pub runtime: RuntimeConfig,
    /// Interval between server-initiated Ping frames.
    pub heartbeat: Duration,
    /// Session token, normally a child of the server's shutdown token.
    pub cancel: CancellationToken,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed the socket or the stream ended.
    ClientClosed,
    /// Reading from the transport failed.
    TransportError,
    /// A frame could not be decoded.
    DecodeError,
    /// Writing to the transport failed.
    WriteFailed,
    /// The session token was cancelled (server shutdown).
    Cancelled,
}

impl SessionEnd {
    /// Label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::TransportError => "transport_error",
            Self::DecodeError => "decode_error",
            Self::WriteFailed => "write_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Run a session for an upgraded socket.
#[instrument(skip_all, fields(session_id = %session_id, page = %page.path()))]
pub async fn run_session(
    ws: WebSocket,
    session_id: SessionId,
    page: Arc<Page>,
    params: SessionParams,
) -> SessionEnd {
    let (sink, stream) = ws.split();
    drive_session(sink, stream, session_id, page.build_root(), params).await
}

/// Session loop over any message sink and stream.
///
/// 1. Spawns the writer (outbound envelopes + heartbeat pings)
/// 2. Starts the mount tree and queues the initial render
/// 3. Reads frames until close, error, or cancellation
/// 4. Drains in-flight handlers, cancels the rest, stops the writer
pub async fn drive_session<Si, St, E>(
    sink: Si,
    mut stream: St,
    session_id: SessionId,
    root: Arc<dyn DriverNode>,
    params: SessionParams,
) -> SessionEnd
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let started = Instant::now();
    counter!(SESSIONS_TOTAL).increment(1);
    gauge!(SESSIONS_ACTIVE).increment(1.0);
    info!(root = %root.component_id(), "session opened");

    let SessionParams {
        runtime,
        heartbeat,
        cancel,
    } = params;
    let commit_on_start = runtime.commit_on_start;
    let (outbound, rx) = Outbound::channel();
    let scope = SessionScope::new(session_id, outbound, runtime, cancel.clone());

    let writer = tokio::spawn(write_loop(sink, rx, heartbeat, cancel.clone()));

    // Frames sent before the tree is registered wait in the stream.
    let booted = tokio::select! {
        () = cancel.cancelled() => false,
        () = Arc::clone(&root).start(scope.clone()) => true,
    };
    if booted && commit_on_start {
        let patches = root.commit_tree();
        debug!(patches, "initial render queued");
    }

    let mut end = if booted {
        read_loop(&mut stream, &scope, &cancel).await
    } else {
        SessionEnd::Cancelled
    };

    let drained = scope.shutdown().await;
    let write_failed = writer.await.unwrap_or(true);
    if write_failed && end == SessionEnd::Cancelled {
        end = SessionEnd::WriteFailed;
    }

    gauge!(SESSIONS_ACTIVE).decrement(1.0);
    histogram!(SESSION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    info!(
        reason = end.as_str(),
        drained,
        duration_ms = started.elapsed().as_millis() as u64,
        "session closed"
    );
    end
}

/// Read frames until the session ends.
async fn read_loop<St, E>(
    stream: &mut St,
    scope: &SessionScope,
    cancel: &CancellationToken,
) -> SessionEnd
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => return SessionEnd::Cancelled,
            frame = stream.next() => frame,
        };
        let outcome = match frame {
            None => return SessionEnd::ClientClosed,
            Some(Err(err)) => {
                warn!(error = %err, "transport read failed");
                return SessionEnd::TransportError;
            }
            Some(Ok(Message::Text(text))) => dispatch_frame(scope, text.as_str()),
            Some(Ok(Message::Binary(bytes))) => std::str::from_utf8(&bytes)
                .map_err(ProtocolError::from)
                .and_then(|text| dispatch_frame(scope, text)),
            Some(Ok(Message::Close(_))) => {
                debug!("client sent close frame");
                return SessionEnd::ClientClosed;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => Ok(()),
        };
        if let Err(err) = outcome {
            warn!(error = %err, "undecodable frame, closing session");
            return SessionEnd::DecodeError;
        }
    }
}

/// Route one decoded client frame.
///
/// Frames addressed to unknown components or requests are dropped. Only a
/// frame that fails to decode is an error.
pub fn dispatch_frame(scope: &SessionScope, text: &str) -> Result<(), ProtocolError> {
    match Inbound::decode(text)? {
        Inbound::Data { id, event, data } => match scope.registry().get(&id) {
            Some(driver) => {
                if !driver.execute_event(&event, data) {
                    debug!(component_id = %id, event = %event, "event not dispatched");
                }
            }
            None => {
                counter!(FRAMES_UNMATCHED_TOTAL, "type" => "data").increment(1);
                debug!(component_id = %id, event = %event, "no driver for data frame, dropping");
            }
        },
        Inbound::Get { id_ret, data } => {
            if !scope.pending().deliver(&id_ret, data) {
                counter!(FRAMES_UNMATCHED_TOTAL, "type" => "get").increment(1);
                debug!(request_id = %id_ret, "late or duplicate get reply, dropping");
            }
        }
    }
    Ok(())
}

/// Single consumer of the outbound channel.
///
/// Returns `true` if a write failed, in which case the session token is
/// cancelled so the reader stops too.
async fn write_loop<Si>(
    mut sink: Si,
    mut rx: UnboundedReceiver<Envelope>,
    heartbeat: Duration,
    cancel: CancellationToken,
) -> bool
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let mut ping_interval = tokio::time::interval(heartbeat);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    let failed = loop {
        tokio::select! {
            () = cancel.cancelled() => break false,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break false };
                let text = match envelope.encode() {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, kind = envelope.kind(), "dropping unencodable envelope");
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %err, "transport write failed");
                    break true;
                }
                counter!(PATCHES_TOTAL, "type" => envelope.kind()).increment(1);
            }
            _ = ping_interval.tick() => {
                if let Err(err) = sink.send(Message::Ping(Bytes::new())).await {
                    warn!(error = %err, "heartbeat ping failed");
                    break true;
                }
            }
        }
    };

    if failed {
        cancel.cancel();
    }
    let _ = sink.close().await;
    failed
}
