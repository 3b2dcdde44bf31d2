//! Errors raised by component code and by `get` round trips.

use std::time::Duration;

/// Failure reported by user component code: render, init, or an event handler.
#[derive(Debug, thiserror::Error)]
pub enum ComponentError {
    /// `render` could not produce markup.
    #[error("render failed: {0}")]
    Render(String),

    /// `init` failed; the driver stays registered.
    #[error("init failed: {0}")]
    Init(String),

    /// Event data did not match the handler's expected shape.
    #[error("invalid event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// A `get` issued by the handler failed.
    #[error("get failed: {0}")]
    Get(#[from] GetError),

    /// Free-form handler failure.
    #[error("{0}")]
    Handler(String),
}

impl ComponentError {
    /// Convenience constructor for free-form handler failures.
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Render(_) => "render",
            Self::Init(_) => "init",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Get(_) => "get",
            Self::Handler(_) => "handler",
        }
    }
}

/// Why a correlated `get` produced no reply.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GetError {
    /// The client did not answer in time.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The driver has not been started.
    #[error("driver is not attached to a session")]
    NotStarted,

    /// The request could not be sent; the writer is gone.
    #[error("session outbound channel closed")]
    Closed,

    /// The session was torn down while waiting.
    #[error("session cancelled")]
    Cancelled,
}
