//! Protocol error types.

use thiserror::Error;

/// Failure to encode or decode a wire frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An inbound frame was not valid JSON or had an unknown `type`.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
    /// An outbound envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
    /// A binary frame did not carry UTF-8 text.
    #[error("binary frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}
