//! # liveview-core
//!
//! Shared vocabulary for the liveview runtime and server:
//!
//! - Branded identifiers for sessions, components and correlated requests
//! - The JSON wire protocol exchanged with the browser client
//! - Route, anchor and metric name constants

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod ids;
pub mod protocol;

pub use errors::ProtocolError;
pub use ids::{ComponentId, RequestId, SessionId};
pub use protocol::{Envelope, GetKind, Inbound};
