//! # liveview-runtime
//!
//! The live side of a session: component [`Driver`]s arranged in a mount
//! tree, the per-session [`DriverRegistry`] and [`CorrelationTable`], and the
//! [`SessionScope`] that ties every spawned task to the session's lifetime.
//!
//! The runtime never touches a socket. Drivers push [`Envelope`]s into an
//! [`Outbound`] channel; whoever owns the receiving end (the server's writer
//! loop, or a test) puts them on the wire.
//!
//! [`Envelope`]: liveview_core::Envelope

#![deny(unsafe_code)]

pub mod component;
pub mod config;
pub mod correlation;
pub mod driver;
pub mod error;
pub mod outbound;
pub mod registry;
pub mod scope;

pub use component::{Component, HandlerTable};
pub use config::RuntimeConfig;
pub use correlation::CorrelationTable;
pub use driver::{Driver, DriverNode};
pub use error::{ComponentError, GetError};
pub use outbound::Outbound;
pub use registry::DriverRegistry;
pub use scope::SessionScope;
