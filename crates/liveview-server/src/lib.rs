//! # liveview-server
//!
//! Axum HTTP + `WebSocket` host for liveview pages.
//!
//! - One shell route per [`Page`] plus its `<path>ws_goliveview` upgrade route
//! - Per-connection session: writer loop, reader loop, heartbeat pings
//! - `/health` and Prometheus `/metrics`
//! - Layered settings (defaults, JSON file, environment) and `tracing` setup
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod page;
pub mod server;
pub mod settings;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use error::ServerError;
pub use page::Page;
pub use server::LiveServer;
pub use settings::{LiveSettings, SettingsError};
pub use shutdown::ShutdownCoordinator;
