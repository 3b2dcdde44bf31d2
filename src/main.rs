//! # liveview
//!
//! Demo server binary: loads settings, installs logging and metrics, and
//! serves a counter page until Ctrl-C.

#![deny(unsafe_code)]

mod demo;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use liveview_server::logging::init_subscriber;
use liveview_server::settings::load_settings;
use liveview_server::{LiveServer, LiveSettings};
use tracing::info;

/// Liveview demo server.
#[derive(Parser, Debug)]
#[command(name = "liveview", about = "Serve server-driven live components")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to a JSON settings file.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// CLI flags win over file and environment settings.
    fn apply(&self, settings: &mut LiveSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = load_settings(cli.settings.as_deref()).context("failed to load settings")?;
    cli.apply(&mut settings);
    init_subscriber(&settings.logging);

    let metrics = liveview_server::metrics::install_recorder()?;

    let server = LiveServer::new(settings.server, settings.runtime)
        .page(demo::page())
        .with_metrics(metrics);
    let (addr, handle) = server.listen().await?;
    info!("demo available at http://{addr}/");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("received ctrl-c, shutting down");
    server.shutdown().graceful_shutdown(vec![handle], None).await;
    Ok(())
}
