//! `tracing` subscriber setup.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive (`"info"`, `"debug"`, ...).
    pub level: String,
    /// Emit one JSON object per line instead of compact text.
    pub json: bool,
    /// Per-target overrides, e.g. `{"liveview_runtime": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive string built from the level and module overrides.
    pub fn directive(&self) -> String {
        let mut directive = self.level.clone();
        for (module, level) in &self.module_levels {
            let _ = write!(directive, ",{module}={level}");
        }
        directive
    }
}

/// Initialize the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins over the configured directive. Subsequent calls are no-ops.
pub fn init_subscriber(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.directive()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // set_global_default is a no-op if already set
    if config.json {
        let _ = builder.json().flatten_event(true).try_init();
    } else {
        let _ = builder.compact().try_init();
    }
}
