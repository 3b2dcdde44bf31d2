//! Runtime timing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts and start-up behaviour for one session's runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long a correlated `get` waits for the client's reply.
    pub get_timeout_ms: u64,
    /// Upper bound on starting a driver's children.
    pub start_timeout_ms: u64,
    /// How long teardown waits for in-flight handlers before cancelling them.
    pub drain_timeout_ms: u64,
    /// Commit the whole mount tree once it has started.
    pub commit_on_start: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            get_timeout_ms: 5_000,
            start_timeout_ms: 30_000,
            drain_timeout_ms: 5_000,
            commit_on_start: true,
        }
    }
}

impl RuntimeConfig {
    /// Correlated `get` timeout.
    pub fn get_timeout(&self) -> Duration {
        Duration::from_millis(self.get_timeout_ms)
    }

    /// Child start-up timeout.
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Teardown drain timeout.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
