//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`LiveSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge it over the defaults
//! 3. Apply `LIVEVIEW_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use liveview_runtime::RuntimeConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::logging::LoggingConfig;

/// Errors that can occur when loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Failed to read the settings file from disk.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The file was not valid JSON or did not match the settings shape.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything the `liveview` binary can be configured with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveSettings {
    /// Listener and session limits.
    pub server: ServerConfig,
    /// Per-session timeouts.
    pub runtime: RuntimeConfig,
    /// Log level and format.
    pub logging: LoggingConfig,
}

/// Load settings from `path` (if any) with environment overrides.
///
/// A missing file yields defaults; unreadable or invalid JSON is an error.
pub fn load_settings(path: Option<&Path>) -> Result<LiveSettings, SettingsError> {
    let defaults = serde_json::to_value(LiveSettings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut settings: LiveSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `LIVEVIEW_*` variables from the process environment.
pub fn apply_env_overrides(settings: &mut LiveSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Empty and unparsable values are ignored, falling back to file/default.
pub fn apply_overrides_from(settings: &mut LiveSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("LIVEVIEW_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_parsed(&read, "LIVEVIEW_PORT", |v| v.parse::<u16>().ok()) {
        settings.server.port = v;
    }
    if let Some(v) = read_parsed(&read, "LIVEVIEW_MAX_CONNECTIONS", |v| {
        parse_usize_range(v, 1, 100_000)
    }) {
        settings.server.max_connections = v;
    }
    if let Some(v) = read_parsed(&read, "LIVEVIEW_GET_TIMEOUT_MS", |v| {
        parse_u64_range(v, 1, 600_000)
    }) {
        settings.runtime.get_timeout_ms = v;
    }
    if let Some(v) = read_parsed(&read, "LIVEVIEW_START_TIMEOUT_MS", |v| {
        parse_u64_range(v, 1, 3_600_000)
    }) {
        settings.runtime.start_timeout_ms = v;
    }
    if let Some(v) = read("LIVEVIEW_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_parsed(&read, "LIVEVIEW_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

fn read_parsed<T>(
    read: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = read(name)?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        warn!(key = name, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
