use std::path::Path;

use serde::Deserialize;

/// Failure loading a [`SyncConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// The config text is not valid TOML for [`SyncConfig`].
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Tuning knobs for the sync runtime. Missing keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Capacity of the command channel between handles and the actor.
    pub command_queue_bound: usize,
    /// Events buffered per subscriber before it starts lagging.
    pub event_capacity: usize,
    /// Period of automatic drains in milliseconds; `0` disables them.
    pub drain_interval_ms: u64,
    /// Upper bound on one channel call before it counts as failed.
    pub dispatch_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            command_queue_bound: 256,
            event_capacity: 1024,
            drain_interval_ms: 0,
            dispatch_timeout_ms: 30_000,
        }
    }
}

impl SyncConfig {
    /// Parses a TOML document such as
    ///
    /// ```toml
    /// drain_interval_ms = 60000
    /// dispatch_timeout_ms = 10000
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses `path`.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
