//! Configuration: server settings from environment variables and the
//! channel set from a JSON file.

use std::env;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::model::Channel;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the control/reporting API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "channelwatch.db")
    pub db_path: String,
    /// Path to the channels JSON file (default: "channels.json")
    pub channels_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "channelwatch.db".to_string(),
            channels_path: "channels.json".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CHANNELWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `CHANNELWATCH_DB_PATH`: database file path (default: "channelwatch.db")
    /// - `CHANNELWATCH_CHANNELS_PATH`: channels file (default: "channels.json")
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("CHANNELWATCH_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("CHANNELWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(channels_path) = env::var("CHANNELWATCH_CHANNELS_PATH") {
            cfg.channels_path = channels_path;
        }

        cfg
    }
}

/// Backoff growth while a channel is offline. The next probe delay is
/// `interval × factor^backoff_step`, capped at `interval × max_multiplier`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub factor: f64,
    pub max_multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            factor: 2.0,
            max_multiplier: 10.0,
        }
    }
}

impl BackoffPolicy {
    /// Interval multiplier for the given backoff step.
    pub fn multiplier(&self, step: u32) -> f64 {
        self.factor
            .powi(step.min(i32::MAX as u32) as i32)
            .min(self.max_multiplier)
            .max(1.0)
    }
}

/// Engine-wide knobs that are policy, not constants.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MonitorPolicy {
    pub backoff: BackoffPolicy,
    /// Whether a guard-denied (skipped) sample counts as the channel's most
    /// recent sample for recency display.
    pub skipped_updates_recency: bool,
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            skipped_updates_recency: false,
        }
    }
}

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse channels file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid channel config: {0}")]
    Invalid(String),
}

/// Load and validate the channel set from a JSON file.
pub fn load_channels<P: AsRef<Path>>(path: P) -> Result<Vec<Channel>, ConfigError> {
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.as_ref().display().to_string(),
        source,
    })?;
    let channels: Vec<Channel> = serde_json::from_str(&raw)?;
    validate_channels(&channels)?;
    Ok(channels)
}

/// Validate a channel set: unique ids, positive timings, sane thresholds.
pub fn validate_channels(channels: &[Channel]) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for ch in channels {
        if ch.id.is_empty() {
            return Err(ConfigError::Invalid("channel id must not be empty".into()));
        }
        if !seen.insert(ch.id.as_str()) {
            return Err(ConfigError::Invalid(format!("duplicate channel id: {}", ch.id)));
        }
        if ch.interval_secs <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "channel {}: interval must be positive",
                ch.id
            )));
        }
        if ch.timeout_secs <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "channel {}: timeout must be positive",
                ch.id
            )));
        }
        if ch.failure_threshold == 0 {
            return Err(ConfigError::Invalid(format!(
                "channel {}: failure threshold must be at least 1",
                ch.id
            )));
        }
        if !(0.0..1.0).contains(&ch.jitter_pct) {
            return Err(ConfigError::Invalid(format!(
                "channel {}: jitter must be in [0, 1)",
                ch.id
            )));
        }
    }
    Ok(())
}
