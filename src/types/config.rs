//! Configuration structures.
//!
//! Configuration is loaded from JSON files; durations use humantime notation
//! (`"31s"`, `"250ms"`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::{Error, Result};

/// Global configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Rate-limited queue configuration.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.queue.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }
}

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of slots occupied at once.
    pub max_slots: u32,

    /// How long a slot stays occupied after its task starts.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        // Chat transports commonly allow 20 messages per 30s; 1s of headroom.
        Self {
            max_slots: 20,
            window: Duration::from_secs(31),
        }
    }
}

impl QueueConfig {
    pub fn new(max_slots: u32, window: Duration) -> Self {
        Self { max_slots, window }
    }

    /// Reject settings that would produce silently wrong scheduling.
    pub fn validate(&self) -> Result<()> {
        if self.max_slots == 0 {
            return Err(Error::validation("max_slots must be positive"));
        }
        if self.window.is_zero() {
            return Err(Error::validation("window must be positive"));
        }
        Ok(())
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
