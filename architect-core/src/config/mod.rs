//! Configuration management for Architect
//!
//! Environment- and file-based configuration with defaults and
//! validation, covering the sync core's tunables and logging.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sync core configuration
    pub sync: SyncConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Sync core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Coalescing window for ModifyObject broadcasts, per object
    #[serde(with = "humantime_serde")]
    pub debounce_interval: Duration,

    /// Time allowed for a workspace membership check
    #[serde(with = "humantime_serde")]
    pub verify_timeout: Duration,

    /// Capacity of the router's command channel
    pub command_capacity: usize,

    /// Capacity of the scene event channel to the rendering collaborator
    pub scene_capacity: usize,

    /// Capacity of each peer data channel
    pub channel_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,

    /// Log file path (optional)
    pub log_file: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_interval: Duration::from_millis(250),
            verify_timeout: Duration::from_secs(5),
            command_capacity: 64,
            scene_capacity: 64,
            channel_capacity: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern ARCHITECT_<SECTION>_<KEY>.
    /// Example: ARCHITECT_SYNC_DEBOUNCE_MS=500
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(ms) = env::var("ARCHITECT_SYNC_DEBOUNCE_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("invalid debounce ms: {}", e)))?;
            config.sync.debounce_interval = Duration::from_millis(ms);
        }
        if let Ok(secs) = env::var("ARCHITECT_SYNC_VERIFY_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|e| {
                ConfigError::InvalidValue(format!("invalid verify timeout: {}", e))
            })?;
            config.sync.verify_timeout = Duration::from_secs(secs);
        }
        if let Ok(cap) = env::var("ARCHITECT_SYNC_CHANNEL_CAPACITY") {
            config.sync.channel_capacity = cap.parse().map_err(|e| {
                ConfigError::InvalidValue(format!("invalid channel capacity: {}", e))
            })?;
        }

        if let Ok(level) = env::var("ARCHITECT_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(json) = env::var("ARCHITECT_LOG_JSON") {
            config.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("invalid JSON flag: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a toml file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // The debounce window bounds message rate while keeping edits
        // responsive; values outside this band defeat one or the other.
        if self.sync.debounce_interval < Duration::from_millis(100)
            || self.sync.debounce_interval > Duration::from_secs(1)
        {
            return Err(ConfigError::ValidationFailed(
                "debounce_interval must be between 100ms and 1s".to_string(),
            ));
        }

        if self.sync.command_capacity == 0
            || self.sync.scene_capacity == 0
            || self.sync.channel_capacity == 0
        {
            return Err(ConfigError::ValidationFailed(
                "channel capacities must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to a toml file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }
}
