//! Logging subsystem for Architect
//!
//! Unified logging over the `tracing` crate. Honors RUST_LOG when set and
//! falls back to the configured level otherwise.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod error;
mod level;

pub use error::LoggingError;
pub use level::LogLevel;

/// Configuration for the logging subsystem
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// The minimum log level to display
    pub level: LogLevel,
    /// Whether to include target module information
    pub with_target: bool,
    /// Whether to use JSON formatting
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            with_target: true,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Create a new LogConfig with the given level
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set whether to include target information
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Set whether to use JSON formatting
    pub fn json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }
}

/// Initialize the logging subsystem with default configuration
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_config(LogConfig::default())
}

/// Initialize the logging subsystem with custom configuration
pub fn init_logging_with_config(config: LogConfig) -> Result<(), LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    if config.json_format {
        let layer = fmt::layer().json().with_target(config.with_target);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;
    } else {
        let layer = fmt::layer().with_target(config.with_target);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;
    }

    Ok(())
}
