//! # Logging Initialisation
//!
//! Configures the `tracing-subscriber` stack for the connector.
//!
//! Output format and the base level directive come from [`LoggingConfig`];
//! the `RUST_LOG` environment variable still wins when set, so operators can
//! raise verbosity for a single module without touching configuration.

use crate::error::{Result, RuntimeError};
use tracing_subscriber::{fmt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output with ANSI colors.
    Pretty,
    /// Structured JSON for log shippers.
    Json,
    /// Single-line output for production consoles.
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Compact;
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Base filter directive, e.g. `info` or `info,connector_drive=debug`.
    pub directives: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            directives: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = directives.into();
        self
    }
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns [`RuntimeError::Logging`] when the filter directive does not
/// parse or a subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.directives))
        .map_err(|e| RuntimeError::Logging(e.to_string()))?;

    let result = match config.format {
        LogFormat::Pretty => fmt()
            .with_env_filter(filter)
            .pretty()
            .try_init(),
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .json()
            .try_init(),
        LogFormat::Compact => fmt()
            .with_env_filter(filter)
            .compact()
            .try_init(),
    };

    result.map_err(|e| RuntimeError::Logging(e.to_string()))
}
