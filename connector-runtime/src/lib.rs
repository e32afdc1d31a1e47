//! # Connector Runtime
//!
//! Shared runtime scaffolding for the Google Drive connector: the explicit
//! configuration struct every component receives at construction time and
//! the tracing initialisation used by binaries and tests.
//!
//! There is deliberately no global settings lookup. A process builds one
//! [`ConnectorConfig`] (usually with [`ConnectorConfig::from_env`]), wraps
//! it in an `Arc`, and passes it down.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{ConnectorConfig, ConnectorConfigBuilder};
pub use error::{Result, RuntimeError};
pub use logging::{init_logging, LogFormat, LoggingConfig};
