//! # Connector Configuration
//!
//! Provides the runtime configuration for the Google Drive connector.
//!
//! ## Overview
//!
//! All settings live in a single [`ConnectorConfig`] value that is built once
//! at process start and handed to each component constructor. There is no
//! ambient global lookup: components receive the configuration explicitly,
//! usually behind an `Arc`.
//!
//! The builder enforces fail-fast validation so a misconfigured process dies
//! with an actionable message instead of failing on its first API call.
//!
//! ## Usage
//!
//! ```rust
//! use connector_runtime::config::ConnectorConfig;
//!
//! let config = ConnectorConfig::builder()
//!     .client_id("client-id")
//!     .client_secret("client-secret")
//!     .refresh_token("1//refresh")
//!     .webhook_url("https://connector.example.com/webhooks/drive")
//!     .build()
//!     .expect("valid configuration");
//!
//! assert_eq!(config.default_account_id, "default");
//! ```
//!
//! For deployments the same surface is readable from the environment via
//! [`ConnectorConfig::from_env`], using the `GOOGLEDRIVE_*` / `CONNECTOR_*`
//! variable names.

use crate::error::{Result, RuntimeError};
use std::env;
use std::path::PathBuf;

/// Default OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Default OAuth authorization endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Default Drive REST API base.
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Default Drive upload API base.
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

fn default_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/drive.readonly".to_string(),
        "https://www.googleapis.com/auth/drive.file".to_string(),
    ]
}

/// Runtime configuration for the connector.
///
/// Constructed once via [`ConnectorConfigBuilder`] or
/// [`ConnectorConfig::from_env`] and shared by reference with every
/// component.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Statically configured refresh token, used when the credential store
    /// holds none for the account.
    pub refresh_token: Option<String>,
    /// Path to a service-account key file. When set, the token provider
    /// operates in service-account mode.
    pub service_account_key_path: Option<PathBuf>,
    /// Optional impersonation subject for service-account tokens.
    pub service_account_subject: Option<String>,
    /// OAuth token endpoint.
    pub token_url: String,
    /// OAuth authorization endpoint.
    pub auth_url: String,
    /// Drive REST API base URL.
    pub api_base: String,
    /// Drive upload API base URL.
    pub upload_base: String,
    /// Requested OAuth scopes.
    pub scopes: Vec<String>,
    /// Account id used when callers do not name one.
    pub default_account_id: String,
    /// Public callback address for watch channels. Registration fails
    /// without it.
    pub webhook_url: Option<String>,
    /// SQLite database file path.
    pub database_path: PathBuf,
    /// Retention window for finished download-audit rows.
    pub download_retention_hours: u32,
    /// Log level directive, e.g. `info` or `connector_drive=debug`.
    pub log_level: String,
}

impl ConnectorConfig {
    /// Start building a configuration.
    pub fn builder() -> ConnectorConfigBuilder {
        ConnectorConfigBuilder::default()
    }

    /// Read the configuration from the process environment.
    ///
    /// Required variables: `GOOGLEDRIVE_CLIENT_ID`,
    /// `GOOGLEDRIVE_CLIENT_SECRET`. Everything else falls back to the
    /// documented defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::MissingConfiguration`] when a required
    /// variable is absent and [`RuntimeError::InvalidConfiguration`] when a
    /// numeric value does not parse.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();

        builder = builder
            .client_id(require_env("GOOGLEDRIVE_CLIENT_ID")?)
            .client_secret(require_env("GOOGLEDRIVE_CLIENT_SECRET")?);

        if let Some(value) = optional_env("GOOGLEDRIVE_REFRESH_TOKEN") {
            builder = builder.refresh_token(value);
        }
        if let Some(value) = optional_env("GOOGLEDRIVE_SERVICE_ACCOUNT_KEY_PATH") {
            builder = builder.service_account_key_path(value);
        }
        if let Some(value) = optional_env("GOOGLEDRIVE_SERVICE_ACCOUNT_SUBJECT") {
            builder = builder.service_account_subject(value);
        }
        if let Some(value) = optional_env("GOOGLEDRIVE_TOKEN_URL") {
            builder = builder.token_url(value);
        }
        if let Some(value) = optional_env("GOOGLEDRIVE_AUTH_URL") {
            builder = builder.auth_url(value);
        }
        if let Some(value) = optional_env("GOOGLEDRIVE_API_BASE") {
            builder = builder.api_base(value);
        }
        if let Some(value) = optional_env("GOOGLEDRIVE_UPLOAD_BASE") {
            builder = builder.upload_base(value);
        }
        if let Some(value) = optional_env("GOOGLEDRIVE_SCOPES") {
            let scopes = value
                .split([',', ' '])
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>();
            builder = builder.scopes(scopes);
        }
        if let Some(value) = optional_env("CONNECTOR_DEFAULT_ACCOUNT_ID") {
            builder = builder.default_account_id(value);
        }
        if let Some(value) = optional_env("CONNECTOR_WEBHOOK_URL") {
            builder = builder.webhook_url(value);
        }
        if let Some(value) = optional_env("CONNECTOR_DATABASE_PATH") {
            builder = builder.database_path(value);
        }
        if let Some(value) = optional_env("CONNECTOR_DOWNLOAD_RETENTION_HOURS") {
            let hours = value.parse::<u32>().map_err(|e| {
                RuntimeError::InvalidConfiguration {
                    field: "CONNECTOR_DOWNLOAD_RETENTION_HOURS",
                    message: e.to_string(),
                }
            })?;
            builder = builder.download_retention_hours(hours);
        }
        if let Some(value) = optional_env("CONNECTOR_LOG_LEVEL") {
            builder = builder.log_level(value);
        }

        builder.build()
    }

    /// Whether the connector should mint service-account tokens instead of
    /// exchanging refresh tokens.
    pub fn is_service_account_mode(&self) -> bool {
        self.service_account_key_path.is_some()
    }
}

fn require_env(name: &'static str) -> Result<String> {
    optional_env(name).ok_or(RuntimeError::MissingConfiguration(name))
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Builder for [`ConnectorConfig`].
#[derive(Debug, Default)]
pub struct ConnectorConfigBuilder {
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    service_account_key_path: Option<PathBuf>,
    service_account_subject: Option<String>,
    token_url: Option<String>,
    auth_url: Option<String>,
    api_base: Option<String>,
    upload_base: Option<String>,
    scopes: Option<Vec<String>>,
    default_account_id: Option<String>,
    webhook_url: Option<String>,
    database_path: Option<PathBuf>,
    download_retention_hours: Option<u32>,
    log_level: Option<String>,
}

impl ConnectorConfigBuilder {
    pub fn client_id(mut self, value: impl Into<String>) -> Self {
        self.client_id = Some(value.into());
        self
    }

    pub fn client_secret(mut self, value: impl Into<String>) -> Self {
        self.client_secret = Some(value.into());
        self
    }

    pub fn refresh_token(mut self, value: impl Into<String>) -> Self {
        self.refresh_token = Some(value.into());
        self
    }

    pub fn service_account_key_path(mut self, value: impl Into<PathBuf>) -> Self {
        self.service_account_key_path = Some(value.into());
        self
    }

    pub fn service_account_subject(mut self, value: impl Into<String>) -> Self {
        self.service_account_subject = Some(value.into());
        self
    }

    pub fn token_url(mut self, value: impl Into<String>) -> Self {
        self.token_url = Some(value.into());
        self
    }

    pub fn auth_url(mut self, value: impl Into<String>) -> Self {
        self.auth_url = Some(value.into());
        self
    }

    pub fn api_base(mut self, value: impl Into<String>) -> Self {
        self.api_base = Some(value.into());
        self
    }

    pub fn upload_base(mut self, value: impl Into<String>) -> Self {
        self.upload_base = Some(value.into());
        self
    }

    pub fn scopes(mut self, value: Vec<String>) -> Self {
        self.scopes = Some(value);
        self
    }

    pub fn default_account_id(mut self, value: impl Into<String>) -> Self {
        self.default_account_id = Some(value.into());
        self
    }

    pub fn webhook_url(mut self, value: impl Into<String>) -> Self {
        self.webhook_url = Some(value.into());
        self
    }

    pub fn database_path(mut self, value: impl Into<PathBuf>) -> Self {
        self.database_path = Some(value.into());
        self
    }

    pub fn download_retention_hours(mut self, value: u32) -> Self {
        self.download_retention_hours = Some(value);
        self
    }

    pub fn log_level(mut self, value: impl Into<String>) -> Self {
        self.log_level = Some(value.into());
        self
    }

    /// Validate and produce the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::MissingConfiguration`] when `client_id` or
    /// `client_secret` is absent.
    pub fn build(self) -> Result<ConnectorConfig> {
        let client_id = self
            .client_id
            .filter(|v| !v.is_empty())
            .ok_or(RuntimeError::MissingConfiguration("GOOGLEDRIVE_CLIENT_ID"))?;
        let client_secret = self
            .client_secret
            .filter(|v| !v.is_empty())
            .ok_or(RuntimeError::MissingConfiguration(
                "GOOGLEDRIVE_CLIENT_SECRET",
            ))?;

        Ok(ConnectorConfig {
            client_id,
            client_secret,
            refresh_token: self.refresh_token,
            service_account_key_path: self.service_account_key_path,
            service_account_subject: self.service_account_subject,
            token_url: self.token_url.unwrap_or_else(|| DEFAULT_TOKEN_URL.into()),
            auth_url: self.auth_url.unwrap_or_else(|| DEFAULT_AUTH_URL.into()),
            api_base: self.api_base.unwrap_or_else(|| DEFAULT_API_BASE.into()),
            upload_base: self
                .upload_base
                .unwrap_or_else(|| DEFAULT_UPLOAD_BASE.into()),
            scopes: self.scopes.unwrap_or_else(default_scopes),
            default_account_id: self
                .default_account_id
                .unwrap_or_else(|| "default".to_string()),
            webhook_url: self.webhook_url,
            database_path: self
                .database_path
                .unwrap_or_else(|| PathBuf::from("storage/connectors/googledrive.db")),
            download_retention_hours: self.download_retention_hours.unwrap_or(24),
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> ConnectorConfigBuilder {
        ConnectorConfig::builder()
            .client_id("id")
            .client_secret("secret")
    }

    #[test]
    fn build_applies_defaults() {
        let config = minimal().build().unwrap();

        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.default_account_id, "default");
        assert_eq!(config.download_retention_hours, 24);
        assert_eq!(config.scopes.len(), 2);
        assert!(!config.is_service_account_mode());
    }

    #[test]
    fn build_requires_client_id() {
        let result = ConnectorConfig::builder().client_secret("secret").build();
        assert!(matches!(
            result,
            Err(RuntimeError::MissingConfiguration("GOOGLEDRIVE_CLIENT_ID"))
        ));
    }

    #[test]
    fn build_rejects_empty_client_secret() {
        let result = ConnectorConfig::builder()
            .client_id("id")
            .client_secret("")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn service_account_mode_follows_key_path() {
        let config = minimal()
            .service_account_key_path("/etc/connector/key.json")
            .build()
            .unwrap();
        assert!(config.is_service_account_mode());
    }

    #[test]
    fn builder_overrides_stick() {
        let config = minimal()
            .api_base("https://drive.invalid/v3")
            .default_account_id("ops")
            .webhook_url("https://connector.invalid/webhooks")
            .download_retention_hours(48)
            .build()
            .unwrap();

        assert_eq!(config.api_base, "https://drive.invalid/v3");
        assert_eq!(config.default_account_id, "ops");
        assert_eq!(
            config.webhook_url.as_deref(),
            Some("https://connector.invalid/webhooks")
        );
        assert_eq!(config.download_retention_hours, 48);
    }
}
