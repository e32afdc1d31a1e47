//! # Token Provider
//!
//! Produces a currently-valid bearer token for an account, hiding the
//! refresh and service-account exchange mechanics from callers.
//!
//! ## Concurrency
//!
//! One `tokio::sync::Mutex` guards the entire acquisition path: cache
//! lookup, store lookup, the token-endpoint exchange, and persistence.
//! Refresh tokens can be single-use upstream, so two concurrent callers for
//! the same account must never race two exchanges; serialising the whole
//! path is the simplest shape that guarantees at-most-one-refresh-in-flight.
//! Unrelated accounts are serialised too — an accepted cost for a connector
//! that normally runs against a single account.
//!
//! ## Modes
//!
//! - **Refresh-token mode** (default): a still-valid stored access token is
//!   reused; otherwise the stored refresh token (falling back to the
//!   configured one) is exchanged with a form-encoded
//!   `grant_type=refresh_token` POST.
//! - **Service-account mode** (a key path is configured): an RS256-signed
//!   assertion is exchanged with the `jwt-bearer` grant. Key loading and
//!   signing run on a blocking worker so concurrent unrelated work is not
//!   stalled.

use crate::error::{AuthError, Result};
use crate::service_account::{ServiceAccountSigner, JWT_BEARER_GRANT};
use crate::token::AccessToken;
use chrono::{Duration, Utc};
use connector_runtime::ConnectorConfig;
use connector_store::{CredentialRepository, CredentialUpsert};
use connector_transport::{HttpMethod, HttpRequest, HttpTransport};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Timeout for token-endpoint calls.
const TOKEN_EXCHANGE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(20);

/// Access-token lifetimes at or below this many seconds are logged as
/// suspicious; the upstream normally issues 3600.
const SHORT_LIFETIME_SECONDS: i64 = 600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

struct ProviderState {
    tokens: HashMap<String, AccessToken>,
    signer: Option<Arc<ServiceAccountSigner>>,
}

/// Retrieves, caches, and persists bearer tokens per account.
pub struct TokenProvider {
    config: Arc<ConnectorConfig>,
    transport: Arc<dyn HttpTransport>,
    repository: Option<Arc<dyn CredentialRepository>>,
    state: Mutex<ProviderState>,
}

impl TokenProvider {
    pub fn new(
        config: Arc<ConnectorConfig>,
        transport: Arc<dyn HttpTransport>,
        repository: Option<Arc<dyn CredentialRepository>>,
    ) -> Self {
        Self {
            config,
            transport,
            repository,
            state: Mutex::new(ProviderState {
                tokens: HashMap::new(),
                signer: None,
            }),
        }
    }

    /// Produce a currently-valid bearer token for the account (the
    /// configured default when unspecified).
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingRefreshToken`] when neither the store nor the
    ///   configuration holds a refresh token (401 semantics).
    /// - [`AuthError::ExchangeRejected`] when the token endpoint returns a
    ///   non-2xx, carrying the upstream status and classified payload.
    /// - [`AuthError::Configuration`] when service-account mode is selected
    ///   but the key cannot be loaded; no network call is made.
    #[instrument(skip(self))]
    pub async fn get_token(&self, account_id: Option<&str>) -> Result<String> {
        let account = account_id
            .unwrap_or(&self.config.default_account_id)
            .to_string();

        let mut state = self.state.lock().await;

        if let Some(cached) = state.tokens.get(&account) {
            if cached.is_valid() {
                debug!(account = %account, "serving cached access token");
                return Ok(cached.token.clone());
            }
        }

        if self.config.is_service_account_mode() {
            let token = self.obtain_service_account_token(&mut state, &account).await?;
            state.tokens.insert(account.clone(), token.clone());

            if let (Some(repository), Some(expires_at)) = (&self.repository, token.expires_at) {
                let expires_in = (expires_at - Utc::now()).num_seconds().max(0);
                repository
                    .upsert(CredentialUpsert {
                        account_id: account.clone(),
                        access_token: token.token.clone(),
                        refresh_token: None,
                        expires_in,
                        scopes: Some(self.config.scopes.join(" ")),
                        is_service_account: true,
                    })
                    .await?;
            }

            return Ok(token.token);
        }

        let mut refresh_token: Option<String> = None;
        let mut scopes: Option<String> = None;

        if let Some(repository) = &self.repository {
            if let Some(record) = repository.get(&account).await? {
                if let (Some(access), Some(expires_at)) =
                    (record.access_token.as_deref(), record.expires_at)
                {
                    let stored = AccessToken::new(access, Some(expires_at));
                    if stored.is_valid() {
                        debug!(account = %account, "serving stored access token");
                        state.tokens.insert(account.clone(), stored.clone());
                        return Ok(stored.token);
                    }
                }
                refresh_token = record.refresh_token;
                scopes = record.scopes;
            }
        }

        let refresh_token = refresh_token
            .or_else(|| self.config.refresh_token.clone())
            .ok_or_else(|| AuthError::MissingRefreshToken(account.clone()))?;

        let token = self
            .exchange_refresh_token(&mut state, &account, &refresh_token, scopes)
            .await?;
        Ok(token)
    }

    /// Drop the in-memory cached token for the account. The persisted
    /// refresh token is untouched. Idempotent.
    pub async fn invalidate(&self, account_id: Option<&str>) {
        let account = account_id.unwrap_or(&self.config.default_account_id);
        let mut state = self.state.lock().await;
        if state.tokens.remove(account).is_some() {
            debug!(account = %account, "invalidated cached access token");
        }
    }

    async fn obtain_service_account_token(
        &self,
        state: &mut ProviderState,
        account: &str,
    ) -> Result<AccessToken> {
        let signer = match &state.signer {
            Some(signer) => Arc::clone(signer),
            None => {
                let path = self
                    .config
                    .service_account_key_path
                    .clone()
                    .ok_or_else(|| {
                        AuthError::Configuration("service account key path not configured".into())
                    })?;
                let signer = tokio::task::spawn_blocking(move || ServiceAccountSigner::load(&path))
                    .await
                    .map_err(|e| AuthError::Signing(e.to_string()))??;
                let signer = Arc::new(signer);
                state.signer = Some(Arc::clone(&signer));
                signer
            }
        };

        let scopes = self.config.scopes.join(" ");
        let subject = self.config.service_account_subject.clone();
        let issued_at = Utc::now().timestamp();
        let assertion = {
            let signer = Arc::clone(&signer);
            tokio::task::spawn_blocking(move || {
                signer.sign_assertion(&scopes, subject.as_deref(), issued_at)
            })
            .await
            .map_err(|e| AuthError::Signing(e.to_string()))??
        };

        let params = [
            ("grant_type", JWT_BEARER_GRANT),
            ("assertion", assertion.as_str()),
        ];
        let request = HttpRequest::new(HttpMethod::Post, signer.token_uri())
            .form(&params)?
            .timeout(TOKEN_EXCHANGE_TIMEOUT);

        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            let detail = response.error_detail();
            warn!(
                account = %account,
                status = response.status,
                error = detail.description().as_deref().unwrap_or("unknown"),
                "service account token exchange failed"
            );
            return Err(AuthError::ExchangeRejected {
                account: account.to_string(),
                status: response.status,
                detail,
            });
        }

        let payload: TokenResponse = response.json()?;
        info!(
            account = %account,
            expires_in = payload.expires_in,
            "minted service account token"
        );

        Ok(AccessToken::new(
            payload.access_token,
            Some(Utc::now() + Duration::seconds(payload.expires_in)),
        ))
    }

    async fn exchange_refresh_token(
        &self,
        state: &mut ProviderState,
        account: &str,
        refresh_token: &str,
        scopes: Option<String>,
    ) -> Result<String> {
        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        if let Some(scope) = scopes.as_deref() {
            params.push(("scope", scope));
        }

        debug!(account = %account, "exchanging refresh token");

        let request = HttpRequest::new(HttpMethod::Post, &self.config.token_url)
            .form(&params)?
            .timeout(TOKEN_EXCHANGE_TIMEOUT);

        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            let detail = response.error_detail();
            warn!(
                account = %account,
                status = response.status,
                error = detail.description().as_deref().unwrap_or("unknown"),
                "refresh token exchange failed"
            );
            return Err(AuthError::ExchangeRejected {
                account: account.to_string(),
                status: response.status,
                detail,
            });
        }

        let payload: TokenResponse = response.json()?;
        let rotated_refresh = payload
            .refresh_token
            .clone()
            .or_else(|| Some(refresh_token.to_string()));
        let granted_scopes = payload.scope.clone().or(scopes);

        let token = AccessToken::new(
            payload.access_token.clone(),
            Some(Utc::now() + Duration::seconds(payload.expires_in)),
        );
        state.tokens.insert(account.to_string(), token.clone());

        if let Some(repository) = &self.repository {
            repository
                .upsert(CredentialUpsert {
                    account_id: account.to_string(),
                    access_token: payload.access_token,
                    refresh_token: rotated_refresh,
                    expires_in: payload.expires_in,
                    scopes: granted_scopes,
                    is_service_account: false,
                })
                .await?;
        }

        if payload.expires_in <= SHORT_LIFETIME_SECONDS {
            warn!(
                account = %account,
                expires_in = payload.expires_in,
                "access token lifetime unusually short"
            );
        }

        info!(account = %account, expires_in = payload.expires_in, "access token refreshed");
        Ok(token.token)
    }
}
