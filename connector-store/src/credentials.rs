//! # Credential Repository
//!
//! Persistence for per-account OAuth credentials. At most one row exists per
//! account id; upserts are the unit of atomicity, and a refresh response
//! that omits the rotated refresh token or scopes keeps the stored values.

use crate::error::Result;
use crate::models::Credential;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tracing::debug;

/// Credential upsert payload, mirroring a token-endpoint response.
#[derive(Debug, Clone)]
pub struct CredentialUpsert {
    pub account_id: String,
    pub access_token: String,
    /// Rotated refresh token; `None` preserves the stored one.
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires.
    pub expires_in: i64,
    /// Granted scopes; `None` preserves the stored value.
    pub scopes: Option<String>,
    pub is_service_account: bool,
}

/// Repository for per-account OAuth credentials.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Fetch the credential row for an account.
    async fn get(&self, account_id: &str) -> Result<Option<Credential>>;

    /// Insert or update the credential row after a token exchange.
    async fn upsert(&self, upsert: CredentialUpsert) -> Result<Credential>;

    /// Store a refresh token obtained out-of-band (e.g. the bootstrap
    /// authorization flow) without touching the access token.
    async fn store_refresh_token(
        &self,
        account_id: &str,
        refresh_token: &str,
        scopes: Option<&str>,
    ) -> Result<Credential>;
}

/// SQLite implementation of [`CredentialRepository`].
#[derive(Clone)]
pub struct SqliteCredentialRepository {
    pool: SqlitePool,
}

impl SqliteCredentialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, account_id: &str) -> Result<Credential> {
        let record = sqlx::query_as::<_, Credential>(
            "SELECT * FROM credentials WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }
}

#[async_trait]
impl CredentialRepository for SqliteCredentialRepository {
    async fn get(&self, account_id: &str) -> Result<Option<Credential>> {
        let record = sqlx::query_as::<_, Credential>(
            "SELECT * FROM credentials WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn upsert(&self, upsert: CredentialUpsert) -> Result<Credential> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(upsert.expires_in);

        sqlx::query(
            r#"
            INSERT INTO credentials (
                account_id, access_token, refresh_token, expires_at, scopes,
                is_service_account, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT (account_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, credentials.refresh_token),
                expires_at = excluded.expires_at,
                scopes = COALESCE(excluded.scopes, credentials.scopes),
                is_service_account = excluded.is_service_account,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&upsert.account_id)
        .bind(&upsert.access_token)
        .bind(&upsert.refresh_token)
        .bind(expires_at)
        .bind(&upsert.scopes)
        .bind(upsert.is_service_account)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(
            account_id = %upsert.account_id,
            has_refresh_token = upsert.refresh_token.is_some(),
            "credentials upserted"
        );

        self.fetch(&upsert.account_id).await
    }

    async fn store_refresh_token(
        &self,
        account_id: &str,
        refresh_token: &str,
        scopes: Option<&str>,
    ) -> Result<Credential> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO credentials (account_id, refresh_token, scopes, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ON CONFLICT (account_id) DO UPDATE SET
                refresh_token = excluded.refresh_token,
                scopes = COALESCE(excluded.scopes, credentials.scopes),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(account_id)
        .bind(refresh_token)
        .bind(scopes)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.fetch(account_id).await
    }
}
