//! # Database Connection Pool
//!
//! SQLite pool construction for the connector's persisted state.
//!
//! ## Features
//!
//! - **WAL mode** for concurrent readers alongside the single writer
//! - **Foreign keys** enforced
//! - **Embedded migrations** applied on pool creation
//! - **Health check** before the pool is handed out
//!
//! ## Usage
//!
//! ```rust,ignore
//! use connector_store::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("storage/connectors/googledrive.db")).await?;
//! ```

use crate::error::{Result, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// SQLite pool that the repositories share.
pub type SqlitePool = Pool<Sqlite>;

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:` URL, or `sqlite::memory:` for tests.
    pub database_url: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    /// Configuration for an on-disk database file.
    pub fn new(database_path: impl AsRef<Path>) -> Self {
        Self {
            database_url: format!("sqlite:{}", database_path.as_ref().display()),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// In-memory database for tests. A single connection keeps every query
    /// on the same database instance.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Create a configured pool, run migrations, and verify connectivity.
///
/// # Errors
///
/// Returns an error when the database cannot be opened, a migration fails,
/// or the health check query fails.
pub async fn create_pool(config: DatabaseConfig) -> Result<SqlitePool> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "creating database pool"
    );

    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .map_err(|e| {
            warn!(error = %e, "failed to create database pool");
            StoreError::Database(e)
        })?;

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    Ok(pool)
}

/// In-memory pool with migrations applied, for tests.
pub async fn create_test_pool() -> Result<SqlitePool> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;

    debug!("database migrations applied");
    Ok(())
}

async fn health_check(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_in_memory_pool() {
        let pool = create_test_pool().await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn migrations_create_tables() {
        let pool = create_test_pool().await.unwrap();

        for table in [
            "credentials",
            "sync_checkpoints",
            "watch_channels",
            "download_audit",
            "drive_catalog",
        ] {
            let (count,): (i32,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(count, 1, "table {table} should exist");
        }
    }

    #[tokio::test]
    async fn foreign_keys_enabled() {
        let pool = create_test_pool().await.unwrap();
        let (enabled,): (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
