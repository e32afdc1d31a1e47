//! # Sync Checkpoint Repository
//!
//! Durable cursors for the change-feed sync engine, one row per
//! `(account, resource)`. The cursor is replaced wholesale on every
//! successful sync; it is never merged and never synthesised locally.

use crate::error::Result;
use crate::models::SyncCheckpoint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Repository for change-feed checkpoints.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Fetch the checkpoint for one `(account, resource)` pair.
    async fn get(&self, account_id: &str, resource: &str) -> Result<Option<SyncCheckpoint>>;

    /// Replace (or create) the checkpoint cursor.
    async fn upsert(
        &self,
        account_id: &str,
        resource: &str,
        cursor: Option<&str>,
        last_synced_at: Option<DateTime<Utc>>,
    ) -> Result<SyncCheckpoint>;
}

/// SQLite implementation of [`CheckpointRepository`].
#[derive(Clone)]
pub struct SqliteCheckpointRepository {
    pool: SqlitePool,
}

impl SqliteCheckpointRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointRepository for SqliteCheckpointRepository {
    async fn get(&self, account_id: &str, resource: &str) -> Result<Option<SyncCheckpoint>> {
        let record = sqlx::query_as::<_, SyncCheckpoint>(
            "SELECT * FROM sync_checkpoints WHERE account_id = ? AND resource = ?",
        )
        .bind(account_id)
        .bind(resource)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn upsert(
        &self,
        account_id: &str,
        resource: &str,
        cursor: Option<&str>,
        last_synced_at: Option<DateTime<Utc>>,
    ) -> Result<SyncCheckpoint> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO sync_checkpoints (
                account_id, resource, cursor, last_synced_at, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT (account_id, resource) DO UPDATE SET
                cursor = excluded.cursor,
                last_synced_at = excluded.last_synced_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(account_id)
        .bind(resource)
        .bind(cursor)
        .bind(last_synced_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let record = sqlx::query_as::<_, SyncCheckpoint>(
            "SELECT * FROM sync_checkpoints WHERE account_id = ? AND resource = ?",
        )
        .bind(account_id)
        .bind(resource)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[tokio::test]
    async fn missing_checkpoint_is_none() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCheckpointRepository::new(pool);

        assert!(repo.get("default", "files").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_then_replace_cursor() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCheckpointRepository::new(pool);
        let now = Utc::now();

        let first = repo
            .upsert("default", "files", Some("start-token"), Some(now))
            .await
            .unwrap();
        assert_eq!(first.cursor.as_deref(), Some("start-token"));

        let second = repo
            .upsert("default", "files", Some("cursor-2"), Some(now))
            .await
            .unwrap();
        assert_eq!(second.cursor.as_deref(), Some("cursor-2"));
        assert_eq!(second.id, first.id, "row is replaced, not duplicated");
    }

    #[tokio::test]
    async fn checkpoints_are_scoped_by_resource() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteCheckpointRepository::new(pool);

        repo.upsert("default", "files", Some("a"), None).await.unwrap();
        repo.upsert("default", "drives", Some("b"), None).await.unwrap();

        let files = repo.get("default", "files").await.unwrap().unwrap();
        let drives = repo.get("default", "drives").await.unwrap().unwrap();
        assert_eq!(files.cursor.as_deref(), Some("a"));
        assert_eq!(drives.cursor.as_deref(), Some("b"));
    }
}
