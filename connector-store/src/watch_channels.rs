//! # Watch Channel Repository
//!
//! Local records for webhook push-notification channels, keyed by the
//! locally generated channel id.

use crate::error::Result;
use crate::models::WatchChannel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Insert payload for a newly registered channel.
#[derive(Debug, Clone)]
pub struct NewWatchChannel {
    pub channel_id: String,
    pub resource_id: Option<String>,
    pub resource_uri: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
    /// Shared secret; `None` for rows recreated from webhook deliveries.
    pub token: Option<String>,
    pub account_id: String,
    pub kind: String,
}

/// Repository for watch-channel records.
#[async_trait]
pub trait WatchChannelRepository: Send + Sync {
    /// All known channels.
    async fn list(&self) -> Result<Vec<WatchChannel>>;

    /// Fetch one channel by id.
    async fn get(&self, channel_id: &str) -> Result<Option<WatchChannel>>;

    /// Insert a new channel row.
    async fn insert(&self, channel: NewWatchChannel) -> Result<WatchChannel>;

    /// Overwrite the server-assigned fields from a webhook delivery.
    async fn update_delivery(
        &self,
        channel_id: &str,
        resource_id: Option<&str>,
        resource_uri: Option<&str>,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<WatchChannel>;

    /// Delete a channel row. Returns whether a row existed.
    async fn delete(&self, channel_id: &str) -> Result<bool>;
}

/// SQLite implementation of [`WatchChannelRepository`].
#[derive(Clone)]
pub struct SqliteWatchChannelRepository {
    pool: SqlitePool,
}

impl SqliteWatchChannelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, channel_id: &str) -> Result<WatchChannel> {
        let record = sqlx::query_as::<_, WatchChannel>(
            "SELECT * FROM watch_channels WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }
}

#[async_trait]
impl WatchChannelRepository for SqliteWatchChannelRepository {
    async fn list(&self) -> Result<Vec<WatchChannel>> {
        let records = sqlx::query_as::<_, WatchChannel>(
            "SELECT * FROM watch_channels ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn get(&self, channel_id: &str) -> Result<Option<WatchChannel>> {
        let record = sqlx::query_as::<_, WatchChannel>(
            "SELECT * FROM watch_channels WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn insert(&self, channel: NewWatchChannel) -> Result<WatchChannel> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO watch_channels (
                channel_id, resource_id, resource_uri, expiration, token,
                account_id, kind, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
        )
        .bind(&channel.channel_id)
        .bind(&channel.resource_id)
        .bind(&channel.resource_uri)
        .bind(channel.expiration)
        .bind(&channel.token)
        .bind(&channel.account_id)
        .bind(&channel.kind)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.fetch(&channel.channel_id).await
    }

    async fn update_delivery(
        &self,
        channel_id: &str,
        resource_id: Option<&str>,
        resource_uri: Option<&str>,
        expiration: Option<DateTime<Utc>>,
    ) -> Result<WatchChannel> {
        sqlx::query(
            r#"
            UPDATE watch_channels
            SET resource_id = ?2, resource_uri = ?3, expiration = ?4, updated_at = ?5
            WHERE channel_id = ?1
            "#,
        )
        .bind(channel_id)
        .bind(resource_id)
        .bind(resource_uri)
        .bind(expiration)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.fetch(channel_id).await
    }

    async fn delete(&self, channel_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM watch_channels WHERE channel_id = ?")
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    fn new_channel(id: &str) -> NewWatchChannel {
        NewWatchChannel {
            channel_id: id.to_string(),
            resource_id: Some("resource-1".to_string()),
            resource_uri: Some("https://www.googleapis.com/drive/v3/changes".to_string()),
            expiration: Some(Utc::now()),
            token: Some("secret".to_string()),
            account_id: "default".to_string(),
            kind: "changes".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_and_get() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteWatchChannelRepository::new(pool);

        let record = repo.insert(new_channel("chan-1")).await.unwrap();
        assert_eq!(record.channel_id, "chan-1");
        assert_eq!(record.token.as_deref(), Some("secret"));

        let fetched = repo.get("chan-1").await.unwrap().unwrap();
        assert_eq!(fetched.resource_id.as_deref(), Some("resource-1"));
    }

    #[tokio::test]
    async fn update_delivery_overwrites_server_fields() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteWatchChannelRepository::new(pool);

        repo.insert(new_channel("chan-1")).await.unwrap();
        let updated = repo
            .update_delivery("chan-1", Some("resource-2"), None, None)
            .await
            .unwrap();

        assert_eq!(updated.resource_id.as_deref(), Some("resource-2"));
        assert!(updated.resource_uri.is_none());
        assert!(updated.expiration.is_none());
        // The secret is never touched by delivery updates.
        assert_eq!(updated.token.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteWatchChannelRepository::new(pool);

        repo.insert(new_channel("chan-1")).await.unwrap();
        assert!(repo.delete("chan-1").await.unwrap());
        assert!(!repo.delete("chan-1").await.unwrap());
        assert!(repo.list().await.unwrap().is_empty());
    }
}
