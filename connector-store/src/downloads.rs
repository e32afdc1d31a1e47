//! # Download Audit Repository
//!
//! Audit rows for streamed downloads. A row is created when the byte stream
//! opens and finalised exactly once: `completed` with the byte count, or
//! `failed` with the error — including downloads the caller abandoned.

use crate::error::Result;
use crate::models::{DownloadAudit, DownloadStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

/// Insert payload for a starting download.
#[derive(Debug, Clone)]
pub struct NewDownloadAudit {
    pub account_id: String,
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub checksum: Option<String>,
}

/// Repository for download audit rows.
#[async_trait]
pub trait DownloadAuditRepository: Send + Sync {
    /// Record the start of a download; returns the audit row id.
    async fn start(&self, audit: NewDownloadAudit) -> Result<i64>;

    /// Mark a download complete with the total bytes streamed.
    async fn complete(&self, audit_id: i64, bytes_downloaded: i64) -> Result<()>;

    /// Mark a download failed.
    async fn fail(&self, audit_id: i64, error: &str) -> Result<()>;

    /// Fetch one audit row.
    async fn get(&self, audit_id: i64) -> Result<Option<DownloadAudit>>;

    /// Delete finished rows older than the cutoff; returns the count.
    async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

/// SQLite implementation of [`DownloadAuditRepository`].
#[derive(Clone)]
pub struct SqliteDownloadAuditRepository {
    pool: SqlitePool,
}

impl SqliteDownloadAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DownloadAuditRepository for SqliteDownloadAuditRepository {
    async fn start(&self, audit: NewDownloadAudit) -> Result<i64> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO download_audit (
                account_id, file_id, file_name, mime_type, checksum,
                status, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            "#,
        )
        .bind(&audit.account_id)
        .bind(&audit.file_id)
        .bind(&audit.file_name)
        .bind(&audit.mime_type)
        .bind(&audit.checksum)
        .bind(DownloadStatus::Started)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn complete(&self, audit_id: i64, bytes_downloaded: i64) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE download_audit
            SET bytes_downloaded = ?2, status = ?3, completed_at = ?4, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(audit_id)
        .bind(bytes_downloaded)
        .bind(DownloadStatus::Completed)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(&self, audit_id: i64, error: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE download_audit
            SET status = ?2, error = ?3, completed_at = ?4, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(audit_id)
        .bind(DownloadStatus::Failed)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, audit_id: i64) -> Result<Option<DownloadAudit>> {
        let record =
            sqlx::query_as::<_, DownloadAudit>("SELECT * FROM download_audit WHERE id = ?")
                .bind(audit_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record)
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM download_audit WHERE completed_at IS NOT NULL AND completed_at < ?",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        info!(count = deleted, "pruned download audit rows");
        Ok(deleted)
    }
}
