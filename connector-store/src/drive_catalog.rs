//! # Drive Catalogue Repository
//!
//! Local cache of the account's drives (the user's own plus shared drives).
//! Rows flip between active and inactive as drives appear and disappear
//! upstream; they are not deleted, so history survives a transient listing
//! gap.

use crate::error::Result;
use crate::models::{DriveCatalogEntry, DriveKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// Repository for the drive catalogue.
#[async_trait]
pub trait DriveCatalogRepository: Send + Sync {
    /// Every row, active or not.
    async fn all(&self) -> Result<Vec<DriveCatalogEntry>>;

    /// Catalogue listing ordered by name.
    async fn list(
        &self,
        include_inactive: bool,
        kind: Option<DriveKind>,
    ) -> Result<Vec<DriveCatalogEntry>>;

    /// Insert or refresh a drive seen upstream; marks it active.
    async fn upsert(
        &self,
        drive_id: &str,
        name: &str,
        kind: DriveKind,
        last_synced_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Mark a drive that disappeared upstream as inactive.
    async fn deactivate(&self, drive_id: &str, last_synced_at: DateTime<Utc>) -> Result<()>;

    /// Most recent sync stamp across the catalogue.
    async fn last_synced(&self) -> Result<Option<DateTime<Utc>>>;
}

/// SQLite implementation of [`DriveCatalogRepository`].
#[derive(Clone)]
pub struct SqliteDriveCatalogRepository {
    pool: SqlitePool,
}

impl SqliteDriveCatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DriveCatalogRepository for SqliteDriveCatalogRepository {
    async fn all(&self) -> Result<Vec<DriveCatalogEntry>> {
        let records = sqlx::query_as::<_, DriveCatalogEntry>("SELECT * FROM drive_catalog")
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn list(
        &self,
        include_inactive: bool,
        kind: Option<DriveKind>,
    ) -> Result<Vec<DriveCatalogEntry>> {
        let records = match (include_inactive, kind) {
            (true, None) => {
                sqlx::query_as::<_, DriveCatalogEntry>(
                    "SELECT * FROM drive_catalog ORDER BY name ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
            (false, None) => {
                sqlx::query_as::<_, DriveCatalogEntry>(
                    "SELECT * FROM drive_catalog WHERE is_active = 1 ORDER BY name ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
            (true, Some(kind)) => {
                sqlx::query_as::<_, DriveCatalogEntry>(
                    "SELECT * FROM drive_catalog WHERE kind = ? ORDER BY name ASC",
                )
                .bind(kind)
                .fetch_all(&self.pool)
                .await?
            }
            (false, Some(kind)) => {
                sqlx::query_as::<_, DriveCatalogEntry>(
                    "SELECT * FROM drive_catalog WHERE is_active = 1 AND kind = ? ORDER BY name ASC",
                )
                .bind(kind)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(records)
    }

    async fn upsert(
        &self,
        drive_id: &str,
        name: &str,
        kind: DriveKind,
        last_synced_at: DateTime<Utc>,
    ) -> Result<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO drive_catalog (
                drive_id, name, kind, is_active, last_synced_at, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, 1, ?4, ?5, ?5)
            ON CONFLICT (drive_id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                is_active = 1,
                last_synced_at = excluded.last_synced_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(drive_id)
        .bind(name)
        .bind(kind)
        .bind(last_synced_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate(&self, drive_id: &str, last_synced_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE drive_catalog
            SET is_active = 0, last_synced_at = ?2, updated_at = ?3
            WHERE drive_id = ?1
            "#,
        )
        .bind(drive_id)
        .bind(last_synced_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_synced(&self) -> Result<Option<DateTime<Utc>>> {
        let (stamp,): (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT MAX(last_synced_at) FROM drive_catalog")
                .fetch_one(&self.pool)
                .await?;
        Ok(stamp)
    }
}
