//! Row models for the connector's persisted state.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// One OAuth credential per account. `expires_at` is null for tokens whose
/// lifetime is managed upstream.
#[derive(Debug, Clone, FromRow)]
pub struct Credential {
    pub id: i64,
    pub account_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Option<String>,
    pub is_service_account: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable cursor for one `(account, resource)` change feed. The cursor is
/// an opaque server-issued token, never parsed or generated locally.
#[derive(Debug, Clone, FromRow)]
pub struct SyncCheckpoint {
    pub id: i64,
    pub account_id: String,
    pub resource: String,
    pub cursor: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A registered webhook push-notification channel.
#[derive(Debug, Clone, FromRow)]
pub struct WatchChannel {
    pub id: i64,
    pub channel_id: String,
    pub resource_id: Option<String>,
    pub resource_uri: Option<String>,
    pub expiration: Option<DateTime<Utc>>,
    /// Shared secret echoed back by Drive on every delivery.
    pub token: Option<String>,
    pub account_id: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle state of a download audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub enum DownloadStatus {
    Started,
    Completed,
    Failed,
}

/// Audit record for one streamed download.
#[derive(Debug, Clone, FromRow)]
pub struct DownloadAudit {
    pub id: i64,
    pub account_id: String,
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub bytes_downloaded: i64,
    pub checksum: Option<String>,
    pub status: DownloadStatus,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalogue classification for a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
pub enum DriveKind {
    MyDrive,
    SharedDrive,
}

/// One known drive (the user's own plus every shared drive).
#[derive(Debug, Clone, FromRow)]
pub struct DriveCatalogEntry {
    pub id: i64,
    pub drive_id: String,
    pub name: String,
    pub kind: DriveKind,
    pub is_active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
