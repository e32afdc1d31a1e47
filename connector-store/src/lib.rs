//! # Connector Store
//!
//! SQLite persistence for the connector's durable state.
//!
//! ## Tables
//!
//! - **credentials** — one OAuth credential per account
//! - **sync_checkpoints** — change-feed cursor per `(account, resource)`
//! - **watch_channels** — registered webhook channels
//! - **download_audit** — lifecycle records for streamed downloads
//! - **drive_catalog** — cached listing of the account's drives
//!
//! Repositories expose upsert-by-key operations; within one process the
//! callers' locking (the token provider's acquisition lock, single-flow
//! service calls) makes read-then-write safe. Cross-process writers to the
//! same account are out of scope.

pub mod checkpoints;
pub mod credentials;
pub mod db;
pub mod downloads;
pub mod drive_catalog;
pub mod error;
pub mod models;
pub mod watch_channels;

pub use checkpoints::{CheckpointRepository, SqliteCheckpointRepository};
pub use credentials::{CredentialRepository, CredentialUpsert, SqliteCredentialRepository};
pub use db::{create_pool, create_test_pool, DatabaseConfig, SqlitePool};
pub use downloads::{DownloadAuditRepository, NewDownloadAudit, SqliteDownloadAuditRepository};
pub use drive_catalog::{DriveCatalogRepository, SqliteDriveCatalogRepository};
pub use error::{Result, StoreError};
pub use models::{
    Credential, DownloadAudit, DownloadStatus, DriveCatalogEntry, DriveKind, SyncCheckpoint,
    WatchChannel,
};
pub use watch_channels::{NewWatchChannel, SqliteWatchChannelRepository, WatchChannelRepository};
