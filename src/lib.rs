//! Workspace facade crate.
//!
//! Re-exports the connector's operation surface so host layers (HTTP
//! routers, CLI commands, RPC dispatchers) can depend on `gdrive-connector`
//! without wiring each workspace crate individually.

pub use connector_auth::{AccessToken, AuthError, TokenProvider};
pub use connector_drive::{
    Change, DriveClient, DriveError, DriveFile, DriveMetrics, ListFilesQuery, Permission,
    RetryPolicy,
};
pub use connector_runtime::{init_logging, ConnectorConfig, LogFormat, LoggingConfig};
pub use connector_service::{
    ChangeSyncEngine, DownloadStream, DriveDirectoryService, DriveFileService, FileListRequest,
    GrantPermissionOptions, ServiceError, SyncOutcome, WatchChannelManager, WebhookDelivery,
};
pub use connector_store::{create_pool, DatabaseConfig, SqlitePool};
pub use connector_transport::{ErrorDetail, HttpTransport, ReqwestTransport};
