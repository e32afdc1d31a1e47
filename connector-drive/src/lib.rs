//! # Connector Drive
//!
//! Authenticated client for the Google Drive v3 REST API.
//!
//! ## Overview
//!
//! [`DriveClient`] owns the request pipeline — token injection, retry with
//! backoff, and the retriable/fatal classification — and exposes the typed
//! endpoint set on top of it: file listing and metadata, streaming
//! downloads, multipart uploads, the change feed, watch channels,
//! permissions, and shared drives.
//!
//! Callers react to a two-valued failure taxonomy: retriable failures are
//! recovered (or exhausted into a fatal error) inside the pipeline; fatal
//! errors carry the upstream status and a tagged payload.

pub mod client;
pub mod error;
pub mod metrics;
pub mod types;

pub use client::{
    DriveClient, ListFilesQuery, RequestBody, RetryPolicy, DEFAULT_FILE_FIELDS,
    DEFAULT_LIST_FIELDS,
};
pub use error::{DriveError, Result};
pub use metrics::{DriveMetrics, RequestKey, RequestStats};
pub use types::{
    Change, ChangeList, DriveFile, DriveList, FileList, Permission, PermissionList,
    PermissionRequest, PermissionUpdate, SharedDrive, StartPageToken, StopChannelRequest,
    WatchParams, WatchRequest, WatchResponse,
};
