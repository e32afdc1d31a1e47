//! # File Operations
//!
//! Listing, metadata, uploads, folder creation, permission management, and
//! audited streaming downloads.
//!
//! ## Download auditing
//!
//! A download is a scoped resource: opening the remote stream creates an
//! in-progress audit row, and the returned [`DownloadStream`] guarantees the
//! row is finalised on every exit path — `completed` with the byte count
//! when the stream ends normally, `failed` when a chunk errors, and
//! `failed` from a drop guard when the caller abandons the stream
//! mid-download. Bytes flow through incrementally; the payload is never
//! buffered whole.

use crate::error::{Result, ServiceError};
use bytes::Bytes;
use chrono::{Duration, Utc};
use connector_drive::{
    DriveClient, DriveError, DriveFile, ListFilesQuery, Permission, PermissionList,
    PermissionRequest, PermissionUpdate, DEFAULT_FILE_FIELDS,
};
use connector_runtime::ConnectorConfig;
use connector_store::{DownloadAuditRepository, NewDownloadAudit};
use connector_transport::ByteStream;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{info, instrument, warn};

/// Fields fetched before a download starts.
const DOWNLOAD_METADATA_FIELDS: &[&str] =
    &["id", "name", "size", "mimeType", "modifiedTime", "md5Checksum"];

/// Listing request accepted by [`DriveFileService::list_files`].
#[derive(Debug, Clone, Default)]
pub struct FileListRequest {
    pub page_size: Option<u32>,
    pub page_token: Option<String>,
    pub query: Option<String>,
    pub corpora: Option<String>,
    pub drive_id: Option<String>,
    /// Shared-drive name, resolved to an id via the drives listing.
    pub drive_name: Option<String>,
}

/// One page of files plus the continuation state.
#[derive(Debug, Clone)]
pub struct FileListing {
    pub files: Vec<DriveFile>,
    pub next_page_token: Option<String>,
    pub has_more: bool,
}

/// Options for [`DriveFileService::grant_permission`].
#[derive(Debug, Clone, Default)]
pub struct GrantPermissionOptions {
    pub email_address: Option<String>,
    pub domain: Option<String>,
    pub allow_file_discovery: Option<bool>,
    pub send_notification_email: bool,
}

/// File and permission operations over the Drive client.
pub struct DriveFileService {
    config: Arc<ConnectorConfig>,
    client: Arc<DriveClient>,
    audits: Arc<dyn DownloadAuditRepository>,
}

impl DriveFileService {
    pub fn new(
        config: Arc<ConnectorConfig>,
        client: Arc<DriveClient>,
        audits: Arc<dyn DownloadAuditRepository>,
    ) -> Self {
        Self {
            config,
            client,
            audits,
        }
    }

    /// List one page of files, optionally scoped to a shared drive by id
    /// or by name.
    #[instrument(skip(self, request))]
    pub async fn list_files(&self, request: FileListRequest) -> Result<FileListing> {
        let drive_id = match (&request.drive_id, &request.drive_name) {
            (Some(id), _) => Some(id.clone()),
            (None, Some(name)) => Some(self.resolve_drive_id_by_name(name).await?),
            (None, None) => None,
        };

        let page = self
            .client
            .list_files(ListFilesQuery {
                page_size: request.page_size,
                page_token: request.page_token,
                query: request.query,
                corpora: request.corpora,
                drive_id,
                ..Default::default()
            })
            .await?;

        let has_more = page.next_page_token.is_some();
        info!(returned = page.files.len(), has_more, "files listed");

        Ok(FileListing {
            files: page.files,
            next_page_token: page.next_page_token,
            has_more,
        })
    }

    /// Every direct child of a folder, walking all pages.
    pub async fn list_folder_items(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .client
                .list_files(ListFilesQuery {
                    query: Some(format!("'{folder_id}' in parents")),
                    page_token: page_token.clone(),
                    page_size: Some(100),
                    ..Default::default()
                })
                .await?;
            items.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(items)
    }

    /// Metadata for one file.
    pub async fn get_file(&self, file_id: &str) -> Result<DriveFile> {
        Ok(self
            .client
            .get_file_metadata(file_id, Some(DEFAULT_FILE_FIELDS))
            .await?)
    }

    /// Open an audited streaming download.
    ///
    /// Returns the file metadata and the byte stream. The audit row is
    /// already in `started` state when this returns.
    #[instrument(skip(self))]
    pub async fn download(&self, file_id: &str) -> Result<(DriveFile, DownloadStream)> {
        let metadata = self
            .client
            .get_file_metadata(file_id, Some(DOWNLOAD_METADATA_FIELDS))
            .await?;
        let response = self.client.download_file(file_id).await?;

        let audit_id = self
            .audits
            .start(NewDownloadAudit {
                account_id: self.client.account_id().to_string(),
                file_id: file_id.to_string(),
                file_name: metadata.name.clone(),
                mime_type: metadata.mime_type.clone(),
                checksum: metadata.md5_checksum.clone(),
            })
            .await?;

        let stream = DownloadStream::new(response.into_body(), Arc::clone(&self.audits), audit_id);
        Ok((metadata, stream))
    }

    /// Upload in-memory content as a new file.
    #[instrument(skip(self, media), fields(size = media.len()))]
    pub async fn upload_file(
        &self,
        name: &str,
        media: Bytes,
        mime_type: &str,
        parents: Option<&[String]>,
    ) -> Result<DriveFile> {
        let file = self
            .client
            .upload_file(name, media, mime_type, parents)
            .await?;
        info!(file_id = %file.id, "file uploaded");
        Ok(file)
    }

    /// Upload a local file, reading it fully before the transfer.
    pub async fn upload_local_file(
        &self,
        path: &Path,
        name: Option<&str>,
        mime_type: &str,
        parents: Option<&[String]>,
    ) -> Result<DriveFile> {
        let media = tokio::fs::read(path).await.map_err(|e| {
            ServiceError::NotFound(format!("upload path {} unreadable: {e}", path.display()))
        })?;
        let name = name
            .map(str::to_string)
            .or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .ok_or_else(|| {
                ServiceError::NotFound(format!("no file name in upload path {}", path.display()))
            })?;

        self.upload_file(&name, Bytes::from(media), mime_type, parents)
            .await
    }

    /// Create a folder.
    #[instrument(skip(self))]
    pub async fn create_folder(
        &self,
        name: &str,
        parents: Option<&[String]>,
    ) -> Result<DriveFile> {
        let folder = self.client.create_folder(name, parents).await?;
        info!(folder_id = %folder.id, "folder created");
        Ok(folder)
    }

    /// List permissions on a file.
    pub async fn list_permissions(&self, file_id: &str) -> Result<PermissionList> {
        Ok(self.client.list_permissions(file_id).await?)
    }

    /// Grant a permission.
    pub async fn grant_permission(
        &self,
        file_id: &str,
        role: &str,
        permission_type: &str,
        options: GrantPermissionOptions,
    ) -> Result<Permission> {
        let request = PermissionRequest {
            role: role.to_string(),
            permission_type: permission_type.to_string(),
            email_address: options.email_address,
            domain: options.domain,
            allow_file_discovery: options.allow_file_discovery,
        };
        Ok(self
            .client
            .create_permission(file_id, &request, options.send_notification_email)
            .await?)
    }

    /// Update an existing permission.
    pub async fn update_permission(
        &self,
        file_id: &str,
        permission_id: &str,
        role: Option<&str>,
        allow_file_discovery: Option<bool>,
    ) -> Result<Permission> {
        let request = PermissionUpdate {
            role: role.map(str::to_string),
            allow_file_discovery,
        };
        Ok(self
            .client
            .update_permission(file_id, permission_id, &request)
            .await?)
    }

    /// Revoke a permission.
    pub async fn revoke_permission(&self, file_id: &str, permission_id: &str) -> Result<()> {
        Ok(self.client.delete_permission(file_id, permission_id).await?)
    }

    /// Delete finished download-audit rows older than the configured
    /// retention window. Returns the number removed.
    pub async fn prune_download_audits(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::hours(i64::from(self.config.download_retention_hours));
        Ok(self.audits.prune(cutoff).await?)
    }

    async fn resolve_drive_id_by_name(&self, drive_name: &str) -> Result<String> {
        for drive in self.client.list_all_drives().await? {
            let matches = drive
                .name
                .as_deref()
                .map(|name| name.eq_ignore_ascii_case(drive_name))
                .unwrap_or(false);
            if matches {
                return Ok(drive.id);
            }
        }
        Err(ServiceError::NotFound(format!(
            "shared drive named '{drive_name}' not found"
        )))
    }
}

struct AbortGuard {
    audits: Arc<dyn DownloadAuditRepository>,
    audit_id: i64,
    armed: bool,
}

impl AbortGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Finalisation is async but Drop is not; hand the write to the
        // runtime. Without a runtime (process teardown) the row stays
        // `started` and is swept by the retention prune.
        let audits = Arc::clone(&self.audits);
        let audit_id = self.audit_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(error) = audits
                    .fail(audit_id, "download aborted before completion")
                    .await
                {
                    warn!(audit_id, error = %error, "failed to record aborted download");
                }
            });
        }
    }
}

struct DownloadState {
    body: ByteStream,
    audits: Arc<dyn DownloadAuditRepository>,
    audit_id: i64,
    bytes: i64,
    finished: bool,
    guard: AbortGuard,
}

/// Byte stream that finalises its audit row on every exit path.
pub struct DownloadStream {
    inner: BoxStream<'static, Result<Bytes>>,
    audit_id: i64,
}

impl DownloadStream {
    fn new(body: ByteStream, audits: Arc<dyn DownloadAuditRepository>, audit_id: i64) -> Self {
        let state = DownloadState {
            body,
            audits: Arc::clone(&audits),
            audit_id,
            bytes: 0,
            finished: false,
            guard: AbortGuard {
                audits,
                audit_id,
                armed: true,
            },
        };

        let inner = futures::stream::unfold(state, |mut state| async move {
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.bytes += chunk.len() as i64;
                    Some((Ok(chunk), state))
                }
                Some(Err(error)) => {
                    state.finished = true;
                    state.guard.disarm();
                    if let Err(db_error) =
                        state.audits.fail(state.audit_id, &error.to_string()).await
                    {
                        warn!(audit_id = state.audit_id, error = %db_error,
                            "failed to record download failure");
                    }
                    Some((Err(ServiceError::Drive(DriveError::Transport(error))), state))
                }
                None => {
                    state.finished = true;
                    state.guard.disarm();
                    if let Err(db_error) =
                        state.audits.complete(state.audit_id, state.bytes).await
                    {
                        warn!(audit_id = state.audit_id, error = %db_error,
                            "failed to record download completion");
                    }
                    None
                }
            }
        })
        .boxed();

        Self { inner, audit_id }
    }

    /// Audit row backing this download.
    pub fn audit_id(&self) -> i64 {
        self.audit_id
    }
}

impl Stream for DownloadStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
