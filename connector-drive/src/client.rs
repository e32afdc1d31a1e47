//! # Drive API Client
//!
//! Authenticated request pipeline plus the typed Drive v3 endpoints.
//!
//! ## Pipeline contract
//!
//! One logical call = token injection + retry + classification:
//!
//! - A bearer token is fetched from the [`TokenProvider`] on **every**
//!   attempt, so an attempt that follows a 401 invalidation runs with a
//!   fresh token.
//! - `401` invalidates the cached token and retries. `429` and `5xx` retry.
//!   Any other `4xx` is fatal immediately and carries the parsed upstream
//!   payload. `2xx` is returned as-is for the caller to parse or stream.
//! - Retries back off exponentially with uniform jitter: ~1 s initial,
//!   capped at 30 s, at most 5 attempts. Exhaustion surfaces the last
//!   classified failure as fatal.
//! - Every attempt lands one observation in [`DriveMetrics`], on every exit
//!   path.
//!
//! Callers never inspect status codes; they see success, a retriable
//! failure already exhausted, or an immediately fatal error.

use crate::error::{DriveError, Result};
use crate::metrics::DriveMetrics;
use crate::types::{
    ChangeList, DriveFile, DriveList, FileList, Permission, PermissionList, PermissionRequest,
    PermissionUpdate, SharedDrive, StartPageToken, StopChannelRequest, WatchRequest,
    WatchResponse,
};
use bytes::Bytes;
use connector_auth::TokenProvider;
use connector_runtime::ConnectorConfig;
use connector_transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, StreamingResponse, TransportError,
};
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use url::Url;

/// Fields requested for file listings.
pub const DEFAULT_LIST_FIELDS: &str =
    "files(id,name,mimeType,modifiedTime,ownedByMe,parents,size,webViewLink,iconLink),nextPageToken";

/// Fields requested for single-file metadata reads.
pub const DEFAULT_FILE_FIELDS: &[&str] = &[
    "id",
    "name",
    "mimeType",
    "modifiedTime",
    "parents",
    "size",
    "webViewLink",
    "iconLink",
    "ownedByMe",
    "md5Checksum",
];

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Backoff configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the uniform jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based: the wait after attempt n).
    fn delay_for(&self, retry: u32) -> Duration {
        let exponential = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
            .min(self.max_delay);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return exponential;
        }
        exponential + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Request body accepted by the pipeline.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(serde_json::Value),
    Raw {
        content_type: String,
        data: Bytes,
    },
}

enum Classification {
    Success,
    Unauthorized,
    Retriable,
    Fatal,
}

fn classify(status: u16) -> Classification {
    match status {
        200..=299 => Classification::Success,
        401 => Classification::Unauthorized,
        429 => Classification::Retriable,
        s if s >= 500 => Classification::Retriable,
        _ => Classification::Fatal,
    }
}

/// Query options for [`DriveClient::list_files`].
#[derive(Debug, Clone)]
pub struct ListFilesQuery {
    pub page_size: Option<u32>,
    pub page_token: Option<String>,
    pub query: Option<String>,
    pub fields: Option<Vec<String>>,
    pub include_folders: bool,
    pub corpora: Option<String>,
    pub drive_id: Option<String>,
    pub include_items_from_all_drives: bool,
}

impl Default for ListFilesQuery {
    fn default() -> Self {
        Self {
            page_size: None,
            page_token: None,
            query: None,
            fields: None,
            include_folders: true,
            corpora: None,
            drive_id: None,
            include_items_from_all_drives: true,
        }
    }
}

/// Authenticated client for the Drive v3 REST API.
pub struct DriveClient {
    config: Arc<ConnectorConfig>,
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenProvider>,
    account_id: String,
    metrics: Arc<DriveMetrics>,
    retry: RetryPolicy,
}

impl DriveClient {
    /// Create a client bound to the configured default account.
    pub fn new(
        config: Arc<ConnectorConfig>,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenProvider>,
    ) -> Self {
        let account_id = config.default_account_id.clone();
        Self {
            config,
            transport,
            tokens,
            account_id,
            metrics: Arc::new(DriveMetrics::new()),
            retry: RetryPolicy::default(),
        }
    }

    /// Bind the client to a different account.
    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }

    /// Override the retry policy (tests shrink the delays).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Request counters for this client.
    pub fn metrics(&self) -> Arc<DriveMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Account this client issues requests for.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Execute one logical API call and buffer the response.
    ///
    /// `target` is a path under the configured API base (`/files`) or an
    /// absolute URL (uploads).
    ///
    /// # Errors
    ///
    /// - [`DriveError::Auth`] when no usable credential exists.
    /// - [`DriveError::Api`] for non-retriable 4xx responses.
    /// - [`DriveError::RetriesExhausted`] after the final retriable failure.
    /// - [`DriveError::Transport`] when the network itself kept failing.
    #[instrument(skip(self, body, headers), fields(account = %self.account_id))]
    pub async fn request(
        &self,
        method: HttpMethod,
        target: &str,
        params: &[(String, String)],
        body: Option<RequestBody>,
        headers: &[(String, String)],
    ) -> Result<HttpResponse> {
        let url = self.build_url(target, params)?;
        let label = endpoint_label(&url);
        let mut last_failure: Option<(u16, connector_transport::ErrorDetail)> = None;
        let mut last_transport: Option<TransportError> = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_for(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                tokio::time::sleep(delay).await;
            }

            let token = self.tokens.get_token(Some(&self.account_id)).await?;
            let request = prepare_request(method, &url, &token, body.clone(), headers)?;

            let started = Instant::now();
            match self.transport.execute(request).await {
                Err(error) => {
                    self.metrics.observe(
                        method.as_str(),
                        &label,
                        0,
                        started.elapsed(),
                        Some("transport"),
                    );
                    warn!(attempt, error = %error, "transport failure");
                    last_transport = Some(error);
                    last_failure = None;
                }
                Ok(response) => {
                    let status = response.status;
                    let duration = started.elapsed();
                    match classify(status) {
                        Classification::Success => {
                            self.metrics
                                .observe(method.as_str(), &label, status, duration, None);
                            return Ok(response);
                        }
                        Classification::Unauthorized => {
                            self.metrics.observe(
                                method.as_str(),
                                &label,
                                status,
                                duration,
                                Some("unauthorized"),
                            );
                            warn!(attempt, "unauthorized response, invalidating cached token");
                            self.tokens.invalidate(Some(&self.account_id)).await;
                            last_transport = None;
                            last_failure = Some((status, response.error_detail()));
                        }
                        Classification::Retriable => {
                            self.metrics.observe(
                                method.as_str(),
                                &label,
                                status,
                                duration,
                                Some("retryable"),
                            );
                            warn!(attempt, status, "throttled or upstream fault");
                            last_transport = None;
                            last_failure = Some((status, response.error_detail()));
                        }
                        Classification::Fatal => {
                            self.metrics.observe(
                                method.as_str(),
                                &label,
                                status,
                                duration,
                                Some("client_error"),
                            );
                            return Err(DriveError::Api {
                                status,
                                detail: response.error_detail(),
                            });
                        }
                    }
                }
            }
        }

        if let Some(error) = last_transport {
            return Err(DriveError::Transport(error));
        }
        let (status, detail) = last_failure.expect("loop ran at least once");
        Err(DriveError::RetriesExhausted {
            attempts: self.retry.max_attempts,
            status,
            detail,
        })
    }

    /// Execute one logical API call and stream the response body.
    ///
    /// Classification matches [`DriveClient::request`]; non-2xx streaming
    /// replies are drained (error envelopes are small) before classifying.
    #[instrument(skip(self, headers), fields(account = %self.account_id))]
    pub async fn request_streaming(
        &self,
        method: HttpMethod,
        target: &str,
        params: &[(String, String)],
        headers: &[(String, String)],
    ) -> Result<StreamingResponse> {
        let url = self.build_url(target, params)?;
        let label = endpoint_label(&url);
        let mut last_failure: Option<(u16, connector_transport::ErrorDetail)> = None;
        let mut last_transport: Option<TransportError> = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
            }

            let token = self.tokens.get_token(Some(&self.account_id)).await?;
            let request = prepare_request(method, &url, &token, None, headers)?;

            let started = Instant::now();
            match self.transport.execute_streaming(request).await {
                Err(error) => {
                    self.metrics.observe(
                        method.as_str(),
                        &label,
                        0,
                        started.elapsed(),
                        Some("transport"),
                    );
                    warn!(attempt, error = %error, "transport failure opening stream");
                    last_transport = Some(error);
                    last_failure = None;
                }
                Ok(response) if response.is_success() => {
                    self.metrics.observe(
                        method.as_str(),
                        &label,
                        response.status,
                        started.elapsed(),
                        None,
                    );
                    return Ok(response);
                }
                Ok(response) => {
                    let status = response.status;
                    let buffered = match response.collect().await {
                        Ok(buffered) => buffered,
                        Err(error) => {
                            self.metrics.observe(
                                method.as_str(),
                                &label,
                                status,
                                started.elapsed(),
                                Some("transport"),
                            );
                            last_transport = Some(error);
                            last_failure = None;
                            continue;
                        }
                    };
                    let duration = started.elapsed();
                    match classify(status) {
                        Classification::Success => unreachable!("handled above"),
                        Classification::Unauthorized => {
                            self.metrics.observe(
                                method.as_str(),
                                &label,
                                status,
                                duration,
                                Some("unauthorized"),
                            );
                            self.tokens.invalidate(Some(&self.account_id)).await;
                            last_transport = None;
                            last_failure = Some((status, buffered.error_detail()));
                        }
                        Classification::Retriable => {
                            self.metrics.observe(
                                method.as_str(),
                                &label,
                                status,
                                duration,
                                Some("retryable"),
                            );
                            last_transport = None;
                            last_failure = Some((status, buffered.error_detail()));
                        }
                        Classification::Fatal => {
                            self.metrics.observe(
                                method.as_str(),
                                &label,
                                status,
                                duration,
                                Some("client_error"),
                            );
                            return Err(DriveError::Api {
                                status,
                                detail: buffered.error_detail(),
                            });
                        }
                    }
                }
            }
        }

        if let Some(error) = last_transport {
            return Err(DriveError::Transport(error));
        }
        let (status, detail) = last_failure.expect("loop ran at least once");
        Err(DriveError::RetriesExhausted {
            attempts: self.retry.max_attempts,
            status,
            detail,
        })
    }

    fn build_url(&self, target: &str, params: &[(String, String)]) -> Result<String> {
        let absolute = if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!("{}{}", self.config.api_base.trim_end_matches('/'), target)
        };

        let mut url = Url::parse(&absolute).map_err(|e| {
            DriveError::Transport(TransportError::Other(format!(
                "invalid request url {absolute}: {e}"
            )))
        })?;

        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }

        Ok(url.into())
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    /// List files, optionally scoped to a shared drive.
    pub async fn list_files(&self, query: ListFilesQuery) -> Result<FileList> {
        let mut params: Vec<(String, String)> = vec![(
            "pageSize".into(),
            query.page_size.unwrap_or(100).clamp(1, 1000).to_string(),
        )];

        if let Some(token) = &query.page_token {
            params.push(("pageToken".into(), token.clone()));
        }

        let mut q = query.query.clone();
        if !query.include_folders {
            let folder_filter = format!("mimeType!='{FOLDER_MIME_TYPE}'");
            q = Some(match q {
                Some(inner) => format!("{folder_filter} and {inner}"),
                None => folder_filter,
            });
        }
        if let Some(q) = q {
            params.push(("q".into(), q));
        }

        let fields = match &query.fields {
            Some(fields) => format!("files({})", fields.join(",")),
            None => DEFAULT_LIST_FIELDS.to_string(),
        };
        params.push(("fields".into(), fields));

        let effective_corpora = query
            .corpora
            .clone()
            .or_else(|| query.drive_id.as_ref().map(|_| "drive".to_string()));
        if let Some(corpora) = &effective_corpora {
            params.push(("corpora".into(), corpora.clone()));
        }
        if let Some(drive_id) = &query.drive_id {
            params.push(("driveId".into(), drive_id.clone()));
        }

        let all_drives = matches!(effective_corpora.as_deref(), Some("allDrives") | Some("drive"))
            || query.drive_id.is_some()
            || query.include_items_from_all_drives;
        params.push(("supportsAllDrives".into(), all_drives.to_string()));
        params.push(("includeItemsFromAllDrives".into(), all_drives.to_string()));

        let response = self
            .request(HttpMethod::Get, "/files", &params, None, &[])
            .await?;
        Ok(response.json()?)
    }

    /// Fetch metadata for one file.
    pub async fn get_file_metadata(
        &self,
        file_id: &str,
        fields: Option<&[&str]>,
    ) -> Result<DriveFile> {
        let mut params: Vec<(String, String)> =
            vec![("supportsAllDrives".into(), "true".into())];
        if let Some(fields) = fields {
            params.push(("fields".into(), fields.join(",")));
        }

        let response = self
            .request(
                HttpMethod::Get,
                &format!("/files/{file_id}"),
                &params,
                None,
                &[],
            )
            .await?;
        Ok(response.json()?)
    }

    /// Open a streaming download of the file content.
    pub async fn download_file(&self, file_id: &str) -> Result<StreamingResponse> {
        let params: Vec<(String, String)> = vec![
            ("alt".into(), "media".into()),
            ("supportsAllDrives".into(), "true".into()),
        ];
        let headers = vec![("Accept".to_string(), "application/octet-stream".to_string())];

        self.request_streaming(
            HttpMethod::Get,
            &format!("/files/{file_id}"),
            &params,
            &headers,
        )
        .await
    }

    /// Create a folder, optionally inside parents.
    pub async fn create_folder(
        &self,
        name: &str,
        parents: Option<&[String]>,
    ) -> Result<DriveFile> {
        let mut body = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
        });
        if let Some(parents) = parents {
            body["parents"] = serde_json::json!(parents);
        }

        let response = self
            .request(
                HttpMethod::Post,
                "/files",
                &[],
                Some(RequestBody::Json(body)),
                &[],
            )
            .await?;
        Ok(response.json()?)
    }

    /// Upload file content with metadata in one multipart/related request.
    pub async fn upload_file(
        &self,
        name: &str,
        media: Bytes,
        mime_type: &str,
        parents: Option<&[String]>,
    ) -> Result<DriveFile> {
        let mut metadata = serde_json::json!({ "name": name });
        if let Some(parents) = parents {
            metadata["parents"] = serde_json::json!(parents);
        }

        let boundary = random_boundary();
        let body = multipart_related(&boundary, &metadata.to_string(), mime_type, &media);

        let target = format!("{}/files", self.config.upload_base.trim_end_matches('/'));
        let params: Vec<(String, String)> =
            vec![("uploadType".into(), "multipart".into())];

        let response = self
            .request(
                HttpMethod::Post,
                &target,
                &params,
                Some(RequestBody::Raw {
                    content_type: format!("multipart/related; boundary={boundary}"),
                    data: body,
                }),
                &[],
            )
            .await?;
        Ok(response.json()?)
    }

    // ------------------------------------------------------------------
    // Changes and watch channels
    // ------------------------------------------------------------------

    /// Fetch the baseline cursor for future change listings.
    pub async fn get_start_page_token(&self) -> Result<String> {
        let response = self
            .request(HttpMethod::Get, "/changes/startPageToken", &[], None, &[])
            .await?;
        let payload: StartPageToken = response.json()?;
        Ok(payload.start_page_token)
    }

    /// Fetch one page of the change feed.
    pub async fn list_changes(
        &self,
        page_token: &str,
        page_size: u32,
        fields: Option<&[&str]>,
    ) -> Result<ChangeList> {
        let mut params: Vec<(String, String)> = vec![
            ("pageToken".into(), page_token.to_string()),
            ("pageSize".into(), page_size.clamp(1, 1000).to_string()),
            ("includeItemsFromAllDrives".into(), "true".into()),
            ("supportsAllDrives".into(), "true".into()),
            ("spaces".into(), "drive".into()),
        ];
        if let Some(fields) = fields {
            params.push(("fields".into(), fields.join(",")));
        }

        let response = self
            .request(HttpMethod::Get, "/changes", &params, None, &[])
            .await?;
        Ok(response.json()?)
    }

    /// Register a webhook watch on the change feed.
    pub async fn start_changes_watch(
        &self,
        page_token: &str,
        body: &WatchRequest,
    ) -> Result<WatchResponse> {
        let params: Vec<(String, String)> =
            vec![("pageToken".into(), page_token.to_string())];
        let payload = serde_json::to_value(body)
            .map_err(|e| DriveError::Transport(TransportError::Decode(e.to_string())))?;

        let response = self
            .request(
                HttpMethod::Post,
                "/changes/watch",
                &params,
                Some(RequestBody::Json(payload)),
                &[],
            )
            .await?;
        Ok(response.json()?)
    }

    /// Stop a webhook channel.
    pub async fn stop_channel(
        &self,
        channel_id: &str,
        resource_id: Option<&str>,
    ) -> Result<()> {
        let body = StopChannelRequest {
            id: channel_id.to_string(),
            resource_id: resource_id.map(str::to_string),
        };
        let payload = serde_json::to_value(&body)
            .map_err(|e| DriveError::Transport(TransportError::Decode(e.to_string())))?;

        self.request(
            HttpMethod::Post,
            "/channels/stop",
            &[],
            Some(RequestBody::Json(payload)),
            &[],
        )
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Permissions
    // ------------------------------------------------------------------

    /// List permissions on a file.
    pub async fn list_permissions(&self, file_id: &str) -> Result<PermissionList> {
        let params: Vec<(String, String)> = vec![("supportsAllDrives".into(), "true".into())];
        let response = self
            .request(
                HttpMethod::Get,
                &format!("/files/{file_id}/permissions"),
                &params,
                None,
                &[],
            )
            .await?;
        Ok(response.json()?)
    }

    /// Grant a permission on a file.
    pub async fn create_permission(
        &self,
        file_id: &str,
        request: &PermissionRequest,
        send_notification_email: bool,
    ) -> Result<Permission> {
        let params: Vec<(String, String)> = vec![
            ("supportsAllDrives".into(), "true".into()),
            (
                "sendNotificationEmail".into(),
                send_notification_email.to_string(),
            ),
        ];
        let payload = serde_json::to_value(request)
            .map_err(|e| DriveError::Transport(TransportError::Decode(e.to_string())))?;

        let response = self
            .request(
                HttpMethod::Post,
                &format!("/files/{file_id}/permissions"),
                &params,
                Some(RequestBody::Json(payload)),
                &[],
            )
            .await?;
        Ok(response.json()?)
    }

    /// Update an existing permission.
    pub async fn update_permission(
        &self,
        file_id: &str,
        permission_id: &str,
        request: &PermissionUpdate,
    ) -> Result<Permission> {
        let params: Vec<(String, String)> = vec![("supportsAllDrives".into(), "true".into())];
        let payload = serde_json::to_value(request)
            .map_err(|e| DriveError::Transport(TransportError::Decode(e.to_string())))?;

        let response = self
            .request(
                HttpMethod::Patch,
                &format!("/files/{file_id}/permissions/{permission_id}"),
                &params,
                Some(RequestBody::Json(payload)),
                &[],
            )
            .await?;
        Ok(response.json()?)
    }

    /// Revoke a permission.
    pub async fn delete_permission(&self, file_id: &str, permission_id: &str) -> Result<()> {
        let params: Vec<(String, String)> = vec![("supportsAllDrives".into(), "true".into())];
        self.request(
            HttpMethod::Delete,
            &format!("/files/{file_id}/permissions/{permission_id}"),
            &params,
            None,
            &[],
        )
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared drives
    // ------------------------------------------------------------------

    /// List one page of shared drives.
    pub async fn list_drives(
        &self,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<DriveList> {
        let mut params: Vec<(String, String)> =
            vec![("pageSize".into(), page_size.clamp(1, 100).to_string())];
        if let Some(token) = page_token {
            params.push(("pageToken".into(), token.to_string()));
        }

        let response = self
            .request(HttpMethod::Get, "/drives", &params, None, &[])
            .await?;
        Ok(response.json()?)
    }

    /// Walk every page of shared drives.
    pub async fn list_all_drives(&self) -> Result<Vec<SharedDrive>> {
        let mut drives = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_drives(100, page_token.as_deref()).await?;
            drives.extend(page.drives);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(drives)
    }
}

fn prepare_request(
    method: HttpMethod,
    url: &str,
    token: &str,
    body: Option<RequestBody>,
    headers: &[(String, String)],
) -> Result<HttpRequest> {
    let mut request = HttpRequest::new(method, url)
        .bearer_token(token)
        .header("Accept", "application/json");

    match body {
        Some(RequestBody::Json(value)) => {
            request = request.json(&value)?;
        }
        Some(RequestBody::Raw { content_type, data }) => {
            request = request.header("Content-Type", content_type).body(data);
        }
        None => {}
    }

    // Caller-supplied headers win over the defaults.
    for (key, value) in headers {
        request = request.header(key.clone(), value.clone());
    }

    Ok(request)
}

/// Metrics label for a request: path only, query stripped.
fn endpoint_label(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split('?').next().unwrap_or(url).to_string(),
    }
}

fn random_boundary() -> String {
    let mut rng = rand::thread_rng();
    format!("{:016x}{:016x}", rng.gen::<u64>(), rng.gen::<u64>())
}

fn multipart_related(boundary: &str, metadata: &str, mime_type: &str, media: &[u8]) -> Bytes {
    let mut body = Vec::with_capacity(metadata.len() + media.len() + 256);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(metadata.as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    Bytes::from(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use connector_transport::ErrorDetail;
    use mockall::mock;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    mock! {
        Transport {}

        #[async_trait]
        impl HttpTransport for Transport {
            async fn execute(
                &self,
                request: HttpRequest,
            ) -> connector_transport::Result<HttpResponse>;
            async fn execute_streaming(
                &self,
                request: HttpRequest,
            ) -> connector_transport::Result<StreamingResponse>;
        }
    }

    fn config() -> Arc<ConnectorConfig> {
        Arc::new(
            ConnectorConfig::builder()
                .client_id("client-id")
                .client_secret("client-secret")
                .refresh_token("1//refresh")
                .build()
                .unwrap(),
        )
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: Duration::ZERO,
        }
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn is_token_request(request: &HttpRequest) -> bool {
        request.url.contains("oauth2.googleapis.com/token")
    }

    fn client(transport: MockTransport) -> DriveClient {
        let config = config();
        let transport: Arc<dyn HttpTransport> = Arc::new(transport);
        let tokens = Arc::new(TokenProvider::new(
            Arc::clone(&config),
            Arc::clone(&transport),
            None,
        ));
        DriveClient::new(config, transport, tokens).with_retry_policy(fast_retry())
    }

    #[tokio::test]
    async fn success_passes_response_through() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if is_token_request(&request) {
                return Ok(response(
                    200,
                    r#"{"access_token": "tok", "expires_in": 3600}"#,
                ));
            }
            assert_eq!(
                request.headers.get("Authorization").map(String::as_str),
                Some("Bearer tok")
            );
            Ok(response(200, r#"{"files": []}"#))
        });

        let client = client(transport);
        let result = client
            .request(HttpMethod::Get, "/files", &[], None, &[])
            .await
            .unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(
            client.metrics().request_count("GET", "/drive/v3/files", 200),
            1
        );
    }

    #[tokio::test]
    async fn retries_503_until_exhausted() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if is_token_request(&request) {
                return Ok(response(
                    200,
                    r#"{"access_token": "tok", "expires_in": 3600}"#,
                ));
            }
            Ok(response(503, "upstream down"))
        });

        let client = client(transport);
        let error = client
            .request(HttpMethod::Get, "/files", &[], None, &[])
            .await
            .unwrap_err();

        match error {
            DriveError::RetriesExhausted {
                attempts, status, ..
            } => {
                assert_eq!(attempts, 5);
                assert_eq!(status, 503);
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }

        // One observation per attempt, on every exit path.
        assert_eq!(
            client.metrics().request_count("GET", "/drive/v3/files", 503),
            5
        );
        assert_eq!(
            client
                .metrics()
                .error_count("GET", "/drive/v3/files", 503, "retryable"),
            5
        );
    }

    #[tokio::test]
    async fn unauthorized_invalidates_and_uses_fresh_token() {
        let mut transport = MockTransport::new();
        let token_calls = Arc::new(AtomicU32::new(0));
        let api_calls = Arc::new(AtomicU32::new(0));
        let token_calls_in = Arc::clone(&token_calls);
        let api_calls_in = Arc::clone(&api_calls);

        transport.expect_execute().returning(move |request| {
            if is_token_request(&request) {
                let n = token_calls_in.fetch_add(1, Ordering::SeqCst) + 1;
                let body = format!(r#"{{"access_token": "tok-{n}", "expires_in": 3600}}"#);
                return Ok(response(200, &body));
            }

            let n = api_calls_in.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                assert_eq!(
                    request.headers.get("Authorization").map(String::as_str),
                    Some("Bearer tok-1")
                );
                Ok(response(401, r#"{"error": "invalid_credentials"}"#))
            } else {
                // Second attempt must carry the re-exchanged token.
                assert_eq!(
                    request.headers.get("Authorization").map(String::as_str),
                    Some("Bearer tok-2")
                );
                Ok(response(200, r#"{"files": []}"#))
            }
        });

        let client = client(transport);
        let result = client
            .request(HttpMethod::Get, "/files", &[], None, &[])
            .await
            .unwrap();

        assert_eq!(result.status, 200);
        assert_eq!(token_calls.load(Ordering::SeqCst), 2);
        assert_eq!(api_calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            client
                .metrics()
                .error_count("GET", "/drive/v3/files", 401, "unauthorized"),
            1
        );
    }

    #[tokio::test]
    async fn fatal_client_error_is_not_retried() {
        let mut transport = MockTransport::new();
        let api_calls = Arc::new(AtomicU32::new(0));
        let api_calls_in = Arc::clone(&api_calls);

        transport.expect_execute().returning(move |request| {
            if is_token_request(&request) {
                return Ok(response(
                    200,
                    r#"{"access_token": "tok", "expires_in": 3600}"#,
                ));
            }
            api_calls_in.fetch_add(1, Ordering::SeqCst);
            Ok(response(404, r#"{"error": {"message": "File not found"}}"#))
        });

        let client = client(transport);
        let error = client
            .request(HttpMethod::Get, "/files/missing", &[], None, &[])
            .await
            .unwrap_err();

        match &error {
            DriveError::Api { status, detail } => {
                assert_eq!(*status, 404);
                assert_eq!(detail.description().as_deref(), Some("File not found"));
            }
            other => panic!("expected Api, got {other:?}"),
        }
        assert_eq!(api_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn list_files_builds_drive_scoped_params() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if is_token_request(&request) {
                return Ok(response(
                    200,
                    r#"{"access_token": "tok", "expires_in": 3600}"#,
                ));
            }
            let url = Url::parse(&request.url).unwrap();
            let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
            assert_eq!(params.get("pageSize").map(String::as_str), Some("1000"));
            assert_eq!(params.get("driveId").map(String::as_str), Some("team-1"));
            assert_eq!(params.get("corpora").map(String::as_str), Some("drive"));
            assert_eq!(
                params.get("supportsAllDrives").map(String::as_str),
                Some("true")
            );
            assert!(params
                .get("q")
                .map(|q| q.contains("mimeType!="))
                .unwrap_or(false));
            Ok(response(
                200,
                r#"{"files": [{"id": "f1", "name": "a.txt"}], "nextPageToken": "p2"}"#,
            ))
        });

        let client = client(transport);
        let list = client
            .list_files(ListFilesQuery {
                page_size: Some(5000),
                include_folders: false,
                drive_id: Some("team-1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(list.files.len(), 1);
        assert_eq!(list.next_page_token.as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn start_page_token_endpoint_parses() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if is_token_request(&request) {
                return Ok(response(
                    200,
                    r#"{"access_token": "tok", "expires_in": 3600}"#,
                ));
            }
            assert!(request.url.contains("/changes/startPageToken"));
            Ok(response(200, r#"{"startPageToken": "start-1"}"#))
        });

        let client = client(transport);
        assert_eq!(client.get_start_page_token().await.unwrap(), "start-1");
    }

    #[tokio::test]
    async fn upload_builds_multipart_related_body() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if is_token_request(&request) {
                return Ok(response(
                    200,
                    r#"{"access_token": "tok", "expires_in": 3600}"#,
                ));
            }
            assert!(request.url.contains("upload/drive/v3/files"));
            assert!(request.url.contains("uploadType=multipart"));
            let content_type = request.headers.get("Content-Type").unwrap();
            assert!(content_type.starts_with("multipart/related; boundary="));

            let body = request.body.as_ref().unwrap();
            let text = std::str::from_utf8(body).unwrap();
            assert!(text.contains(r#""name":"notes.txt""#));
            assert!(text.contains("Content-Type: text/plain"));
            assert!(text.contains("hello world"));
            Ok(response(200, r#"{"id": "new-file"}"#))
        });

        let client = client(transport);
        let file = client
            .upload_file(
                "notes.txt",
                Bytes::from_static(b"hello world"),
                "text/plain",
                None,
            )
            .await
            .unwrap();
        assert_eq!(file.id, "new-file");
    }

    #[tokio::test]
    async fn transport_errors_retry_then_surface() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if is_token_request(&request) {
                return Ok(response(
                    200,
                    r#"{"access_token": "tok", "expires_in": 3600}"#,
                ));
            }
            Err(TransportError::Timeout)
        });

        let client = client(transport);
        let error = client
            .request(HttpMethod::Get, "/files", &[], None, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            DriveError::Transport(TransportError::Timeout)
        ));
        assert_eq!(
            client
                .metrics()
                .error_count("GET", "/drive/v3/files", 0, "transport"),
            5
        );
    }

    #[test]
    fn endpoint_label_strips_query() {
        assert_eq!(
            endpoint_label("https://www.googleapis.com/drive/v3/files?pageSize=10"),
            "/drive/v3/files"
        );
        assert_eq!(endpoint_label("/files?x=1"), "/files");
    }

    #[test]
    fn retry_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn api_error_exposes_structure() {
        let error = DriveError::Api {
            status: 403,
            detail: ErrorDetail::from_bytes(br#"{"error": {"message": "rate limited"}}"#),
        };
        assert_eq!(error.status(), Some(403));
        assert_eq!(
            error.detail().and_then(|d| d.description()).as_deref(),
            Some("rate limited")
        );
    }
}
