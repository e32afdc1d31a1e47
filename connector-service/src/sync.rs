//! # Change Sync Engine
//!
//! Delivers the Drive change feed incrementally and resumably per
//! `(account, resource)`.
//!
//! ## State machine
//!
//! Two states per resource:
//!
//! - **Uninitialised** — no checkpoint, or a checkpoint without a cursor.
//!   One call to the start-page-token endpoint establishes the baseline;
//!   no change records are fetched. The start token is the starting point
//!   for future diffs, not a page of results.
//! - **Synchronised** — every call fetches one page with the stored cursor
//!   and replaces it with the response's `newStartPageToken` (feed caught
//!   up) or `nextPageToken` (more pages remain), preferring the former.
//!
//! The checkpoint is persisted unconditionally on success, even for an
//! empty page. A failed fetch propagates unchanged and never advances the
//! cursor, so the next call resumes from the old position.

use crate::error::Result;
use chrono::Utc;
use connector_drive::{Change, DriveClient};
use connector_store::CheckpointRepository;
use std::sync::Arc;
use tracing::{info, instrument};

/// Result of one sync step.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Change records fetched this step; empty on initialisation.
    pub changes: Vec<Change>,
    /// Cursor persisted after this step.
    pub cursor: String,
    /// Whether this step established the baseline cursor.
    pub initialised: bool,
    /// Whether the feed has more pages immediately available.
    pub has_more: bool,
}

/// Drives the change feed against the persisted checkpoint.
pub struct ChangeSyncEngine {
    client: Arc<DriveClient>,
    checkpoints: Arc<dyn CheckpointRepository>,
    account_id: String,
}

impl ChangeSyncEngine {
    pub fn new(
        client: Arc<DriveClient>,
        checkpoints: Arc<dyn CheckpointRepository>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            checkpoints,
            account_id: account_id.into(),
        }
    }

    /// Perform one sync step for the resource.
    ///
    /// # Errors
    ///
    /// Pipeline failures propagate unchanged; the checkpoint is only
    /// written after a successful fetch.
    #[instrument(skip(self), fields(account = %self.account_id))]
    pub async fn sync_changes(&self, resource: &str, page_size: u32) -> Result<SyncOutcome> {
        let checkpoint = self.checkpoints.get(&self.account_id, resource).await?;
        let cursor = checkpoint.and_then(|c| c.cursor);

        let Some(cursor) = cursor else {
            info!(resource, "initialising change feed baseline");
            let start_token = self.client.get_start_page_token().await?;
            self.checkpoints
                .upsert(&self.account_id, resource, Some(&start_token), Some(Utc::now()))
                .await?;
            return Ok(SyncOutcome {
                changes: Vec::new(),
                cursor: start_token,
                initialised: true,
                has_more: false,
            });
        };

        let page = self.client.list_changes(&cursor, page_size, None).await?;

        let has_more = page.next_page_token.is_some();
        let new_cursor = page
            .new_start_page_token
            .clone()
            .or_else(|| page.next_page_token.clone())
            .unwrap_or_else(|| cursor.clone());

        self.checkpoints
            .upsert(&self.account_id, resource, Some(&new_cursor), Some(Utc::now()))
            .await?;

        info!(
            resource,
            fetched = page.changes.len(),
            new_cursor = %new_cursor,
            has_more,
            "change feed page applied"
        );

        Ok(SyncOutcome {
            changes: page.changes,
            cursor: new_cursor,
            initialised: false,
            has_more,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{drive_client, json_response, token_response, MockTransport};
    use connector_store::{create_test_pool, SqliteCheckpointRepository};

    async fn engine(transport: MockTransport) -> (ChangeSyncEngine, Arc<SqliteCheckpointRepository>) {
        let pool = create_test_pool().await.unwrap();
        let checkpoints = Arc::new(SqliteCheckpointRepository::new(pool));
        let client = Arc::new(drive_client(transport));
        (
            ChangeSyncEngine::new(client, checkpoints.clone(), "default"),
            checkpoints,
        )
    }

    #[tokio::test]
    async fn first_sync_establishes_baseline_without_fetching_changes() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if request.url.contains("oauth2.googleapis.com/token") {
                return Ok(token_response());
            }
            assert!(
                request.url.contains("/changes/startPageToken"),
                "initialisation must not touch the changes listing: {}",
                request.url
            );
            Ok(json_response(200, r#"{"startPageToken": "start-token"}"#))
        });

        let (engine, checkpoints) = engine(transport).await;
        let outcome = engine.sync_changes("files", 100).await.unwrap();

        assert!(outcome.initialised);
        assert!(outcome.changes.is_empty());
        assert!(!outcome.has_more);
        assert_eq!(outcome.cursor, "start-token");

        let stored = checkpoints.get("default", "files").await.unwrap().unwrap();
        assert_eq!(stored.cursor.as_deref(), Some("start-token"));
        assert!(stored.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn checkpoint_without_cursor_still_initialises() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if request.url.contains("oauth2.googleapis.com/token") {
                return Ok(token_response());
            }
            Ok(json_response(200, r#"{"startPageToken": "start-token"}"#))
        });

        let (engine, checkpoints) = engine(transport).await;
        checkpoints
            .upsert("default", "files", None, None)
            .await
            .unwrap();

        let outcome = engine.sync_changes("files", 100).await.unwrap();
        assert!(outcome.initialised);
        assert_eq!(outcome.cursor, "start-token");
    }

    #[tokio::test]
    async fn steady_state_prefers_new_start_token() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if request.url.contains("oauth2.googleapis.com/token") {
                return Ok(token_response());
            }
            assert!(request.url.contains("pageToken=old-cursor"));
            Ok(json_response(
                200,
                r#"{
                    "changes": [{"fileId": "abc", "removed": false}],
                    "newStartPageToken": "fresh-token"
                }"#,
            ))
        });

        let (engine, checkpoints) = engine(transport).await;
        checkpoints
            .upsert("default", "files", Some("old-cursor"), None)
            .await
            .unwrap();

        let outcome = engine.sync_changes("files", 100).await.unwrap();
        assert!(!outcome.initialised);
        assert!(!outcome.has_more);
        assert_eq!(outcome.cursor, "fresh-token");
        assert_eq!(outcome.changes.len(), 1);

        let stored = checkpoints.get("default", "files").await.unwrap().unwrap();
        assert_eq!(stored.cursor.as_deref(), Some("fresh-token"));
    }

    #[tokio::test]
    async fn partial_page_advances_to_next_page_token() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if request.url.contains("oauth2.googleapis.com/token") {
                return Ok(token_response());
            }
            Ok(json_response(
                200,
                r#"{"changes": [], "nextPageToken": "page-2"}"#,
            ))
        });

        let (engine, checkpoints) = engine(transport).await;
        checkpoints
            .upsert("default", "files", Some("old-cursor"), None)
            .await
            .unwrap();

        let outcome = engine.sync_changes("files", 100).await.unwrap();
        assert!(outcome.has_more);
        assert_eq!(outcome.cursor, "page-2");

        let stored = checkpoints.get("default", "files").await.unwrap().unwrap();
        assert_eq!(stored.cursor.as_deref(), Some("page-2"));
    }

    #[tokio::test]
    async fn empty_page_still_persists_cursor_and_timestamp() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if request.url.contains("oauth2.googleapis.com/token") {
                return Ok(token_response());
            }
            Ok(json_response(
                200,
                r#"{"changes": [], "newStartPageToken": "old-cursor"}"#,
            ))
        });

        let (engine, checkpoints) = engine(transport).await;
        checkpoints
            .upsert("default", "files", Some("old-cursor"), None)
            .await
            .unwrap();

        let outcome = engine.sync_changes("files", 100).await.unwrap();
        assert!(outcome.changes.is_empty());
        assert_eq!(outcome.cursor, "old-cursor");

        let stored = checkpoints.get("default", "files").await.unwrap().unwrap();
        assert!(stored.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn failed_fetch_leaves_checkpoint_untouched() {
        let mut transport = MockTransport::new();
        transport.expect_execute().returning(|request| {
            if request.url.contains("oauth2.googleapis.com/token") {
                return Ok(token_response());
            }
            Ok(json_response(403, r#"{"error": {"message": "forbidden"}}"#))
        });

        let (engine, checkpoints) = engine(transport).await;
        checkpoints
            .upsert("default", "files", Some("old-cursor"), None)
            .await
            .unwrap();

        let error = engine.sync_changes("files", 100).await.unwrap_err();
        assert!(matches!(
            error,
            crate::error::ServiceError::Drive(connector_drive::DriveError::Api { status: 403, .. })
        ));

        let stored = checkpoints.get("default", "files").await.unwrap().unwrap();
        assert_eq!(stored.cursor.as_deref(), Some("old-cursor"));
    }
}
