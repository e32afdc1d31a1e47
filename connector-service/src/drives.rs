//! # Drive Catalogue
//!
//! Keeps a local listing of the account's drives: the synthetic "My Drive"
//! entry plus every shared drive visible upstream. Drives that disappear
//! are deactivated rather than deleted, and reactivate when they return.

use crate::error::Result;
use chrono::{Duration, Utc};
use connector_drive::DriveClient;
use connector_store::{DriveCatalogEntry, DriveCatalogRepository, DriveKind};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

/// Synthetic catalogue id for the user's own drive.
const MY_DRIVE_ID: &str = "my-drive";

/// Catalogue service over the drives listing.
pub struct DriveDirectoryService {
    client: Arc<DriveClient>,
    catalog: Arc<dyn DriveCatalogRepository>,
}

impl DriveDirectoryService {
    pub fn new(client: Arc<DriveClient>, catalog: Arc<dyn DriveCatalogRepository>) -> Self {
        Self { client, catalog }
    }

    /// Return the catalogue, refreshing it first when `force` is set or the
    /// last sync is older than `max_age`.
    #[instrument(skip(self))]
    pub async fn ensure_synced(
        &self,
        force: bool,
        max_age: Duration,
    ) -> Result<Vec<DriveCatalogEntry>> {
        if force {
            self.sync().await?;
            return self.list_drives(false, None).await;
        }

        let stale = match self.catalog.last_synced().await? {
            None => true,
            Some(last_synced) => Utc::now() - last_synced > max_age,
        };
        if stale {
            self.sync().await?;
        }

        self.list_drives(false, None).await
    }

    /// Fetch drives upstream and reconcile the catalogue.
    #[instrument(skip(self))]
    pub async fn sync(&self) -> Result<Vec<DriveCatalogEntry>> {
        let now = Utc::now();

        let mut remote: Vec<(String, String, DriveKind)> = vec![(
            MY_DRIVE_ID.to_string(),
            "My Drive".to_string(),
            DriveKind::MyDrive,
        )];
        for drive in self.client.list_all_drives().await? {
            let name = drive.name.clone().unwrap_or_else(|| drive.id.clone());
            remote.push((drive.id, name, DriveKind::SharedDrive));
        }

        let existing = self.catalog.all().await?;
        let seen: HashSet<&str> = remote.iter().map(|(id, _, _)| id.as_str()).collect();

        for (drive_id, name, kind) in &remote {
            self.catalog.upsert(drive_id, name, *kind, now).await?;
        }
        for entry in &existing {
            if !seen.contains(entry.drive_id.as_str()) {
                self.catalog.deactivate(&entry.drive_id, now).await?;
            }
        }

        info!(total = remote.len(), "drive catalogue synced");
        self.list_drives(false, None).await
    }

    /// Read the catalogue, ordered by name.
    pub async fn list_drives(
        &self,
        include_inactive: bool,
        kind: Option<DriveKind>,
    ) -> Result<Vec<DriveCatalogEntry>> {
        Ok(self.catalog.list(include_inactive, kind).await?)
    }

    /// Shared drives only.
    pub async fn list_shared_drives(&self) -> Result<Vec<DriveCatalogEntry>> {
        self.list_drives(false, Some(DriveKind::SharedDrive)).await
    }
}
