//! Shared daemon services used by both the D-Bus and HTTP front ends.

use crate::alerts::AlertBus;
use crate::store::WatchlistRepository;
use crate::stream::StreamingPipeline;
use crate::supervisor::{ScanSupervisor, SupervisorError};
use sentinel_core::{EnrollError, FaceMatcher, WatchlistError, WatchlistStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Scan(#[from] SupervisorError),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Watchlist(#[from] WatchlistError),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub scanning: bool,
    pub camera_state: &'static str,
    pub camera_index: Option<u32>,
    pub default_camera: u32,
    pub watchlist_size: usize,
    pub subscribers: usize,
}

#[derive(Debug, Serialize)]
pub struct WatchlistItem {
    pub identity_id: String,
    pub name: String,
    pub dimension: usize,
}

#[derive(Clone)]
pub struct Services {
    pub supervisor: Arc<ScanSupervisor>,
    pub pipeline: Arc<StreamingPipeline>,
    pub watchlist: Arc<WatchlistStore>,
    pub matcher: Arc<FaceMatcher>,
    pub store: Option<WatchlistRepository>,
    pub bus: AlertBus,
    pub default_camera: u32,
    /// Same flag as the camera session, so enrolled faces share its orientation.
    pub mirror: bool,
}

impl Services {
    /// Start scanning. `None` uses the configured default camera.
    pub async fn start(&self, camera_index: Option<u32>) -> Result<u32, ServiceError> {
        let index = camera_index.unwrap_or(self.default_camera);
        let supervisor = self.supervisor.clone();
        let opened = tokio::task::spawn_blocking(move || supervisor.start(index)).await??;
        Ok(opened)
    }

    pub async fn stop(&self) -> Result<bool, ServiceError> {
        let supervisor = self.supervisor.clone();
        Ok(tokio::task::spawn_blocking(move || supervisor.stop()).await?)
    }

    /// Compute an encoding from the image at `path` and add it to the watchlist.
    ///
    /// Returns whether the identity is new. Persistence failures are logged only.
    pub async fn enroll(&self, identity_id: &str, name: &str, path: PathBuf) -> Result<bool, ServiceError> {
        let matcher = self.matcher.clone();
        let mirror = self.mirror;
        let encoding = tokio::task::spawn_blocking(move || matcher.enroll_image(&path, mirror)).await??;
        let inserted = self.watchlist.upsert(identity_id, name, encoding)?;
        tracing::info!(identity_id, name, inserted, "identity enrolled");

        if let Some(store) = &self.store {
            let entry = self
                .watchlist
                .snapshot()
                .iter()
                .find(|e| e.identity_id == identity_id)
                .cloned();
            if let Some(entry) = entry {
                if let Err(e) = store.upsert(&entry).await {
                    tracing::error!(identity_id, error = %e, "failed to persist enrollment");
                }
            }
        }
        Ok(inserted)
    }

    pub async fn remove(&self, identity_id: &str) -> bool {
        let removed = self.watchlist.remove(identity_id);
        if removed {
            tracing::info!(identity_id, "identity removed");
            if let Some(store) = &self.store {
                if let Err(e) = store.remove(identity_id).await {
                    tracing::error!(identity_id, error = %e, "failed to persist removal");
                }
            }
        }
        removed
    }

    pub fn status(&self) -> StatusReport {
        let scan = self.supervisor.status();
        StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            scanning: scan.scanning,
            camera_state: scan.camera_state,
            camera_index: scan.camera_index,
            default_camera: self.default_camera,
            watchlist_size: self.watchlist.len(),
            subscribers: self.bus.subscriber_count(),
        }
    }

    pub fn watchlist_items(&self) -> Vec<WatchlistItem> {
        self.watchlist
            .snapshot()
            .iter()
            .map(|e| WatchlistItem {
                identity_id: e.identity_id.clone(),
                name: e.name.clone(),
                dimension: e.encoding.len(),
            })
            .collect()
    }
}
