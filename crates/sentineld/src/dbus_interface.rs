use crate::alerts::AlertBus;
use crate::state::Services;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use zbus::object_server::SignalEmitter;
use zbus::{fdo, interface, Connection};

pub const BUS_NAME: &str = "org.sentinel.Sentinel1";
pub const OBJECT_PATH: &str = "/org/sentinel/Sentinel1";

/// D-Bus interface for the Sentinel watchlist daemon.
///
/// Bus name: org.sentinel.Sentinel1
/// Object path: /org/sentinel/Sentinel1
pub struct SentinelService {
    services: Services,
}

impl SentinelService {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[interface(name = "org.sentinel.Sentinel1")]
impl SentinelService {
    /// Start scanning on the given camera index.
    ///
    /// Returns (ok, message); the message names the opened index or the failure.
    async fn start(&self, camera_index: u32) -> (bool, String) {
        tracing::info!(camera_index, "start requested");
        match self.services.start(Some(camera_index)).await {
            Ok(index) => (true, format!("scanning on camera {index}")),
            Err(e) => {
                tracing::warn!(error = %e, "start failed");
                (false, e.to_string())
            }
        }
    }

    /// Stop scanning. Safe to call when already stopped.
    async fn stop(&self) -> fdo::Result<bool> {
        tracing::info!("stop requested");
        self.services
            .stop()
            .await
            .map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// Enroll an identity from an image file readable by the daemon.
    async fn enroll(&self, identity_id: &str, name: &str, image_path: &str) -> fdo::Result<bool> {
        tracing::info!(identity_id, name, image_path, "enroll requested");
        if identity_id.is_empty() {
            return Err(fdo::Error::InvalidArgs("identity id must not be empty".into()));
        }
        self.services
            .enroll(identity_id, name, PathBuf::from(image_path))
            .await
            .map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    async fn remove_identity(&self, identity_id: &str) -> bool {
        tracing::info!(identity_id, "remove requested");
        self.services.remove(identity_id).await
    }

    /// Watchlist as a JSON array of {identity_id, name, dimension}.
    async fn list_watchlist(&self) -> fdo::Result<String> {
        serde_json::to_string(&self.services.watchlist_items())
            .map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// Daemon status as JSON.
    async fn status(&self) -> fdo::Result<String> {
        serde_json::to_string(&self.services.status()).map_err(|e| fdo::Error::Failed(e.to_string()))
    }

    /// Emitted once per published alert.
    #[zbus(signal)]
    async fn alert(
        emitter: &SignalEmitter<'_>,
        name: &str,
        confidence: f64,
        timestamp: &str,
    ) -> zbus::Result<()>;
}

/// Register the service and claim the bus name.
pub async fn serve(services: Services, session_bus: bool) -> zbus::Result<Connection> {
    let builder = if session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, SentinelService::new(services))?
        .build()
        .await
}

/// Relay alerts from the bus to the `Alert` signal until the bus closes.
pub async fn forward_alerts(conn: Connection, bus: AlertBus) {
    let emitter = match SignalEmitter::new(&conn, OBJECT_PATH) {
        Ok(emitter) => emitter,
        Err(e) => {
            tracing::error!(error = %e, "cannot create alert signal emitter");
            return;
        }
    };
    let mut rx = bus.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => {
                let sent = SentinelService::alert(
                    &emitter,
                    &event.name,
                    f64::from(event.confidence),
                    &event.timestamp,
                )
                .await;
                if let Err(e) = sent {
                    tracing::warn!(error = %e, "failed to emit alert signal");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "D-Bus alert forwarder lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
