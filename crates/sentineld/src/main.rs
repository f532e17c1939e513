use anyhow::{Context, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod alerts;
mod annotate;
mod config;
mod dbus_interface;
mod http;
mod state;
mod store;
mod stream;
mod supervisor;
#[cfg(test)]
mod testing;

use alerts::AlertBus;
use sentinel_core::{FaceMatcher, ScrfdLocator, WatchlistStore};
use sentinel_hw::{CameraSession, V4l2Opener};
use state::Services;
use store::WatchlistRepository;
use stream::StreamingPipeline;
use supervisor::{ScanSettings, ScanSupervisor};

const ALERT_BUS_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = config::Config::from_env();
    tracing::info!(
        camera = config.camera_index,
        http = %config.http_addr,
        mirror = config.mirror,
        "sentineld starting"
    );

    let model_path = config.scrfd_model_path();
    let locator = ScrfdLocator::load(&model_path)
        .with_context(|| format!("loading face detector from {model_path}"))?;
    let matcher = Arc::new(FaceMatcher::new(Box::new(locator), config.match_threshold));
    tracing::info!(path = %model_path, threshold = matcher.threshold(), "SCRFD detector loaded");

    let watchlist = Arc::new(WatchlistStore::new());
    // A roster that failed to load must not be overwritten on exit.
    let mut roster_loaded = false;
    let store = match WatchlistRepository::open(&config.db_path).await {
        Ok(repo) => {
            match repo.load().await {
                Ok(entries) => match watchlist.import_snapshot(entries) {
                    Ok(count) => {
                        roster_loaded = true;
                        tracing::info!(count, path = %config.db_path.display(), "watchlist loaded");
                    }
                    Err(e) => tracing::error!(error = %e, "stored watchlist rejected; starting empty"),
                },
                Err(e) => tracing::error!(error = %e, "failed to read watchlist; starting empty"),
            }
            Some(repo)
        }
        Err(e) => {
            tracing::error!(error = %e, path = %config.db_path.display(), "watchlist database unavailable; enrollments will not persist");
            None
        }
    };

    let session = Arc::new(CameraSession::new(Box::new(V4l2Opener), config.mirror));
    let active = Arc::new(AtomicBool::new(false));
    let bus = AlertBus::new(ALERT_BUS_CAPACITY);

    let supervisor = Arc::new(ScanSupervisor::new(
        session.clone(),
        matcher.clone(),
        watchlist.clone(),
        bus.clone(),
        active.clone(),
        ScanSettings {
            fallback_index: config.fallback_index,
            alert_interval: config.alert_interval,
            alert_retry: config.alert_retry,
            alert_cooldown: config.alert_cooldown,
        },
    ));
    let pipeline = Arc::new(StreamingPipeline::new(
        session,
        matcher.clone(),
        watchlist.clone(),
        active,
        config.stream_interval,
        config.jpeg_quality,
    ));

    let services = Services {
        supervisor: supervisor.clone(),
        pipeline,
        watchlist,
        matcher,
        store,
        bus: bus.clone(),
        default_camera: config.camera_index,
        mirror: config.mirror,
    };

    // D-Bus is optional; the HTTP surface still works without it.
    let _dbus = match dbus_interface::serve(services.clone(), config.dbus_session).await {
        Ok(conn) => {
            tracing::info!(name = dbus_interface::BUS_NAME, "D-Bus interface registered");
            tokio::spawn(dbus_interface::forward_alerts(conn.clone(), bus));
            Some(conn)
        }
        Err(e) => {
            tracing::warn!(error = %e, "D-Bus unavailable; continuing with HTTP only");
            None
        }
    };

    let shutdown_store = services.store.clone().filter(|_| roster_loaded);
    let shutdown_watchlist = services.watchlist.clone();
    let http = tokio::spawn(http::serve(config.http_addr, services));
    tracing::info!("sentineld ready");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("sentineld shutting down");
        }
        res = http => {
            match res {
                Ok(Ok(())) => tracing::warn!("HTTP server exited"),
                Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
                Err(e) => tracing::error!(error = %e, "HTTP task panicked"),
            }
        }
    }

    tokio::task::spawn_blocking(move || supervisor.stop()).await?;

    if let Some(store) = shutdown_store {
        let roster = shutdown_watchlist.export_snapshot();
        let count = roster.len();
        match store.save_all(roster).await {
            Ok(()) => tracing::info!(count, "watchlist saved"),
            Err(e) => tracing::error!(error = %e, "failed to save watchlist on shutdown"),
        }
    }
    Ok(())
}
