//! Scan lifecycle: owns the active flag, the camera handle and the alert loop.

use crate::alerts::{AlertBus, AlertContext, AlertLoop};
use sentinel_core::{FaceMatcher, WatchlistStore};
use sentinel_hw::{CameraError, CameraSession, SessionState};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("failed to spawn alert loop: {0}")]
    Spawn(std::io::Error),
}

/// Alert loop timing and camera fallback settings.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Fixed fallback index; `None` means requested index + 1.
    pub fallback_index: Option<u32>,
    pub alert_interval: Duration,
    pub alert_retry: Duration,
    pub alert_cooldown: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanStatus {
    pub scanning: bool,
    pub camera_state: &'static str,
    pub camera_index: Option<u32>,
}

pub struct ScanSupervisor {
    session: Arc<CameraSession>,
    matcher: Arc<FaceMatcher>,
    watchlist: Arc<WatchlistStore>,
    bus: AlertBus,
    active: Arc<AtomicBool>,
    settings: ScanSettings,
    /// Held across a whole start or stop.
    control: Mutex<Option<AlertLoop>>,
}

impl ScanSupervisor {
    pub fn new(
        session: Arc<CameraSession>,
        matcher: Arc<FaceMatcher>,
        watchlist: Arc<WatchlistStore>,
        bus: AlertBus,
        active: Arc<AtomicBool>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            session,
            matcher,
            watchlist,
            bus,
            active,
            settings,
            control: Mutex::new(None),
        }
    }

    /// Begin scanning on `preferred` (or its fallback). Restarts if already active.
    ///
    /// Blocks while any previous alert loop is joined and the camera opens.
    pub fn start(&self, preferred: u32) -> Result<u32, SupervisorError> {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        self.halt(&mut control);

        let fallback = self
            .settings
            .fallback_index
            .unwrap_or_else(|| preferred.saturating_add(1));
        let index = self.session.acquire(preferred, fallback)?;

        self.active.store(true, Ordering::SeqCst);
        let ctx = AlertContext {
            session: self.session.clone(),
            matcher: self.matcher.clone(),
            watchlist: self.watchlist.clone(),
            bus: self.bus.clone(),
            active: self.active.clone(),
            interval: self.settings.alert_interval,
            retry: self.settings.alert_retry,
            cooldown: self.settings.alert_cooldown,
        };
        match AlertLoop::spawn(ctx) {
            Ok(alert_loop) => *control = Some(alert_loop),
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                self.session.release();
                return Err(SupervisorError::Spawn(e));
            }
        }

        tracing::info!(index, "scanning started");
        Ok(index)
    }

    /// Stop scanning. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        let mut control = self.control.lock().unwrap_or_else(PoisonError::into_inner);
        let stopped = self.halt(&mut control);
        if stopped {
            tracing::info!("scanning stopped");
        }
        stopped
    }

    fn halt(&self, control: &mut Option<AlertLoop>) -> bool {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        let released = self.session.release();
        if let Some(alert_loop) = control.take() {
            if alert_loop.is_finished() {
                tracing::debug!("alert loop had already exited");
            }
            alert_loop.join();
        }
        was_active || released
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ScanStatus {
        let state = self.session.state();
        ScanStatus {
            scanning: self.is_active() && state != SessionState::Idle,
            camera_state: state.as_str(),
            camera_index: self.session.device_index(),
        }
    }
}

impl Drop for ScanSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamingPipeline;
    use crate::testing::{asymmetric_frame, fixed_matcher, mirrored, test_frame, watching, FakeCamera, FACE_BOX};

    fn supervisor(camera: &FakeCamera, bus: AlertBus) -> ScanSupervisor {
        let (matcher, watchlist) = fixed_matcher(vec![FACE_BOX]);
        ScanSupervisor::new(
            camera.session(),
            matcher,
            watchlist,
            bus,
            Arc::new(AtomicBool::new(false)),
            ScanSettings {
                fallback_index: None,
                alert_interval: Duration::from_millis(10),
                alert_retry: Duration::from_millis(5),
                alert_cooldown: Duration::from_secs(10),
            },
        )
    }

    #[test]
    fn test_stop_then_start_leaves_one_open_handle() {
        let camera = FakeCamera::new(test_frame());
        let session = camera.session();
        let sup = supervisor(&camera, AlertBus::new(4));

        sup.start(0).unwrap();
        sup.stop();
        sup.start(0).unwrap();

        assert_eq!(session.open_count() - session.release_count(), 1);
        assert!(sup.is_active());
        sup.stop();
        assert_eq!(session.open_count(), session.release_count());
    }

    #[test]
    fn test_start_while_active_restarts() {
        let camera = FakeCamera::new(test_frame());
        let session = camera.session();
        let sup = supervisor(&camera, AlertBus::new(4));

        sup.start(0).unwrap();
        sup.start(0).unwrap();
        assert_eq!(session.open_count(), 2);
        assert_eq!(session.release_count(), 1);
        assert!(sup.status().scanning);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let camera = FakeCamera::new(test_frame());
        let sup = supervisor(&camera, AlertBus::new(4));
        assert!(!sup.stop());

        sup.start(0).unwrap();
        assert!(sup.stop());
        assert!(!sup.stop());
        assert!(!sup.is_active());
        assert_eq!(sup.status().camera_state, "idle");
    }

    #[test]
    fn test_start_uses_fallback_index() {
        let camera = FakeCamera::new(test_frame());
        camera.block_index(0);
        let sup = supervisor(&camera, AlertBus::new(4));
        assert_eq!(sup.start(0).unwrap(), 1);
        assert_eq!(sup.status().camera_index, Some(1));
    }

    #[test]
    fn test_start_unavailable_stays_inactive() {
        let camera = FakeCamera::new(test_frame());
        camera.block_index(3);
        camera.block_index(4);
        let sup = supervisor(&camera, AlertBus::new(4));

        let err = sup.start(3).unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Camera(CameraError::Unavailable { preferred: 3, fallback: 4 })
        ));
        assert!(!sup.is_active());
        assert!(!sup.status().scanning);
    }

    #[test]
    fn test_started_scan_publishes_alerts() {
        let camera = FakeCamera::new(test_frame());
        let bus = AlertBus::new(4);
        let mut rx = bus.subscribe();
        let sup = supervisor(&camera, bus);

        sup.start(0).unwrap();
        let event = rx.blocking_recv().unwrap();
        assert_eq!(event.name, "Watched");
        sup.stop();
    }

    #[test]
    fn test_stream_and_alerts_share_mirrored_geometry() {
        let camera = FakeCamera::mirrored(asymmetric_frame());
        // Enrolled from the mirrored view; the raw view of this box scores near zero.
        let (matcher, watchlist) = watching(vec![FACE_BOX], &mirrored(&asymmetric_frame()));
        let bus = AlertBus::new(4);
        let mut rx = bus.subscribe();
        let active = Arc::new(AtomicBool::new(false));
        let sup = ScanSupervisor::new(
            camera.session(),
            matcher.clone(),
            watchlist.clone(),
            bus,
            active.clone(),
            ScanSettings {
                fallback_index: None,
                alert_interval: Duration::from_millis(10),
                alert_retry: Duration::from_millis(5),
                alert_cooldown: Duration::from_secs(10),
            },
        );
        let pipeline = StreamingPipeline::new(
            camera.session(),
            matcher,
            watchlist,
            active,
            Duration::from_millis(5),
            90,
        );

        sup.start(0).unwrap();
        let event = rx.blocking_recv().unwrap();
        assert_eq!(event.name, "Watched");

        let jpeg = pipeline.render_once().unwrap();
        sup.stop();

        // Left edge of the match box, drawn in green over a black background.
        let image = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        let (mut green, mut red) = (0u32, 0u32);
        for y in 15..25 {
            for x in 5..7 {
                let p = image.get_pixel(x, y);
                green += u32::from(p[1]);
                red += u32::from(p[0]);
            }
        }
        assert!(green > red + 20 * 60, "no match box drawn: green {green}, red {red}");
    }
}
