//! Alert loop, per-identity cooldown and the alert fan-out bus.
//!
//! The loop only publishes [`AlertEvent`]s onto the [`AlertBus`]; transports
//! (SSE, D-Bus signals) subscribe to the bus and deliver on their own.

use chrono::{DateTime, Local};
use sentinel_core::{FaceMatch, FaceMatcher, WatchlistStore};
use sentinel_hw::{CameraError, CameraSession};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Longest single sleep inside the loop, so a cleared flag is noticed quickly.
const POLL_SLICE: Duration = Duration::from_millis(50);

/// Payload delivered to alert subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub name: String,
    /// Match confidence (0–100), rounded to two decimals.
    pub confidence: f32,
    /// Local wall-clock time, `HH:MM:SS`.
    pub timestamp: String,
}

impl AlertEvent {
    pub fn from_match(found: &FaceMatch, at: DateTime<Local>) -> Self {
        Self {
            name: found.name.clone(),
            confidence: (found.confidence * 100.0).round() / 100.0,
            timestamp: at.format("%H:%M:%S").to_string(),
        }
    }
}

/// Best-effort fan-out of alerts to whoever is subscribed right now.
#[derive(Clone)]
pub struct AlertBus {
    tx: broadcast::Sender<AlertEvent>,
}

impl AlertBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Deliver to current subscribers. Returns how many were reached.
    pub fn publish(&self, event: AlertEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlertEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Last-alert times per identity for one scanning session.
pub struct CooldownTracker {
    cooldown: Duration,
    last_alert: HashMap<String, Instant>,
}

impl CooldownTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_alert: HashMap::new(),
        }
    }

    /// Record an alert for `identity_id` at `now` unless one fired within the cooldown.
    pub fn should_alert(&mut self, identity_id: &str, now: Instant) -> bool {
        if let Some(last) = self.last_alert.get(identity_id) {
            if now.saturating_duration_since(*last) < self.cooldown {
                return false;
            }
        }
        self.last_alert.insert(identity_id.to_string(), now);
        true
    }

    pub fn clear(&mut self) {
        self.last_alert.clear();
    }
}

/// Everything the alert loop needs, shared with the rest of the daemon.
#[derive(Clone)]
pub struct AlertContext {
    pub session: Arc<CameraSession>,
    pub matcher: Arc<FaceMatcher>,
    pub watchlist: Arc<WatchlistStore>,
    pub bus: AlertBus,
    pub active: Arc<AtomicBool>,
    pub interval: Duration,
    pub retry: Duration,
    pub cooldown: Duration,
}

impl AlertContext {
    /// Publish alerts for the given matches, applying the cooldown. Returns alerts sent.
    fn dispatch(&self, matches: &[FaceMatch], cooldowns: &mut CooldownTracker, now: Instant) -> usize {
        let mut sent = 0;
        for found in matches {
            if !cooldowns.should_alert(&found.identity_id, now) {
                tracing::debug!(identity_id = %found.identity_id, "alert suppressed by cooldown");
                continue;
            }
            let event = AlertEvent::from_match(found, Local::now());
            let receivers = self.bus.publish(event);
            tracing::info!(
                identity_id = %found.identity_id,
                name = %found.name,
                confidence = found.confidence,
                receivers,
                "alert published"
            );
            sent += 1;
        }
        sent
    }

    fn run(&self) {
        tracing::info!("alert loop started");
        let mut cooldowns = CooldownTracker::new(self.cooldown);

        while self.active.load(Ordering::SeqCst) {
            let frame = match self.session.read() {
                Ok(frame) => frame,
                Err(CameraError::NotOpen) => {
                    tracing::info!("camera released, alert loop exiting");
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "alert loop read failed, retrying");
                    self.pause(self.retry);
                    continue;
                }
            };

            let roster = self.watchlist.snapshot();
            let matches = self
                .matcher
                .match_faces(&frame.data, frame.width, frame.height, &roster);
            self.dispatch(&matches, &mut cooldowns, Instant::now());

            self.pause(self.interval);
        }

        cooldowns.clear();
        tracing::info!("alert loop stopped");
    }

    /// Sleep for `total`, waking early once the active flag is cleared.
    fn pause(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while self.active.load(Ordering::SeqCst) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining.min(POLL_SLICE));
        }
    }
}

/// Handle to a running alert loop thread.
pub struct AlertLoop {
    handle: JoinHandle<()>,
}

impl AlertLoop {
    /// Spawn the loop on a dedicated thread. It runs while `ctx.active` is set.
    pub fn spawn(ctx: AlertContext) -> std::io::Result<Self> {
        let handle = std::thread::Builder::new()
            .name("sentinel-alerts".into())
            .spawn(move || ctx.run())?;
        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the thread to exit. The caller clears the active flag first.
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!("alert loop thread panicked");
        }
    }
}
