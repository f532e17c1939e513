//! MJPEG preview stream: read, match, annotate, encode, repeat.

use crate::annotate::{self, FrameStatus};
use async_stream::stream;
use axum::body::Bytes;
use futures::Stream;
use sentinel_core::{FaceMatcher, WatchlistStore};
use sentinel_hw::{CameraError, CameraSession};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Wrap one JPEG as a multipart part.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let mut payload = Vec::with_capacity(jpeg.len() + 64);
    payload.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    payload.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    payload.extend_from_slice(jpeg);
    payload.extend_from_slice(b"\r\n");
    Bytes::from(payload)
}

pub struct StreamingPipeline {
    session: Arc<CameraSession>,
    matcher: Arc<FaceMatcher>,
    watchlist: Arc<WatchlistStore>,
    active: Arc<AtomicBool>,
    interval: Duration,
    jpeg_quality: u8,
}

impl StreamingPipeline {
    pub fn new(
        session: Arc<CameraSession>,
        matcher: Arc<FaceMatcher>,
        watchlist: Arc<WatchlistStore>,
        active: Arc<AtomicBool>,
        interval: Duration,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            session,
            matcher,
            watchlist,
            active,
            interval: interval.max(Duration::from_millis(1)),
            jpeg_quality,
        }
    }

    /// Produce the next preview JPEG. Blocks on the camera and the detector.
    pub fn render_once(&self) -> Result<Vec<u8>, image::ImageError> {
        let image = if !self.active.load(Ordering::SeqCst) {
            annotate::placeholder(FrameStatus::Idle)
        } else {
            match self.session.read() {
                Ok(frame) => {
                    let roster = self.watchlist.snapshot();
                    let matches = self
                        .matcher
                        .match_faces(&frame.data, frame.width, frame.height, &roster);
                    annotate::annotate(&frame, &matches)
                }
                Err(CameraError::NotOpen) => annotate::placeholder(FrameStatus::Idle),
                Err(e) => {
                    tracing::debug!(error = %e, "preview read failed");
                    annotate::placeholder(FrameStatus::Error)
                }
            }
        };
        annotate::encode_jpeg(&image, self.jpeg_quality)
    }

    /// Endless multipart body for one viewer. Ends when the viewer goes away.
    pub fn frames(self: Arc<Self>) -> impl Stream<Item = Result<Bytes, Infallible>> {
        stream! {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let pipeline = self.clone();
                match tokio::task::spawn_blocking(move || pipeline.render_once()).await {
                    Ok(Ok(jpeg)) => yield Ok::<Bytes, Infallible>(multipart_part(&jpeg)),
                    Ok(Err(e)) => tracing::warn!(error = %e, "preview encode failed"),
                    Err(e) => tracing::error!(error = %e, "preview render task failed"),
                }
            }
        }
    }
}
