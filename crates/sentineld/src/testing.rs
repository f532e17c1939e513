//! Fakes shared by the daemon's unit tests.

use sentinel_core::{BoundingBox, DetectorError, FaceLocator, FaceMatcher, WatchlistStore};
use sentinel_hw::{CameraError, CameraSession, CaptureDevice, DeviceOpener, Frame};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const FRAME_W: u32 = 120;
pub const FRAME_H: u32 = 60;

pub const FACE_BOX: BoundingBox = BoundingBox {
    x: 5.0,
    y: 5.0,
    width: 40.0,
    height: 40.0,
    confidence: 0.9,
};

/// Left half is a horizontal gradient, right half a vertical one.
pub fn test_frame() -> Vec<u8> {
    (0..FRAME_H)
        .flat_map(|y| {
            (0..FRAME_W).map(move |x| if x < FRAME_W / 2 { (x * 4) as u8 } else { (y * 4) as u8 })
        })
        .collect()
}

/// Bright top-left block and bright bottom-right block on black.
///
/// [`FACE_BOX`] sees the top block in this frame and the bottom block once the
/// frame is mirrored, so the two crops share almost no lit pixels.
pub fn asymmetric_frame() -> Vec<u8> {
    (0..FRAME_H)
        .flat_map(|y| {
            (0..FRAME_W).map(move |x| {
                let lit = (x < 50 && y < FRAME_H / 2) || (x >= 70 && y >= FRAME_H / 2);
                if lit { 220 } else { 0 }
            })
        })
        .collect()
}

/// `frame` flipped left to right.
pub fn mirrored(frame: &[u8]) -> Vec<u8> {
    let mut flipped = frame.to_vec();
    sentinel_hw::frame::mirror_horizontal(&mut flipped, FRAME_W, FRAME_H);
    flipped
}

/// Locator that always reports the same boxes.
pub struct FixedLocator(pub Vec<BoundingBox>);

impl FaceLocator for FixedLocator {
    fn locate(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(self.0.clone())
    }
}

/// Matcher reporting `boxes` on every frame, and a watchlist holding the
/// encoding of [`FACE_BOX`] in [`test_frame`] as identity `W1` ("Watched").
pub fn fixed_matcher(boxes: Vec<BoundingBox>) -> (Arc<FaceMatcher>, Arc<WatchlistStore>) {
    watching(boxes, &test_frame())
}

/// Like [`fixed_matcher`], with `W1` enrolled from [`FACE_BOX`] in `reference`.
pub fn watching(boxes: Vec<BoundingBox>, reference: &[u8]) -> (Arc<FaceMatcher>, Arc<WatchlistStore>) {
    let matcher = FaceMatcher::new(Box::new(FixedLocator(boxes)), sentinel_core::DEFAULT_MATCH_THRESHOLD);
    let watchlist = WatchlistStore::new();
    let encoding = matcher
        .encode(reference, FRAME_W, FRAME_H, &FACE_BOX)
        .expect("test face encodes");
    watchlist.upsert("W1", "Watched", encoding).expect("valid encoding");
    (Arc::new(matcher), Arc::new(watchlist))
}

#[derive(Clone, Default)]
struct Shared {
    reads: Arc<AtomicUsize>,
    read_fails: Arc<AtomicBool>,
    failing_indices: Arc<Mutex<HashSet<u32>>>,
}

struct FakeDevice {
    frame: Vec<u8>,
    sequence: u32,
    shared: Shared,
}

impl CaptureDevice for FakeDevice {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.shared.reads.fetch_add(1, Ordering::SeqCst);
        if self.shared.read_fails.load(Ordering::SeqCst) {
            return Err(CameraError::ReadFailure("simulated".into()));
        }
        self.sequence += 1;
        Frame::from_gray(self.frame.clone(), FRAME_W, FRAME_H, self.sequence)
            .map_err(|e| CameraError::ReadFailure(e.to_string()))
    }
}

struct FakeOpener {
    frame: Vec<u8>,
    shared: Shared,
}

impl DeviceOpener for FakeOpener {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, CameraError> {
        if self.shared.failing_indices.lock().unwrap().contains(&index) {
            return Err(CameraError::DeviceNotFound(format!("/dev/video{index}")));
        }
        Ok(Box::new(FakeDevice {
            frame: self.frame.clone(),
            sequence: 0,
            shared: self.shared.clone(),
        }))
    }
}

/// A camera session over an in-memory device that replays one frame.
pub struct FakeCamera {
    session: Arc<CameraSession>,
    shared: Shared,
    mirror: bool,
}

impl FakeCamera {
    pub fn new(frame: Vec<u8>) -> Self {
        Self::build(frame, false)
    }

    /// A camera whose session mirrors every frame, as the daemon does by default.
    pub fn mirrored(frame: Vec<u8>) -> Self {
        Self::build(frame, true)
    }

    fn build(frame: Vec<u8>, mirror: bool) -> Self {
        let shared = Shared::default();
        let opener = FakeOpener {
            frame,
            shared: shared.clone(),
        };
        Self {
            session: Arc::new(CameraSession::new(Box::new(opener), mirror)),
            shared,
            mirror,
        }
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirror
    }

    pub fn session(&self) -> Arc<CameraSession> {
        self.session.clone()
    }

    pub fn reads(&self) -> usize {
        self.shared.reads.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.shared.read_fails.store(failing, Ordering::SeqCst);
    }

    /// Make opening `index` fail.
    pub fn block_index(&self, index: u32) {
        self.shared.failing_indices.lock().unwrap().insert(index);
    }
}
