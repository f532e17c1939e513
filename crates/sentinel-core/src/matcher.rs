//! Watchlist matching: locate faces, encode each one, pick the best entry.

use crate::detector::{DetectorError, FaceLocator};
use crate::encoding;
use crate::types::{BoundingBox, FaceEncoding, FaceMatch, WatchlistEntry};
use image::imageops;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Default acceptance threshold on the 0–100 confidence scale.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 60.0;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("cannot read enrollment image: {0}")]
    Image(#[from] image::ImageError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("no face detected in enrollment image")]
    NoFaceDetected,
    #[error("detected face could not be encoded")]
    EncodingFailed,
}

/// What happened to one detected face.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceOutcome {
    Matched(FaceMatch),
    /// Best entry scored at or below the threshold.
    BelowThreshold { bbox: BoundingBox, best_confidence: f32 },
    /// The crop geometry could not be encoded.
    EncodingFailed { bbox: BoundingBox },
    /// Nothing in the roster was comparable (empty roster or dimension mismatch).
    ComparisonUndefined { bbox: BoundingBox },
}

/// Result of analysing one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameAnalysis {
    NoFaceDetected,
    /// The locator failed for the whole frame; treated as no faces.
    DetectionFailed,
    Faces(Vec<FaceOutcome>),
}

impl FrameAnalysis {
    /// Accepted matches, in detection order.
    pub fn into_matches(self) -> Vec<FaceMatch> {
        match self {
            Self::Faces(outcomes) => outcomes
                .into_iter()
                .filter_map(|o| match o {
                    FaceOutcome::Matched(m) => Some(m),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

pub struct FaceMatcher {
    locator: Mutex<Box<dyn FaceLocator>>,
    threshold: f32,
}

impl FaceMatcher {
    pub fn new(locator: Box<dyn FaceLocator>, threshold: f32) -> Self {
        Self {
            locator: Mutex::new(locator),
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Face boxes in the frame. No face is an empty list, not an error.
    pub fn detect(&self, gray: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
        self.locator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .locate(gray, width, height)
            .map_err(|e| {
                tracing::warn!(error = %e, "face detection failed");
                e
            })
    }

    pub fn encode(&self, gray: &[u8], width: u32, height: u32, bbox: &BoundingBox) -> Option<FaceEncoding> {
        encoding::encode(gray, width, height, bbox)
    }

    /// Score `probe` against every entry and decide whether the best one is accepted.
    ///
    /// Ties keep the earliest entry in roster order.
    pub fn best_match(&self, probe: &FaceEncoding, roster: &[WatchlistEntry], bbox: BoundingBox) -> FaceOutcome {
        let mut best: Option<(&WatchlistEntry, f32)> = None;
        for entry in roster.iter().filter(|e| e.encoding.len() == probe.len()) {
            let score = probe.similarity(&entry.encoding);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((entry, score));
            }
        }

        let Some((entry, score)) = best else {
            return FaceOutcome::ComparisonUndefined { bbox };
        };

        let confidence = score * 100.0;
        if confidence > self.threshold {
            FaceOutcome::Matched(FaceMatch {
                identity_id: entry.identity_id.clone(),
                name: entry.name.clone(),
                confidence,
                bbox,
            })
        } else {
            FaceOutcome::BelowThreshold { bbox, best_confidence: confidence }
        }
    }

    /// Detect, encode and score every face in the frame independently.
    pub fn analyze(&self, gray: &[u8], width: u32, height: u32, roster: &[WatchlistEntry]) -> FrameAnalysis {
        let Ok(faces) = self.detect(gray, width, height) else {
            return FrameAnalysis::DetectionFailed;
        };
        if faces.is_empty() {
            return FrameAnalysis::NoFaceDetected;
        }

        let outcomes = faces
            .into_iter()
            .map(|bbox| match self.encode(gray, width, height, &bbox) {
                Some(probe) => self.best_match(&probe, roster, bbox),
                None => {
                    tracing::debug!(?bbox, "face crop could not be encoded");
                    FaceOutcome::EncodingFailed { bbox }
                }
            })
            .collect();
        FrameAnalysis::Faces(outcomes)
    }

    /// Accepted matches for the frame; at most one per detected face.
    pub fn match_faces(&self, gray: &[u8], width: u32, height: u32, roster: &[WatchlistEntry]) -> Vec<FaceMatch> {
        let matches = self.analyze(gray, width, height, roster).into_matches();
        for m in &matches {
            tracing::debug!(identity_id = %m.identity_id, name = %m.name, confidence = m.confidence, "face matched");
        }
        matches
    }

    /// Encoding of the most confident face in a grayscale enrollment image.
    pub fn enroll_encoding(&self, gray: &[u8], width: u32, height: u32) -> Result<FaceEncoding, EnrollError> {
        let faces = self.detect(gray, width, height)?;
        let face = faces
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .ok_or(EnrollError::NoFaceDetected)?;
        self.encode(gray, width, height, face).ok_or(EnrollError::EncodingFailed)
    }

    /// Decode an image file and compute its enrollment encoding.
    ///
    /// `mirror` flips the image first; pass the camera's setting so stored
    /// encodings share the orientation of live frames.
    pub fn enroll_image(&self, path: &Path, mirror: bool) -> Result<FaceEncoding, EnrollError> {
        let mut gray = image::open(path)?.to_luma8();
        if mirror {
            imageops::flip_horizontal_in_place(&mut gray);
        }
        let (width, height) = gray.dimensions();
        self.enroll_encoding(gray.as_raw(), width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Locator that always reports the same boxes.
    struct FixedLocator(Vec<BoundingBox>);

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    struct FailingLocator;

    impl FaceLocator for FailingLocator {
        fn locate(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<BoundingBox>, DetectorError> {
            Err(DetectorError::InferenceFailed("boom".into()))
        }
    }

    const W: u32 = 120;
    const H: u32 = 60;

    fn bbox(x: f32, y: f32, size: f32) -> BoundingBox {
        BoundingBox { x, y, width: size, height: size, confidence: 0.9 }
    }

    /// Left half is a horizontal gradient, right half a vertical one.
    fn test_frame() -> Vec<u8> {
        (0..H)
            .flat_map(|y| (0..W).map(move |x| if x < W / 2 { (x * 4) as u8 } else { (y * 4) as u8 }))
            .collect()
    }

    fn entry(id: &str, name: &str, encoding: FaceEncoding) -> WatchlistEntry {
        WatchlistEntry { identity_id: id.into(), name: name.into(), encoding }
    }

    fn matcher(boxes: Vec<BoundingBox>, threshold: f32) -> FaceMatcher {
        FaceMatcher::new(Box::new(FixedLocator(boxes)), threshold)
    }

    #[test]
    fn test_no_detections_yields_no_matches() {
        let frame = test_frame();
        let m = matcher(vec![], DEFAULT_MATCH_THRESHOLD);
        let face = encoding::encode(&frame, W, H, &bbox(0.0, 0.0, 40.0)).unwrap();
        let roster = vec![entry("A", "Alice", face)];

        assert_eq!(m.analyze(&frame, W, H, &roster), FrameAnalysis::NoFaceDetected);
        assert!(m.match_faces(&frame, W, H, &roster).is_empty());
    }

    #[test]
    fn test_enrolled_face_matches_itself() {
        let frame = test_frame();
        let face_box = bbox(5.0, 5.0, 40.0);
        let m = matcher(vec![face_box], DEFAULT_MATCH_THRESHOLD);
        let roster = vec![entry("A", "Alice", m.encode(&frame, W, H, &face_box).unwrap())];

        let matches = m.match_faces(&frame, W, H, &roster);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].identity_id, "A");
        assert!((matches[0].confidence - 100.0).abs() < 1e-3);
        assert_eq!(matches[0].bbox, face_box);
    }

    #[test]
    fn test_best_entry_wins_and_ties_keep_first() {
        let frame = test_frame();
        let face_box = bbox(5.0, 5.0, 40.0);
        let m = matcher(vec![face_box], DEFAULT_MATCH_THRESHOLD);
        let face = m.encode(&frame, W, H, &face_box).unwrap();
        let other = m.encode(&frame, W, H, &bbox(70.0, 5.0, 40.0)).unwrap();

        let roster = vec![
            entry("X", "Other", other),
            entry("A", "First", face.clone()),
            entry("B", "Second", face),
        ];
        let matches = m.match_faces(&frame, W, H, &roster);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].identity_id, "A");
    }

    #[test]
    fn test_threshold_is_strict() {
        let frame = test_frame();
        let face_box = bbox(5.0, 5.0, 40.0);
        // A perfect score is 100, which is not strictly above 100.
        let m = matcher(vec![face_box], 100.0);
        assert_eq!(m.threshold(), 100.0);
        let roster = vec![entry("A", "Alice", m.encode(&frame, W, H, &face_box).unwrap())];

        match m.analyze(&frame, W, H, &roster) {
            FrameAnalysis::Faces(outcomes) => {
                assert!(matches!(outcomes[0], FaceOutcome::BelowThreshold { .. }));
            }
            other => panic!("unexpected analysis: {other:?}"),
        }
        assert!(m.match_faces(&frame, W, H, &roster).is_empty());
    }

    #[test]
    fn test_every_match_is_above_threshold() {
        let frame = test_frame();
        let boxes = vec![bbox(5.0, 5.0, 40.0), bbox(70.0, 5.0, 40.0), bbox(30.0, 10.0, 40.0)];
        let m = matcher(boxes.clone(), 90.0);
        let roster = vec![entry("A", "Alice", m.encode(&frame, W, H, &boxes[0]).unwrap())];

        for found in m.match_faces(&frame, W, H, &roster) {
            assert!(found.confidence > 90.0);
        }
    }

    #[test]
    fn test_encoding_failure_is_isolated_per_face() {
        let frame = test_frame();
        let good = bbox(5.0, 5.0, 40.0);
        let outside = bbox(500.0, 500.0, 40.0);
        let m = matcher(vec![outside, good], DEFAULT_MATCH_THRESHOLD);
        let roster = vec![entry("A", "Alice", m.encode(&frame, W, H, &good).unwrap())];

        match m.analyze(&frame, W, H, &roster) {
            FrameAnalysis::Faces(outcomes) => {
                assert_eq!(outcomes.len(), 2);
                assert!(matches!(outcomes[0], FaceOutcome::EncodingFailed { .. }));
                assert!(matches!(outcomes[1], FaceOutcome::Matched(_)));
            }
            other => panic!("unexpected analysis: {other:?}"),
        }
    }

    #[test]
    fn test_empty_roster_is_comparison_undefined() {
        let frame = test_frame();
        let m = matcher(vec![bbox(5.0, 5.0, 40.0)], DEFAULT_MATCH_THRESHOLD);
        match m.analyze(&frame, W, H, &[]) {
            FrameAnalysis::Faces(outcomes) => {
                assert!(matches!(outcomes[0], FaceOutcome::ComparisonUndefined { .. }));
            }
            other => panic!("unexpected analysis: {other:?}"),
        }
    }

    #[test]
    fn test_detection_failure_yields_no_matches() {
        let frame = test_frame();
        let m = FaceMatcher::new(Box::new(FailingLocator), DEFAULT_MATCH_THRESHOLD);
        assert_eq!(m.analyze(&frame, W, H, &[]), FrameAnalysis::DetectionFailed);
        assert!(m.detect(&frame, W, H).is_err());
        assert!(matches!(m.enroll_encoding(&frame, W, H), Err(EnrollError::Detector(_))));
    }

    #[test]
    fn test_detect_without_faces_is_empty() {
        let frame = test_frame();
        assert!(matcher(vec![], DEFAULT_MATCH_THRESHOLD).detect(&frame, W, H).unwrap().is_empty());
    }

    #[test]
    fn test_enroll_image_honours_mirror() {
        let frame = test_frame();
        let face_box = bbox(5.0, 5.0, 40.0);
        let m = matcher(vec![face_box], DEFAULT_MATCH_THRESHOLD);
        let path = std::env::temp_dir().join(format!("sentinel-core-{}-mirror.png", std::process::id()));
        image::GrayImage::from_raw(W, H, frame.clone()).unwrap().save(&path).unwrap();

        let plain = m.enroll_image(&path, false).unwrap();
        let flipped = m.enroll_image(&path, true).unwrap();
        let _ = std::fs::remove_file(&path);

        let mut mirrored = frame.clone();
        for row in mirrored.chunks_exact_mut(W as usize) {
            row.reverse();
        }
        assert_eq!(plain, m.encode(&frame, W, H, &face_box).unwrap());
        assert_eq!(flipped, m.encode(&mirrored, W, H, &face_box).unwrap());
        assert_ne!(plain, flipped);
    }

    #[test]
    fn test_enroll_picks_most_confident_face() {
        let frame = test_frame();
        let weak = BoundingBox { confidence: 0.6, ..bbox(70.0, 5.0, 40.0) };
        let strong = BoundingBox { confidence: 0.95, ..bbox(5.0, 5.0, 40.0) };
        let m = matcher(vec![weak, strong], DEFAULT_MATCH_THRESHOLD);

        let enrolled = m.enroll_encoding(&frame, W, H).unwrap();
        let expected = m.encode(&frame, W, H, &strong).unwrap();
        assert_eq!(enrolled, expected);
    }

    #[test]
    fn test_enroll_without_face_fails() {
        let frame = test_frame();
        let m = matcher(vec![], DEFAULT_MATCH_THRESHOLD);
        assert!(matches!(m.enroll_encoding(&frame, W, H), Err(EnrollError::NoFaceDetected)));
    }
}
