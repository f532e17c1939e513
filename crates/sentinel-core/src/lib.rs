//! sentinel-core: face localization, encoding and watchlist matching.
//!
//! Faces are located with an SCRFD ONNX model, encoded as canonical-size
//! grayscale intensity vectors and compared by cosine similarity against an
//! in-memory watchlist.

pub mod detector;
pub mod encoding;
pub mod matcher;
pub mod types;
pub mod watchlist;

use std::path::PathBuf;

pub use detector::{DetectorError, FaceLocator, ScrfdLocator};
pub use matcher::{EnrollError, FaceMatcher, FaceOutcome, FrameAnalysis, DEFAULT_MATCH_THRESHOLD};
pub use types::{score, BoundingBox, FaceEncoding, FaceMatch, WatchlistEntry};
pub use watchlist::{WatchlistError, WatchlistSnapshot, WatchlistStore};

/// Directory searched for ONNX models when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/sentinel/models")
}
