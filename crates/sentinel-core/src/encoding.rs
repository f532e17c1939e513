//! Pixel-intensity face encodings.
//!
//! A face is cropped to its bounding box, resized to a canonical 100×100
//! grayscale patch and flattened into intensities scaled to [0, 1].

use crate::types::{BoundingBox, FaceEncoding};
use image::imageops::{self, FilterType};
use image::GrayImage;

/// Side length of the canonical crop.
pub const CANONICAL_SIZE: u32 = 100;

/// Dimensionality of every encoding produced by [`encode`].
pub const ENCODING_DIM: usize = (CANONICAL_SIZE * CANONICAL_SIZE) as usize;

/// Integer crop rectangle clamped to the frame: (x0, y0, x1, y1), exclusive end.
fn crop_rect(bbox: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let coords = [bbox.x, bbox.y, bbox.width, bbox.height];
    if coords.iter().any(|v| !v.is_finite()) || bbox.width <= 0.0 || bbox.height <= 0.0 {
        return None;
    }

    let x0 = bbox.x.max(0.0).floor() as u32;
    let y0 = bbox.y.max(0.0).floor() as u32;
    let x1 = (bbox.x + bbox.width).min(width as f32).ceil().max(0.0) as u32;
    let y1 = (bbox.y + bbox.height).min(height as f32).ceil().max(0.0) as u32;

    (x1 > x0 && y1 > y0).then_some((x0, y0, x1.min(width), y1.min(height)))
}

/// Encode the face inside `bbox` of a grayscale frame.
///
/// Returns `None` when the box does not describe a usable crop: non-finite or
/// non-positive geometry, no overlap with the frame, or a frame buffer whose
/// length does not match its dimensions.
pub fn encode(gray: &[u8], width: u32, height: u32, bbox: &BoundingBox) -> Option<FaceEncoding> {
    if gray.len() != (width as usize) * (height as usize) {
        return None;
    }
    let (x0, y0, x1, y1) = crop_rect(bbox, width, height)?;
    let (crop_w, crop_h) = (x1 - x0, y1 - y0);

    let stride = width as usize;
    let mut crop = Vec::with_capacity((crop_w * crop_h) as usize);
    for y in y0..y1 {
        let row = y as usize * stride;
        crop.extend_from_slice(&gray[row + x0 as usize..row + x1 as usize]);
    }

    let patch = GrayImage::from_raw(crop_w, crop_h, crop)?;
    let canonical = imageops::resize(&patch, CANONICAL_SIZE, CANONICAL_SIZE, FilterType::Triangle);

    let values = canonical.into_raw().into_iter().map(|p| p as f32 / 255.0).collect();
    Some(FaceEncoding::new(values))
}
