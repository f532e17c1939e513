//! Frame annotation and JPEG encoding for the preview stream.
//!
//! Text is drawn with a built-in 5x7 bitmap font; characters outside the
//! font advance the cursor without drawing.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, Rgb, RgbImage};
use sentinel_core::FaceMatch;
use sentinel_hw::Frame;

pub const PLACEHOLDER_WIDTH: u32 = 640;
pub const PLACEHOLDER_HEIGHT: u32 = 480;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const LABEL_BG: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: i32 = 1;
const PLACEHOLDER_SCALE: i32 = 3;

const GLYPH_W: i32 = 5;
const GLYPH_H: i32 = 7;
const GLYPH_ADVANCE: i32 = 6;

/// Why no camera frame is being shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Idle,
    Error,
}

impl FrameStatus {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Idle => "START SCANNING TO BEGIN",
            Self::Error => "CAMERA ERROR",
        }
    }
}

/// Overlay text for one match, e.g. `ALICE 87.42%`.
pub fn label_text(found: &FaceMatch) -> String {
    format!("{} {:.2}%", found.name.to_uppercase(), found.confidence)
}

/// Expand a grayscale frame to RGB.
pub fn frame_to_rgb(frame: &Frame) -> RgbImage {
    RgbImage::from_fn(frame.width, frame.height, |x, y| {
        let v = frame.data[(y * frame.width + x) as usize];
        Rgb([v, v, v])
    })
}

/// The frame with a box and label drawn for every match.
pub fn annotate(frame: &Frame, matches: &[FaceMatch]) -> RgbImage {
    let mut image = frame_to_rgb(frame);
    for found in matches {
        let b = &found.bbox;
        let left = b.x.round() as i32;
        let top = b.y.round() as i32;
        let right = (b.x + b.width).round() as i32;
        let bottom = (b.y + b.height).round() as i32;
        draw_rectangle(&mut image, left, top, right, bottom, BOX_COLOR);

        let text = label_text(found);
        let label_y = top.saturating_sub(GLYPH_H * LABEL_SCALE + 4).max(0);
        fill_rect(
            &mut image,
            left,
            label_y,
            left.saturating_add(text_width(&text, LABEL_SCALE)),
            label_y.saturating_add(GLYPH_H * LABEL_SCALE + 1),
            LABEL_BG,
        );
        draw_text(&mut image, left.saturating_add(1), label_y + 1, &text, LABEL_SCALE, BOX_COLOR);
    }
    image
}

/// Black 640x480 frame with the status message centered.
pub fn placeholder(status: FrameStatus) -> RgbImage {
    let mut image = RgbImage::new(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT);
    let text = status.message();
    let x = (PLACEHOLDER_WIDTH as i32 - text_width(text, PLACEHOLDER_SCALE)) / 2;
    let y = (PLACEHOLDER_HEIGHT as i32 - GLYPH_H * PLACEHOLDER_SCALE) / 2;
    draw_text(&mut image, x.max(0), y, text, PLACEHOLDER_SCALE, TEXT_COLOR);
    image
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100)).encode_image(image)?;
    Ok(buffer)
}

fn text_width(text: &str, scale: i32) -> i32 {
    let chars = text.chars().count() as i32;
    if chars == 0 {
        return 0;
    }
    (chars * GLYPH_ADVANCE - (GLYPH_ADVANCE - GLYPH_W)) * scale
}

fn put(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

/// `lo..=hi` clamped to `0..limit`.
fn span(lo: i32, hi: i32, limit: u32) -> std::ops::RangeInclusive<i32> {
    let max = i32::try_from(limit).unwrap_or(i32::MAX) - 1;
    lo.max(0)..=hi.min(max)
}

fn draw_rectangle(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    for t in 0..BOX_THICKNESS {
        for x in span(left, right, width) {
            put(image, x, top.saturating_add(t), color);
            put(image, x, bottom.saturating_sub(t), color);
        }
        for y in span(top, bottom, height) {
            put(image, left.saturating_add(t), y, color);
            put(image, right.saturating_sub(t), y, color);
        }
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let (width, height) = image.dimensions();
    for y in span(top, bottom, height) {
        for x in span(left, right, width) {
            put(image, x, y, color);
        }
    }
}

fn draw_text(image: &mut RgbImage, mut x: i32, y: i32, text: &str, scale: i32, color: Rgb<u8>) {
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_W {
                    if (pattern >> (GLYPH_W - 1 - col)) & 1 == 1 {
                        let px = x.saturating_add(col * scale);
                        let py = y.saturating_add(row as i32 * scale);
                        fill_rect(image, px, py, px.saturating_add(scale - 1), py.saturating_add(scale - 1), color);
                    }
                }
            }
        }
        x = x.saturating_add(GLYPH_ADVANCE * scale);
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(bits)
}
