//! sentinel-hw: camera capture and exclusive device sessions.
//!
//! Provides V4L2-based capture and the [`CameraSession`] that arbitrates one
//! device between the preview stream and the alert loop.

pub mod camera;
pub mod frame;
pub mod session;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat, V4l2Opener};
pub use frame::Frame;
pub use session::{CameraSession, CaptureDevice, DeviceOpener, SessionState};
