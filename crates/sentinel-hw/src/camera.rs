//! V4L2 camera capture via the `v4l` crate.
//!
//! A [`Camera`] keeps one memory-mapped capture stream running for as long as
//! it is open, so consecutive reads dequeue consecutive frames.

use crate::frame::{self, Frame};
use crate::session::{CaptureDevice, DeviceOpener};
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::capability::Flags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const PREFERRED_WIDTH: u32 = 640;
const PREFERRED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
/// Highest `/dev/videoN` index probed by [`Camera::list_devices`].
const MAX_PROBED_INDEX: u32 = 16;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("device cannot capture video")]
    StreamingNotSupported,
    #[error("cannot access camera (tried index {preferred} and {fallback})")]
    Unavailable { preferred: u32, fallback: u32 },
    #[error("frame read failed: {0}")]
    ReadFailure(String),
    #[error("camera is not open")]
    NotOpen,
}

/// A capture-capable `/dev/videoN` node.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub index: u32,
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Pixel layout delivered by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed; luma is every other byte.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }

    /// Extract the luma plane of one `width * height` buffer.
    fn to_gray(self, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
        match self {
            Self::Yuyv => frame::yuyv_to_grayscale(buf, width, height)
                .map_err(|e| CameraError::ReadFailure(format!("YUYV conversion: {e}"))),
            Self::Grey => {
                let pixels = (width * height) as usize;
                buf.get(..pixels).map(<[u8]>::to_vec).ok_or_else(|| {
                    CameraError::ReadFailure(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    ))
                })
            }
        }
    }
}

/// An open V4L2 camera with a running capture stream.
pub struct Camera {
    // Dropped before `device`, so streaming stops before the fd closes.
    stream: MmapStream<'static>,
    #[allow(dead_code)]
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open the camera behind `/dev/video{index}`.
    pub fn open_index(index: u32) -> Result<Self, CameraError> {
        Self::open(&format!("/dev/video{index}"))
    }

    /// Open a device node, negotiate a grayscale-convertible format and start streaming.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, &e))?;
        let caps = device
            .query_caps()
            .map_err(|e| CameraError::DeviceNotFound(format!("{device_path}: query caps: {e}")))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE | Flags::STREAMING) {
            return Err(CameraError::StreamingNotSupported);
        }

        let (width, height, fourcc, pixel_format) = negotiate(&device)?;

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| open_error(device_path, &e))?;

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width,
            height,
            ?pixel_format,
            "camera streaming"
        );

        Ok(Self {
            stream,
            device,
            width,
            height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Dequeue the next frame and convert it to grayscale.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::ReadFailure(format!("dequeue: {e}")))?;
        let sequence = meta.sequence;
        let gray = self.pixel_format.to_gray(buf, self.width, self.height)?;
        Frame::from_gray(gray, self.width, self.height, sequence)
            .map_err(|e| CameraError::ReadFailure(e.to_string()))
    }

    /// Capture-capable devices among `/dev/video0` .. `/dev/video15`.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..MAX_PROBED_INDEX)
            .filter_map(|index| {
                let path = format!("/dev/video{index}");
                if !Path::new(&path).exists() {
                    return None;
                }
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                caps.capabilities
                    .contains(Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        index,
                        path,
                        name: caps.card,
                        driver: caps.driver,
                        bus: caps.bus,
                    })
            })
            .collect()
    }
}

/// Ask for 640x480 YUYV and accept whatever YUYV or GREY size the driver settles on.
fn negotiate(device: &Device) -> Result<(u32, u32, FourCC, PixelFormat), CameraError> {
    let mut fmt = device
        .format()
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("get format: {e}")))?;
    fmt.fourcc = FourCC::new(b"YUYV");
    fmt.width = PREFERRED_WIDTH;
    fmt.height = PREFERRED_HEIGHT;

    let negotiated = device
        .set_format(&fmt)
        .map_err(|e| CameraError::FormatNegotiationFailed(format!("set format: {e}")))?;
    let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
        CameraError::FormatNegotiationFailed(format!(
            "unsupported pixel format {} (need YUYV or GREY)",
            negotiated.fourcc
        ))
    })?;

    tracing::debug!(
        width = negotiated.width,
        height = negotiated.height,
        fourcc = %negotiated.fourcc,
        "negotiated format"
    );
    Ok((negotiated.width, negotiated.height, negotiated.fourcc, pixel_format))
}

fn open_error(device_path: &str, e: &io::Error) -> CameraError {
    if e.raw_os_error() == Some(16) {
        // EBUSY: another process holds the device.
        CameraError::DeviceBusy
    } else {
        CameraError::DeviceNotFound(format!("{device_path}: {e}"))
    }
}

impl CaptureDevice for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

/// Opens `/dev/video{index}` devices for a [`CameraSession`](crate::CameraSession).
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Opener;

impl DeviceOpener for V4l2Opener {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, CameraError> {
        Ok(Box::new(Camera::open_index(index)?))
    }
}
