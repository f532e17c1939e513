//! Exclusive camera session shared by every frame consumer.
//!
//! A [`CameraSession`] owns at most one open capture device. Open, read and
//! release all go through one mutex, so two independent loops never interleave
//! on the same device. Frames leave the session already mirrored; this is the
//! only place orientation is normalized.

use crate::camera::CameraError;
use crate::frame::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A device that yields grayscale frames, one blocking read at a time.
pub trait CaptureDevice: Send {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Opens capture devices by numeric index.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>, CameraError>;
}

/// Lifecycle state of a [`CameraSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Opening,
    Active,
    Error,
    Closing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Active => "active",
            Self::Error => "error",
            Self::Closing => "closing",
        }
    }
}

struct Inner {
    state: SessionState,
    device: Option<Box<dyn CaptureDevice>>,
    index: Option<u32>,
}

pub struct CameraSession {
    opener: Box<dyn DeviceOpener>,
    inner: Mutex<Inner>,
    mirror: bool,
    opens: AtomicU64,
    releases: AtomicU64,
}

impl CameraSession {
    /// Create an idle session. `mirror` enables horizontal flipping of every frame read.
    pub fn new(opener: Box<dyn DeviceOpener>, mirror: bool) -> Self {
        Self {
            opener,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                device: None,
                index: None,
            }),
            mirror,
            opens: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the device at `preferred`, falling back to `fallback` once.
    ///
    /// Any handle that is already open is released first. Returns the index
    /// that was actually opened.
    pub fn acquire(&self, preferred: u32, fallback: u32) -> Result<u32, CameraError> {
        let mut inner = self.lock();
        self.release_locked(&mut inner);

        inner.state = SessionState::Opening;
        let opened = match self.opener.open(preferred) {
            Ok(device) => Ok((preferred, device)),
            Err(primary) => {
                tracing::warn!(index = preferred, error = %primary, "camera open failed, trying fallback");
                self.opener
                    .open(fallback)
                    .map(|device| (fallback, device))
                    .map_err(|secondary| {
                        tracing::warn!(index = fallback, error = %secondary, "fallback camera open failed");
                        CameraError::Unavailable { preferred, fallback }
                    })
            }
        };

        match opened {
            Ok((index, device)) => {
                inner.device = Some(device);
                inner.index = Some(index);
                inner.state = SessionState::Active;
                self.opens.fetch_add(1, Ordering::SeqCst);
                tracing::info!(index, "camera session active");
                Ok(index)
            }
            Err(e) => {
                inner.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    /// Read one frame from the open device.
    ///
    /// A failed read moves the session to `Error` but keeps the handle, so the
    /// next read retries the device. Reading a closed session returns
    /// [`CameraError::NotOpen`] without changing state.
    pub fn read(&self) -> Result<Frame, CameraError> {
        let mut frame = {
            let mut inner = self.lock();
            let Some(device) = inner.device.as_mut() else {
                return Err(CameraError::NotOpen);
            };
            match device.read_frame() {
                Ok(frame) => {
                    inner.state = SessionState::Active;
                    frame
                }
                Err(e) => {
                    inner.state = SessionState::Error;
                    return Err(match e {
                        CameraError::ReadFailure(msg) => CameraError::ReadFailure(msg),
                        other => CameraError::ReadFailure(other.to_string()),
                    });
                }
            }
        };

        if self.mirror {
            frame.mirror();
        }
        Ok(frame)
    }

    /// Close the device if one is open. Safe to call repeatedly.
    pub fn release(&self) -> bool {
        let mut inner = self.lock();
        self.release_locked(&mut inner)
    }

    fn release_locked(&self, inner: &mut Inner) -> bool {
        let Some(device) = inner.device.take() else {
            inner.state = SessionState::Idle;
            return false;
        };
        if inner.state == SessionState::Active {
            inner.state = SessionState::Closing;
        }
        drop(device);
        self.releases.fetch_add(1, Ordering::SeqCst);
        tracing::info!(index = ?inner.index.take(), "camera released");
        inner.state = SessionState::Idle;
        true
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.lock().device.is_some()
    }

    /// Index of the currently open device, if any.
    pub fn device_index(&self) -> Option<u32> {
        self.lock().index
    }

    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.release();
    }
}
