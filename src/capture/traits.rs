//! Capture trait definitions
//!
//! Platform-agnostic interface for capture sources. A source owns its device
//! and delivery thread; the recorder only sees samples and failures through a
//! [`CaptureSender`].

use super::channel::CaptureSender;
use super::sample::TrackKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by capture sources
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Already capturing")]
    AlreadyCapturing,

    #[error("Not capturing")]
    NotCapturing,

    #[error("Capture failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// A producer of timestamped samples for one track
///
/// Sources are owned by the recording session and started/stopped by it.
/// Delivery happens on the source's own thread via [`CaptureSender::deliver`],
/// which never blocks.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Source identifier (e.g., "display-0", "microphone")
    fn id(&self) -> &str;

    /// Track this source feeds
    fn kind(&self) -> TrackKind;

    /// Whether the platform allows this source to capture
    fn has_permission(&self) -> bool {
        true
    }

    /// Ask the platform for capture permission
    fn request_permission(&self) -> bool {
        true
    }

    /// Begin delivering samples
    async fn start(&mut self, sender: CaptureSender) -> CaptureResult<()>;

    /// Stop delivering samples and release the device
    async fn stop(&mut self) -> CaptureResult<()>;

    fn is_running(&self) -> bool;
}

/// Information about a display/screen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    /// Index of the display as enumerated by the platform
    pub id: u32,

    pub name: String,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    pub is_primary: bool,
}

/// Information about an audio device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    /// Whether this is an input device
    pub is_input: bool,

    /// Whether this is the default device
    pub is_default: bool,
}

/// Check if screen recording permission is granted
pub fn has_screen_recording_permission() -> bool {
    #[cfg(target_os = "macos")]
    {
        super::macos::has_screen_recording_permission()
    }

    #[cfg(not(target_os = "macos"))]
    {
        // Windows and X11 do not gate screen capture behind a prompt
        true
    }
}

/// Request screen recording permission
pub fn request_screen_recording_permission() -> bool {
    #[cfg(target_os = "macos")]
    {
        super::macos::request_screen_recording_permission()
    }

    #[cfg(not(target_os = "macos"))]
    {
        true
    }
}
