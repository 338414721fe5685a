//! Capture sources
//!
//! Screen and microphone sources deliver timestamped samples through a
//! non-blocking [`CaptureSender`]. Native sources are behind the
//! `screen-capture` and `microphone` features.

pub mod channel;
pub mod sample;
pub mod traits;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(feature = "microphone")]
pub mod microphone;

#[cfg(feature = "screen-capture")]
pub mod screen;

pub use channel::{capture_channel, CaptureClock, CaptureFailure, CaptureReceiver, CaptureSender};
pub use sample::{AdjustedSample, SampleBuffer, SamplePayload, TrackKind};
pub use traits::{
    has_screen_recording_permission, request_screen_recording_permission, AudioDeviceInfo,
    CaptureError, CaptureResult, CaptureSource, DisplayInfo,
};
