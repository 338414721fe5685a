//! Session Recorder - segmented screen and microphone recording.
//!
//! The engine records a display and a microphone into one media file and
//! supports pausing and resuming without corrupting the output. Every
//! recording interval between a start/resume and the next pause/stop is
//! written to its own segment file; segments are concatenated into the final
//! output when the recording stops.
//!
//! The public entry point is [`recorder::RecordingSession`].

pub mod capture;
pub mod export;
pub mod recorder;
pub mod utils;

pub use capture::{CaptureSource, SampleBuffer, SamplePayload, TrackKind};
pub use recorder::{
    MediaBackend, RecorderConfig, RecordingEvent, RecordingSession, RecordingState, SegmentRef,
};
pub use utils::error::{RecorderError, RecorderResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging for an application embedding the recorder
///
/// Honors `RUST_LOG`; falls back to debug output for this crate.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_recorder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    tracing::info!("Session recorder v{}", env!("CARGO_PKG_VERSION"));
}
