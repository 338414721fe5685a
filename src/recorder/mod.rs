//! Recording engine
//!
//! This module implements the segmented recording architecture:
//! - RecordingSession handle and the coordinator task behind it
//! - Sample pump feeding the open segment
//! - Time synchronizer and segment writer per segment

pub mod backend;
pub mod coordinator;
pub mod pump;
pub mod state;
pub mod sync;
pub mod writer;

pub use backend::MediaBackend;
pub use coordinator::{RecordingEvent, RecordingSession};
pub use state::{
    EncoderQuality, RecorderConfig, RecordingState, SegmentRef, SessionSnapshot, WriterStatus,
};
pub use sync::{DropReason, TimeSynchronizer};
pub use writer::{
    AppendOutcome, SegmentSink, SegmentWriter, SinkError, SinkFactory, SinkOpen, VideoFormat,
};
