//! Segment encoding and merging
//!
//! This module provides the FFmpeg media backend (segment sink, probe and
//! concatenation) and the merger that joins finished segments into one file.

pub mod ffmpeg;
pub mod merge;
pub mod types;

pub use ffmpeg::{FfmpegExporter, FfmpegProbe, FfmpegSinkFactory};
pub use merge::{CompositionExporter, MediaProbe, SegmentMerger};
pub use types::{AudioLayout, Composition, CompositionClip, MediaInfo, MergeError, MergeReport};
