//! Recording state management
//!
//! Defines the recording state machine, segment bookkeeping and the recorder
//! configuration.

use crate::utils::error::{RecorderError, RecorderResult};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Current state of the recording system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    Idle,
    /// Currently recording into an open segment
    Recording,
    /// Recording is paused; no segment is open
    Paused,
}

impl Default for RecordingState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Lifecycle of a segment writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterStatus {
    /// Opened, no frame accepted yet
    Unstarted,
    Writing,
    Finished,
    Failed,
}

/// One finished unit of captured media
///
/// A new segment is started on every start/resume and closed on the next
/// pause/stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRef {
    /// Segment index (0, 1, 2, ...)
    pub index: usize,

    pub path: PathBuf,

    pub status: WriterStatus,

    /// Length of the segment timeline
    pub duration: Duration,

    pub video_frames: u64,

    pub audio_buffers: u64,

    /// Raw device timestamp of the first accepted frame
    pub anchor: Option<Duration>,

    pub finished_at: DateTime<Utc>,
}

/// Point-in-time view of a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: RecordingState,
    pub segments: Vec<SegmentRef>,
    pub base_output: Option<PathBuf>,
    /// Raw timestamp of the first frame of the recording
    pub session_epoch: Option<Duration>,
    /// Wall-clock time spent paused
    pub accumulated_pause: Duration,
    pub frame_count: u64,
}

impl SessionSnapshot {
    /// Recorded media time across finished segments
    pub fn duration(&self) -> Duration {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

/// Encoder quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderQuality {
    Low,
    Medium,
    High,
    Lossless,
}

impl EncoderQuality {
    /// CRF value for H.264 encoding
    /// Lower values = higher quality, larger files
    pub fn crf(&self) -> u8 {
        match self {
            EncoderQuality::Low => 28,
            EncoderQuality::Medium => 23,
            EncoderQuality::High => 18,
            // CRF 0 breaks yuv420p players; 1 is visually lossless
            EncoderQuality::Lossless => 1,
        }
    }

    /// x264 preset; capture runs in real time so these stay fast
    pub fn h264_preset(&self) -> &'static str {
        match self {
            EncoderQuality::Low => "ultrafast",
            EncoderQuality::Medium => "veryfast",
            EncoderQuality::High => "faster",
            EncoderQuality::Lossless => "fast",
        }
    }
}

/// Video capture and encoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoSettings {
    pub fps: u32,
    pub quality: EncoderQuality,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            fps: 30,
            quality: EncoderQuality::Medium,
        }
    }
}

/// Microphone settings requested from the device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
        }
    }
}

/// Timestamp correction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Video delivery gaps longer than this are compressed out of the timeline
    pub gap_threshold_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            gap_threshold_ms: 500,
        }
    }
}

/// Configuration of a recording session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    pub video: VideoSettings,
    pub audio: AudioSettings,
    pub sync: SyncSettings,

    /// Samples buffered between capture threads and the writer
    pub capture_queue_capacity: usize,

    /// Samples a segment sink may have in flight before it reports not ready
    pub sink_queue_depth: usize,

    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            video: VideoSettings::default(),
            audio: AudioSettings::default(),
            sync: SyncSettings::default(),
            capture_queue_capacity: 256,
            sink_queue_depth: 8,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl RecorderConfig {
    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recorder config {:?}", path))?;
        let config: RecorderConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse recorder config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RecorderResult<()> {
        if self.video.fps == 0 {
            return Err(RecorderError::Config("video.fps must be positive".to_string()));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(RecorderError::Config(
                "audio sample rate and channel count must be positive".to_string(),
            ));
        }
        if self.capture_queue_capacity == 0 || self.sink_queue_depth == 0 {
            return Err(RecorderError::Config("queue sizes must be positive".to_string()));
        }
        Ok(())
    }

    /// Nominal duration of one video frame
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.video.fps.max(1) as u64)
    }

    pub fn gap_threshold(&self) -> Duration {
        Duration::from_millis(self.sync.gap_threshold_ms)
    }
}
