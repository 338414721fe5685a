//! Sample buffers produced by capture sources

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which track a sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Media carried by a sample
#[derive(Debug, Clone, PartialEq)]
pub enum SamplePayload {
    /// Tightly packed BGRA pixels (`width * height * 4` bytes)
    Video {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    /// Interleaved f32 PCM
    Audio {
        sample_rate: u32,
        channels: u16,
        data: Vec<f32>,
    },
}

/// One unit of captured media with its device timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    /// Device clock timestamp, relative to the capture clock origin
    pub raw_timestamp: Duration,
    pub duration: Duration,
    pub payload: SamplePayload,
}

impl SampleBuffer {
    /// Create a video frame sample
    pub fn video(raw_timestamp: Duration, duration: Duration, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            raw_timestamp,
            duration,
            payload: SamplePayload::Video { width, height, data },
        }
    }

    /// Create an audio sample; its duration follows from the frame count
    pub fn audio(raw_timestamp: Duration, sample_rate: u32, channels: u16, data: Vec<f32>) -> Self {
        let frames = data.len() / channels.max(1) as usize;
        let duration = if sample_rate > 0 {
            Duration::from_nanos(frames as u64 * 1_000_000_000 / sample_rate as u64)
        } else {
            Duration::ZERO
        };
        Self {
            raw_timestamp,
            duration,
            payload: SamplePayload::Audio {
                sample_rate,
                channels,
                data,
            },
        }
    }

    pub fn track(&self) -> TrackKind {
        match self.payload {
            SamplePayload::Video { .. } => TrackKind::Video,
            SamplePayload::Audio { .. } => TrackKind::Audio,
        }
    }
}

/// A sample with its corrected position on the segment timeline
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedSample {
    pub sample: SampleBuffer,
    /// Time since the segment anchor, with gaps removed
    pub session_time: Duration,
}

impl AdjustedSample {
    pub fn track(&self) -> TrackKind {
        self.sample.track()
    }

    /// Session time at which this sample ends
    pub fn end_time(&self) -> Duration {
        self.session_time + self.sample.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_duration_from_frames() {
        let sample = SampleBuffer::audio(Duration::ZERO, 48_000, 2, vec![0.0; 960]);
        assert_eq!(sample.duration, Duration::from_millis(10));
        assert_eq!(sample.track(), TrackKind::Audio);
    }

    #[test]
    fn test_video_track() {
        let sample = SampleBuffer::video(Duration::from_millis(5), Duration::from_millis(33), 2, 2, vec![0; 16]);
        assert_eq!(sample.track(), TrackKind::Video);
    }
}
