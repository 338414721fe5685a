//! Time synchronization
//!
//! Maps raw device timestamps onto the timeline of one segment. The first
//! video frame anchors the segment at zero. Delivery stalls longer than the
//! gap threshold are compressed to one frame interval so the encoded video
//! does not freeze and then jump. Audio that falls inside a compressed span
//! has no video to play against and is dropped; audio after the stall takes
//! the same offset as the video.

use crate::capture::{AdjustedSample, SampleBuffer, TrackKind};
use std::time::Duration;

/// Why a sample did not make it onto the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No video frame has anchored the segment yet
    BeforeAnchor,
    /// Sample predates the anchor (clock skew between devices)
    NegativeTime,
    /// Sample would move its track backwards in time
    NonMonotonic,
    /// Audio captured while video delivery was stalled
    VideoStalled,
    /// Sink skipped the sample without writing it
    Skipped,
    /// Sink asked for backpressure
    NotReady,
    /// Writer already finished or failed
    WriterClosed,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            DropReason::BeforeAnchor => "before anchor",
            DropReason::NegativeTime => "negative session time",
            DropReason::NonMonotonic => "non-monotonic timestamp",
            DropReason::VideoStalled => "video stalled",
            DropReason::Skipped => "skipped by sink",
            DropReason::NotReady => "sink not ready",
            DropReason::WriterClosed => "writer closed",
        };
        f.write_str(reason)
    }
}

/// Per-segment timestamp corrector
#[derive(Debug, Clone)]
pub struct TimeSynchronizer {
    gap_threshold: Duration,
    frame_interval: Duration,
    anchor: Option<Duration>,
    accumulated_gap: Duration,
    last_video_raw: Option<Duration>,
    last_audio_raw_end: Option<Duration>,
    compressed: Option<(Duration, Duration)>,
    last_video: Option<Duration>,
    last_audio: Option<Duration>,
}

impl TimeSynchronizer {
    pub fn new(gap_threshold: Duration, frame_interval: Duration) -> Self {
        Self {
            gap_threshold,
            frame_interval,
            anchor: None,
            accumulated_gap: Duration::ZERO,
            last_video_raw: None,
            last_audio_raw_end: None,
            compressed: None,
            last_video: None,
            last_audio: None,
        }
    }

    /// Raw timestamp of the segment's first frame
    pub fn anchor(&self) -> Option<Duration> {
        self.anchor
    }

    /// Total delivery-gap time removed from the timeline so far
    pub fn accumulated_gap(&self) -> Duration {
        self.accumulated_gap
    }

    /// Place a sample on the segment timeline
    pub fn adjust(&mut self, sample: SampleBuffer) -> Result<AdjustedSample, DropReason> {
        let raw = sample.raw_timestamp;
        let track = sample.track();

        let anchor = match (self.anchor, track) {
            (Some(anchor), _) => anchor,
            (None, TrackKind::Video) => {
                self.anchor = Some(raw);
                raw
            }
            (None, TrackKind::Audio) => return Err(DropReason::BeforeAnchor),
        };

        match track {
            TrackKind::Video => self.observe_video_gap(raw),
            TrackKind::Audio if self.is_stalled_audio(raw) => return Err(DropReason::VideoStalled),
            TrackKind::Audio => {}
        }

        let session_time = raw
            .checked_sub(anchor)
            .and_then(|t| t.checked_sub(self.accumulated_gap))
            .ok_or(DropReason::NegativeTime)?;

        let last = match track {
            TrackKind::Video => &mut self.last_video,
            TrackKind::Audio => &mut self.last_audio,
        };
        if matches!(*last, Some(previous) if session_time < previous) {
            return Err(DropReason::NonMonotonic);
        }
        *last = Some(session_time);
        if track == TrackKind::Audio {
            let end = raw + sample.duration;
            self.last_audio_raw_end = Some(self.last_audio_raw_end.map_or(end, |e| e.max(end)));
        }

        Ok(AdjustedSample { sample, session_time })
    }

    /// Audio past the gap threshold with no newer frame, or inside the last
    /// compressed span
    fn is_stalled_audio(&self, raw: Duration) -> bool {
        let past_threshold = self
            .last_video_raw
            .is_some_and(|video| raw > video + self.gap_threshold);
        let compressed = self
            .compressed
            .is_some_and(|(start, end)| raw >= start && raw < end);
        past_threshold || compressed
    }

    fn observe_video_gap(&mut self, raw: Duration) {
        if let Some(previous) = self.last_video_raw {
            if let Some(gap) = raw.checked_sub(previous) {
                if gap > self.gap_threshold {
                    // audio accepted before the stall was detected stays on the
                    // timeline, so the span starts where it ends
                    let start = (previous + self.frame_interval)
                        .max(self.last_audio_raw_end.unwrap_or(Duration::ZERO));
                    let excess = raw.saturating_sub(start);
                    self.accumulated_gap += excess;
                    self.compressed = Some((start, raw));
                    tracing::debug!(
                        "Video delivery gap of {:?}, compensating {:?} (total {:?})",
                        gap,
                        excess,
                        self.accumulated_gap
                    );
                }
            }
        }
        if self.last_video_raw.map_or(true, |previous| raw > previous) {
            self.last_video_raw = Some(raw);
        }
    }
}
