//! Merge types
//!
//! A [`Composition`] is the timeline the merger builds before handing it to
//! an exporter: clips laid back to back, each starting where the previous one
//! ended.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// What a probe learned about a media file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub duration: Duration,
    pub has_video: bool,
    pub has_audio: bool,
}

/// One segment placed on the composition timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionClip {
    pub segment_index: usize,
    pub source: PathBuf,
    /// Position of the clip on the output timeline
    pub start: Duration,
    pub duration: Duration,
    pub has_audio: bool,
}

impl CompositionClip {
    pub fn end(&self) -> Duration {
        self.start + self.duration
    }
}

/// Which clips of a composition carry audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioLayout {
    /// No clip has audio
    Silent,
    /// Every clip has audio
    Uniform,
    /// Some clips have audio, some do not
    Mixed,
}

/// Back-to-back timeline of segment clips
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composition {
    clips: Vec<CompositionClip>,
    cursor: Duration,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the full range of a source at the current end of the timeline
    pub fn insert(&mut self, segment_index: usize, source: &Path, info: &MediaInfo) -> &CompositionClip {
        let clip = CompositionClip {
            segment_index,
            source: source.to_path_buf(),
            start: self.cursor,
            duration: info.duration,
            has_audio: info.has_audio,
        };
        self.cursor += info.duration;
        self.clips.push(clip);
        &self.clips[self.clips.len() - 1]
    }

    pub fn clips(&self) -> &[CompositionClip] {
        &self.clips
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// Total length of the timeline
    pub fn duration(&self) -> Duration {
        self.cursor
    }

    pub fn audio_layout(&self) -> AudioLayout {
        let with_audio = self.clips.iter().filter(|c| c.has_audio).count();
        if with_audio == 0 {
            AudioLayout::Silent
        } else if with_audio == self.clips.len() {
            AudioLayout::Uniform
        } else {
            AudioLayout::Mixed
        }
    }
}

/// Outcome of a successful merge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub destination: PathBuf,
    pub duration: Duration,
    /// Segment indices that made it into the output, in order
    pub merged: Vec<usize>,
    /// Segment indices that could not be read
    pub skipped: Vec<usize>,
}

/// Merge errors
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Probe failed for {path:?}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("No readable segments to merge")]
    NothingToMerge,

    #[error("Export failed: {0}")]
    Export(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(ms: u64, has_audio: bool) -> MediaInfo {
        MediaInfo {
            duration: Duration::from_millis(ms),
            has_video: true,
            has_audio,
        }
    }

    #[test]
    fn test_clips_are_back_to_back() {
        let mut composition = Composition::new();
        composition.insert(0, Path::new("a.mp4"), &info(1_000, true));
        composition.insert(1, Path::new("b.mp4"), &info(500, true));
        composition.insert(2, Path::new("c.mp4"), &info(250, true));

        let clips = composition.clips();
        assert_eq!(clips[0].start, Duration::ZERO);
        assert_eq!(clips[1].start, clips[0].end());
        assert_eq!(clips[2].start, clips[1].end());
        assert_eq!(composition.duration(), Duration::from_millis(1_750));
    }

    #[test]
    fn test_audio_layout() {
        let mut composition = Composition::new();
        composition.insert(0, Path::new("a.mp4"), &info(100, false));
        assert_eq!(composition.audio_layout(), AudioLayout::Silent);
        composition.insert(1, Path::new("b.mp4"), &info(100, true));
        assert_eq!(composition.audio_layout(), AudioLayout::Mixed);

        let mut uniform = Composition::new();
        uniform.insert(0, Path::new("a.mp4"), &info(100, true));
        assert_eq!(uniform.audio_layout(), AudioLayout::Uniform);
    }
}
