//! Segment merger
//!
//! Concatenates finished segments into one file. Used both for the interim
//! preview on pause and for the final output on stop.

use super::types::{Composition, MediaInfo, MergeError, MergeReport};
use crate::recorder::state::SegmentRef;
use crate::utils::fs::ensure_parent_dir;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Reads duration and track layout of a media file
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, MergeError>;
}

/// Renders a composition into a single file
#[async_trait]
pub trait CompositionExporter: Send + Sync {
    /// Write `composition` to `destination`. Must not leave a truncated
    /// destination behind on failure.
    async fn export(&self, composition: &Composition, destination: &Path) -> Result<(), MergeError>;
}

/// Best-effort concatenation of segments
#[derive(Clone)]
pub struct SegmentMerger {
    probe: Arc<dyn MediaProbe>,
    exporter: Arc<dyn CompositionExporter>,
}

impl SegmentMerger {
    pub fn new(probe: Arc<dyn MediaProbe>, exporter: Arc<dyn CompositionExporter>) -> Self {
        Self { probe, exporter }
    }

    /// Concatenate `segments` in order into `destination`
    ///
    /// Segments that cannot be read are skipped with a warning. Segment files
    /// are never modified.
    pub async fn concatenate(&self, segments: &[SegmentRef], destination: &Path) -> Result<MergeReport, MergeError> {
        debug_assert!(segments.windows(2).all(|w| w[0].index < w[1].index));

        let mut composition = Composition::new();
        let mut merged = Vec::new();
        let mut skipped = Vec::new();

        for segment in segments {
            match self.probe.probe(&segment.path).await {
                Ok(info) if info.has_video && info.duration > Duration::ZERO => {
                    let clip = composition.insert(segment.index, &segment.path, &info);
                    tracing::debug!(
                        "Segment {} placed at {:?} for {:?}",
                        segment.index,
                        clip.start,
                        clip.duration
                    );
                    merged.push(segment.index);
                }
                Ok(info) => {
                    tracing::warn!(
                        "Skipping segment {} ({:?}): no video track data ({:?})",
                        segment.index,
                        segment.path,
                        info
                    );
                    skipped.push(segment.index);
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable segment {}: {}", segment.index, e);
                    skipped.push(segment.index);
                }
            }
        }

        if composition.is_empty() {
            return Err(MergeError::NothingToMerge);
        }

        ensure_parent_dir(destination)?;
        self.exporter.export(&composition, destination).await?;

        tracing::info!(
            "Merged {} segments ({} skipped) into {:?}, {:?} total",
            merged.len(),
            skipped.len(),
            destination,
            composition.duration()
        );

        Ok(MergeReport {
            destination: destination.to_path_buf(),
            duration: composition.duration(),
            merged,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::state::WriterStatus;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::path::PathBuf;

    struct MapProbe(HashMap<PathBuf, MediaInfo>);

    #[async_trait]
    impl MediaProbe for MapProbe {
        async fn probe(&self, path: &Path) -> Result<MediaInfo, MergeError> {
            self.0.get(path).copied().ok_or_else(|| MergeError::Probe {
                path: path.to_path_buf(),
                message: "unreadable".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct CapturingExporter {
        exported: Mutex<Vec<Composition>>,
        fail: bool,
    }

    #[async_trait]
    impl CompositionExporter for CapturingExporter {
        async fn export(&self, composition: &Composition, _destination: &Path) -> Result<(), MergeError> {
            if self.fail {
                return Err(MergeError::Export("encoder crashed".to_string()));
            }
            self.exported.lock().push(composition.clone());
            Ok(())
        }
    }

    fn segment(index: usize) -> SegmentRef {
        SegmentRef {
            index,
            path: PathBuf::from(format!("out.segment-{}.mp4", index)),
            status: WriterStatus::Finished,
            duration: Duration::from_secs(1),
            video_frames: 30,
            audio_buffers: 100,
            anchor: None,
            finished_at: Utc::now(),
        }
    }

    fn destination() -> PathBuf {
        std::env::temp_dir().join("session-recorder-merge-test.mp4")
    }

    fn readable(indices: &[usize], ms: u64) -> MapProbe {
        MapProbe(
            indices
                .iter()
                .map(|&i| {
                    (
                        segment(i).path,
                        MediaInfo {
                            duration: Duration::from_millis(ms),
                            has_video: true,
                            has_audio: true,
                        },
                    )
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_concatenate_preserves_order() {
        let exporter = Arc::new(CapturingExporter::default());
        let merger = SegmentMerger::new(Arc::new(readable(&[0, 1, 2], 1_000)), exporter.clone());
        let segments = vec![segment(0), segment(1), segment(2)];

        let report = merger.concatenate(&segments, &destination()).await.unwrap();
        assert_eq!(report.merged, vec![0, 1, 2]);
        assert_eq!(report.duration, Duration::from_secs(3));

        let exported = exporter.exported.lock();
        let clips = exported[0].clips();
        let order: Vec<usize> = clips.iter().map(|c| c.segment_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(clips.windows(2).all(|w| w[0].end() == w[1].start));
    }

    #[tokio::test]
    async fn test_unreadable_segment_is_skipped() {
        let exporter = Arc::new(CapturingExporter::default());
        let merger = SegmentMerger::new(Arc::new(readable(&[0, 2], 500)), exporter.clone());
        let segments = vec![segment(0), segment(1), segment(2)];

        let report = merger.concatenate(&segments, &destination()).await.unwrap();
        assert_eq!(report.merged, vec![0, 2]);
        assert_eq!(report.skipped, vec![1]);
        assert_eq!(exporter.exported.lock()[0].duration(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_nothing_readable() {
        let merger = SegmentMerger::new(
            Arc::new(readable(&[], 0)),
            Arc::new(CapturingExporter::default()),
        );
        let result = merger.concatenate(&[segment(0)], &destination()).await;
        assert!(matches!(result, Err(MergeError::NothingToMerge)));
    }

    #[tokio::test]
    async fn test_export_failure_is_reported() {
        let exporter = Arc::new(CapturingExporter {
            fail: true,
            ..Default::default()
        });
        let merger = SegmentMerger::new(Arc::new(readable(&[0, 1], 1_000)), exporter);
        let result = merger.concatenate(&[segment(0), segment(1)], &destination()).await;
        assert!(matches!(result, Err(MergeError::Export(_))));
    }
}
