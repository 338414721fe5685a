//! Media backend
//!
//! The three media seams the session depends on: opening segment sinks,
//! probing finished files and exporting a composition.

use super::state::RecorderConfig;
use super::writer::SinkFactory;
use crate::export::{CompositionExporter, FfmpegExporter, FfmpegProbe, FfmpegSinkFactory, MediaProbe, SegmentMerger};
use std::sync::Arc;

#[derive(Clone)]
pub struct MediaBackend {
    pub sinks: Arc<dyn SinkFactory>,
    pub probe: Arc<dyn MediaProbe>,
    pub exporter: Arc<dyn CompositionExporter>,
}

impl MediaBackend {
    pub fn new(
        sinks: Arc<dyn SinkFactory>,
        probe: Arc<dyn MediaProbe>,
        exporter: Arc<dyn CompositionExporter>,
    ) -> Self {
        Self { sinks, probe, exporter }
    }

    /// Backend running the `ffmpeg`/`ffprobe` binaries named in `config`
    pub fn ffmpeg(config: &RecorderConfig) -> Self {
        Self {
            sinks: Arc::new(FfmpegSinkFactory::new(
                config.ffmpeg_path.clone(),
                config.video.quality,
                config.sink_queue_depth,
            )),
            probe: Arc::new(FfmpegProbe::new(config.ffprobe_path.clone())),
            exporter: Arc::new(FfmpegExporter::new(config.ffmpeg_path.clone(), config.video.quality)),
        }
    }

    pub fn merger(&self) -> SegmentMerger {
        SegmentMerger::new(self.probe.clone(), self.exporter.clone())
    }
}
