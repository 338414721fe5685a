//! Deterministic capture sources and a JSON-lines media backend

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use session_recorder::capture::{
    AdjustedSample, CaptureError, CaptureResult, CaptureSender, CaptureSource, SampleBuffer, TrackKind,
};
use session_recorder::export::{Composition, CompositionExporter, MediaInfo, MediaProbe, MergeError};
use session_recorder::recorder::{AppendOutcome, SegmentSink, SinkError, SinkFactory, VideoFormat};
use session_recorder::{MediaBackend, RecordingEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const FRAME: Duration = Duration::from_millis(33);

/// Test-side control of a [`ScriptedSource`]
#[derive(Clone, Default)]
pub struct Feed {
    sender: Arc<Mutex<Option<CaptureSender>>>,
}

impl Feed {
    /// Deliver a 2x2 frame with the given device timestamp
    pub fn frame(&self, ms: u64) -> bool {
        self.deliver(SampleBuffer::video(
            Duration::from_millis(ms),
            FRAME,
            2,
            2,
            vec![0; 16],
        ))
    }

    /// Deliver `count` frames one frame interval apart
    pub fn frames(&self, start_ms: u64, count: u64) {
        for i in 0..count {
            assert!(self.frame(start_ms + i * FRAME.as_millis() as u64));
        }
    }

    /// Deliver 10 ms of mono audio
    pub fn audio(&self, ms: u64) -> bool {
        self.deliver(SampleBuffer::audio(
            Duration::from_millis(ms),
            48_000,
            1,
            vec![0.0; 480],
        ))
    }

    pub fn fail(&self, message: &str) {
        if let Some(sender) = self.sender.lock().as_ref() {
            sender.fail("scripted", CaptureError::Failed(message.to_string()));
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sender.lock().is_some()
    }

    fn deliver(&self, sample: SampleBuffer) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.deliver(sample),
            None => false,
        }
    }
}

/// Capture source driven by the test through a [`Feed`]
pub struct ScriptedSource {
    id: String,
    kind: TrackKind,
    feed: Feed,
    fail_start: bool,
    permission: bool,
    stops: Arc<Mutex<u32>>,
}

impl ScriptedSource {
    pub fn video(feed: &Feed) -> Self {
        Self::new("display-0", TrackKind::Video, feed)
    }

    pub fn audio(feed: &Feed) -> Self {
        Self::new("microphone", TrackKind::Audio, feed)
    }

    fn new(id: &str, kind: TrackKind, feed: &Feed) -> Self {
        Self {
            id: id.to_string(),
            kind,
            feed: feed.clone(),
            fail_start: false,
            permission: true,
            stops: Arc::new(Mutex::new(0)),
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn without_permission(mut self) -> Self {
        self.permission = false;
        self
    }

    /// Counter of `stop` calls on this source
    pub fn stops(&self) -> Arc<Mutex<u32>> {
        self.stops.clone()
    }
}

#[async_trait]
impl CaptureSource for ScriptedSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn has_permission(&self) -> bool {
        self.permission
    }

    fn request_permission(&self) -> bool {
        self.permission
    }

    async fn start(&mut self, sender: CaptureSender) -> CaptureResult<()> {
        if self.fail_start {
            return Err(CaptureError::DeviceNotFound(self.id.clone()));
        }
        *self.feed.sender.lock() = Some(sender);
        Ok(())
    }

    async fn stop(&mut self) -> CaptureResult<()> {
        self.feed.sender.lock().take();
        *self.stops.lock() += 1;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.feed.is_attached()
    }
}

/// One line of a JSON-lines media file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaLine {
    pub track: TrackKind,
    pub time_ns: u64,
    pub duration_ns: u64,
}

struct JsonSink {
    path: PathBuf,
    lines: Vec<MediaLine>,
    fail_after: Option<usize>,
}

impl SegmentSink for JsonSink {
    fn is_ready(&self, _track: TrackKind) -> bool {
        true
    }

    fn append(&mut self, sample: &AdjustedSample) -> Result<AppendOutcome, SinkError> {
        if matches!(self.fail_after, Some(limit) if self.lines.len() >= limit) {
            return Err(SinkError::Encoder("disk full".to_string()));
        }
        self.lines.push(MediaLine {
            track: sample.track(),
            time_ns: sample.session_time.as_nanos() as u64,
            duration_ns: sample.sample.duration.as_nanos() as u64,
        });
        Ok(AppendOutcome::Written)
    }

    fn finish(self: Box<Self>) -> Result<(), SinkError> {
        write_lines(&self.path, &self.lines)?;
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}

fn write_lines(path: &Path, lines: &[MediaLine]) -> std::io::Result<()> {
    let mut content = String::new();
    for line in lines {
        content.push_str(&serde_json::to_string(line)?);
        content.push('\n');
    }
    std::fs::write(path, content)
}

/// Read a JSON-lines media file
pub fn read_lines(path: &Path) -> std::io::Result<Vec<MediaLine>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(std::io::Error::from))
        .collect()
}

/// Duration and track layout of a JSON-lines media file
pub fn media_info(path: &Path) -> std::io::Result<MediaInfo> {
    let lines = read_lines(path)?;
    let end = lines
        .iter()
        .map(|l| l.time_ns + l.duration_ns)
        .max()
        .unwrap_or(0);
    Ok(MediaInfo {
        duration: Duration::from_nanos(end),
        has_video: lines.iter().any(|l| l.track == TrackKind::Video),
        has_audio: lines.iter().any(|l| l.track == TrackKind::Audio),
    })
}

#[derive(Default)]
pub struct JsonSinkFactory {
    pub fail_after: Option<usize>,
}

impl SinkFactory for JsonSinkFactory {
    fn open(&self, path: &Path, _format: VideoFormat) -> Result<Box<dyn SegmentSink>, SinkError> {
        Ok(Box::new(JsonSink {
            path: path.to_path_buf(),
            lines: Vec::new(),
            fail_after: self.fail_after,
        }))
    }
}

pub struct JsonProbe;

#[async_trait]
impl MediaProbe for JsonProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, MergeError> {
        media_info(path).map_err(|e| MergeError::Probe {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Exporter shifting every clip's lines to its place on the timeline
#[derive(Default)]
pub struct JsonExporter {
    pub fail: bool,
}

#[async_trait]
impl CompositionExporter for JsonExporter {
    async fn export(&self, composition: &Composition, destination: &Path) -> Result<(), MergeError> {
        if self.fail {
            return Err(MergeError::Export("exporter unavailable".to_string()));
        }
        let mut merged = Vec::new();
        for clip in composition.clips() {
            for mut line in read_lines(&clip.source)? {
                line.time_ns += clip.start.as_nanos() as u64;
                merged.push(line);
            }
        }
        write_lines(destination, &merged)?;
        Ok(())
    }
}

pub fn backend() -> MediaBackend {
    backend_with(JsonSinkFactory::default(), JsonExporter::default())
}

pub fn backend_with(sinks: JsonSinkFactory, exporter: JsonExporter) -> MediaBackend {
    MediaBackend::new(Arc::new(sinks), Arc::new(JsonProbe), Arc::new(exporter))
}

/// Next event, failing the test if none arrives in time
pub async fn next_event(events: &mut broadcast::Receiver<RecordingEvent>) -> RecordingEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for a recording event")
        .expect("event channel closed")
}

/// Files in `dir`, sorted by name
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
