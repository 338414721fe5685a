//! Segment writer
//!
//! Wraps a container sink for one segment file. The sink is opened lazily on
//! the first video frame: that frame fixes the video dimensions, and a segment
//! that never sees a frame must not leave a zero-length file behind.

use super::state::{SegmentRef, WriterStatus};
use super::sync::DropReason;
use crate::capture::{AdjustedSample, SamplePayload, TrackKind};
use crate::utils::fs::{ensure_parent_dir, remove_if_exists};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a container sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Writer failed: {0}")]
    Failed(String),
}

/// Video stream parameters a sink is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Container/muxer for one segment file
///
/// `append` must not block on file I/O; sinks signal backpressure through
/// `is_ready` instead.
pub trait SegmentSink: Send {
    /// Whether the sink can take another sample on `track` right now
    fn is_ready(&self, track: TrackKind) -> bool;

    /// Write a sample, or return `Dropped(DropReason::Skipped)` for one the
    /// container cannot place
    fn append(&mut self, sample: &AdjustedSample) -> Result<AppendOutcome, SinkError>;

    /// Flush pending data and complete the file. May block.
    fn finish(self: Box<Self>) -> Result<(), SinkError>;

    /// Discard everything written so far. May block.
    fn abort(self: Box<Self>);
}

/// Opens sinks for new segments
///
/// Opening may spawn processes and touch the filesystem.
pub trait SinkFactory: Send + Sync {
    fn open(&self, path: &Path, format: VideoFormat) -> Result<Box<dyn SegmentSink>, SinkError>;
}

/// A sink open the writer is waiting for
///
/// Run [`SinkOpen::open`] wherever blocking is allowed and hand the result to
/// [`SegmentWriter::attach`].
pub struct SinkOpen {
    factory: Arc<dyn SinkFactory>,
    path: PathBuf,
    format: VideoFormat,
}

impl SinkOpen {
    pub fn format(&self) -> VideoFormat {
        self.format
    }

    /// Open the sink. Blocking.
    pub fn open(self) -> Result<Box<dyn SegmentSink>, SinkError> {
        self.factory.open(&self.path, self.format)
    }
}

/// Result of offering a sample to the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Written,
    Dropped(DropReason),
}

/// Writer for a single segment file
pub struct SegmentWriter {
    index: usize,
    path: PathBuf,
    fps: u32,
    status: WriterStatus,
    factory: Arc<dyn SinkFactory>,
    sink: Option<Box<dyn SegmentSink>>,
    failure: Option<String>,
    video_frames: u64,
    audio_buffers: u64,
    dropped: u64,
    end_time: Duration,
}

impl SegmentWriter {
    /// Prepare a writer for `path`
    ///
    /// Fails if the target directory cannot be created or a stale file at the
    /// path cannot be removed.
    pub fn create(index: usize, path: PathBuf, fps: u32, factory: Arc<dyn SinkFactory>) -> Result<Self, SinkError> {
        ensure_parent_dir(&path)?;
        remove_if_exists(&path)?;

        Ok(Self {
            index,
            path,
            fps,
            status: WriterStatus::Unstarted,
            factory,
            sink: None,
            failure: None,
            video_frames: 0,
            audio_buffers: 0,
            dropped: 0,
            end_time: Duration::ZERO,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> WriterStatus {
        self.status
    }

    pub fn video_frames(&self) -> u64 {
        self.video_frames
    }

    /// Samples refused because the sink was not ready
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// The sink open `sample` would trigger, if the writer is still waiting
    /// for its first frame
    pub fn open_request(&self, sample: &AdjustedSample) -> Option<SinkOpen> {
        if self.status != WriterStatus::Unstarted {
            return None;
        }
        let SamplePayload::Video { width, height, .. } = sample.sample.payload else {
            return None;
        };
        Some(SinkOpen {
            factory: self.factory.clone(),
            path: self.path.clone(),
            format: VideoFormat {
                width,
                height,
                fps: self.fps,
            },
        })
    }

    /// Install the result of a [`SinkOpen`]
    pub fn attach(&mut self, opened: Result<Box<dyn SegmentSink>, SinkError>) -> Result<(), SinkError> {
        if self.status != WriterStatus::Unstarted {
            if let Ok(sink) = opened {
                sink.abort();
            }
            return Ok(());
        }
        match opened {
            Ok(sink) => {
                tracing::debug!("Segment {} writing to {:?}", self.index, self.path);
                self.sink = Some(sink);
                self.status = WriterStatus::Writing;
                Ok(())
            }
            Err(e) => {
                self.mark_failed(&e);
                Err(e)
            }
        }
    }

    /// Offer an adjusted sample to the segment
    ///
    /// Opens the sink in place if no [`SinkOpen`] was attached beforehand.
    pub fn append(&mut self, sample: AdjustedSample) -> Result<AppendOutcome, SinkError> {
        match self.status {
            WriterStatus::Finished | WriterStatus::Failed => {
                return Ok(AppendOutcome::Dropped(DropReason::WriterClosed));
            }
            WriterStatus::Unstarted => {
                let Some(request) = self.open_request(&sample) else {
                    return Ok(AppendOutcome::Dropped(DropReason::BeforeAnchor));
                };
                let format = request.format();
                tracing::trace!("Segment {} opening {}x{} sink", self.index, format.width, format.height);
                self.attach(request.open())?;
            }
            WriterStatus::Writing => {}
        }

        let track = sample.track();
        let Some(sink) = self.sink.as_mut() else {
            return Ok(AppendOutcome::Dropped(DropReason::WriterClosed));
        };

        if !sink.is_ready(track) {
            self.dropped += 1;
            tracing::trace!("Segment {} sink not ready, dropped {} sample", self.index, track);
            return Ok(AppendOutcome::Dropped(DropReason::NotReady));
        }

        match sink.append(&sample) {
            Ok(AppendOutcome::Written) => {}
            Ok(dropped) => {
                tracing::trace!("Segment {} sink skipped {} sample", self.index, track);
                return Ok(dropped);
            }
            Err(e) => {
                self.mark_failed(&e);
                return Err(e);
            }
        }

        match track {
            TrackKind::Video => self.video_frames += 1,
            TrackKind::Audio => self.audio_buffers += 1,
        }
        self.end_time = self.end_time.max(sample.end_time());
        Ok(AppendOutcome::Written)
    }

    fn mark_failed(&mut self, error: &SinkError) {
        tracing::error!("Segment {} writer failed: {}", self.index, error);
        self.status = WriterStatus::Failed;
        self.failure = Some(error.to_string());
    }

    /// Complete the segment. Blocking.
    ///
    /// Returns `None` for a segment that never received a frame.
    pub fn finish(mut self) -> Result<Option<SegmentRef>, SinkError> {
        match self.status {
            WriterStatus::Unstarted => {
                remove_if_exists(&self.path)?;
                tracing::debug!("Segment {} received no frames, discarded", self.index);
                Ok(None)
            }
            WriterStatus::Writing => {
                let sink = self
                    .sink
                    .take()
                    .ok_or_else(|| SinkError::Failed("sink missing".to_string()))?;
                if let Err(e) = sink.finish() {
                    tracing::error!("Segment {} failed to finalize: {}", self.index, e);
                    let _ = remove_if_exists(&self.path);
                    return Err(e);
                }
                self.status = WriterStatus::Finished;
                tracing::info!(
                    "Segment {} finished: {} frames, {} audio buffers, {:?}",
                    self.index,
                    self.video_frames,
                    self.audio_buffers,
                    self.end_time
                );
                Ok(Some(SegmentRef {
                    index: self.index,
                    path: self.path.clone(),
                    status: WriterStatus::Finished,
                    duration: self.end_time,
                    video_frames: self.video_frames,
                    audio_buffers: self.audio_buffers,
                    anchor: None,
                    finished_at: Utc::now(),
                }))
            }
            WriterStatus::Failed | WriterStatus::Finished => {
                let message = self
                    .failure
                    .clone()
                    .unwrap_or_else(|| "writer closed".to_string());
                self.abort();
                Err(SinkError::Failed(message))
            }
        }
    }

    /// Throw the segment away. Blocking.
    pub fn abort(mut self) {
        if let Some(sink) = self.sink.take() {
            sink.abort();
        }
        if let Err(e) = remove_if_exists(&self.path) {
            tracing::warn!("Failed to remove aborted segment {:?}: {}", self.path, e);
        }
        tracing::debug!("Segment {} aborted", self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SampleBuffer;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Calls {
        opened: Vec<VideoFormat>,
        appended: Vec<(TrackKind, Duration)>,
        finished: bool,
        aborted: bool,
    }

    struct TestSink {
        calls: Arc<Mutex<Calls>>,
        ready: bool,
        fail_on_append: bool,
        skip_after: Option<usize>,
        path: PathBuf,
    }

    impl SegmentSink for TestSink {
        fn is_ready(&self, _track: TrackKind) -> bool {
            self.ready
        }

        fn append(&mut self, sample: &AdjustedSample) -> Result<AppendOutcome, SinkError> {
            if self.fail_on_append {
                return Err(SinkError::Encoder("disk full".to_string()));
            }
            let mut calls = self.calls.lock();
            if matches!(self.skip_after, Some(limit) if calls.appended.len() >= limit) {
                return Ok(AppendOutcome::Dropped(DropReason::Skipped));
            }
            calls.appended.push((sample.track(), sample.session_time));
            Ok(AppendOutcome::Written)
        }

        fn finish(self: Box<Self>) -> Result<(), SinkError> {
            std::fs::write(&self.path, b"media")?;
            self.calls.lock().finished = true;
            Ok(())
        }

        fn abort(self: Box<Self>) {
            self.calls.lock().aborted = true;
        }
    }

    struct TestFactory {
        calls: Arc<Mutex<Calls>>,
        ready: bool,
        fail_on_append: bool,
        skip_after: Option<usize>,
        fail_open: bool,
    }

    impl TestFactory {
        fn new() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Calls::default())),
                ready: true,
                fail_on_append: false,
                skip_after: None,
                fail_open: false,
            }
        }
    }

    impl SinkFactory for TestFactory {
        fn open(&self, path: &Path, format: VideoFormat) -> Result<Box<dyn SegmentSink>, SinkError> {
            if self.fail_open {
                return Err(SinkError::Encoder("no encoder".to_string()));
            }
            self.calls.lock().opened.push(format);
            Ok(Box::new(TestSink {
                calls: self.calls.clone(),
                ready: self.ready,
                fail_on_append: self.fail_on_append,
                skip_after: self.skip_after,
                path: path.to_path_buf(),
            }))
        }
    }

    fn video(ms: u64) -> AdjustedSample {
        AdjustedSample {
            sample: SampleBuffer::video(Duration::from_millis(ms), Duration::from_millis(33), 4, 2, vec![0; 32]),
            session_time: Duration::from_millis(ms),
        }
    }

    fn audio(ms: u64) -> AdjustedSample {
        AdjustedSample {
            sample: SampleBuffer::audio(Duration::from_millis(ms), 48_000, 1, vec![0.0; 480]),
            session_time: Duration::from_millis(ms),
        }
    }

    fn writer(dir: &Path, factory: TestFactory) -> (SegmentWriter, Arc<Mutex<Calls>>) {
        let calls = factory.calls.clone();
        let writer = SegmentWriter::create(0, dir.join("out.segment-0.mp4"), 30, Arc::new(factory)).unwrap();
        (writer, calls)
    }

    #[test]
    fn test_sink_opens_on_first_video_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (mut writer, calls) = writer(dir.path(), TestFactory::new());

        assert_eq!(writer.append(audio(0)).unwrap(), AppendOutcome::Dropped(DropReason::BeforeAnchor));
        assert_eq!(writer.status(), WriterStatus::Unstarted);
        assert!(calls.lock().opened.is_empty());

        assert_eq!(writer.append(video(0)).unwrap(), AppendOutcome::Written);
        assert_eq!(writer.status(), WriterStatus::Writing);
        assert_eq!(calls.lock().opened, vec![VideoFormat { width: 4, height: 2, fps: 30 }]);
    }

    #[test]
    fn test_finish_reports_segment() {
        let dir = tempfile::tempdir().unwrap();
        let (mut writer, calls) = writer(dir.path(), TestFactory::new());
        writer.append(video(0)).unwrap();
        writer.append(audio(5)).unwrap();
        writer.append(video(33)).unwrap();

        let segment = writer.finish().unwrap().unwrap();
        assert_eq!(segment.index, 0);
        assert_eq!(segment.status, WriterStatus::Finished);
        assert_eq!(segment.video_frames, 2);
        assert_eq!(segment.audio_buffers, 1);
        assert_eq!(segment.duration, Duration::from_millis(66));
        assert!(segment.path.exists());
        assert!(calls.lock().finished);
    }

    #[test]
    fn test_empty_segment_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, _) = writer(dir.path(), TestFactory::new());
        let path = writer.path().to_path_buf();
        std::fs::write(&path, b"").unwrap();

        assert!(writer.finish().unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_not_ready_drops_sample() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = TestFactory::new();
        factory.ready = false;
        let (mut writer, calls) = writer(dir.path(), factory);

        assert_eq!(writer.append(video(0)).unwrap(), AppendOutcome::Dropped(DropReason::NotReady));
        assert_eq!(writer.dropped(), 1);
        assert!(calls.lock().appended.is_empty());
    }

    #[test]
    fn test_sink_failure_marks_writer_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = TestFactory::new();
        factory.fail_on_append = true;
        let (mut writer, calls) = writer(dir.path(), factory);

        assert!(writer.append(video(0)).is_err());
        assert_eq!(writer.status(), WriterStatus::Failed);
        assert_eq!(writer.append(video(33)).unwrap(), AppendOutcome::Dropped(DropReason::WriterClosed));

        let err = writer.finish().unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(calls.lock().aborted);
    }

    #[test]
    fn test_open_failure_marks_writer_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = TestFactory::new();
        factory.fail_open = true;
        let (mut writer, _) = writer(dir.path(), factory);

        assert!(writer.append(video(0)).is_err());
        assert_eq!(writer.status(), WriterStatus::Failed);
    }

    #[test]
    fn test_skipped_samples_are_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = TestFactory::new();
        factory.skip_after = Some(1);
        let (mut writer, calls) = writer(dir.path(), factory);

        assert_eq!(writer.append(video(0)).unwrap(), AppendOutcome::Written);
        assert_eq!(writer.append(video(33)).unwrap(), AppendOutcome::Dropped(DropReason::Skipped));
        assert_eq!(writer.video_frames(), 1);
        assert_eq!(writer.status(), WriterStatus::Writing);

        let segment = writer.finish().unwrap().unwrap();
        assert_eq!(segment.video_frames, 1);
        assert_eq!(segment.duration, Duration::from_millis(33));
        assert_eq!(calls.lock().appended.len(), 1);
    }

    #[test]
    fn test_open_request_is_attached_before_append() {
        let dir = tempfile::tempdir().unwrap();
        let (mut writer, calls) = writer(dir.path(), TestFactory::new());

        assert!(writer.open_request(&audio(0)).is_none());
        let request = writer.open_request(&video(0)).unwrap();
        assert_eq!(request.format(), VideoFormat { width: 4, height: 2, fps: 30 });

        let opened = std::thread::spawn(move || request.open()).join().unwrap();
        writer.attach(opened).unwrap();
        assert_eq!(writer.status(), WriterStatus::Writing);
        assert!(writer.open_request(&video(33)).is_none());

        assert_eq!(writer.append(video(0)).unwrap(), AppendOutcome::Written);
        assert_eq!(calls.lock().opened.len(), 1);
    }

    #[test]
    fn test_failed_open_request_marks_writer_failed() {
        let dir = tempfile::tempdir().unwrap();
        let mut factory = TestFactory::new();
        factory.fail_open = true;
        let (mut writer, _) = writer(dir.path(), factory);

        let request = writer.open_request(&video(0)).unwrap();
        assert!(writer.attach(request.open()).is_err());
        assert_eq!(writer.status(), WriterStatus::Failed);
        assert_eq!(writer.append(video(0)).unwrap(), AppendOutcome::Dropped(DropReason::WriterClosed));
    }
}
