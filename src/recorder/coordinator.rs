//! Recording session coordinator
//!
//! Owns the recording lifecycle. Every transition is serialized through one
//! coordinator task: commands from the [`RecordingSession`] handle and runtime
//! notices from the sample pump are consumed in arrival order, and each is
//! checked against the state at the time it is processed.
//!
//! Every start/resume opens a new segment and every pause/stop closes it.
//! Closed segments are concatenated into the output on stop.

use super::backend::MediaBackend;
use super::pump::{ActiveSegment, PumpHandle, PumpNotice};
use super::state::{RecorderConfig, RecordingState, SegmentRef, SessionSnapshot};
use super::sync::TimeSynchronizer;
use super::writer::{SegmentWriter, SinkError};
use crate::capture::{capture_channel, CaptureClock, CaptureSource, TrackKind};
use crate::export::SegmentMerger;
use crate::utils::error::{RecorderError, RecorderResult};
use crate::utils::fs::{ensure_parent_dir, remove_if_exists, segment_path};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingEvent {
    /// Recording started
    Started,
    /// Recording paused, with the interim preview file if any
    Paused(Option<PathBuf>),
    /// Recording resumed
    Resumed,
    /// Recording stopped, with the final file (none if nothing was captured)
    Stopped(Option<PathBuf>),
    /// Recording aborted by a runtime capture or writer failure
    Failed(String),
}

enum SessionCommand {
    Start {
        destination: PathBuf,
        reply: oneshot::Sender<RecorderResult<()>>,
    },
    Pause {
        reply: oneshot::Sender<RecorderResult<Option<PathBuf>>>,
    },
    Resume {
        reply: oneshot::Sender<RecorderResult<()>>,
    },
    Stop {
        reply: oneshot::Sender<RecorderResult<Option<PathBuf>>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    RequestPermissions {
        reply: oneshot::Sender<bool>,
    },
}

/// Handle to a recording session
///
/// Cheap to clone; all clones drive the same session. The session task ends
/// when the last handle is dropped.
#[derive(Clone)]
pub struct RecordingSession {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<RecordingEvent>,
    state: Arc<RwLock<RecordingState>>,
    frame_count: Arc<AtomicU64>,
}

impl RecordingSession {
    /// Create a session over the given capture sources
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: RecorderConfig, sources: Vec<Box<dyn CaptureSource>>, backend: MediaBackend) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(64);
        let state = Arc::new(RwLock::new(RecordingState::Idle));
        let frame_count = Arc::new(AtomicU64::new(0));

        for source in &sources {
            tracing::info!("Adding capture source: {} ({})", source.id(), source.kind());
        }

        let coordinator = SessionCoordinator {
            merger: backend.merger(),
            config,
            sources,
            backend,
            state: state.clone(),
            events: event_tx.clone(),
            frame_count: frame_count.clone(),
            session_id: String::new(),
            segments: Vec::new(),
            base_output: None,
            session_epoch: None,
            accumulated_pause: Duration::ZERO,
            paused_at: None,
            next_index: 0,
            pump: None,
        };
        tokio::spawn(coordinator.run(command_rx));

        Self {
            commands: command_tx,
            events: event_tx,
            state,
            frame_count,
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> RecorderResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| RecorderError::SessionClosed)?;
        rx.await.map_err(|_| RecorderError::SessionClosed)
    }

    /// Ask every capture source for permission; true if all are granted
    pub async fn request_permissions(&self) -> bool {
        self.request(|reply| SessionCommand::RequestPermissions { reply })
            .await
            .unwrap_or(false)
    }

    /// Start recording into `destination`
    pub async fn start(&self, destination: impl Into<PathBuf>) -> RecorderResult<()> {
        let destination = destination.into();
        self.request(|reply| SessionCommand::Start { destination, reply })
            .await?
    }

    /// Pause recording; returns a preview of everything recorded so far
    pub async fn pause(&self) -> RecorderResult<Option<PathBuf>> {
        self.request(|reply| SessionCommand::Pause { reply }).await?
    }

    pub async fn resume(&self) -> RecorderResult<()> {
        self.request(|reply| SessionCommand::Resume { reply }).await?
    }

    /// Stop recording; returns the final file, if anything was captured
    pub async fn stop(&self) -> RecorderResult<Option<PathBuf>> {
        self.request(|reply| SessionCommand::Stop { reply }).await?
    }

    /// Get the current recording state
    pub fn state(&self) -> RecordingState {
        *self.state.read()
    }

    /// Video frames written since the last start
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub async fn snapshot(&self) -> RecorderResult<SessionSnapshot> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.events.subscribe()
    }
}

struct SessionCoordinator {
    config: RecorderConfig,
    sources: Vec<Box<dyn CaptureSource>>,
    backend: MediaBackend,
    merger: SegmentMerger,

    state: Arc<RwLock<RecordingState>>,
    events: broadcast::Sender<RecordingEvent>,
    frame_count: Arc<AtomicU64>,

    session_id: String,
    /// Finished segments in capture order
    segments: Vec<SegmentRef>,
    base_output: Option<PathBuf>,
    session_epoch: Option<Duration>,
    accumulated_pause: Duration,
    paused_at: Option<Instant>,
    next_index: usize,
    pump: Option<PumpHandle>,
}

async fn next_notice(pump: &mut Option<PumpHandle>) -> Option<PumpNotice> {
    match pump {
        Some(pump) => pump.notice().await,
        None => std::future::pending().await,
    }
}

impl SessionCoordinator {
    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        loop {
            tokio::select! {
                biased;

                Some(notice) = next_notice(&mut self.pump) => self.handle_notice(notice).await,

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }

        if self.current_state() != RecordingState::Idle {
            tracing::warn!("Recording session dropped while {:?}, discarding open segment", self.current_state());
            self.teardown().await;
            self.set_state(RecordingState::Idle);
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start { destination, reply } => {
                let _ = reply.send(self.start(destination).await);
            }
            SessionCommand::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            SessionCommand::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            SessionCommand::Stop { reply } => {
                let _ = reply.send(self.stop().await);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::RequestPermissions { reply } => {
                let _ = reply.send(self.request_permissions());
            }
        }
    }

    async fn handle_notice(&mut self, notice: PumpNotice) {
        if self.current_state() == RecordingState::Idle {
            return;
        }
        let message = match notice {
            PumpNotice::CaptureFailed(failure) => {
                format!("Capture source {} failed: {}", failure.source_id, failure.error)
            }
            PumpNotice::WriterFailed { index, error } => {
                format!("Segment {} writer failed: {}", index, error)
            }
        };
        self.fail_session(message).await;
    }

    fn current_state(&self) -> RecordingState {
        *self.state.read()
    }

    fn set_state(&self, state: RecordingState) {
        *self.state.write() = state;
    }

    fn emit(&self, event: RecordingEvent) {
        let _ = self.events.send(event);
    }

    fn request_permissions(&self) -> bool {
        self.sources
            .iter()
            .all(|source| source.has_permission() || source.request_permission())
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            state: self.current_state(),
            segments: self.segments.clone(),
            base_output: self.base_output.clone(),
            session_epoch: self.session_epoch,
            accumulated_pause: self.accumulated_pause,
            frame_count: self.frame_count.load(Ordering::Relaxed),
        }
    }

    /// Start recording
    async fn start(&mut self, destination: PathBuf) -> RecorderResult<()> {
        let current_state = self.current_state();
        if current_state != RecordingState::Idle {
            return Err(RecorderError::AlreadyRecording);
        }

        tracing::info!("Starting recording to: {:?}", destination);

        self.config.validate()?;
        if !self.sources.iter().any(|source| source.kind() == TrackKind::Video) {
            return Err(RecorderError::Setup("No video capture source available".to_string()));
        }
        for source in &self.sources {
            if !source.has_permission() && !source.request_permission() {
                return Err(RecorderError::PermissionDenied(format!(
                    "Capture permission not granted for {}",
                    source.id()
                )));
            }
        }
        ensure_parent_dir(&destination)
            .map_err(|e| RecorderError::Setup(format!("Failed to create output directory: {}", e)))?;

        self.session_id = uuid::Uuid::new_v4().to_string();
        self.segments.clear();
        self.base_output = Some(destination);
        self.session_epoch = None;
        self.accumulated_pause = Duration::ZERO;
        self.paused_at = None;
        self.next_index = 0;
        self.frame_count.store(0, Ordering::Relaxed);

        let segment = match self.open_segment() {
            Ok(segment) => segment,
            Err(e) => {
                self.base_output = None;
                return Err(e);
            }
        };

        let (sender, receiver) = capture_channel(self.config.capture_queue_capacity, CaptureClock::new());
        let pump = PumpHandle::spawn(receiver, self.frame_count.clone());
        pump.open(segment);

        for i in 0..self.sources.len() {
            if let Err(e) = self.sources[i].start(sender.clone()).await {
                let id = self.sources[i].id().to_string();
                tracing::error!("Failed to start capture source {}: {}", id, e);
                for started in &mut self.sources[..i] {
                    if let Err(e) = started.stop().await {
                        tracing::warn!("Failed to stop capture source {}: {}", started.id(), e);
                    }
                }
                if let Some(active) = pump.shutdown().await {
                    abort_segment(active).await;
                }
                self.base_output = None;
                return Err(RecorderError::Setup(format!("Failed to start {}: {}", id, e)));
            }
        }

        self.pump = Some(pump);
        self.set_state(RecordingState::Recording);
        self.emit(RecordingEvent::Started);

        tracing::info!("Recording started (session {})", self.session_id);
        Ok(())
    }

    /// Pause recording
    async fn pause(&mut self) -> RecorderResult<Option<PathBuf>> {
        let current_state = self.current_state();
        if current_state != RecordingState::Recording {
            tracing::debug!("Ignoring pause while {:?}", current_state);
            return Ok(None);
        }

        tracing::info!("Pausing recording");

        if let Err(e) = self.close_segment().await {
            self.fail_session(e.to_string()).await;
            return Err(e);
        }

        self.paused_at = Some(Instant::now());
        self.set_state(RecordingState::Paused);

        let preview = self.interim_preview().await;
        self.emit(RecordingEvent::Paused(preview.clone()));
        Ok(preview)
    }

    /// Resume recording
    async fn resume(&mut self) -> RecorderResult<()> {
        let current_state = self.current_state();
        if current_state != RecordingState::Paused {
            tracing::debug!("Ignoring resume while {:?}", current_state);
            return Ok(());
        }

        tracing::info!("Resuming recording");

        let segment = self.open_segment()?;
        match self.pump.as_ref() {
            Some(pump) => pump.open(segment),
            None => {
                abort_segment(segment).await;
                return Err(RecorderError::Setup("Sample pump is not running".to_string()));
            }
        }

        if let Some(paused_at) = self.paused_at.take() {
            self.accumulated_pause += paused_at.elapsed();
        }
        self.set_state(RecordingState::Recording);
        self.emit(RecordingEvent::Resumed);
        Ok(())
    }

    /// Stop recording
    async fn stop(&mut self) -> RecorderResult<Option<PathBuf>> {
        let current_state = self.current_state();
        match current_state {
            RecordingState::Idle => {
                tracing::debug!("Ignoring stop while idle");
                return Ok(None);
            }
            RecordingState::Recording => {
                if let Err(e) = self.close_segment().await {
                    self.fail_session(e.to_string()).await;
                    return Err(e);
                }
            }
            RecordingState::Paused => {
                if let Some(paused_at) = self.paused_at.take() {
                    self.accumulated_pause += paused_at.elapsed();
                }
            }
        }

        tracing::info!("Stopping recording");
        self.teardown().await;

        let output = self.finalize_output().await;

        self.segments.clear();
        self.base_output = None;
        self.set_state(RecordingState::Idle);
        self.emit(RecordingEvent::Stopped(output.clone()));

        tracing::info!(
            "Recording stopped: {:?} ({} frames, {:?} paused)",
            output,
            self.frame_count.load(Ordering::Relaxed),
            self.accumulated_pause
        );
        Ok(output)
    }

    /// Abort the session after a runtime failure
    ///
    /// Finished segments stay on disk and in the snapshot; nothing is merged.
    async fn fail_session(&mut self, message: String) {
        tracing::error!("Recording failed: {}", message);
        self.teardown().await;
        self.paused_at = None;
        self.set_state(RecordingState::Idle);
        self.emit(RecordingEvent::Failed(message));
    }

    /// Stop every source and the pump, discarding a segment still open
    async fn teardown(&mut self) {
        for source in &mut self.sources {
            if source.is_running() {
                if let Err(e) = source.stop().await {
                    tracing::warn!("Failed to stop capture source {}: {}", source.id(), e);
                }
            }
        }
        if let Some(pump) = self.pump.take() {
            if let Some(active) = pump.shutdown().await {
                tracing::warn!("Discarding in-progress segment {}", active.index());
                abort_segment(active).await;
            }
        }
    }

    /// Writer and synchronizer for the next segment index
    fn open_segment(&mut self) -> RecorderResult<ActiveSegment> {
        let base = self
            .base_output
            .as_ref()
            .ok_or_else(|| RecorderError::Setup("No output path".to_string()))?;
        let index = self.next_index;
        let writer = SegmentWriter::create(
            index,
            segment_path(base, index),
            self.config.video.fps,
            self.backend.sinks.clone(),
        )
        .map_err(|e| RecorderError::Setup(format!("Failed to create segment writer: {}", e)))?;
        self.next_index += 1;

        tracing::debug!("Opened segment {} at {:?}", index, writer.path());
        let sync = TimeSynchronizer::new(self.config.gap_threshold(), self.config.frame_interval());
        Ok(ActiveSegment::new(sync, writer))
    }

    /// Take the open segment back from the pump and finalize it
    async fn close_segment(&mut self) -> RecorderResult<Option<SegmentRef>> {
        let Some(pump) = self.pump.as_ref() else {
            return Ok(None);
        };
        let Some(active) = pump.close().await else {
            return Ok(None);
        };

        let index = active.index();
        let finished = tokio::task::spawn_blocking(move || active.finish())
            .await
            .map_err(|e| SinkError::Failed(format!("finalize task failed: {}", e)))??;

        match &finished {
            Some(segment) => {
                if self.session_epoch.is_none() {
                    self.session_epoch = segment.anchor;
                }
                self.segments.push(segment.clone());
            }
            None => tracing::debug!("Segment {} was empty, not kept", index),
        }
        Ok(finished)
    }

    /// File reflecting everything recorded so far, offered while paused
    async fn interim_preview(&self) -> Option<PathBuf> {
        let base = self.base_output.as_ref()?;
        match self.segments.as_slice() {
            [] => None,
            [only] => match tokio::fs::copy(&only.path, base).await {
                Ok(_) => Some(base.clone()),
                Err(e) => {
                    tracing::warn!("Failed to copy preview to {:?}: {}", base, e);
                    Some(only.path.clone())
                }
            },
            [.., last] => match self.merger.concatenate(&self.segments, base).await {
                Ok(_) => Some(base.clone()),
                Err(e) => {
                    tracing::warn!("Preview merge failed, offering segment {}: {}", last.index, e);
                    Some(last.path.clone())
                }
            },
        }
    }

    /// Produce the final output from the finished segments
    async fn finalize_output(&self) -> Option<PathBuf> {
        let base = self.base_output.as_ref()?;
        match self.segments.as_slice() {
            [] => {
                tracing::info!("No frames were captured, no output written");
                None
            }
            [only] => match replace_file(&only.path, base).await {
                Ok(()) => Some(base.clone()),
                Err(e) => {
                    tracing::warn!("Failed to move segment into {:?}: {}", base, e);
                    Some(only.path.clone())
                }
            },
            [.., last] => match self.merger.concatenate(&self.segments, base).await {
                Ok(report) => {
                    for segment in &self.segments {
                        if let Err(e) = remove_if_exists(&segment.path) {
                            tracing::warn!("Failed to remove segment {:?}: {}", segment.path, e);
                        }
                    }
                    tracing::debug!("Merged output {:?} ({:?})", report.destination, report.duration);
                    Some(base.clone())
                }
                Err(e) => {
                    tracing::warn!("Merge failed, returning last segment {:?}: {}", last.path, e);
                    // an interim preview at the output path would look like a result
                    if let Err(e) = remove_if_exists(base) {
                        tracing::warn!("Failed to remove stale preview {:?}: {}", base, e);
                    }
                    Some(last.path.clone())
                }
            },
        }
    }
}

async fn abort_segment(active: ActiveSegment) {
    if let Err(e) = tokio::task::spawn_blocking(move || active.abort()).await {
        tracing::error!("Segment abort task failed: {}", e);
    }
}

async fn replace_file(from: &Path, to: &Path) -> std::io::Result<()> {
    remove_if_exists(to)?;
    tokio::fs::rename(from, to).await
}
