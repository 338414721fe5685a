//! Sample pump
//!
//! A single task drains the capture channel into whichever segment is open.
//! The coordinator hands segments in with `open` and takes them back with
//! `close`; while no segment is open samples are discarded.

use super::state::SegmentRef;
use super::sync::{DropReason, TimeSynchronizer};
use super::writer::{AppendOutcome, SegmentWriter, SinkError};
use crate::capture::{CaptureFailure, CaptureReceiver, SampleBuffer, TrackKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// The segment currently receiving samples
pub struct ActiveSegment {
    sync: TimeSynchronizer,
    writer: SegmentWriter,
}

impl ActiveSegment {
    pub fn new(sync: TimeSynchronizer, writer: SegmentWriter) -> Self {
        Self { sync, writer }
    }

    pub fn index(&self) -> usize {
        self.writer.index()
    }

    /// Place a raw sample on the segment timeline and write it
    ///
    /// The segment's first frame opens the sink on the blocking pool.
    pub async fn push(&mut self, sample: SampleBuffer) -> Result<AppendOutcome, SinkError> {
        let adjusted = match self.sync.adjust(sample) {
            Ok(adjusted) => adjusted,
            Err(reason) => return Ok(AppendOutcome::Dropped(reason)),
        };
        if let Some(request) = self.writer.open_request(&adjusted) {
            let opened = tokio::task::spawn_blocking(move || request.open())
                .await
                .unwrap_or_else(|e| Err(SinkError::Failed(format!("sink open task failed: {}", e))));
            self.writer.attach(opened)?;
        }
        self.writer.append(adjusted)
    }

    /// Complete the segment file. Blocking.
    pub fn finish(self) -> Result<Option<SegmentRef>, SinkError> {
        let anchor = self.sync.anchor();
        let gap = self.sync.accumulated_gap();
        let segment = self.writer.finish()?;
        Ok(segment.map(|mut segment| {
            if !gap.is_zero() {
                tracing::debug!("Segment {} compensated {:?} of delivery gaps", segment.index, gap);
            }
            segment.anchor = anchor;
            segment
        }))
    }

    /// Discard the segment. Blocking.
    pub fn abort(self) {
        self.writer.abort();
    }
}

/// Runtime problems the coordinator must react to
#[derive(Debug)]
pub enum PumpNotice {
    CaptureFailed(CaptureFailure),
    WriterFailed { index: usize, error: SinkError },
}

enum PumpControl {
    Open(ActiveSegment),
    Close(oneshot::Sender<Option<ActiveSegment>>),
}

/// Coordinator-side handle of the pump task
pub struct PumpHandle {
    control: mpsc::UnboundedSender<PumpControl>,
    notices: mpsc::UnboundedReceiver<PumpNotice>,
    task: JoinHandle<Option<ActiveSegment>>,
}

impl PumpHandle {
    /// Spawn the pump over a capture channel
    pub fn spawn(receiver: CaptureReceiver, frame_count: Arc<AtomicU64>) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(receiver, control_rx, notice_tx, frame_count));
        Self {
            control: control_tx,
            notices: notice_rx,
            task,
        }
    }

    /// Route samples into `segment` from now on
    pub fn open(&self, segment: ActiveSegment) {
        if let Err(mpsc::error::SendError(PumpControl::Open(segment))) =
            self.control.send(PumpControl::Open(segment))
        {
            tracing::warn!("Sample pump is gone, discarding segment {}", segment.index());
            segment.abort();
        }
    }

    /// Take back the open segment after everything already queued was written
    pub async fn close(&self) -> Option<ActiveSegment> {
        let (tx, rx) = oneshot::channel();
        self.control.send(PumpControl::Close(tx)).ok()?;
        rx.await.ok().flatten()
    }

    /// Next runtime notice from the pump
    pub async fn notice(&mut self) -> Option<PumpNotice> {
        self.notices.recv().await
    }

    /// Stop the pump, returning a segment that was still open
    pub async fn shutdown(self) -> Option<ActiveSegment> {
        drop(self.control);
        match self.task.await {
            Ok(active) => active,
            Err(e) => {
                tracing::error!("Sample pump task failed: {}", e);
                None
            }
        }
    }
}

async fn run(
    mut receiver: CaptureReceiver,
    mut control: mpsc::UnboundedReceiver<PumpControl>,
    notices: mpsc::UnboundedSender<PumpNotice>,
    frame_count: Arc<AtomicU64>,
) -> Option<ActiveSegment> {
    let mut active: Option<ActiveSegment> = None;

    loop {
        tokio::select! {
            biased;

            Some(failure) = receiver.failures.recv() => {
                let _ = notices.send(PumpNotice::CaptureFailed(failure));
            }

            command = control.recv() => match command {
                Some(PumpControl::Open(segment)) => {
                    tracing::debug!("Sample pump now feeding segment {}", segment.index());
                    if let Some(previous) = active.replace(segment) {
                        tracing::warn!("Segment {} replaced while open, aborting it", previous.index());
                        tokio::task::spawn_blocking(move || previous.abort());
                    }
                }
                Some(PumpControl::Close(reply)) => {
                    while let Ok(sample) = receiver.samples.try_recv() {
                        pump_sample(&mut active, sample, &notices, &frame_count).await;
                    }
                    let _ = reply.send(active.take());
                }
                None => break,
            },

            Some(sample) = receiver.samples.recv() => {
                pump_sample(&mut active, sample, &notices, &frame_count).await;
            }
        }
    }

    tracing::debug!("Sample pump stopped");
    active
}

async fn pump_sample(
    active: &mut Option<ActiveSegment>,
    sample: SampleBuffer,
    notices: &mpsc::UnboundedSender<PumpNotice>,
    frame_count: &AtomicU64,
) {
    let Some(segment) = active.as_mut() else {
        tracing::trace!("No open segment, discarding {} sample", sample.track());
        return;
    };

    let track = sample.track();
    match segment.push(sample).await {
        Ok(AppendOutcome::Written) => {
            if track == TrackKind::Video {
                frame_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(AppendOutcome::Dropped(DropReason::WriterClosed)) => {}
        Ok(AppendOutcome::Dropped(reason)) => {
            tracing::trace!("Segment {} dropped {} sample: {}", segment.index(), track, reason);
        }
        Err(error) => {
            let _ = notices.send(PumpNotice::WriterFailed {
                index: segment.index(),
                error,
            });
        }
    }
}
