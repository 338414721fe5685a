//! Delivery channel between capture sources and the recorder
//!
//! Capture sources run on their own threads and must never block on the
//! recorder. Samples go through a bounded queue and are dropped when it is
//! full; failures go through an unbounded queue so they are never lost.

use super::sample::SampleBuffer;
use super::traits::CaptureError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Shared time base for every source of one recording
#[derive(Debug, Clone, Copy)]
pub struct CaptureClock {
    origin: Instant,
}

impl CaptureClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Device timestamp for "now"
    pub fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Device timestamp for an instant observed by a source
    pub fn timestamp(&self, at: Instant) -> Duration {
        at.saturating_duration_since(self.origin)
    }
}

impl Default for CaptureClock {
    fn default() -> Self {
        Self::new()
    }
}

/// A capture source reporting that it can no longer deliver
#[derive(Debug)]
pub struct CaptureFailure {
    pub source_id: String,
    pub error: CaptureError,
}

/// Sending half handed to each capture source
#[derive(Clone)]
pub struct CaptureSender {
    samples: mpsc::Sender<SampleBuffer>,
    failures: mpsc::UnboundedSender<CaptureFailure>,
    clock: CaptureClock,
    dropped: Arc<AtomicU64>,
}

impl CaptureSender {
    /// Hand a sample to the recorder without blocking
    ///
    /// Returns false when the sample was dropped (queue full or recorder gone).
    pub fn deliver(&self, sample: SampleBuffer) -> bool {
        match self.samples.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(sample)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(
                    "Capture queue full, dropped {} sample ({} dropped so far)",
                    sample.track(),
                    dropped
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Report a fatal source error
    pub fn fail(&self, source_id: &str, error: CaptureError) {
        tracing::error!("Capture source {} failed: {}", source_id, error);
        let _ = self.failures.send(CaptureFailure {
            source_id: source_id.to_string(),
            error,
        });
    }

    pub fn clock(&self) -> CaptureClock {
        self.clock
    }

    /// True once the recorder stopped listening
    pub fn is_closed(&self) -> bool {
        self.samples.is_closed()
    }

    /// Samples dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving half owned by the recorder's sample pump
pub struct CaptureReceiver {
    pub(crate) samples: mpsc::Receiver<SampleBuffer>,
    pub(crate) failures: mpsc::UnboundedReceiver<CaptureFailure>,
}

/// Create a capture channel with room for `capacity` in-flight samples
pub fn capture_channel(capacity: usize, clock: CaptureClock) -> (CaptureSender, CaptureReceiver) {
    let (samples_tx, samples_rx) = mpsc::channel(capacity.max(1));
    let (failures_tx, failures_rx) = mpsc::unbounded_channel();
    (
        CaptureSender {
            samples: samples_tx,
            failures: failures_tx,
            clock,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        CaptureReceiver {
            samples: samples_rx,
            failures: failures_rx,
        },
    )
}
