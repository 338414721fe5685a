//! Screen capture using `scrap`
//!
//! Polls the display at a fixed rate on a dedicated thread. The capturer is
//! created on that thread because platform capture handles are not `Send`.
//! scrap reports no frame while the screen is unchanged, so the last frame is
//! sent again every frame interval to keep the video track flowing.

use super::channel::CaptureSender;
use super::sample::{SampleBuffer, TrackKind};
use super::traits::{CaptureError, CaptureResult, CaptureSource, DisplayInfo};
use async_trait::async_trait;
use scrap::{Capturer, Display};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Get list of available displays
pub fn get_displays() -> Vec<DisplayInfo> {
    let displays = match Display::all() {
        Ok(displays) => displays,
        Err(e) => {
            tracing::warn!("Failed to enumerate displays: {}", e);
            return Vec::new();
        }
    };

    displays
        .iter()
        .enumerate()
        .map(|(index, display)| DisplayInfo {
            id: index as u32,
            name: if index == 0 {
                "Main Display".to_string()
            } else {
                format!("Display {}", index + 1)
            },
            width: display.width() as u32,
            height: display.height() as u32,
            is_primary: index == 0,
        })
        .collect()
}

/// Display capture source
pub struct DisplayCaptureSource {
    id: String,
    display_index: usize,
    fps: u32,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DisplayCaptureSource {
    pub fn new(display_index: usize, fps: u32) -> Self {
        Self {
            id: format!("display-{}", display_index),
            display_index,
            fps: fps.max(1),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

/// Copy a strided BGRA frame into a tightly packed buffer
fn pack_rows(frame: &[u8], width: usize, height: usize) -> Vec<u8> {
    let row_bytes = width * 4;
    if height == 0 {
        return Vec::new();
    }
    let stride = frame.len() / height;
    if stride == row_bytes {
        return frame.to_vec();
    }
    let mut packed = Vec::with_capacity(row_bytes * height);
    for row in frame.chunks(stride).take(height) {
        packed.extend_from_slice(&row[..row_bytes.min(row.len())]);
    }
    packed
}

/// Last frame handed to the channel
struct LastFrame {
    data: Vec<u8>,
    sent_at: Instant,
}

impl LastFrame {
    /// Copy of the frame if a frame interval passed since it was last sent
    fn repeat(&mut self, now: Instant, interval: Duration) -> Option<Vec<u8>> {
        if now.saturating_duration_since(self.sent_at) < interval {
            return None;
        }
        self.sent_at = now;
        Some(self.data.clone())
    }
}

fn capture_loop(
    display_index: usize,
    fps: u32,
    running: Arc<AtomicBool>,
    sender: CaptureSender,
    ready: oneshot::Sender<CaptureResult<()>>,
    source_id: String,
) {
    let display = match Display::all().map(|all| all.into_iter().nth(display_index)) {
        Ok(Some(display)) => display,
        Ok(None) => {
            let _ = ready.send(Err(CaptureError::DeviceNotFound(format!(
                "display {}",
                display_index
            ))));
            return;
        }
        Err(e) => {
            let _ = ready.send(Err(CaptureError::Io(e)));
            return;
        }
    };

    let mut capturer = match Capturer::new(display) {
        Ok(capturer) => capturer,
        Err(e) => {
            let _ = ready.send(Err(CaptureError::Io(e)));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let width = capturer.width();
    let height = capturer.height();
    let frame_interval = Duration::from_secs_f64(1.0 / fps as f64);
    let clock = sender.clock();
    let mut frame_count = 0u64;
    let mut repeated = 0u64;
    let mut last_frame: Option<LastFrame> = None;

    while running.load(Ordering::SeqCst) && !sender.is_closed() {
        let frame_start = Instant::now();

        match capturer.frame() {
            Ok(frame) => {
                let data = pack_rows(&frame, width, height);
                let sample = SampleBuffer::video(
                    clock.timestamp(frame_start),
                    frame_interval,
                    width as u32,
                    height as u32,
                    data.clone(),
                );
                sender.deliver(sample);
                last_frame = Some(LastFrame {
                    data,
                    sent_at: frame_start,
                });
                frame_count += 1;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                let now = Instant::now();
                let Some(data) = last_frame.as_mut().and_then(|last| last.repeat(now, frame_interval)) else {
                    std::thread::sleep(Duration::from_millis(1));
                    continue;
                };
                sender.deliver(SampleBuffer::video(
                    clock.timestamp(now),
                    frame_interval,
                    width as u32,
                    height as u32,
                    data,
                ));
                repeated += 1;
            }
            Err(e) => {
                sender.fail(&source_id, CaptureError::Io(e));
                break;
            }
        }

        if let Some(sleep_time) = frame_interval.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(sleep_time);
        }
    }

    tracing::info!(
        "Display capture stopped. Captured {} frames, repeated {} while idle",
        frame_count,
        repeated
    );
}

#[async_trait]
impl CaptureSource for DisplayCaptureSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn has_permission(&self) -> bool {
        super::traits::has_screen_recording_permission()
    }

    fn request_permission(&self) -> bool {
        super::traits::request_screen_recording_permission()
    }

    async fn start(&mut self, sender: CaptureSender) -> CaptureResult<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyCapturing);
        }
        if !self.has_permission() {
            return Err(CaptureError::PermissionDenied(
                "Screen recording permission not granted".to_string(),
            ));
        }

        self.running.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = oneshot::channel();
        let running = self.running.clone();
        let display_index = self.display_index;
        let fps = self.fps;
        let source_id = self.id.clone();

        let handle = std::thread::Builder::new()
            .name(self.id.clone())
            .spawn(move || capture_loop(display_index, fps, running, sender, ready_tx, source_id))?;

        let ready = ready_rx
            .await
            .unwrap_or_else(|_| Err(CaptureError::Failed("capture thread exited".to_string())));
        if let Err(e) = ready {
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(e);
        }

        self.handle = Some(handle);
        tracing::info!("Display capture started for display {} at {}fps", self.display_index, self.fps);
        Ok(())
    }

    async fn stop(&mut self) -> CaptureResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::NotCapturing);
        }

        if let Some(handle) = self.handle.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
