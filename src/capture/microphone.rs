//! Microphone capture using `cpal`
//!
//! The input stream lives on a dedicated thread (cpal streams are not `Send`)
//! and is dropped when the source stops.

use super::channel::{CaptureClock, CaptureSender};
use super::sample::{SampleBuffer, TrackKind};
use super::traits::{AudioDeviceInfo, CaptureError, CaptureResult, CaptureSource};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;

/// Get list of available audio input devices (microphones)
pub fn get_audio_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = match host.input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("Failed to enumerate input devices: {}", e);
            return Vec::new();
        }
    };

    devices
        .filter_map(|device| device.name().ok())
        .map(|name| AudioDeviceInfo {
            id: name.clone(),
            is_default: default_name.as_deref() == Some(name.as_str()),
            is_input: true,
            name,
        })
        .collect()
}

/// Microphone capture source
pub struct MicrophoneSource {
    id: String,
    device_id: Option<String>,
    sample_rate: u32,
    channels: u16,
    running: Arc<AtomicBool>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MicrophoneSource {
    /// `device_id` selects an input by name; `None` uses the default input
    pub fn new(device_id: Option<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            id: "microphone".to_string(),
            device_id,
            sample_rate,
            channels,
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            handle: None,
        }
    }
}

fn find_device(device_id: Option<&str>) -> CaptureResult<cpal::Device> {
    let host = cpal::default_host();
    match device_id {
        Some(name) => host
            .input_devices()
            .map_err(|e| CaptureError::Failed(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceNotFound(format!("microphone '{}'", name))),
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceNotFound("no input device available".to_string())),
    }
}

/// Prefer the requested rate/channel layout, otherwise the device default
fn pick_config(device: &cpal::Device, sample_rate: u32, channels: u16) -> CaptureResult<cpal::SupportedStreamConfig> {
    if let Ok(mut configs) = device.supported_input_configs() {
        let matching = configs.find(|c| {
            c.channels() == channels
                && c.min_sample_rate().0 <= sample_rate
                && c.max_sample_rate().0 >= sample_rate
        });
        if let Some(range) = matching {
            return Ok(range.with_sample_rate(cpal::SampleRate(sample_rate)));
        }
    }
    device
        .default_input_config()
        .map_err(|e| CaptureError::Failed(e.to_string()))
}

fn deliver_chunk(sender: &CaptureSender, clock: CaptureClock, sample_rate: u32, channels: u16, data: Vec<f32>) {
    let received = clock.now();
    let mut sample = SampleBuffer::audio(received, sample_rate, channels, data);
    // the callback fires when the buffer is full; its first frame is older
    sample.raw_timestamp = received.saturating_sub(sample.duration);
    sender.deliver(sample);
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    sender: CaptureSender,
    source_id: String,
) -> CaptureResult<cpal::Stream> {
    let stream_config: cpal::StreamConfig = config.clone().into();
    let sample_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels;
    let clock = sender.clock();

    let err_sender = sender.clone();
    let err_fn = move |err: cpal::StreamError| {
        err_sender.fail(&source_id, CaptureError::Failed(err.to_string()));
    };

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                deliver_chunk(&sender, clock, sample_rate, channels, data.to_vec());
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples = data.iter().map(|&s| s as f32 / 32768.0).collect();
                deliver_chunk(&sender, clock, sample_rate, channels, samples);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::Failed(format!(
                "Unsupported sample format: {:?}",
                other
            )))
        }
    }
    .map_err(|e| CaptureError::Failed(e.to_string()))?;

    Ok(stream)
}

#[async_trait]
impl CaptureSource for MicrophoneSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    async fn start(&mut self, sender: CaptureSender) -> CaptureResult<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyCapturing);
        }

        let (ready_tx, ready_rx) = oneshot::channel::<CaptureResult<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_id = self.device_id.clone();
        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let source_id = self.id.clone();

        let handle = std::thread::Builder::new().name(self.id.clone()).spawn(move || {
            let opened = find_device(device_id.as_deref()).and_then(|device| {
                let config = pick_config(&device, sample_rate, channels)?;
                tracing::info!(
                    "Microphone {}: {}Hz, {} channels",
                    device.name().unwrap_or_else(|_| "Unknown".to_string()),
                    config.sample_rate().0,
                    config.channels()
                );
                let stream = build_stream(&device, &config, sender, source_id)?;
                stream.play().map_err(|e| CaptureError::Failed(e.to_string()))?;
                Ok(stream)
            });

            match opened {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // park until stop() or the source is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })?;

        let ready = ready_rx
            .await
            .unwrap_or_else(|_| Err(CaptureError::Failed("microphone thread exited".to_string())));
        if let Err(e) = ready {
            let _ = handle.join();
            return Err(e);
        }

        self.running.store(true, Ordering::SeqCst);
        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        tracing::info!("Microphone capture started");
        Ok(())
    }

    async fn stop(&mut self) -> CaptureResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::NotCapturing);
        }

        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }

        tracing::info!("Microphone capture stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
