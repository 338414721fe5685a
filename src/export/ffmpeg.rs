//! FFmpeg-backed segment sink, probe and concatenation
//!
//! Segments are encoded by an `ffmpeg` child fed raw BGRA frames over stdin.
//! Audio is spooled as raw f32le next to the segment and muxed in when the
//! segment finishes. Both tracks are written on their own threads so
//! `append` only ever queues.

use super::merge::{CompositionExporter, MediaProbe};
use super::types::{AudioLayout, Composition, MediaInfo, MergeError};
use crate::capture::{AdjustedSample, SamplePayload, TrackKind};
use crate::recorder::state::EncoderQuality;
use crate::recorder::sync::DropReason;
use crate::recorder::writer::{AppendOutcome, SegmentSink, SinkError, SinkFactory, VideoFormat};
use crate::utils::fs::{partial_path, remove_if_exists, sibling_with_suffix};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Sample rate every clip is resampled to when concatenation has to re-encode
const MERGE_SAMPLE_RATE: u32 = 48_000;

fn quiet_args() -> Vec<String> {
    ["-y", "-hide_banner", "-nostats", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn secs(duration: Duration) -> String {
    format!("{:.6}", duration.as_secs_f64())
}

/// Arguments for encoding raw BGRA frames from stdin into `output`
pub fn build_encode_args(format: VideoFormat, quality: EncoderQuality, output: &Path) -> Vec<String> {
    let mut args = quiet_args();
    args.extend([
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "bgra".to_string(),
        "-s".to_string(),
        format!("{}x{}", format.width, format.height),
        "-framerate".to_string(),
        format.fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        // yuv420p needs even dimensions
        "-vf".to_string(),
        "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        quality.h264_preset().to_string(),
        "-crf".to_string(),
        quality.crf().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Arguments for muxing the spooled audio with the encoded video
pub fn build_mux_args(video: &Path, audio: &Path, sample_rate: u32, channels: u16, output: &Path) -> Vec<String> {
    let mut args = quiet_args();
    args.extend([
        "-i".to_string(),
        video.to_string_lossy().to_string(),
        "-f".to_string(),
        "f32le".to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
        "-ac".to_string(),
        channels.to_string(),
        "-i".to_string(),
        audio.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Frame slot (at `fps`) that a session time falls into
pub fn frame_slot(session_time: Duration, fps: u32) -> u64 {
    (session_time.as_secs_f64() * fps as f64).round() as u64
}

/// Frame slot and stdin repeat count for a frame, or `None` when the frame
/// has the wrong size or its slot is already covered
pub fn place_frame(format: VideoFormat, slots_written: u64, session_time: Duration, width: u32, height: u32) -> Option<(u64, u64)> {
    if width != format.width || height != format.height {
        return None;
    }
    let slot = frame_slot(session_time, format.fps);
    if slot < slots_written {
        return None;
    }
    Some((slot, slot - slots_written + 1))
}

/// Audio placement for a chunk starting at `start_frame`
///
/// Returns `(pad, skip)`: silent frames to insert before the chunk, and
/// leading chunk frames to drop because they overlap what is already written.
pub fn align_audio(start_frame: u64, frames_written: u64) -> (u64, u64) {
    if start_frame >= frames_written {
        (start_frame - frames_written, 0)
    } else {
        (0, frames_written - start_frame)
    }
}

fn spool_path(segment: &Path, name: &str) -> PathBuf {
    let stem = segment
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "segment".to_string());
    segment.with_file_name(format!("{}.{}", stem, name))
}

/// Opens [`FfmpegSink`]s
pub struct FfmpegSinkFactory {
    ffmpeg_path: String,
    quality: EncoderQuality,
    queue_depth: usize,
}

impl FfmpegSinkFactory {
    pub fn new(ffmpeg_path: impl Into<String>, quality: EncoderQuality, queue_depth: usize) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            quality,
            queue_depth: queue_depth.max(1),
        }
    }
}

impl SinkFactory for FfmpegSinkFactory {
    fn open(&self, path: &Path, format: VideoFormat) -> Result<Box<dyn SegmentSink>, SinkError> {
        FfmpegSink::open(&self.ffmpeg_path, path, format, self.quality, self.queue_depth)
            .map(|sink| Box::new(sink) as Box<dyn SegmentSink>)
    }
}

struct VideoJob {
    data: Vec<u8>,
    repeat: u64,
}

struct AudioJob {
    pad_samples: usize,
    data: Vec<f32>,
}

#[derive(Debug, Clone, Copy)]
struct AudioTrack {
    sample_rate: u32,
    channels: u16,
    frames_written: u64,
}

/// Segment sink writing through an `ffmpeg` child process
pub struct FfmpegSink {
    ffmpeg_path: String,
    output: PathBuf,
    video_path: PathBuf,
    audio_path: PathBuf,
    format: VideoFormat,
    queue_depth: usize,
    process: Child,
    video_tx: Option<Sender<VideoJob>>,
    audio_tx: Option<Sender<AudioJob>>,
    video_thread: Option<JoinHandle<()>>,
    audio_thread: Option<JoinHandle<()>>,
    pending_video: Arc<AtomicUsize>,
    pending_audio: Arc<AtomicUsize>,
    error: Arc<Mutex<Option<String>>>,
    slots_written: u64,
    audio: Option<AudioTrack>,
}

impl FfmpegSink {
    /// Spawn the encoder for a new segment
    pub fn open(
        ffmpeg_path: &str,
        output: &Path,
        format: VideoFormat,
        quality: EncoderQuality,
        queue_depth: usize,
    ) -> Result<Self, SinkError> {
        let video_path = sibling_with_suffix(output, "video");
        let audio_path = spool_path(output, "audio.pcm");
        remove_if_exists(&video_path)?;
        remove_if_exists(&audio_path)?;

        let args = build_encode_args(format, quality, &video_path);
        tracing::info!("Starting FFmpeg segment encoder: {:?}", args);

        let mut process = Command::new(ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SinkError::Encoder(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| SinkError::Encoder("Failed to capture FFmpeg stdin".to_string()))?;

        let error = Arc::new(Mutex::new(None));
        let pending_video = Arc::new(AtomicUsize::new(0));
        let pending_audio = Arc::new(AtomicUsize::new(0));

        let (video_tx, video_rx) = mpsc::channel::<VideoJob>();
        let video_thread = {
            let error = error.clone();
            let pending = pending_video.clone();
            std::thread::Builder::new()
                .name("segment-video".to_string())
                .spawn(move || video_writer(stdin, video_rx, pending, error))?
        };

        let (audio_tx, audio_rx) = mpsc::channel::<AudioJob>();
        let audio_thread = {
            let error = error.clone();
            let pending = pending_audio.clone();
            let path = audio_path.clone();
            std::thread::Builder::new()
                .name("segment-audio".to_string())
                .spawn(move || audio_writer(path, audio_rx, pending, error))?
        };

        Ok(Self {
            ffmpeg_path: ffmpeg_path.to_string(),
            output: output.to_path_buf(),
            video_path,
            audio_path,
            format,
            queue_depth,
            process,
            video_tx: Some(video_tx),
            audio_tx: Some(audio_tx),
            video_thread: Some(video_thread),
            audio_thread: Some(audio_thread),
            pending_video,
            pending_audio,
            error,
            slots_written: 0,
            audio: None,
        })
    }

    fn check_error(&self) -> Result<(), SinkError> {
        match self.error.lock().as_ref() {
            Some(message) => Err(SinkError::Encoder(message.clone())),
            None => Ok(()),
        }
    }

    fn append_video(&mut self, sample: &AdjustedSample, width: u32, height: u32, data: &[u8]) -> Result<AppendOutcome, SinkError> {
        let Some((slot, repeat)) = place_frame(self.format, self.slots_written, sample.session_time, width, height) else {
            tracing::trace!(
                "Skipping {}x{} frame at {:?} in {}x{} segment",
                width,
                height,
                sample.session_time,
                self.format.width,
                self.format.height
            );
            return Ok(AppendOutcome::Dropped(DropReason::Skipped));
        };

        let tx = self
            .video_tx
            .as_ref()
            .ok_or_else(|| SinkError::Failed("video track closed".to_string()))?;
        self.pending_video.fetch_add(1, Ordering::SeqCst);
        tx.send(VideoJob {
            data: data.to_vec(),
            repeat,
        })
        .map_err(|_| SinkError::Encoder("video writer thread exited".to_string()))?;

        self.slots_written = slot + 1;
        Ok(AppendOutcome::Written)
    }

    fn append_audio(&mut self, sample: &AdjustedSample, sample_rate: u32, channels: u16, data: &[f32]) -> Result<AppendOutcome, SinkError> {
        let track = self.audio.get_or_insert(AudioTrack {
            sample_rate,
            channels,
            frames_written: 0,
        });
        if track.sample_rate != sample_rate || track.channels != channels || channels == 0 {
            tracing::debug!("Skipping audio buffer with changed format");
            return Ok(AppendOutcome::Dropped(DropReason::Skipped));
        }

        let channels = channels as usize;
        let chunk_frames = (data.len() / channels) as u64;
        let start_frame = (sample.session_time.as_secs_f64() * sample_rate as f64).round() as u64;
        let (pad, skip) = align_audio(start_frame, track.frames_written);
        if skip >= chunk_frames {
            return Ok(AppendOutcome::Dropped(DropReason::Skipped));
        }

        let kept = &data[(skip as usize * channels)..];
        track.frames_written += pad + (chunk_frames - skip);

        let tx = self
            .audio_tx
            .as_ref()
            .ok_or_else(|| SinkError::Failed("audio track closed".to_string()))?;
        self.pending_audio.fetch_add(1, Ordering::SeqCst);
        tx.send(AudioJob {
            pad_samples: pad as usize * channels,
            data: kept.to_vec(),
        })
        .map_err(|_| SinkError::Encoder("audio writer thread exited".to_string()))?;
        Ok(AppendOutcome::Written)
    }

    /// Close both writer threads and wait for them
    fn close_tracks(&mut self) {
        self.video_tx.take();
        self.audio_tx.take();
        for handle in [self.video_thread.take(), self.audio_thread.take()].into_iter().flatten() {
            if handle.join().is_err() {
                self.error
                    .lock()
                    .get_or_insert_with(|| "writer thread panicked".to_string());
            }
        }
    }

    fn remove_spool(&self) {
        for path in [&self.video_path, &self.audio_path] {
            if let Err(e) = remove_if_exists(path) {
                tracing::warn!("Failed to remove {:?}: {}", path, e);
            }
        }
    }

    fn mux(&self, audio: AudioTrack) -> Result<(), SinkError> {
        let args = build_mux_args(
            &self.video_path,
            &self.audio_path,
            audio.sample_rate,
            audio.channels,
            &self.output,
        );
        tracing::debug!("Muxing segment audio: {:?}", args);

        let output = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| SinkError::Encoder(format!("Failed to start FFmpeg mux: {}", e)))?;

        if !output.status.success() {
            return Err(SinkError::Encoder(format!(
                "FFmpeg mux failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<(), SinkError> {
        self.close_tracks();
        self.check_error()?;

        let status = self.process.wait()?;
        if !status.success() {
            return Err(SinkError::Encoder(format!("FFmpeg encoder exited with {}", status)));
        }

        match self.audio {
            Some(audio) if audio.frames_written > 0 => self.mux(audio),
            _ => {
                std::fs::rename(&self.video_path, &self.output)?;
                Ok(())
            }
        }
    }
}

fn video_writer(stdin: ChildStdin, jobs: mpsc::Receiver<VideoJob>, pending: Arc<AtomicUsize>, error: Arc<Mutex<Option<String>>>) {
    let mut stdin = BufWriter::new(stdin);
    for job in jobs {
        let mut result = Ok(());
        for _ in 0..job.repeat {
            result = stdin.write_all(&job.data);
            if result.is_err() {
                break;
            }
        }
        pending.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = result {
            *error.lock() = Some(format!("Failed to write frame to FFmpeg: {}", e));
            return;
        }
    }
    if let Err(e) = stdin.flush() {
        error.lock().get_or_insert_with(|| format!("Failed to flush FFmpeg stdin: {}", e));
    }
    // dropping stdin signals end of stream to the encoder
}

fn audio_writer(path: PathBuf, jobs: mpsc::Receiver<AudioJob>, pending: Arc<AtomicUsize>, error: Arc<Mutex<Option<String>>>) {
    let mut file: Option<BufWriter<File>> = None;
    for job in jobs {
        let result = (|| -> std::io::Result<()> {
            if file.is_none() {
                file = Some(BufWriter::new(File::create(&path)?));
            }
            if let Some(out) = file.as_mut() {
                let silence = vec![0u8; job.pad_samples * 4];
                out.write_all(&silence)?;
                for value in &job.data {
                    out.write_all(&value.to_le_bytes())?;
                }
            }
            Ok(())
        })();
        pending.fetch_sub(1, Ordering::SeqCst);
        if let Err(e) = result {
            *error.lock() = Some(format!("Failed to spool audio: {}", e));
            return;
        }
    }
    if let Some(mut out) = file {
        if let Err(e) = out.flush() {
            error.lock().get_or_insert_with(|| format!("Failed to flush audio spool: {}", e));
        }
    }
}

impl SegmentSink for FfmpegSink {
    fn is_ready(&self, track: TrackKind) -> bool {
        let pending = match track {
            TrackKind::Video => &self.pending_video,
            TrackKind::Audio => &self.pending_audio,
        };
        pending.load(Ordering::SeqCst) < self.queue_depth
    }

    fn append(&mut self, sample: &AdjustedSample) -> Result<AppendOutcome, SinkError> {
        self.check_error()?;
        match &sample.sample.payload {
            SamplePayload::Video { width, height, data } => self.append_video(sample, *width, *height, data),
            SamplePayload::Audio {
                sample_rate,
                channels,
                data,
            } => self.append_audio(sample, *sample_rate, *channels, data),
        }
    }

    fn finish(mut self: Box<Self>) -> Result<(), SinkError> {
        let result = self.complete();
        if result.is_err() {
            let _ = self.process.kill();
            let _ = self.process.wait();
        }
        self.remove_spool();
        tracing::info!(
            "FFmpeg segment encoder finished: {} frame slots written",
            self.slots_written
        );
        result
    }

    fn abort(mut self: Box<Self>) {
        let _ = self.process.kill();
        self.close_tracks();
        let _ = self.process.wait();
        self.remove_spool();
        if let Err(e) = remove_if_exists(&self.output) {
            tracing::warn!("Failed to remove {:?}: {}", self.output, e);
        }
    }
}

/// Parse `ffprobe -of json` output with format duration and stream types
pub fn parse_probe_output(json: &str) -> Result<MediaInfo, String> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| format!("Failed to parse ffprobe output: {}", e))?;

    let duration_secs = value
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|d| d.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| "No duration in ffprobe output".to_string())?;

    let streams = value
        .get("streams")
        .and_then(|s| s.as_array())
        .map(|s| s.as_slice())
        .unwrap_or(&[]);
    let has_stream = |kind: &str| {
        streams
            .iter()
            .any(|s| s.get("codec_type").and_then(|t| t.as_str()) == Some(kind))
    };

    Ok(MediaInfo {
        duration: Duration::from_secs_f64(duration_secs),
        has_video: has_stream("video"),
        has_audio: has_stream("audio"),
    })
}

/// Probe using `ffprobe`
pub struct FfmpegProbe {
    ffprobe_path: String,
}

impl FfmpegProbe {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfmpegProbe {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, MergeError> {
        let probe_error = |message: String| MergeError::Probe {
            path: path.to_path_buf(),
            message,
        };

        let output = tokio::process::Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration:stream=codec_type",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| probe_error(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(probe_error(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout)).map_err(probe_error)
    }
}

/// Escape a path for an ffconcat `file` line
fn concat_quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "'\\''"))
}

/// ffconcat list placing each clip right after the previous one
pub fn build_concat_list(composition: &Composition) -> String {
    let mut list = String::from("ffconcat version 1.0\n");
    for clip in composition.clips() {
        list.push_str(&format!("file {}\n", concat_quote(&clip.source)));
        list.push_str(&format!("duration {}\n", secs(clip.duration)));
    }
    list
}

/// Stream-copy concatenation through the concat demuxer
pub fn build_concat_demuxer_args(list: &Path, include_audio: bool, output: &Path) -> Vec<String> {
    let mut args = quiet_args();
    args.extend([
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list.to_string_lossy().to_string(),
        "-map".to_string(),
        "0:v".to_string(),
    ]);
    if include_audio {
        args.extend(["-map".to_string(), "0:a".to_string()]);
    }
    args.extend([
        "-c".to_string(),
        "copy".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Filter graph concatenating every clip, with generated silence standing in
/// for clips that have no audio
pub fn build_concat_filter(composition: &Composition) -> String {
    let mut parts = Vec::new();
    let mut pads = String::new();

    for (i, clip) in composition.clips().iter().enumerate() {
        parts.push(format!("[{i}:v:0]setpts=PTS-STARTPTS[v{i}]"));
        if clip.has_audio {
            parts.push(format!(
                "[{i}:a:0]aresample={rate},aformat=sample_fmts=fltp:channel_layouts=stereo,asetpts=PTS-STARTPTS[a{i}]",
                rate = MERGE_SAMPLE_RATE
            ));
        } else {
            parts.push(format!(
                "anullsrc=r={rate}:cl=stereo,atrim=duration={dur},aformat=sample_fmts=fltp[a{i}]",
                rate = MERGE_SAMPLE_RATE,
                dur = secs(clip.duration)
            ));
        }
        pads.push_str(&format!("[v{i}][a{i}]"));
    }

    parts.push(format!(
        "{}concat=n={}:v=1:a=1[vout][aout]",
        pads,
        composition.clips().len()
    ));
    parts.join(";")
}

/// Re-encoding concatenation for compositions with mixed audio
pub fn build_concat_filter_args(composition: &Composition, quality: EncoderQuality, output: &Path) -> Vec<String> {
    let mut args = quiet_args();
    for clip in composition.clips() {
        args.extend(["-i".to_string(), clip.source.to_string_lossy().to_string()]);
    }
    args.extend([
        "-filter_complex".to_string(),
        build_concat_filter(composition),
        "-map".to_string(),
        "[vout]".to_string(),
        "-map".to_string(),
        "[aout]".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        quality.h264_preset().to_string(),
        "-crf".to_string(),
        quality.crf().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Exporter running `ffmpeg` concatenation
pub struct FfmpegExporter {
    ffmpeg_path: String,
    quality: EncoderQuality,
}

impl FfmpegExporter {
    pub fn new(ffmpeg_path: impl Into<String>, quality: EncoderQuality) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            quality,
        }
    }

    async fn run(&self, args: &[String]) -> Result<(), MergeError> {
        tracing::info!("Starting FFmpeg concatenation: {:?}", args);
        let output = tokio::process::Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MergeError::Export(format!("Failed to start FFmpeg: {}", e)))?;

        if !output.status.success() {
            return Err(MergeError::Export(format!(
                "FFmpeg concatenation failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CompositionExporter for FfmpegExporter {
    async fn export(&self, composition: &Composition, destination: &Path) -> Result<(), MergeError> {
        let partial = partial_path(destination);
        remove_if_exists(&partial)?;

        let result = match composition.audio_layout() {
            AudioLayout::Mixed => {
                let args = build_concat_filter_args(composition, self.quality, &partial);
                self.run(&args).await
            }
            layout => {
                let list = spool_path(destination, "concat.txt");
                tokio::fs::write(&list, build_concat_list(composition)).await?;
                let args = build_concat_demuxer_args(&list, layout == AudioLayout::Uniform, &partial);
                let result = self.run(&args).await;
                let _ = remove_if_exists(&list);
                result
            }
        };

        if let Err(e) = result {
            let _ = remove_if_exists(&partial);
            return Err(e);
        }

        tokio::fs::rename(&partial, destination).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composition(audio: &[bool]) -> Composition {
        let mut composition = Composition::new();
        for (i, has_audio) in audio.iter().enumerate() {
            composition.insert(
                i,
                Path::new(&format!("/rec/out.segment-{}.mp4", i)),
                &MediaInfo {
                    duration: Duration::from_millis(1_500),
                    has_video: true,
                    has_audio: *has_audio,
                },
            );
        }
        composition
    }

    #[test]
    fn test_encode_args_describe_raw_input() {
        let format = VideoFormat {
            width: 1920,
            height: 1080,
            fps: 30,
        };
        let args = build_encode_args(format, EncoderQuality::Medium, Path::new("/rec/a.video.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt bgra -s 1920x1080 -framerate 30 -i -"));
        assert!(joined.contains("-crf 23"));
        assert_eq!(args.last().unwrap(), "/rec/a.video.mp4");
    }

    #[test]
    fn test_mux_args_copy_video() {
        let args = build_mux_args(
            Path::new("v.mp4"),
            Path::new("a.pcm"),
            44_100,
            2,
            Path::new("out.mp4"),
        );
        let joined = args.join(" ");
        assert!(joined.contains("-f f32le -ar 44100 -ac 2 -i a.pcm"));
        assert!(joined.contains("-c:v copy"));
    }

    #[test]
    fn test_frame_slot() {
        assert_eq!(frame_slot(Duration::ZERO, 30), 0);
        assert_eq!(frame_slot(Duration::from_millis(33), 30), 1);
        assert_eq!(frame_slot(Duration::from_millis(1_000), 30), 30);
    }

    #[test]
    fn test_place_frame_skips_covered_slots_and_wrong_sizes() {
        let format = VideoFormat {
            width: 4,
            height: 2,
            fps: 30,
        };
        assert_eq!(place_frame(format, 0, Duration::ZERO, 4, 2), Some((0, 1)));
        // next slot after a 100 ms hole repeats the frame to fill it
        assert_eq!(place_frame(format, 1, Duration::from_millis(100), 4, 2), Some((3, 3)));
        // two frames landing in the same slot
        assert_eq!(place_frame(format, 4, Duration::from_millis(100), 4, 2), None);
        assert_eq!(place_frame(format, 4, Duration::from_millis(133), 8, 2), None);
    }

    #[test]
    fn test_align_audio() {
        assert_eq!(align_audio(480, 0), (480, 0));
        assert_eq!(align_audio(480, 480), (0, 0));
        assert_eq!(align_audio(400, 480), (0, 80));
    }

    #[test]
    fn test_concat_list_durations_and_quoting() {
        let mut composition = composition(&[true]);
        composition.insert(
            1,
            Path::new("/rec/it's.mp4"),
            &MediaInfo {
                duration: Duration::from_millis(250),
                has_video: true,
                has_audio: true,
            },
        );
        let list = build_concat_list(&composition);
        assert!(list.starts_with("ffconcat version 1.0\n"));
        assert!(list.contains("file '/rec/out.segment-0.mp4'\nduration 1.500000\n"));
        assert!(list.contains("file '/rec/it'\\''s.mp4'\nduration 0.250000\n"));
    }

    #[test]
    fn test_demuxer_args_map_audio_only_when_present() {
        let with_audio = build_concat_demuxer_args(Path::new("l.txt"), true, Path::new("o.mp4")).join(" ");
        assert!(with_audio.contains("-map 0:v -map 0:a -c copy"));

        let silent = build_concat_demuxer_args(Path::new("l.txt"), false, Path::new("o.mp4")).join(" ");
        assert!(!silent.contains("0:a"));
    }

    #[test]
    fn test_filter_fills_missing_audio_with_silence() {
        let filter = build_concat_filter(&composition(&[true, false, true]));
        assert!(filter.contains("[0:a:0]aresample=48000"));
        assert!(filter.contains("anullsrc=r=48000:cl=stereo,atrim=duration=1.500000"));
        assert!(!filter.contains("[1:a:0]"));
        assert!(filter.ends_with("[v0][a0][v1][a1][v2][a2]concat=n=3:v=1:a=1[vout][aout]"));
    }

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{
            "streams": [ { "codec_type": "video" }, { "codec_type": "audio" } ],
            "format": { "duration": "12.500000" }
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.duration, Duration::from_millis(12_500));
        assert!(info.has_video);
        assert!(info.has_audio);
    }

    #[test]
    fn test_parse_probe_output_without_duration() {
        let json = r#"{ "streams": [ { "codec_type": "video" } ], "format": {} }"#;
        assert!(parse_probe_output(json).is_err());
    }

    #[test]
    fn test_spool_path() {
        assert_eq!(
            spool_path(Path::new("/rec/out.segment-1.mp4"), "audio.pcm"),
            PathBuf::from("/rec/out.segment-1.audio.pcm")
        );
    }
}
