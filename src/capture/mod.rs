//! Screen-capture / AVI-writer pipeline: frame queue, pluggable
//! targets (numbered image sequence or a rotating AVI file), and the video
//! encoders that feed them.

pub mod avi;
pub mod encoders;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, RecvTimeoutError};

use crate::error::{CoreError, CoreResult};
use avi::{AudioFormat, AviWriter};
use encoders::{PixelFormat, VideoCodec, VideoEncoder};

/// One captured framebuffer, pushed by a device and consumed by the capture
/// thread.
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub fmt: PixelFormat,
    pub vsync_hz: f64,
}

/// Bounded SPSC-style frame queue; the capture thread pops with a
/// `2 x heartbeat` timeout.
pub struct FrameQueue {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        FrameQueue { tx, rx }
    }

    pub fn sender(&self) -> Sender<Frame> {
        self.tx.clone()
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFileFormat {
    Png,
    Jpeg,
}

/// Numbered PNG/JPEG files under a freshly-created `video_NNNN` directory.
pub struct ImageSequenceSink {
    dir: PathBuf,
    format: ImageFileFormat,
    next_index: u64,
}

impl ImageSequenceSink {
    pub fn create(parent: &Path, format: ImageFileFormat) -> CoreResult<Self> {
        let dir = next_numbered_dir(parent, "video_")?;
        std::fs::create_dir_all(&dir).map_err(|e| CoreError::host_io(dir.display().to_string(), e))?;
        Ok(ImageSequenceSink { dir, format, next_index: 0 })
    }

    pub fn write_frame(&mut self, frame: &Frame) -> CoreResult<()> {
        use image::{ImageBuffer, Rgba};
        let img: ImageBuffer<Rgba<u8>, &[u8]> =
            ImageBuffer::from_raw(frame.fmt.width, frame.fmt.height, &frame.pixels)
                .ok_or_else(|| CoreError::Decode { path: self.dir.clone(), reason: "bad frame dimensions".into() })?;
        let ext = match self.format {
            ImageFileFormat::Png => "png",
            ImageFileFormat::Jpeg => "jpg",
        };
        let path = self.dir.join(format!("{:06}.{ext}", self.next_index));
        img.save(&path).map_err(|e| CoreError::Decode { path: path.clone(), reason: e.to_string() })?;
        self.next_index += 1;
        Ok(())
    }
}

fn next_numbered_dir(parent: &Path, prefix: &str) -> CoreResult<PathBuf> {
    for n in 1..=9999u32 {
        let candidate = parent.join(format!("{prefix}{n:04}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(CoreError::ResourceExhaustion { what: "no free numbered capture directory".into() })
}

pub struct VideoFileSink {
    writer: AviWriter,
    encoder: VideoEncoder,
}

impl VideoFileSink {
    pub fn create(
        dir: &Path,
        rotation_index: u32,
        fmt: PixelFormat,
        fps: f64,
        codec: VideoCodec,
        quality: u32,
        audio: Option<AudioFormat>,
    ) -> CoreResult<Self> {
        let writer = AviWriter::create(dir, "video", rotation_index, fmt, fps, codec, audio)?;
        let encoder = VideoEncoder::new(codec, fmt, quality);
        Ok(VideoFileSink { writer, encoder })
    }

    pub fn write_frame(&mut self, pixels: &[u8]) -> CoreResult<()> {
        let encoded = self.encoder.encode(pixels)?;
        self.writer.write_video_frame(&encoded.data, encoded.keyframe)
    }

    pub fn write_audio(&mut self, pcm: &[u8]) -> CoreResult<()> {
        self.writer.write_audio_chunk(pcm)
    }

    pub fn close(self) -> CoreResult<()> {
        self.writer.close()
    }
}

/// Tagged-variant target.
pub enum CaptureTarget {
    ImageSequence(ImageSequenceSink),
    VideoFile(VideoFileSink),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoMode {
    pub width: u32,
    pub height: u32,
    pub vsync_hz: f64,
}

/// Owns the frame queue consumer side and the currently open target,
/// reopening on a size-limit rotation or a video-mode change.
pub struct CaptureController {
    pub queue: FrameQueue,
    target: Option<CaptureTarget>,
    dir: PathBuf,
    codec: VideoCodec,
    quality: u32,
    current_mode: Option<VideoMode>,
    recording: bool,
    next_video_index: u32,
}

impl CaptureController {
    pub fn new(queue_capacity: usize, dir: PathBuf, codec: VideoCodec, quality: u32) -> Self {
        CaptureController {
            queue: FrameQueue::new(queue_capacity),
            target: None,
            dir,
            codec,
            quality,
            current_mode: None,
            recording: false,
            next_video_index: 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn start_video_file(&mut self, audio: Option<AudioFormat>) -> CoreResult<()> {
        self.recording = true;
        self.current_mode = None;
        self.target = None;
        let _ = audio;
        Ok(())
    }

    pub fn start_image_sequence(&mut self, format: ImageFileFormat) -> CoreResult<()> {
        let sink = ImageSequenceSink::create(&self.dir, format)?;
        self.target = Some(CaptureTarget::ImageSequence(sink));
        self.recording = true;
        Ok(())
    }

    /// Reopens the target when the frame's resolution or vsync frequency
    /// differs from what the currently open file was created for (spec
    /// §4.9 "Video mode change... triggers rotation too").
    fn ensure_target_for(&mut self, frame: &Frame, audio: Option<AudioFormat>) -> CoreResult<()> {
        let mode = VideoMode { width: frame.fmt.width, height: frame.fmt.height, vsync_hz: frame.vsync_hz };
        let needs_new = match (&self.target, self.current_mode) {
            (Some(CaptureTarget::VideoFile(_)), Some(existing)) => existing != mode,
            (Some(CaptureTarget::VideoFile(_)), None) => false,
            _ => true,
        };
        if needs_new {
            if let Some(CaptureTarget::VideoFile(sink)) = self.target.take() {
                sink.close()?;
                self.next_video_index += 1;
            }
            let sink = VideoFileSink::create(
                &self.dir,
                self.next_video_index,
                frame.fmt,
                frame.vsync_hz.max(1.0),
                self.codec,
                self.quality,
                audio,
            )?;
            self.target = Some(CaptureTarget::VideoFile(sink));
            self.current_mode = Some(mode);
        }
        Ok(())
    }

    pub fn handle_frame(&mut self, frame: Frame) -> CoreResult<()> {
        if !self.recording {
            return Ok(());
        }
        match &mut self.target {
            Some(CaptureTarget::ImageSequence(sink)) => sink.write_frame(&frame),
            Some(CaptureTarget::VideoFile(_)) | None => {
                self.ensure_target_for(&frame, None)?;
                if let Some(CaptureTarget::VideoFile(sink)) = &mut self.target {
                    sink.write_frame(&frame.pixels)
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn write_audio_chunk(&mut self, pcm: &[u8]) -> CoreResult<()> {
        if let Some(CaptureTarget::VideoFile(sink)) = &mut self.target {
            sink.write_audio(pcm)?;
        }
        Ok(())
    }

    /// Stops recording, closing and flushing the index/fix-ups for any open
    /// AVI file.
    pub fn stop(&mut self) -> CoreResult<()> {
        self.recording = false;
        if let Some(CaptureTarget::VideoFile(sink)) = self.target.take() {
            sink.close()?;
        }
        self.current_mode = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(w: u32, h: u32) -> Frame {
        Frame { pixels: vec![0u8; (w * h * 4) as usize], fmt: PixelFormat { width: w, height: h, bytes_per_pixel: 4 }, vsync_hz: 60.0 }
    }

    #[test]
    fn frame_queue_pop_times_out_when_empty() {
        let q = FrameQueue::new(4);
        assert!(q.pop_timeout(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn frame_queue_delivers_pushed_frame() {
        let q = FrameQueue::new(4);
        q.sender().send(frame(4, 4)).unwrap();
        let got = q.pop_timeout(Duration::from_millis(50));
        assert!(got.is_some());
    }

    #[test]
    fn image_sequence_creates_freshly_numbered_directory() {
        let parent = tempfile::tempdir().unwrap();
        let mut controller = CaptureController::new(8, parent.path().to_path_buf(), VideoCodec::Bmp, 6);
        controller.start_image_sequence(ImageFileFormat::Png).unwrap();
        controller.handle_frame(frame(4, 4)).unwrap();
        assert!(parent.path().join("video_0001").join("000000.png").exists());
    }

    #[test]
    fn video_file_target_writes_frames_and_closes_cleanly() {
        let parent = tempfile::tempdir().unwrap();
        let mut controller = CaptureController::new(8, parent.path().to_path_buf(), VideoCodec::Bmp, 6);
        controller.start_video_file(None).unwrap();
        controller.handle_frame(frame(4, 4)).unwrap();
        controller.handle_frame(frame(4, 4)).unwrap();
        controller.stop().unwrap();
        assert!(parent.path().join("video_0000.avi").exists());
    }

    #[test]
    fn resolution_change_triggers_rotation_to_a_new_video_file() {
        let parent = tempfile::tempdir().unwrap();
        let mut controller = CaptureController::new(8, parent.path().to_path_buf(), VideoCodec::Bmp, 6);
        controller.start_video_file(None).unwrap();
        controller.handle_frame(frame(4, 4)).unwrap();
        controller.handle_frame(frame(8, 8)).unwrap();
        controller.stop().unwrap();
        assert!(parent.path().join("video_0000.avi").exists());
        assert!(parent.path().join("video_0001.avi").exists());
    }

    #[test]
    fn stopped_controller_drops_frames_silently() {
        let parent = tempfile::tempdir().unwrap();
        let mut controller = CaptureController::new(8, parent.path().to_path_buf(), VideoCodec::Bmp, 6);
        assert!(controller.handle_frame(frame(4, 4)).is_ok());
        assert!(!parent.path().join("video_0000.avi").exists());
    }
}
