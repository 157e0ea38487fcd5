//! Video encoders: a small tagged-variant hierarchy instead of a
//! trait object per the redesign flag favoring inlining of the hot compress
//! path.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
}

impl PixelFormat {
    pub fn frame_bytes(&self) -> usize {
        (self.width * self.height * self.bytes_per_pixel) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Bmp,
    MotionPng,
    Zmbv,
}

impl VideoCodec {
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            VideoCodec::Bmp => *b"DIB ",
            VideoCodec::MotionPng => *b"MPNG",
            VideoCodec::Zmbv => *b"ZMBV",
        }
    }
}

pub struct CompressedFrame {
    pub data: Vec<u8>,
    pub keyframe: bool,
}

/// A run of `compress_lines` calls between `prepare_frame`/`finish_frame`
/// accumulates scanlines; `finish_frame` hands back the encoded bytes.
pub enum VideoEncoder {
    Bmp { fmt: PixelFormat },
    MotionPng { fmt: PixelFormat },
    Zmbv { fmt: PixelFormat, previous: Option<Vec<u8>>, frames_since_keyframe: u32, quality: u32 },
}

const ZMBV_KEYFRAME_INTERVAL: u32 = 300;

impl VideoEncoder {
    pub fn new(codec: VideoCodec, fmt: PixelFormat, quality: u32) -> Self {
        match codec {
            VideoCodec::Bmp => VideoEncoder::Bmp { fmt },
            VideoCodec::MotionPng => VideoEncoder::MotionPng { fmt },
            VideoCodec::Zmbv => VideoEncoder::Zmbv { fmt, previous: None, frames_since_keyframe: 0, quality },
        }
    }

    pub fn fmt(&self) -> PixelFormat {
        match self {
            VideoEncoder::Bmp { fmt } | VideoEncoder::MotionPng { fmt } | VideoEncoder::Zmbv { fmt, .. } => *fmt,
        }
    }

    /// Worst-case compressed size for one frame: raw size plus a small per-pixel-row slack for
    /// BMP/MPNG headers, or raw size for ZMBV (an uncompressible frame
    /// degrades to the XOR-delta copy, never larger than the source).
    pub fn needed_buf_size(&self) -> usize {
        let fmt = self.fmt();
        fmt.frame_bytes() + fmt.height as usize * 4 + 64
    }

    pub fn request_keyframe(&mut self) {
        if let VideoEncoder::Zmbv { frames_since_keyframe, .. } = self {
            *frames_since_keyframe = ZMBV_KEYFRAME_INTERVAL;
        }
    }

    /// Encodes one full frame of packed pixel data.
    pub fn encode(&mut self, frame: &[u8]) -> CoreResult<CompressedFrame> {
        let fmt = self.fmt();
        if frame.len() != fmt.frame_bytes() {
            return Err(CoreError::Decode {
                path: "<capture frame>".into(),
                reason: format!("frame is {} bytes, expected {}", frame.len(), fmt.frame_bytes()),
            });
        }
        match self {
            VideoEncoder::Bmp { .. } => Ok(CompressedFrame { data: frame.to_vec(), keyframe: true }),
            VideoEncoder::MotionPng { fmt } => encode_motion_png(*fmt, frame),
            VideoEncoder::Zmbv { fmt, previous, frames_since_keyframe, quality } => {
                encode_zmbv(*fmt, frame, previous, frames_since_keyframe, *quality)
            }
        }
    }
}

fn encode_motion_png(fmt: PixelFormat, frame: &[u8]) -> CoreResult<CompressedFrame> {
    use image::{ImageBuffer, Rgba};
    let img: ImageBuffer<Rgba<u8>, &[u8]> = ImageBuffer::from_raw(fmt.width, fmt.height, frame)
        .ok_or_else(|| CoreError::Decode { path: "<capture frame>".into(), reason: "bad frame dimensions".into() })?;
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .map_err(|e| CoreError::Decode { path: "<capture frame>".into(), reason: e.to_string() })?;
    Ok(CompressedFrame { data: out.into_inner(), keyframe: true })
}

/// XOR-delta against the previous frame, deflate-compressed. Keyframes (every 300 frames, or on
/// request) encode the raw frame instead of a delta.
fn encode_zmbv(
    fmt: PixelFormat,
    frame: &[u8],
    previous: &mut Option<Vec<u8>>,
    frames_since_keyframe: &mut u32,
    quality: u32,
) -> CoreResult<CompressedFrame> {
    let is_keyframe = previous.is_none() || *frames_since_keyframe >= ZMBV_KEYFRAME_INTERVAL;
    let payload: Vec<u8> = if is_keyframe {
        frame.to_vec()
    } else {
        let prev = previous.as_ref().unwrap();
        frame.iter().zip(prev.iter()).map(|(a, b)| a ^ b).collect()
    };

    let level = Compression::new(quality.min(9));
    let mut enc = ZlibEncoder::new(Vec::new(), level);
    enc.write_all(&payload).map_err(|e| CoreError::host_io("zmbv deflate stream", e))?;
    let compressed = enc.finish().map_err(|e| CoreError::host_io("zmbv deflate stream", e))?;

    *previous = Some(frame.to_vec());
    *frames_since_keyframe = if is_keyframe { 0 } else { *frames_since_keyframe + 1 };
    let _ = fmt;

    Ok(CompressedFrame { data: compressed, keyframe: is_keyframe })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt() -> PixelFormat {
        PixelFormat { width: 4, height: 4, bytes_per_pixel: 4 }
    }

    #[test]
    fn bmp_encoder_passes_frame_through_unchanged() {
        let mut enc = VideoEncoder::new(VideoCodec::Bmp, fmt(), 0);
        let frame = vec![7u8; fmt().frame_bytes()];
        let out = enc.encode(&frame).unwrap();
        assert!(out.keyframe);
        assert_eq!(out.data, frame);
    }

    #[test]
    fn zmbv_first_frame_is_always_a_keyframe() {
        let mut enc = VideoEncoder::new(VideoCodec::Zmbv, fmt(), 6);
        let frame = vec![0u8; fmt().frame_bytes()];
        let out = enc.encode(&frame).unwrap();
        assert!(out.keyframe);
    }

    #[test]
    fn zmbv_repeated_identical_frames_are_not_keyframes() {
        let mut enc = VideoEncoder::new(VideoCodec::Zmbv, fmt(), 6);
        let frame = vec![3u8; fmt().frame_bytes()];
        let _first = enc.encode(&frame).unwrap();
        let second = enc.encode(&frame).unwrap();
        assert!(!second.keyframe);
    }

    #[test]
    fn zmbv_inserts_keyframe_every_300_frames() {
        let mut enc = VideoEncoder::new(VideoCodec::Zmbv, fmt(), 6);
        let frame = vec![1u8; fmt().frame_bytes()];
        let mut last_keyframe = false;
        for _ in 0..301 {
            last_keyframe = enc.encode(&frame).unwrap().keyframe;
        }
        assert!(last_keyframe);
    }

    #[test]
    fn wrong_sized_frame_is_a_decode_error() {
        let mut enc = VideoEncoder::new(VideoCodec::Bmp, fmt(), 0);
        let result = enc.encode(&[0u8; 3]);
        assert!(result.is_err());
    }
}
