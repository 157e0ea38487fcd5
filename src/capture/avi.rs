//! RIFF/AVI container writer: streams
//! `LIST/hdrl`, `LIST/INFO`, `LIST/movi`, then `idx1`, with size-limit
//! rotation before the 4 GiB hard cap.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};
use super::encoders::{PixelFormat, VideoCodec};

/// `2^32 - 1`, with slack reserved for the next chunk + index
/// growth before the hard cap is reached.
pub const AVI_HARD_LIMIT_BYTES: u64 = u32::MAX as u64;
const ROTATION_SLACK_BYTES: u64 = 8 * 1024 * 1024;

const FLAG_HASINDEX: u32 = 0x0000_0010;
const FLAG_ISINTERLEAVED: u32 = 0x0000_0100;
const FLAG_TRUSTCKTYPE: u32 = 0x0000_0800;
const FLAG_WASCAPTUREFILE: u32 = 0x0001_0000;
const AVIIF_KEYFRAME: u32 = 0x0000_0010;

#[derive(Debug, Clone, Copy)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

struct IndexEntry {
    fourcc: [u8; 4],
    flags: u32,
    movi_offset: u32,
    size: u32,
}

/// One open AVI file's accounting; `AviWriter` owns the handle for the
/// file's lifetime.
pub struct AviWriter {
    dir: PathBuf,
    base_name: String,
    rotation_index: u32,
    file: File,
    fmt: PixelFormat,
    fps: f64,
    codec_fourcc: [u8; 4],
    audio: Option<AudioFormat>,
    frame_count: u32,
    audio_sample_count: u64,
    index: Vec<IndexEntry>,
    movi_list_offset: u64,
    avih_frame_count_offset: u64,
    current_size: u64,
}

fn fourcc(tag: &[u8; 4]) -> [u8; 4] {
    *tag
}

fn write_chunk_header(out: &mut impl Write, tag: &[u8; 4], size: u32) -> std::io::Result<()> {
    out.write_all(tag)?;
    out.write_all(&size.to_le_bytes())
}

impl AviWriter {
    /// Opens `{dir}/{base_name}_{rotation_index:04}.avi` and writes the
    /// header placeholder (`avih`, `strh`/`strf` per stream, `LIST/INFO`),
    /// leaving `LIST/movi`'s size to be patched on close.
    pub fn create(
        dir: &Path,
        base_name: &str,
        rotation_index: u32,
        fmt: PixelFormat,
        fps: f64,
        codec: VideoCodec,
        audio: Option<AudioFormat>,
    ) -> CoreResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| CoreError::host_io(dir.display().to_string(), e))?;
        let path = dir.join(format!("{base_name}_{rotation_index:04}.avi"));
        let file = File::create(&path).map_err(|e| CoreError::host_io(path.display().to_string(), e))?;

        let mut writer = AviWriter {
            dir: dir.to_path_buf(),
            base_name: base_name.to_string(),
            rotation_index,
            file,
            fmt,
            fps,
            codec_fourcc: codec.fourcc(),
            audio,
            frame_count: 0,
            audio_sample_count: 0,
            index: Vec::new(),
            movi_list_offset: 0,
            avih_frame_count_offset: 0,
            current_size: 0,
        };
        writer.write_header()?;
        Ok(writer)
    }

    fn write_header(&mut self) -> CoreResult<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&0u32.to_le_bytes()); // patched on close
        buf.extend_from_slice(b"AVI ");

        let us_per_frame = (1_000_000.0 / self.fps) as u32;
        let mut avih = Vec::new();
        avih.extend_from_slice(&us_per_frame.to_le_bytes());
        avih.extend_from_slice(&0u32.to_le_bytes()); // max bytes per sec
        avih.extend_from_slice(&0u32.to_le_bytes()); // padding granularity
        avih.extend_from_slice(
            &(FLAG_HASINDEX | FLAG_ISINTERLEAVED | FLAG_TRUSTCKTYPE | FLAG_WASCAPTUREFILE).to_le_bytes(),
        );
        avih.extend_from_slice(&0u32.to_le_bytes()); // total frames, patched on close
        avih.extend_from_slice(&0u32.to_le_bytes()); // initial frames
        avih.extend_from_slice(&(if self.audio.is_some() { 2u32 } else { 1u32 }).to_le_bytes());
        avih.extend_from_slice(&0u32.to_le_bytes()); // suggested buffer size
        avih.extend_from_slice(&self.fmt.width.to_le_bytes());
        avih.extend_from_slice(&self.fmt.height.to_le_bytes());
        avih.extend_from_slice(&[0u8; 16]); // reserved

        let mut hdrl_ordered = Vec::new();
        hdrl_ordered.extend_from_slice(b"hdrl");
        append_chunk(&mut hdrl_ordered, b"avih", &avih);
        // "hdrl"(4) + "avih" tag(4) + size(4) precede the data; total-frames
        // is the 5th u32 field (after us_per_frame/max_bytes_per_sec/padding/flags).
        let avih_frame_count_in_hdrl: u64 = 4 + 4 + 4 + (4 * 4);
        append_list(&mut hdrl_ordered, b"strl", &self.video_stream_list(us_per_frame));
        if let Some(audio) = self.audio {
            append_list(&mut hdrl_ordered, b"strl", &audio_stream_list(audio));
        }
        // buf currently holds "RIFF" + size + "AVI "; the LIST chunk for
        // hdrl starts right after, with its own tag+size before the body.
        let hdrl_list_start = buf.len() as u64;
        self.avih_frame_count_offset = hdrl_list_start + 4 + 4 + avih_frame_count_in_hdrl as u64;
        append_list(&mut buf, b"LIST", &hdrl_ordered);

        let mut info = Vec::new();
        info.extend_from_slice(b"INFO");
        append_chunk(&mut info, b"ISFT", b"ps1-core capture\0");
        append_list(&mut buf, b"LIST", &info);

        // LIST/movi header only; the body streams via write_video_frame /
        // write_audio_chunk and the size is patched on close.
        self.movi_list_offset = buf.len() as u64;
        buf.extend_from_slice(b"LIST");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(b"movi");

        self.file.write_all(&buf).map_err(|e| CoreError::host_io("avi header", e))?;
        self.current_size = buf.len() as u64;
        Ok(())
    }

    fn video_stream_list(&self, us_per_frame: u32) -> Vec<u8> {
        let mut strl = Vec::new();
        let mut strh = Vec::new();
        strh.extend_from_slice(b"vids");
        strh.extend_from_slice(&self.codec_fourcc);
        strh.extend_from_slice(&0u32.to_le_bytes()); // flags
        strh.extend_from_slice(&0u16.to_le_bytes()); // priority
        strh.extend_from_slice(&0u16.to_le_bytes()); // language
        strh.extend_from_slice(&0u32.to_le_bytes()); // initial frames
        strh.extend_from_slice(&us_per_frame.to_le_bytes()); // scale
        strh.extend_from_slice(&1_000_000u32.to_le_bytes()); // rate
        strh.extend_from_slice(&0u32.to_le_bytes()); // start
        strh.extend_from_slice(&0u32.to_le_bytes()); // length, patched on close
        strh.extend_from_slice(&0u32.to_le_bytes()); // suggested buffer size
        strh.extend_from_slice(&(-1i32).to_le_bytes()); // quality
        strh.extend_from_slice(&0u32.to_le_bytes()); // sample size
        append_chunk(&mut strl, b"strh", &strh);

        let mut strf = Vec::new();
        strf.extend_from_slice(&40u32.to_le_bytes()); // biSize
        strf.extend_from_slice(&(self.fmt.width as i32).to_le_bytes());
        strf.extend_from_slice(&(self.fmt.height as i32).to_le_bytes());
        strf.extend_from_slice(&1u16.to_le_bytes()); // planes
        strf.extend_from_slice(&((self.fmt.bytes_per_pixel * 8) as u16).to_le_bytes());
        strf.extend_from_slice(&self.codec_fourcc);
        strf.extend_from_slice(&(self.fmt.frame_bytes() as u32).to_le_bytes());
        strf.extend_from_slice(&[0u8; 16]); // resolution + color table fields
        append_chunk(&mut strl, b"strf", &strf);
        strl
    }

    /// Projects the size after writing `extra_bytes` and rotates to a new
    /// numbered file first if that would cross the limit minus slack
    ///; never drops a frame at rotation.
    fn ensure_room_for(&mut self, extra_bytes: u64) -> CoreResult<()> {
        let projected = self.current_size + extra_bytes + self.projected_index_bytes();
        if projected >= AVI_HARD_LIMIT_BYTES.saturating_sub(ROTATION_SLACK_BYTES) {
            self.rotate()?;
        }
        Ok(())
    }

    fn projected_index_bytes(&self) -> u64 {
        16 + (self.index.len() as u64 + 1) * 16
    }

    fn rotate(&mut self) -> CoreResult<()> {
        self.finish_file()?;
        self.rotation_index += 1;
        let path = self.dir.join(format!("{}_{:04}.avi", self.base_name, self.rotation_index));
        self.file = File::create(&path).map_err(|e| CoreError::host_io(path.display().to_string(), e))?;
        self.frame_count = 0;
        self.audio_sample_count = 0;
        self.index.clear();
        self.current_size = 0;
        self.write_header()
    }

    pub fn write_video_frame(&mut self, data: &[u8], keyframe: bool) -> CoreResult<()> {
        let tag = fourcc(b"00dc");
        let padded = data.len() + (data.len() % 2);
        self.ensure_room_for(8 + padded as u64)?;
        let offset = (self.current_size - self.movi_list_offset - 8) as u32;
        write_chunk(&mut self.file, &tag, data)?;
        self.current_size += 8 + padded as u64;
        self.frame_count += 1;
        self.index.push(IndexEntry {
            fourcc: tag,
            flags: if keyframe { AVIIF_KEYFRAME } else { 0 },
            movi_offset: offset,
            size: data.len() as u32,
        });
        Ok(())
    }

    pub fn write_audio_chunk(&mut self, data: &[u8]) -> CoreResult<()> {
        let tag = fourcc(b"01wb");
        let padded = data.len() + (data.len() % 2);
        self.ensure_room_for(8 + padded as u64)?;
        let offset = (self.current_size - self.movi_list_offset - 8) as u32;
        write_chunk(&mut self.file, &tag, data)?;
        self.current_size += 8 + padded as u64;
        if let Some(audio) = self.audio {
            self.audio_sample_count += data.len() as u64 / (audio.channels as u64 * (audio.bits_per_sample as u64 / 8));
        }
        self.index.push(IndexEntry { fourcc: tag, flags: AVIIF_KEYFRAME, movi_offset: offset, size: data.len() as u32 });
        Ok(())
    }

    /// Writes `idx1` and patches the RIFF/`movi`/`avih` size fields.
    fn finish_file(&mut self) -> CoreResult<()> {
        let mut idx1 = Vec::new();
        for entry in &self.index {
            idx1.extend_from_slice(&entry.fourcc);
            idx1.extend_from_slice(&entry.flags.to_le_bytes());
            idx1.extend_from_slice(&entry.movi_offset.to_le_bytes());
            idx1.extend_from_slice(&entry.size.to_le_bytes());
        }
        let mut chunk = Vec::new();
        append_chunk(&mut chunk, b"idx1", &idx1);
        self.file.write_all(&chunk).map_err(|e| CoreError::host_io("avi idx1", e))?;
        self.current_size += chunk.len() as u64;

        let movi_size = (self.current_size - self.movi_list_offset - 8) as u32;
        self.patch_u32(self.movi_list_offset + 4, movi_size)?;
        self.patch_u32(4, (self.current_size - 8) as u32)?;
        self.patch_u32(self.avih_frame_count_offset, self.frame_count)?;

        self.check_limit()?;
        self.file.flush().map_err(|e| CoreError::host_io("avi flush", e))
    }

    fn patch_u32(&mut self, offset: u64, value: u32) -> CoreResult<()> {
        self.file.seek(SeekFrom::Start(offset)).map_err(|e| CoreError::host_io("avi patch seek", e))?;
        self.file.write_all(&value.to_le_bytes()).map_err(|e| CoreError::host_io("avi patch write", e))?;
        self.file.seek(SeekFrom::End(0)).map_err(|e| CoreError::host_io("avi patch seek back", e))?;
        Ok(())
    }

    fn check_limit(&self) -> CoreResult<()> {
        if self.current_size > AVI_HARD_LIMIT_BYTES {
            return Err(CoreError::ContainerOverflow { projected: self.current_size, limit: AVI_HARD_LIMIT_BYTES });
        }
        Ok(())
    }

    /// Closes the current file, writing the index and size fix-ups.
    pub fn close(mut self) -> CoreResult<()> {
        self.finish_file()
    }
}

fn audio_stream_list(audio: AudioFormat) -> Vec<u8> {
    let mut strl = Vec::new();
    let mut strh = Vec::new();
    strh.extend_from_slice(b"auds");
    strh.extend_from_slice(&[0u8; 4]); // handler, unused for PCM
    strh.extend_from_slice(&0u32.to_le_bytes()); // flags
    strh.extend_from_slice(&0u16.to_le_bytes());
    strh.extend_from_slice(&0u16.to_le_bytes());
    strh.extend_from_slice(&0u32.to_le_bytes());
    let block_align = audio.channels as u32 * (audio.bits_per_sample as u32 / 8);
    strh.extend_from_slice(&block_align.to_le_bytes()); // scale
    strh.extend_from_slice(&audio.sample_rate.to_le_bytes()); // rate
    strh.extend_from_slice(&0u32.to_le_bytes()); // start
    strh.extend_from_slice(&0u32.to_le_bytes()); // length, patched on close
    strh.extend_from_slice(&0u32.to_le_bytes());
    strh.extend_from_slice(&(-1i32).to_le_bytes());
    strh.extend_from_slice(&block_align.to_le_bytes());
    append_chunk(&mut strl, b"strh", &strh);

    let mut strf = Vec::new();
    strf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    strf.extend_from_slice(&audio.channels.to_le_bytes());
    strf.extend_from_slice(&audio.sample_rate.to_le_bytes());
    let byte_rate = audio.sample_rate * block_align;
    strf.extend_from_slice(&byte_rate.to_le_bytes());
    strf.extend_from_slice(&(block_align as u16).to_le_bytes());
    strf.extend_from_slice(&audio.bits_per_sample.to_le_bytes());
    append_chunk(&mut strl, b"strf", &strf);
    strl
}

fn append_chunk(out: &mut Vec<u8>, tag: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(tag);
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out.extend_from_slice(data);
    if data.len() % 2 == 1 {
        out.push(0);
    }
}

fn append_list(out: &mut Vec<u8>, list_tag: &[u8; 4], body: &[u8]) {
    out.extend_from_slice(list_tag);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
}

fn write_chunk(file: &mut File, tag: &[u8; 4], data: &[u8]) -> CoreResult<()> {
    write_chunk_header(file, tag, data.len() as u32).map_err(|e| CoreError::host_io("avi chunk header", e))?;
    file.write_all(data).map_err(|e| CoreError::host_io("avi chunk data", e))?;
    if data.len() % 2 == 1 {
        file.write_all(&[0]).map_err(|e| CoreError::host_io("avi chunk pad", e))?;
    }
    Ok(())
}
