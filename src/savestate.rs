//! Persisted state: a savestate record is a
//! directory `<name>/` holding `state.bin` (binary, versioned, chunked per
//! component), `state.ini` (frozen config), `state.txt` (user description),
//! `state.png` (screenshot), and per-device auxiliary images.
//!
//! `state.bin`'s chunk framing follows the scheduler/queue modules'
//! own "one concern, one small owned struct" style: each chunk is a `{tag,
//! size}` header followed by `size` bytes, generalizing the timer heap's
//! own bookkeeping shape to whole components.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::CoreError;

pub const STATE_BIN: &str = "state.bin";
pub const STATE_INI: &str = "state.ini";
pub const STATE_TXT: &str = "state.txt";
pub const STATE_PNG: &str = "state.png";

/// Current `state.bin` container version; bumped whenever chunk framing
/// itself changes (not on a per-component payload format change — that is
/// the component's own concern, checked via its tag).
pub const STATE_BIN_VERSION: u32 = 1;

/// Appends `{tag: u32, size: u32 LE}` + payload chunks into an in-memory
/// buffer; components register and are fed in a fixed order.
#[derive(Default)]
pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    pub fn new() -> Self {
        let mut w = StateWriter { buf: Vec::new() };
        w.buf.extend_from_slice(&STATE_BIN_VERSION.to_le_bytes());
        w
    }

    pub fn write_chunk(&mut self, tag: u32, payload: &[u8]) {
        self.buf.extend_from_slice(&tag.to_le_bytes());
        self.buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(payload);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads chunks back in the order they were written, verifying each tag
/// against what the caller expects next.
pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
    pub version: u32,
}

impl<'a> StateReader<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, CoreError> {
        if data.len() < 4 {
            return Err(CoreError::Decode { path: PathBuf::from(STATE_BIN), reason: "truncated header".into() });
        }
        let version = u32::from_le_bytes(data[0..4].try_into().unwrap());
        Ok(StateReader { data, pos: 4, version })
    }

    /// Reads the next chunk, failing if its tag doesn't match `expected_tag`
    /// — a mismatch means the component order drifted between save and
    /// restore.
    pub fn next_chunk(&mut self, expected_tag: u32) -> Result<&'a [u8], CoreError> {
        if self.pos + 8 > self.data.len() {
            return Err(CoreError::Decode {
                path: PathBuf::from(STATE_BIN),
                reason: format!("expected chunk {expected_tag:#x}, ran out of data"),
            });
        }
        let tag = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        let size = u32::from_le_bytes(self.data[self.pos + 4..self.pos + 8].try_into().unwrap()) as usize;
        self.pos += 8;
        if tag != expected_tag {
            return Err(CoreError::Decode {
                path: PathBuf::from(STATE_BIN),
                reason: format!("chunk tag mismatch: expected {expected_tag:#x}, found {tag:#x}"),
            });
        }
        if self.pos + size > self.data.len() {
            return Err(CoreError::Decode { path: PathBuf::from(STATE_BIN), reason: "chunk payload truncated".into() });
        }
        let payload = &self.data[self.pos..self.pos + size];
        self.pos += size;
        Ok(payload)
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// A savestate record on disk: `<base_dir>/<name>/`.
pub struct SavestateRecord {
    pub dir: PathBuf,
}

impl SavestateRecord {
    pub fn path_for(base_dir: &Path, name: &str) -> PathBuf {
        base_dir.join(name)
    }

    /// Writes every file of a savestate record. Auxiliary per-device images
    /// are passed as `(file_name, bytes)` pairs and written alongside
    /// `state.bin`.
    pub fn save(
        base_dir: &Path,
        name: &str,
        state_bin: &[u8],
        config_ini: &str,
        description: &str,
        screenshot_png: Option<&[u8]>,
        aux_images: &[(String, Vec<u8>)],
    ) -> Result<Self, CoreError> {
        let dir = Self::path_for(base_dir, name);
        fs::create_dir_all(&dir).map_err(|e| CoreError::host_io(dir.display().to_string(), e))?;

        write_file(&dir.join(STATE_BIN), state_bin)?;
        write_file(&dir.join(STATE_INI), config_ini.as_bytes())?;
        write_file(&dir.join(STATE_TXT), description.as_bytes())?;
        if let Some(png) = screenshot_png {
            write_file(&dir.join(STATE_PNG), png)?;
        }
        for (file_name, bytes) in aux_images {
            write_file(&dir.join(file_name), bytes)?;
        }
        Ok(SavestateRecord { dir })
    }

    pub fn load_state_bin(&self) -> Result<Vec<u8>, CoreError> {
        read_file(&self.dir.join(STATE_BIN))
    }

    pub fn load_config_ini(&self) -> Result<String, CoreError> {
        let bytes = read_file(&self.dir.join(STATE_INI))?;
        String::from_utf8(bytes)
            .map_err(|e| CoreError::Decode { path: self.dir.join(STATE_INI), reason: e.to_string() })
    }

    pub fn load_description(&self) -> Result<String, CoreError> {
        let bytes = read_file(&self.dir.join(STATE_TXT))?;
        String::from_utf8(bytes)
            .map_err(|e| CoreError::Decode { path: self.dir.join(STATE_TXT), reason: e.to_string() })
    }

    /// Opens an existing record, failing if `state.bin` isn't present —
    /// the minimal marker that `name` is really a savestate directory.
    pub fn open(base_dir: &Path, name: &str) -> Result<Self, CoreError> {
        let dir = Self::path_for(base_dir, name);
        if !dir.join(STATE_BIN).exists() {
            return Err(CoreError::host_io(
                dir.display().to_string(),
                io::Error::new(io::ErrorKind::NotFound, "no state.bin in savestate record"),
            ));
        }
        Ok(SavestateRecord { dir })
    }
}

/// Fixed record name for quick-save/quick-load.
pub const QUICKSAVE_NAME: &str = "quicksave";

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    fs::write(path, bytes).map_err(|e| CoreError::host_io(path.display().to_string(), e))
}

fn read_file(path: &Path) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    fs::File::open(path)
        .map_err(|e| CoreError::host_io(path.display().to_string(), e))?
        .read_to_end(&mut buf)
        .map_err(|e| CoreError::host_io(path.display().to_string(), e))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_reader_round_trips_chunks_in_order() {
        let mut w = StateWriter::new();
        w.write_chunk(0x0001, b"scheduler-payload");
        w.write_chunk(0x0002, b"mixer-payload");
        let bytes = w.into_bytes();

        let mut r = StateReader::new(&bytes).unwrap();
        assert_eq!(r.version, STATE_BIN_VERSION);
        assert_eq!(r.next_chunk(0x0001).unwrap(), b"scheduler-payload");
        assert_eq!(r.next_chunk(0x0002).unwrap(), b"mixer-payload");
        assert!(r.is_empty());
    }

    #[test]
    fn reader_rejects_a_tag_mismatch() {
        let mut w = StateWriter::new();
        w.write_chunk(0x0001, b"x");
        let bytes = w.into_bytes();
        let mut r = StateReader::new(&bytes).unwrap();
        let err = r.next_chunk(0x0002).unwrap_err();
        assert!(matches!(err, CoreError::Decode { .. }));
    }

    #[test]
    fn save_then_load_round_trips_byte_equal_when_untouched() {
        let base = tempfile::tempdir().unwrap();
        let mut w = StateWriter::new();
        w.write_chunk(1, b"hello");
        let bin = w.into_bytes();

        let record = SavestateRecord::save(base.path(), "slot1", &bin, "[mixer]\nrate=48000\n", "a description", None, &[])
            .unwrap();
        assert_eq!(record.load_state_bin().unwrap(), bin);
        assert_eq!(record.load_config_ini().unwrap(), "[mixer]\nrate=48000\n");
        assert_eq!(record.load_description().unwrap(), "a description");
    }

    #[test]
    fn open_fails_without_a_state_bin_file() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("empty")).unwrap();
        let err = SavestateRecord::open(base.path(), "empty").unwrap_err();
        assert!(matches!(err, CoreError::HostIo { .. }));
    }

    #[test]
    fn aux_images_are_written_alongside_state_bin() {
        let base = tempfile::tempdir().unwrap();
        let w = StateWriter::new();
        let record = SavestateRecord::save(
            base.path(),
            "slot1",
            &w.into_bytes(),
            "",
            "",
            None,
            &[("disk_c.img".to_string(), vec![0u8; 16])],
        )
        .unwrap();
        assert!(record.dir.join("disk_c.img").exists());
    }
}
