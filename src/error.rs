//! Error taxonomy: one kind per recovery policy, not per call site.

use std::path::PathBuf;

use thiserror::Error;

/// ATAPI sense data, `{sense_key, ASC, ASCQ}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenseData {
    pub sense_key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl SenseData {
    pub const NO_SENSE: SenseData = SenseData { sense_key: 0x00, asc: 0x00, ascq: 0x00 };
    pub const NOT_READY: SenseData = SenseData { sense_key: 0x02, asc: 0x04, ascq: 0x00 };
    pub const ILLEGAL_REQUEST: SenseData = SenseData { sense_key: 0x05, asc: 0x20, ascq: 0x00 };
    pub const UNIT_ATTENTION_MEDIUM_CHANGED: SenseData =
        SenseData { sense_key: 0x06, asc: 0x28, ascq: 0x00 };
    pub const HARDWARE_ERROR: SenseData = SenseData { sense_key: 0x04, asc: 0x44, ascq: 0x00 };
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error in section [{section}] key '{key}': {reason}")]
    Config { section: String, key: String, reason: String },

    #[error("host I/O error opening {resource}: {source}")]
    HostIo { resource: String, #[source] source: std::io::Error },

    #[error("guest command error: {reason}")]
    GuestCommand { reason: String, sense: SenseData },

    #[error("decode error reading {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("container overflow: projected size {projected} exceeds limit {limit}")]
    ContainerOverflow { projected: u64, limit: u64 },

    #[error("resource exhausted: {what}")]
    ResourceExhaustion { what: String },
}

impl CoreError {
    pub fn config(section: impl Into<String>, key: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::Config { section: section.into(), key: key.into(), reason: reason.into() }
    }

    pub fn host_io(resource: impl Into<String>, source: std::io::Error) -> Self {
        CoreError::HostIo { resource: resource.into(), source }
    }

    pub fn guest_command(reason: impl Into<String>, sense: SenseData) -> Self {
        CoreError::GuestCommand { reason: reason.into(), sense }
    }

    /// Returns the sense data to surface to an ATAPI `REQUEST SENSE`, if any.
    pub fn sense(&self) -> Option<SenseData> {
        match self {
            CoreError::GuestCommand { sense, .. } => Some(*sense),
            CoreError::Decode { .. } => Some(SenseData::HARDWARE_ERROR),
            _ => None,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
