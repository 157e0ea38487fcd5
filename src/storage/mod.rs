//! Storage device timing and command processing.

pub mod geometry;
pub mod hdd;
pub mod fdd;
pub mod cdrom;
pub mod ata;

pub use geometry::{DriveGeometry, DrivePerformance, SeekModel, TimingModel};
pub use hdd::{HddDevice, HddType, Interface as HddInterface, CUSTOM_TYPE_INDEX, TYPE_35};
pub use fdd::{FddDevice, FdcMode, FloppyFormat};
pub use cdrom::{CdAudioEngine, CdRomDrive, Disc, DiscState, DiscType, Msf, Track};
pub use ata::{AtaController, AtaDevice, ChannelSelect, DriveSelect};
