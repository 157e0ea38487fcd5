//! Floppy drive timing presets.

use super::geometry::{DriveGeometry, DrivePerformance, TimingModel};

/// FDC operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdcMode {
    PcAt,
    Model30,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloppyFormat {
    F360K,
    F720K,
    F1_2M,
    F1_44M,
}

pub const SECTOR_BYTES: u32 = 512;

pub fn geometry_for(format: FloppyFormat) -> DriveGeometry {
    match format {
        FloppyFormat::F360K => DriveGeometry::new(40, 2, 9),
        FloppyFormat::F720K => DriveGeometry::new(80, 2, 9),
        FloppyFormat::F1_2M => DriveGeometry::new(80, 2, 15),
        FloppyFormat::F1_44M => DriveGeometry::new(80, 2, 18),
    }
}

pub fn performance_for(format: FloppyFormat) -> DrivePerformance {
    match format {
        FloppyFormat::F360K | FloppyFormat::F720K => DrivePerformance {
            seek_max_ms: 195.0,
            seek_trk_ms: 6.0,
            seek_third_ms: 80.0,
            rot_speed_rpm: 300.0,
            interleave: 1,
        },
        FloppyFormat::F1_2M | FloppyFormat::F1_44M => DrivePerformance {
            seek_max_ms: 165.0,
            seek_trk_ms: 3.0,
            seek_third_ms: 65.0,
            rot_speed_rpm: 360.0,
            interleave: 1,
        },
    }
}

pub struct FddDevice {
    pub format: FloppyFormat,
    pub timing: TimingModel,
    pub current_cylinder: u32,
    pub motor_spinup_ms: f64,
}

impl FddDevice {
    pub fn new(format: FloppyFormat) -> Self {
        FddDevice {
            format,
            timing: TimingModel::new(geometry_for(format), performance_for(format)),
            current_cylinder: 0,
            motor_spinup_ms: 500.0,
        }
    }
}
