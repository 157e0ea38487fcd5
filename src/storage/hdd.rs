//! HDD performance model: measured baseline for drive type 35,
//! other types derived by scaling the quadratic coefficients; type 47 is a
//! user-supplied custom geometry.

use super::geometry::{DriveGeometry, DrivePerformance, TimingModel};

/// One entry of the classic MFM/IDE drive-type table. Only a representative
/// subset is modeled; unlisted types fall back to type 35's performance
/// scaled by their own geometry's cylinder count.
#[derive(Debug, Clone, Copy)]
pub struct HddType {
    pub index: u32,
    pub geometry: DriveGeometry,
    pub performance: DrivePerformance,
}

/// Type 35 (WDL-330P): the measured baseline the rest of the table scales
/// from.
pub const TYPE_35: HddType = HddType {
    index: 35,
    geometry: DriveGeometry { cylinders: 921, heads: 5, sectors_per_track: 17 },
    performance: DrivePerformance {
        seek_max_ms: 40.0,
        seek_trk_ms: 8.0,
        seek_third_ms: 18.0,
        rot_speed_rpm: 3600.0,
        interleave: 4,
    },
};

/// Custom type index: caller supplies geometry and picks an interface default.
pub const CUSTOM_TYPE_INDEX: u32 = 47;

/// Interface-appropriate defaults for the custom type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    Ide,
    Esdi,
    Scsi,
}

pub fn custom_performance_defaults(interface: Interface) -> DrivePerformance {
    match interface {
        Interface::Ide => DrivePerformance {
            seek_max_ms: 17.0,
            seek_trk_ms: 2.0,
            seek_third_ms: 8.0,
            rot_speed_rpm: 5400.0,
            interleave: 1,
        },
        Interface::Esdi => DrivePerformance {
            seek_max_ms: 25.0,
            seek_trk_ms: 3.0,
            seek_third_ms: 12.0,
            rot_speed_rpm: 3600.0,
            interleave: 1,
        },
        Interface::Scsi => DrivePerformance {
            seek_max_ms: 11.0,
            seek_trk_ms: 1.0,
            seek_third_ms: 5.0,
            rot_speed_rpm: 7200.0,
            interleave: 1,
        },
    }
}

/// Derives another type's performance by scaling type 35's quadratic
/// coefficients by the ratio of its own max-stroke seek time, keeping the
/// relative track-to-track/third-stroke/full-stroke shape.
pub fn scaled_from_baseline(seek_max_ms: f64, rot_speed_rpm: f64, interleave: u32) -> DrivePerformance {
    let ratio = seek_max_ms / TYPE_35.performance.seek_max_ms;
    DrivePerformance {
        seek_max_ms,
        seek_trk_ms: TYPE_35.performance.seek_trk_ms * ratio,
        seek_third_ms: TYPE_35.performance.seek_third_ms * ratio,
        rot_speed_rpm,
        interleave,
    }
}

pub const SECTOR_BYTES: u32 = 512;

pub struct HddDevice {
    pub drive_type: u32,
    pub timing: TimingModel,
    pub current_cylinder: u32,
}

impl HddDevice {
    pub fn new(geometry: DriveGeometry, performance: DrivePerformance, drive_type: u32) -> Self {
        HddDevice { drive_type, timing: TimingModel::new(geometry, performance), current_cylinder: 0 }
    }

    pub fn from_type35() -> Self {
        Self::new(TYPE_35.geometry, TYPE_35.performance, TYPE_35.index)
    }

    pub fn from_custom(geometry: DriveGeometry, interface: Interface) -> Self {
        Self::new(geometry, custom_performance_defaults(interface), CUSTOM_TYPE_INDEX)
    }

    /// LBA → (cylinder, head, logical-sector-within-track).
    pub fn lba_to_chs(&self, lba: u64) -> (u32, u32, u32) {
        let spt = self.timing.geometry.sectors_per_track as u64;
        let heads = self.timing.geometry.heads as u64;
        let sector = (lba % spt) as u32 + 1;
        let temp = lba / spt;
        let head = (temp % heads) as u32;
        let cylinder = (temp / heads) as u32;
        (cylinder, head, sector)
    }

    pub fn read_time_us(&mut self, lba: u64, sector_count: u32, read_ahead_covers: bool) -> f64 {
        let (cylinder, _head, sector) = self.lba_to_chs(lba);
        let from = self.current_cylinder;
        let sec_xfer = self.timing.performance.sec_xfer_us(self.timing.geometry.sectors_per_track);
        let t = self.timing.transfer_time_us(from, cylinder, sector, sector_count, sec_xfer, read_ahead_covers);
        self.current_cylinder = cylinder;
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type35_geometry_matches_the_measured_baseline() {
        assert_eq!(TYPE_35.geometry.cylinders, 921);
        assert_eq!(TYPE_35.geometry.sectors_per_track, 17);
    }

    #[test]
    fn lba_to_chs_round_trips_total_sector_count() {
        let dev = HddDevice::from_type35();
        let total = dev.timing.geometry.total_sectors();
        let (cyl, head, sector) = dev.lba_to_chs(total - 1);
        assert_eq!(cyl, dev.timing.geometry.cylinders - 1);
        assert_eq!(head, dev.timing.geometry.heads - 1);
        assert_eq!(sector, dev.timing.geometry.sectors_per_track);
    }

    #[test]
    fn custom_type_uses_interface_default_performance() {
        let dev = HddDevice::from_custom(DriveGeometry::new(1024, 16, 63), Interface::Scsi);
        assert_eq!(dev.drive_type, CUSTOM_TYPE_INDEX);
        assert_eq!(dev.timing.performance.rot_speed_rpm, 7200.0);
    }

    #[test]
    fn read_time_grows_with_sector_count() {
        let mut dev = HddDevice::from_type35();
        let one = dev.read_time_us(0, 1, false);
        let mut dev2 = HddDevice::from_type35();
        let many = dev2.read_time_us(0, 8, false);
        assert!(many >= one);
    }
}
