//! Drive geometry & performance math: the seek/rotational-latency/
//! transfer-time model shared by HDD, FDD and CD-ROM devices.

/// `{cylinders, heads, sectors_per_track}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveGeometry {
    pub cylinders: u32,
    pub heads: u32,
    pub sectors_per_track: u32,
}

impl DriveGeometry {
    pub fn new(cylinders: u32, heads: u32, sectors_per_track: u32) -> Self {
        DriveGeometry { cylinders, heads, sectors_per_track }
    }

    /// `sectors = C × H × S`.
    pub fn total_sectors(&self) -> u64 {
        self.cylinders as u64 * self.heads as u64 * self.sectors_per_track as u64
    }
}

/// `{seek_max_ms, seek_trk_ms, seek_third_ms, rot_speed_rpm, interleave}`
/// plus the derived microsecond constants listed in .
#[derive(Debug, Clone, Copy)]
pub struct DrivePerformance {
    pub seek_max_ms: f64,
    pub seek_trk_ms: f64,
    pub seek_third_ms: f64,
    pub rot_speed_rpm: f64,
    pub interleave: u32,
}

/// Fitted quadratic seek model: `t(delta) = overhead + k1*delta + k2*delta^2`.
#[derive(Debug, Clone, Copy)]
pub struct SeekModel {
    pub overhead_us: f64,
    pub k1: f64,
    pub k2: f64,
}

impl DrivePerformance {
    /// Solves the quadratic seek model fitted to the
    /// `{track-to-track, one-third stroke, full stroke}` measured triple.
    pub fn seek_model(&self, max_delta_cyl: u32) -> SeekModel {
        let d1 = 1.0f64;
        let d2 = (max_delta_cyl as f64 / 3.0).max(1.0);
        let d3 = max_delta_cyl.max(1) as f64;
        let t1 = self.seek_trk_ms * 1000.0;
        let t2 = self.seek_third_ms * 1000.0;
        let t3 = self.seek_max_ms * 1000.0;
        solve_quadratic_fit([(d1, t1), (d2, t2), (d3, t3)])
    }

    /// Revolution period: time for one full rotation at `rot_speed_rpm`.
    pub fn trk_read_us(&self) -> f64 {
        60_000_000.0 / self.rot_speed_rpm
    }

    pub fn sec_read_us(&self, sectors_per_track: u32) -> f64 {
        self.trk_read_us() / sectors_per_track.max(1) as f64
    }

    pub fn sec2sec_us(&self, sectors_per_track: u32) -> f64 {
        self.sec_read_us(sectors_per_track)
    }

    pub fn avg_rot_lat_us(&self) -> f64 {
        self.trk_read_us() / 2.0
    }

    pub fn sec_xfer_us(&self, sectors_per_track: u32) -> f64 {
        self.sec_read_us(sectors_per_track)
    }

    pub fn bytes_per_us(&self, sectors_per_track: u32, sector_bytes: u32) -> f64 {
        sector_bytes as f64 / self.sec_xfer_us(sectors_per_track)
    }
}

/// Solves the 3x3 Vandermonde-like linear system
/// `overhead + k1*d + k2*d^2 = t` for the three `(delta, time)` points via
/// Cramer's rule, so the fitted curve passes exactly through all three
/// measured endpoints.
fn solve_quadratic_fit(points: [(f64, f64); 3]) -> SeekModel {
    let rows: [[f64; 3]; 3] =
        [[1.0, points[0].0, points[0].0 * points[0].0],
         [1.0, points[1].0, points[1].0 * points[1].0],
         [1.0, points[2].0, points[2].0 * points[2].0]];
    let rhs = [points[0].1, points[1].1, points[2].1];

    let det3 = |m: &[[f64; 3]; 3]| -> f64 {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };

    let d = det3(&rows);
    if d.abs() < 1e-12 {
        return SeekModel { overhead_us: 0.0, k1: rows[0][1].max(1.0), k2: 0.0 };
    }

    let mut solve_col = |col: usize| -> f64 {
        let mut m = rows;
        for (i, row) in m.iter_mut().enumerate() {
            row[col] = rhs[i];
        }
        det3(&m) / d
    };

    SeekModel { overhead_us: solve_col(0), k1: solve_col(1), k2: solve_col(2) }
}

impl SeekModel {
    pub fn time_us(&self, delta_cyl: u32) -> f64 {
        if delta_cyl == 0 {
            return 0.0;
        }
        let d = delta_cyl as f64;
        (self.overhead_us + self.k1 * d + self.k2 * d * d).max(0.0)
    }
}

/// Common timing surface for a storage device's geometry/performance model.
/// HDD/FDD/CD-ROM each construct one from their own derived constants.
pub struct TimingModel {
    pub geometry: DriveGeometry,
    pub performance: DrivePerformance,
    seek: SeekModel,
    /// Head position remembered as a double, in hw-sector fractional units,
    /// advanced by elapsed time between calls.
    head_pos: f64,
    head_pos_time_us: f64,
}

impl TimingModel {
    pub fn new(geometry: DriveGeometry, performance: DrivePerformance) -> Self {
        let max_delta = geometry.cylinders.saturating_sub(1).max(1);
        let seek = performance.seek_model(max_delta);
        TimingModel { geometry, performance, seek, head_pos: 0.0, head_pos_time_us: 0.0 }
    }

    /// Symmetric by construction: only `|to - from|` matters.
    pub fn seek_move_time_us(&self, from_cyl: u32, to_cyl: u32) -> f64 {
        let delta = (from_cyl as i64 - to_cyl as i64).unsigned_abs() as u32;
        self.seek.time_us(delta)
    }

    /// Advances the remembered head position to `at_time_us`, given the
    /// platter spins continuously regardless of I/O activity.
    pub fn advance_head_position(&mut self, at_time_us: f64) {
        let elapsed = at_time_us - self.head_pos_time_us;
        if elapsed > 0.0 {
            let s = self.geometry.sectors_per_track.max(1) as f64;
            let slot_us = self.performance.trk_read_us() / s;
            self.head_pos = (self.head_pos + elapsed / slot_us) % s;
            self.head_pos_time_us = at_time_us;
        }
    }

    /// `hw_sector = ((log_sector - 1) * interleave) mod S`,
    /// then the rotational distance (always forward, one direction) from
    /// the current head position to that hw sector, in `[0, trk_read_us)`.
    pub fn rotational_latency_us(&self, dest_log_sector: u32) -> f64 {
        let s = self.geometry.sectors_per_track.max(1);
        let interleave = self.performance.interleave.max(1);
        let hw_sector = ((dest_log_sector.saturating_sub(1) as u64 * interleave as u64) % s as u64) as f64;
        let slot_us = self.performance.trk_read_us() / s as f64;
        let forward_slots = (hw_sector - self.head_pos).rem_euclid(s as f64);
        forward_slots * slot_us
    }

    /// seek (if different cylinder) + rotational latency (optional, skipped
    /// when a read-ahead buffer already covers the LBA) + transfer time.
    #[allow(clippy::too_many_arguments)]
    pub fn transfer_time_us(
        &mut self,
        from_cyl: u32,
        to_cyl: u32,
        dest_log_sector: u32,
        xfer_amount: u32,
        sec_xfer_us: f64,
        suppress_rotational_latency: bool,
    ) -> f64 {
        let seek = self.seek_move_time_us(from_cyl, to_cyl);
        self.advance_head_position(seek);
        let rot = if suppress_rotational_latency { 0.0 } else { self.rotational_latency_us(dest_log_sector) };
        self.advance_head_position(seek + rot);
        seek + rot + xfer_amount as f64 * sec_xfer_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type35() -> TimingModel {
        // /S2's literal worked-example numbers.
        let geom = DriveGeometry::new(921, 5, 17);
        let perf = DrivePerformance {
            seek_max_ms: 40.0,
            seek_trk_ms: 8.0,
            seek_third_ms: 18.0,
            rot_speed_rpm: 3600.0,
            interleave: 4,
        };
        TimingModel::new(geom, perf)
    }

    #[test]
    fn seek_move_time_matches_measured_endpoints() {
        let t = type35();
        assert!((t.seek_move_time_us(0, 920) - 40_000.0).abs() < 1.0);
        assert!((t.seek_move_time_us(100, 101) - 8_000.0).abs() < 1.0);
    }

    #[test]
    fn seek_move_time_is_symmetric() {
        let t = type35();
        assert_eq!(t.seek_move_time_us(50, 300), t.seek_move_time_us(300, 50));
    }

    #[test]
    fn seek_move_time_is_zero_for_same_cylinder() {
        let t = type35();
        assert_eq!(t.seek_move_time_us(42, 42), 0.0);
    }

    #[test]
    fn rotational_latency_is_zero_when_already_at_target() {
        let t = type35();
        let lat = t.rotational_latency_us(1);
        assert!(lat.abs() < 1.0);
    }

    #[test]
    fn rotational_latency_is_within_one_track_read() {
        let t = type35();
        let lat = t.rotational_latency_us(9);
        assert!(lat >= 0.0 && lat < t.performance.trk_read_us());
    }

    #[test]
    fn transfer_time_is_monotone_nondecreasing_in_amount() {
        let mut t = type35();
        let sec_xfer = t.performance.sec_xfer_us(17);
        let a = t.transfer_time_us(10, 20, 1, 1, sec_xfer, false);
        let mut t2 = type35();
        let b = t2.transfer_time_us(10, 20, 1, 5, sec_xfer, false);
        assert!(b >= a);
    }
}
