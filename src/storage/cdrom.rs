//! CD-ROM drive model: TOC, the timed door/
//! spin-up state machine, the CAV seek-performance curve, and the CD-audio
//! engine that plugs into a mixer channel.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::rc::Rc;
use std::cell::RefCell;

use crate::scheduler::{Scheduler, TimerId};

pub const FRAMES_PER_SECOND: u32 = 75;
pub const PREGAP_FRAMES: u32 = 2 * FRAMES_PER_SECOND;
pub const DATA_SECTOR_BYTES: u32 = 2048;
pub const CDDA_SAMPLE_RATE: u32 = 44_100;
pub const CDDA_BYTES_PER_FRAME: u32 = 4; // 16-bit stereo

/// Minutes/Seconds/Frames CD addressing (spec glossary "MSF").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Msf {
    pub min: u8,
    pub sec: u8,
    pub frame: u8,
}

impl Msf {
    pub fn from_lba(lba: i64) -> Self {
        let total_frames = lba + PREGAP_FRAMES as i64;
        let min = total_frames / (60 * FRAMES_PER_SECOND as i64);
        let rem = total_frames % (60 * FRAMES_PER_SECOND as i64);
        let sec = rem / FRAMES_PER_SECOND as i64;
        let frame = rem % FRAMES_PER_SECOND as i64;
        Msf { min: min as u8, sec: sec as u8, frame: frame as u8 }
    }

    /// TMSF → linear LBA with the standard 2-second pregap convention
    /// (spec glossary "TMSF").
    pub fn to_lba(&self) -> i64 {
        (self.min as i64 * 60 + self.sec as i64) * FRAMES_PER_SECOND as i64 + self.frame as i64
            - PREGAP_FRAMES as i64
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub num: u8,
    pub attr: u8,
    pub start_lba: i64,
    pub file: PathBuf,
    pub is_audio: bool,
    pub is_data: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscType {
    Cdda,
    CdRom,
    CdRomXa,
}

#[derive(Debug, Clone)]
pub struct Disc {
    pub tracks: Vec<Track>,
    pub mcn: Option<String>,
    pub lead_out_lba: i64,
    pub disc_type: DiscType,
}

impl Disc {
    pub fn track_containing(&self, lba: i64) -> Option<&Track> {
        self.tracks.iter().rev().find(|t| lba >= t.start_lba)
    }
}

/// Door/spin-up state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscState {
    NoDisc,
    DoorOpen,
    DoorClosing,
    SpinningUp,
    Ready,
    Idle,
    Ejecting,
}

const DOOR_CLOSE_MS: u64 = 1_400;
const SPIN_UP_MS: u64 = 1_500;
const TOC_READ_MS: u64 = 1_000;
const REACCESS_SPINUP_MS: u64 = 1_500;
const IDLE_TIMEOUT_MS: u64 = 30_000;
const SPINDOWN_MS: u64 = 500;

fn ms(v: u64) -> u64 {
    v * 1_000_000
}

/// CAV access-latency curve by requested X-factor: `>=17x` gives
/// `85/154 ms`, `>=4x` gives `115/240 ms`, `<4x` gives `200/300 ms`.
/// Above 24x is extrapolated (spec open question): same tier as `>=17x`.
pub fn cav_seek_latencies_ms(x_factor: u32) -> (f64, f64) {
    if x_factor >= 17 {
        (85.0, 154.0)
    } else if x_factor >= 4 {
        (115.0, 240.0)
    } else {
        (200.0, 300.0)
    }
}

pub fn cav_transfer_rate_bytes_per_sec(x_factor: u32) -> f64 {
    x_factor as f64 * 150.0 * 1024.0
}

pub fn cav_sec_xfer_us(x_factor: u32) -> f64 {
    DATA_SECTOR_BYTES as f64 / (cav_transfer_rate_bytes_per_sec(x_factor) / 1_000_000.0)
}

/// CAV rotational speed: scales linearly with the requested X-factor off a
/// nominal single-speed baseline.
pub fn cav_rot_speed_rpm(x_factor: u32) -> f64 {
    200.0 * x_factor.max(1) as f64
}

/// Output port source selection for CD-audio routing: each of two ports picks a source channel and an 8-bit volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSource {
    None,
    Left,
    Right,
    MonoSum,
}

#[derive(Debug, Clone, Copy)]
pub struct OutputPort {
    pub source: PortSource,
    pub volume: u8,
}

impl Default for OutputPort {
    fn default() -> Self {
        OutputPort { source: PortSource::Left, volume: 255 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStatus {
    NoAudioStatus,
    Playing,
    Paused,
    SuccessStop,
    ErrorStop,
}

/// CD audio playback engine: reads decoded PCM from the current
/// track file at each mixer update, honoring SOTC, port routing, pause/resume.
pub struct CdAudioEngine {
    file: Option<File>,
    current_track_end_lba: Option<i64>,
    track_start_lba: i64,
    /// Stereo sample pairs produced since `play()`, at `CDDA_SAMPLE_RATE`;
    /// drives `current_lba`'s position-within-track math.
    samples_emitted: u64,
    pub sotc: bool,
    pub port0: OutputPort,
    pub port1: OutputPort,
    pub status: AudioStatus,
    paused: bool,
}

impl CdAudioEngine {
    pub fn new() -> Self {
        CdAudioEngine {
            file: None,
            current_track_end_lba: None,
            track_start_lba: 0,
            samples_emitted: 0,
            sotc: false,
            port0: OutputPort { source: PortSource::Left, volume: 255 },
            port1: OutputPort { source: PortSource::Right, volume: 255 },
            status: AudioStatus::NoAudioStatus,
            paused: false,
        }
    }

    pub fn play(&mut self, track: &Track, track_end_lba: i64) -> std::io::Result<()> {
        let mut f = File::open(&track.file)?;
        let byte_offset = (track.start_lba.max(0) as u64) * (DATA_SECTOR_BYTES as u64);
        f.seek(SeekFrom::Start(byte_offset))?;
        self.file = Some(f);
        self.current_track_end_lba = Some(track_end_lba);
        self.track_start_lba = track.start_lba;
        self.samples_emitted = 0;
        self.status = AudioStatus::Playing;
        self.paused = false;
        Ok(())
    }

    /// Absolute LBA of the next sample this engine will emit, derived from
    /// how many CD-audio frames have been produced since `play()`. `None`
    /// when nothing has ever been played.
    pub fn current_lba(&self) -> Option<i64> {
        if self.current_track_end_lba.is_none() && self.samples_emitted == 0 {
            return None;
        }
        let samples_per_cd_frame = (CDDA_SAMPLE_RATE / FRAMES_PER_SECOND).max(1) as u64;
        let cd_frames_elapsed = (self.samples_emitted / samples_per_cd_frame) as i64;
        Some(self.track_start_lba + cd_frames_elapsed)
    }

    pub fn pause(&mut self) {
        if self.status == AudioStatus::Playing {
            self.paused = true;
            self.status = AudioStatus::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.status == AudioStatus::Paused {
            self.paused = false;
            self.status = AudioStatus::Playing;
        }
    }

    pub fn stop(&mut self) {
        self.file = None;
        self.status = AudioStatus::NoAudioStatus;
        self.paused = false;
    }

    fn route(&self, left: f32, right: f32) -> (f32, f32) {
        let pick = |src: PortSource| -> f32 {
            match src {
                PortSource::None => 0.0,
                PortSource::Left => left,
                PortSource::Right => right,
                PortSource::MonoSum => (left + right) * 0.5,
            }
        };
        let out_l = pick(self.port0.source) * (self.port0.volume as f32 / 255.0);
        let out_r = pick(self.port1.source) * (self.port1.volume as f32 / 255.0);
        (out_l, out_r)
    }

    /// Produces up to `max_frames` stereo f32 frames for this update. Sets
    /// `SuccessStop` at end-of-audio (or SOTC track crossing) and
    /// `ErrorStop` on a read failure.
    pub fn generate(&mut self, max_frames: usize) -> Vec<f32> {
        if self.paused || self.status != AudioStatus::Playing {
            return Vec::new();
        }
        let Some(file) = self.file.as_mut() else { return Vec::new() };
        let mut out = Vec::with_capacity(max_frames * 2);
        let mut raw = [0u8; CDDA_BYTES_PER_FRAME as usize];
        for _ in 0..max_frames {
            match file.read_exact(&mut raw) {
                Ok(()) => {
                    let l = i16::from_le_bytes([raw[0], raw[1]]) as f32 / i16::MAX as f32;
                    let r = i16::from_le_bytes([raw[2], raw[3]]) as f32 / i16::MAX as f32;
                    let (ol, or_) = self.route(l, r);
                    out.push(ol);
                    out.push(or_);
                    self.samples_emitted += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.status = AudioStatus::SuccessStop;
                    self.file = None;
                    break;
                }
                Err(_) => {
                    self.status = AudioStatus::ErrorStop;
                    self.file = None;
                    break;
                }
            }
        }
        out
    }
}

impl Default for CdAudioEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct Shared {
    disc: Option<Disc>,
    state: DiscState,
    x_factor: u32,
    door_locked: bool,
}

/// The timed door/spin-up/idle/eject state machine. Transitions are armed
/// exclusively via scheduler timers; no path reaches `Ready`
/// without traversing `DoorClosing -> SpinningUp`.
pub struct CdRomDrive {
    shared: Rc<RefCell<Shared>>,
    timer_door_close: TimerId,
    timer_spin_up: TimerId,
    timer_idle: TimerId,
    timer_eject: TimerId,
    pub audio: CdAudioEngine,
}

impl CdRomDrive {
    pub fn new(sched: &mut Scheduler) -> Self {
        let shared = Rc::new(RefCell::new(Shared {
            disc: None,
            state: DiscState::NoDisc,
            x_factor: 1,
            door_locked: false,
        }));

        let s1 = shared.clone();
        let timer_door_close = sched.register_timer(
            "cdrom-door-close",
            Box::new(move |_sched| {
                let mut sh = s1.borrow_mut();
                if sh.state == DiscState::DoorClosing {
                    sh.state = DiscState::SpinningUp;
                }
            }),
        );
        let s2 = shared.clone();
        let timer_spin_up = sched.register_timer(
            "cdrom-spin-up",
            Box::new(move |_sched| {
                let mut sh = s2.borrow_mut();
                if sh.state == DiscState::SpinningUp {
                    sh.state = DiscState::Ready;
                }
            }),
        );
        let s4 = shared.clone();
        let timer_idle = sched.register_timer(
            "cdrom-idle",
            Box::new(move |_sched| {
                let mut sh = s4.borrow_mut();
                if sh.state == DiscState::Ready {
                    sh.state = DiscState::Idle;
                }
            }),
        );
        let s5 = shared.clone();
        let timer_eject = sched.register_timer(
            "cdrom-eject-spindown",
            Box::new(move |_sched| {
                let mut sh = s5.borrow_mut();
                if sh.state == DiscState::Ejecting {
                    sh.state = DiscState::DoorOpen;
                }
            }),
        );

        CdRomDrive {
            shared,
            timer_door_close,
            timer_spin_up,
            timer_idle,
            timer_eject,
            audio: CdAudioEngine::new(),
        }
    }

    pub fn state(&self) -> DiscState {
        self.shared.borrow().state
    }

    pub fn x_factor(&self) -> u32 {
        self.shared.borrow().x_factor
    }

    pub fn set_x_factor(&mut self, x: u32) {
        self.shared.borrow_mut().x_factor = x.clamp(1, 72);
    }

    pub fn disc(&self) -> Option<Disc> {
        self.shared.borrow().disc.clone()
    }

    /// `insert` while powered arms `DoorClosing -> SpinningUp -> Ready`.
    pub fn insert(&mut self, sched: &mut Scheduler, disc: Disc) {
        // Cancel a stale eject spin-down in flight; inserting supersedes it.
        sched.deactivate_timer(self.timer_eject);
        {
            let mut sh = self.shared.borrow_mut();
            sh.disc = Some(disc);
            sh.state = DiscState::DoorClosing;
        }
        sched.activate_timer(self.timer_door_close, ms(DOOR_CLOSE_MS), true);
        sched.activate_timer(self.timer_spin_up, ms(DOOR_CLOSE_MS + SPIN_UP_MS + TOC_READ_MS), true);
        sched.activate_timer(self.timer_idle, ms(DOOR_CLOSE_MS + SPIN_UP_MS + TOC_READ_MS + IDLE_TIMEOUT_MS), true);
    }

    /// First access while `Idle` rearms `SpinningUp` for 1500ms before data
    /// is returned, without re-reading the TOC.
    pub fn access(&mut self, sched: &mut Scheduler) {
        let was_idle = { self.shared.borrow().state == DiscState::Idle };
        if was_idle {
            self.shared.borrow_mut().state = DiscState::SpinningUp;
            sched.activate_timer(self.timer_spin_up, ms(REACCESS_SPINUP_MS), true);
        }
        sched.activate_timer(self.timer_idle, ms(IDLE_TIMEOUT_MS), true);
    }

    pub fn eject(&mut self, sched: &mut Scheduler) {
        let locked = self.shared.borrow().door_locked;
        if locked {
            return;
        }
        // Cancel any door-close/spin-up/idle timers still armed from a
        // prior insert()/access() so they can't fire into this new state.
        sched.deactivate_timer(self.timer_door_close);
        sched.deactivate_timer(self.timer_spin_up);
        sched.deactivate_timer(self.timer_idle);
        self.shared.borrow_mut().state = DiscState::Ejecting;
        self.audio.stop();
        sched.activate_timer(self.timer_eject, ms(SPINDOWN_MS), true);
    }

    /// `close_door(force=true)` force-opens then re-closes.
    pub fn close_door(&mut self, sched: &mut Scheduler, force: bool) {
        let mut sh = self.shared.borrow_mut();
        if force {
            // Cancel whatever timer chain was in flight; the forced open
            // supersedes it.
            sched.deactivate_timer(self.timer_spin_up);
            sched.deactivate_timer(self.timer_idle);
            sched.deactivate_timer(self.timer_eject);
            sh.state = DiscState::DoorOpen;
        }
        if sh.state == DiscState::DoorOpen {
            sh.state = DiscState::DoorClosing;
            drop(sh);
            sched.activate_timer(self.timer_door_close, ms(DOOR_CLOSE_MS), true);
        }
    }

    pub fn set_door_lock(&mut self, locked: bool) {
        self.shared.borrow_mut().door_locked = locked;
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), DiscState::Ready | DiscState::Idle)
    }

    /// Reads `count` consecutive `DATA_SECTOR_BYTES` sectors starting at
    /// `lba` from the track that contains it, for `READ(10)` and friends.
    pub fn read_sectors(&self, lba: i64, count: usize) -> std::io::Result<Vec<u8>> {
        let disc = self.shared.borrow().disc.clone();
        let Some(disc) = disc else {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no disc loaded"));
        };
        let Some(track) = disc.track_containing(lba) else {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "lba outside any track"));
        };
        let mut f = File::open(&track.file)?;
        let byte_offset = lba.max(0) as u64 * DATA_SECTOR_BYTES as u64;
        f.seek(SeekFrom::Start(byte_offset))?;
        let mut out = vec![0u8; count * DATA_SECTOR_BYTES as usize];
        f.read_exact(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_disc() -> Disc {
        Disc {
            tracks: vec![
                Track { num: 1, attr: 0x00, start_lba: 0, file: PathBuf::from("t1.bin"), is_audio: false, is_data: true },
                Track { num: 2, attr: 0x00, start_lba: 1000, file: PathBuf::from("t2.bin"), is_audio: false, is_data: true },
            ],
            mcn: None,
            lead_out_lba: (60 * 60 + 0) * FRAMES_PER_SECOND as i64,
            disc_type: DiscType::CdRom,
        }
    }

    #[test]
    fn insertion_traverses_door_closing_then_spinning_up_then_ready() {
        let mut sched = Scheduler::new();
        let mut drive = CdRomDrive::new(&mut sched);
        drive.insert(&mut sched, sample_disc());
        assert_eq!(drive.state(), DiscState::DoorClosing);

        sched.advance(ms(DOOR_CLOSE_MS - 1));
        assert_eq!(drive.state(), DiscState::DoorClosing);

        sched.advance(ms(1));
        assert_eq!(drive.state(), DiscState::SpinningUp);

        sched.advance(ms(SPIN_UP_MS + TOC_READ_MS));
        assert_eq!(drive.state(), DiscState::Ready);
    }

    #[test]
    fn idle_after_thirty_seconds_without_access() {
        let mut sched = Scheduler::new();
        let mut drive = CdRomDrive::new(&mut sched);
        drive.insert(&mut sched, sample_disc());
        sched.advance(ms(DOOR_CLOSE_MS + SPIN_UP_MS + TOC_READ_MS));
        assert_eq!(drive.state(), DiscState::Ready);
        sched.advance(ms(IDLE_TIMEOUT_MS));
        assert_eq!(drive.state(), DiscState::Idle);
    }

    #[test]
    fn access_from_idle_rearms_spinning_up() {
        let mut sched = Scheduler::new();
        let mut drive = CdRomDrive::new(&mut sched);
        drive.insert(&mut sched, sample_disc());
        sched.advance(ms(DOOR_CLOSE_MS + SPIN_UP_MS + TOC_READ_MS + IDLE_TIMEOUT_MS));
        assert_eq!(drive.state(), DiscState::Idle);

        drive.access(&mut sched);
        assert_eq!(drive.state(), DiscState::SpinningUp);
        sched.advance(ms(REACCESS_SPINUP_MS));
        assert_eq!(drive.state(), DiscState::Ready);
    }

    #[test]
    fn msf_round_trips_through_lba_with_pregap() {
        let lba = 12345;
        let msf = Msf::from_lba(lba);
        assert_eq!(msf.to_lba(), lba);
    }

    #[test]
    fn eject_during_spin_up_does_not_resurrect_ready_when_the_stale_timer_fires() {
        let mut sched = Scheduler::new();
        let mut drive = CdRomDrive::new(&mut sched);
        drive.insert(&mut sched, sample_disc());
        sched.advance(ms(DOOR_CLOSE_MS));
        assert_eq!(drive.state(), DiscState::SpinningUp);

        drive.eject(&mut sched);
        assert_eq!(drive.state(), DiscState::Ejecting);

        // Advance past where the now-stale spin-up timer would have fired
        // had it not been deactivated.
        sched.advance(ms(SPIN_UP_MS + TOC_READ_MS));
        assert_ne!(drive.state(), DiscState::Ready);
    }

    #[test]
    fn cav_latency_tiers_match_the_published_curve() {
        assert_eq!(cav_seek_latencies_ms(20), (85.0, 154.0));
        assert_eq!(cav_seek_latencies_ms(8), (115.0, 240.0));
        assert_eq!(cav_seek_latencies_ms(2), (200.0, 300.0));
    }

    #[test]
    fn port_routing_mono_sums_both_channels() {
        let mut engine = CdAudioEngine::new();
        engine.port0 = OutputPort { source: PortSource::MonoSum, volume: 255 };
        engine.port1 = OutputPort { source: PortSource::None, volume: 255 };
        let (l, r) = engine.route(1.0, -1.0);
        assert!((l - 0.0).abs() < 1e-6);
        assert_eq!(r, 0.0);
    }
}
