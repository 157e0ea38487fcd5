//! CD disc insertion timeline: inserting a disc traverses
//! DoorClosing (1400ms) -> SpinningUp (1500ms spin + 1000ms TOC read) ->
//! Ready, idles out after 30s of no access, and a first access from Idle
//! re-arms a 1500ms SpinningUp before Ready again (no TOC re-read).

use std::path::PathBuf;

use ps1_core::scheduler::Scheduler;
use ps1_core::storage::{CdRomDrive, Disc, DiscState, DiscType, Track};

const DOOR_CLOSE_MS: u64 = 1_400;
const SPIN_UP_MS: u64 = 1_500;
const TOC_READ_MS: u64 = 1_000;
const IDLE_TIMEOUT_MS: u64 = 30_000;

fn ms(v: u64) -> u64 {
    v * 1_000_000
}

fn two_track_disc() -> Disc {
    Disc {
        tracks: vec![
            Track { num: 1, attr: 0, start_lba: 0, file: PathBuf::from("t1.bin"), is_audio: false, is_data: true },
            Track { num: 2, attr: 0, start_lba: 1000, file: PathBuf::from("t2.bin"), is_audio: false, is_data: true },
        ],
        mcn: None,
        lead_out_lba: 60 * 60 * 75,
        disc_type: DiscType::CdRom,
    }
}

#[test]
fn insertion_to_idle_to_reaccess_follows_the_literal_timeline() {
    let mut sched = Scheduler::new();
    let mut drive = CdRomDrive::new(&mut sched);

    drive.insert(&mut sched, two_track_disc());
    assert_eq!(drive.state(), DiscState::DoorClosing);

    sched.advance(ms(DOOR_CLOSE_MS - 1));
    assert_eq!(drive.state(), DiscState::DoorClosing, "door still closing 1ms before the 1400ms mark");

    sched.advance(ms(1));
    assert_eq!(drive.state(), DiscState::SpinningUp);

    sched.advance(ms(SPIN_UP_MS + TOC_READ_MS - 1));
    assert_eq!(drive.state(), DiscState::SpinningUp, "still spinning/reading TOC 1ms early");

    sched.advance(ms(1));
    assert_eq!(drive.state(), DiscState::Ready);

    sched.advance(ms(IDLE_TIMEOUT_MS));
    assert_eq!(drive.state(), DiscState::Idle, "no access for 30s should idle the drive");

    drive.access(&mut sched);
    assert_eq!(drive.state(), DiscState::SpinningUp, "first access from Idle re-arms spin-up");

    sched.advance(ms(SPIN_UP_MS));
    assert_eq!(drive.state(), DiscState::Ready, "re-access spin-up is 1500ms, no TOC re-read");
}
