//! ATAPI READ TOC scenario: `READ TOC` format 0, MSF addressing,
//! against a two-track disc whose lead-out sits at 60:00:00.

use std::path::PathBuf;

use ps1_core::scheduler::Scheduler;
use ps1_core::storage::ata::{AtaController, AtaDevice, ChannelSelect, ATAPI_READ_TOC};
use ps1_core::storage::{CdRomDrive, Disc, DiscState, DiscType, Track};

fn disc_with_two_tracks() -> Disc {
    Disc {
        tracks: vec![
            Track { num: 1, attr: 0, start_lba: 0, file: PathBuf::from("a.bin"), is_audio: false, is_data: true },
            Track { num: 2, attr: 0, start_lba: 1000, file: PathBuf::from("b.bin"), is_audio: false, is_data: true },
        ],
        mcn: None,
        lead_out_lba: 60 * 60 * 75,
        disc_type: DiscType::CdRom,
    }
}

#[test]
fn read_toc_format0_msf_reports_two_tracks_and_the_lead_out_at_sixty_minutes() {
    let mut sched = Scheduler::new();
    let mut drive = CdRomDrive::new(&mut sched);
    drive.insert(&mut sched, disc_with_two_tracks());
    sched.advance(1_400_000_000 + 1_500_000_000 + 1_000_000_000);
    assert_eq!(drive.state(), DiscState::Ready);

    let mut controller = AtaController::new();
    controller.secondary.master = AtaDevice::new_atapi(drive);
    // Already cleared a prior unit-attention condition in this scenario.
    controller.secondary.master.unit_attention = false;

    // CDB: READ TOC, MSF addressing bit set, format 0, all else zeroed.
    let packet = [ATAPI_READ_TOC, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    let data = controller.dispatch_atapi(ChannelSelect::Secondary, &packet).unwrap();

    assert_eq!(data[2], 1, "first track number");
    assert_eq!(data[3], 2, "last track number");
    assert_eq!(data[6], 1, "first TOC entry's track number");

    // Lead-out is the final 8-byte entry: reserved, ADR|attr, 0xAA track,
    // reserved, then MSF 00:60:00:00.
    let lead_out = &data[data.len() - 8..];
    assert_eq!(lead_out[2], 0xAA);
    assert_eq!(lead_out[4], 0, "MSF reserved byte");
    assert_eq!(lead_out[5], 60, "lead-out minutes");
    assert_eq!(lead_out[6], 0, "lead-out seconds");
    assert_eq!(lead_out[7], 0, "lead-out frames");
}
