//! ATA/ATAPI controller: dual-channel state machine, command
//! dispatch tables, PIO buffer, CD-audio glue.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::error::{CoreError, CoreResult, SenseData};
use crate::scheduler::{Scheduler, TimerId};
use super::cdrom::{CdRomDrive, DiscState, Msf};

bitflags! {
    /// Task-file status register bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusReg: u8 {
        const ERR  = 0x01;
        const IDX  = 0x02;
        const CORR = 0x04;
        const DRQ  = 0x08;
        const DSC  = 0x10;
        const DWF  = 0x20;
        const DRDY = 0x40;
        const BSY  = 0x80;
    }
}

bitflags! {
    /// Error register bits (ATA) / interrupt-reason overload (ATAPI).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ErrorReg: u8 {
        const ABRT = 0x04;
        const IDNF = 0x10;
        const UNC  = 0x40;
        const ICRC = 0x80;
    }
}

bitflags! {
    /// ATAPI "interrupt reason" bits layered over the (unused-for-ATAPI)
    /// sector-count register: `c_d`/`i_o` tell the host the next bus phase.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InterruptReason: u8 {
        /// 1 = command, 0 = data.
        const C_D = 0x01;
        /// 1 = device-to-host, 0 = host-to-device.
        const I_O = 0x02;
        const REL = 0x04;
    }
}

pub const MAX_PIO_BYTES: usize = 16 * 512 + 18; // + worst-case packet header slack

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Chs,
    Lba28,
    Lba48,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    None,
    Ata,
    Atapi,
}

/// Per-device task-file state.
pub struct AtaDevice {
    pub kind: DeviceKind,
    pub status: StatusReg,
    pub error: ErrorReg,
    pub interrupt_reason: InterruptReason,
    pub features: u8,
    pub sector_count: u16,
    pub lba: u64,
    pub address_mode: AddressMode,
    pub multiple_sector_count: u8,
    pub lba48_bank: u8,
    pub buffer: Vec<u8>,
    pub buffer_pos: usize,
    pub sense: SenseData,
    pub cdrom: Option<CdRomDrive>,
    pub interrupt_pending: bool,
    pub command_timer: Option<TimerId>,
    pub unit_attention: bool,
}

impl AtaDevice {
    pub fn none() -> Self {
        AtaDevice {
            kind: DeviceKind::None,
            status: StatusReg::empty(),
            error: ErrorReg::empty(),
            interrupt_reason: InterruptReason::empty(),
            features: 0,
            sector_count: 0,
            lba: 0,
            address_mode: AddressMode::Chs,
            multiple_sector_count: 1,
            lba48_bank: 0,
            buffer: Vec::new(),
            buffer_pos: 0,
            sense: SenseData::NO_SENSE,
            cdrom: None,
            interrupt_pending: false,
            command_timer: None,
            unit_attention: false,
        }
    }

    pub fn new_ata() -> Self {
        AtaDevice { kind: DeviceKind::Ata, status: StatusReg::DRDY | StatusReg::DSC, ..Self::none() }
    }

    pub fn new_atapi(cdrom: CdRomDrive) -> Self {
        AtaDevice {
            kind: DeviceKind::Atapi,
            status: StatusReg::DRDY,
            cdrom: Some(cdrom),
            unit_attention: true,
            ..Self::none()
        }
    }

    /// Status read clears the per-channel interrupt assertion.
    pub fn read_status_clears_interrupt(&mut self) -> u8 {
        self.interrupt_pending = false;
        self.status.bits()
    }

    fn abort(&mut self, reason: impl Into<String>) -> CoreResult<()> {
        self.status.insert(StatusReg::ERR);
        self.error.insert(ErrorReg::ABRT);
        self.interrupt_pending = true;
        Err(CoreError::guest_command(reason, SenseData::ILLEGAL_REQUEST))
    }
}

/// `{name, handler_fn}` ATA command dispatch entry.
pub type AtaHandler = fn(&mut AtaDevice, args: &AtaCommandArgs) -> CoreResult<u64>;
pub type AtapiHandler = fn(&mut AtaDevice, packet: &[u8]) -> CoreResult<AtapiOutcome>;

#[derive(Debug, Clone, Copy, Default)]
pub struct AtaCommandArgs {
    pub sector_count: u16,
    pub lba: u64,
}

/// Result of dispatching an ATAPI packet: either queues data for transfer or
/// reports a command delay with no data phase.
pub struct AtapiOutcome {
    pub delay_us: u64,
    pub data: Vec<u8>,
}

pub struct CommandTable {
    pub ata: HashMap<u8, (&'static str, AtaHandler)>,
    pub atapi: HashMap<u8, (&'static str, AtapiHandler)>,
}

// ATA command opcodes.
pub const ATA_CMD_IDENTIFY_DEVICE: u8 = 0xEC;
pub const ATA_CMD_IDENTIFY_PACKET_DEVICE: u8 = 0xA1;
pub const ATA_CMD_READ_SECTORS: u8 = 0x20;
pub const ATA_CMD_WRITE_SECTORS: u8 = 0x30;
pub const ATA_CMD_DEVICE_RESET: u8 = 0x08;
pub const ATA_CMD_EXEC_DIAGNOSTIC: u8 = 0x90;
pub const ATA_CMD_PACKET: u8 = 0xA0;

// ATAPI packet opcodes.
pub const ATAPI_TEST_UNIT_READY: u8 = 0x00;
pub const ATAPI_REQUEST_SENSE: u8 = 0x03;
pub const ATAPI_INQUIRY: u8 = 0x12;
pub const ATAPI_MODE_SELECT: u8 = 0x55;
pub const ATAPI_MODE_SENSE: u8 = 0x5A;
pub const ATAPI_START_STOP_UNIT: u8 = 0x1B;
pub const ATAPI_PREVENT_ALLOW: u8 = 0x1E;
pub const ATAPI_READ_10: u8 = 0x28;
pub const ATAPI_SEEK: u8 = 0x2B;
pub const ATAPI_READ_SUB_CHANNEL: u8 = 0x42;
pub const ATAPI_READ_TOC: u8 = 0x43;
pub const ATAPI_READ_DISC_INFO: u8 = 0x51;
pub const ATAPI_GET_EVENT_STATUS: u8 = 0x4A;
pub const ATAPI_READ_CDROM_CAPACITY: u8 = 0x25;
pub const ATAPI_PAUSE_RESUME: u8 = 0x4B;
pub const ATAPI_PLAY_AUDIO_MSF: u8 = 0x47;

fn ata_identify_device(dev: &mut AtaDevice, _args: &AtaCommandArgs) -> CoreResult<u64> {
    dev.buffer = build_identify_block("GENERIC-HDD", "0.1");
    dev.status.insert(StatusReg::DRQ);
    Ok(2)
}

fn ata_identify_packet_device(dev: &mut AtaDevice, _args: &AtaCommandArgs) -> CoreResult<u64> {
    dev.buffer = build_identify_block("GENERIC-CDROM", "0.1");
    dev.status.insert(StatusReg::DRQ);
    Ok(2)
}

fn ata_read_sectors(dev: &mut AtaDevice, args: &AtaCommandArgs) -> CoreResult<u64> {
    if args.sector_count == 0 {
        return dev.abort("READ SECTORS with count 0").map(|_| 0);
    }
    dev.buffer = vec![0u8; args.sector_count as usize * 512];
    dev.status.insert(StatusReg::DRQ);
    Ok(args.sector_count as u64 * 20)
}

fn ata_write_sectors(dev: &mut AtaDevice, args: &AtaCommandArgs) -> CoreResult<u64> {
    dev.status.insert(StatusReg::DRQ);
    Ok(args.sector_count as u64 * 20)
}

fn ata_device_reset(dev: &mut AtaDevice, _args: &AtaCommandArgs) -> CoreResult<u64> {
    dev.status = StatusReg::DRDY | StatusReg::DSC;
    dev.error = ErrorReg::empty();
    Ok(1)
}

fn ata_exec_diagnostic(dev: &mut AtaDevice, _args: &AtaCommandArgs) -> CoreResult<u64> {
    dev.error = ErrorReg::empty();
    Ok(1)
}

fn build_identify_block(model: &str, firmware: &str) -> Vec<u8> {
    // 256 words, vendor/model/firmware padded and byte-swapped per the ATA
    // convention.
    let mut words = [0u16; 256];
    write_ata_string(&mut words[27..47], model);
    write_ata_string(&mut words[23..27], firmware);
    let mut out = Vec::with_capacity(512);
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out
}

fn write_ata_string(words: &mut [u16], s: &str) {
    let bytes = s.as_bytes();
    for (i, word) in words.iter_mut().enumerate() {
        let a = bytes.get(i * 2).copied().unwrap_or(b' ');
        let b = bytes.get(i * 2 + 1).copied().unwrap_or(b' ');
        // ATA strings are byte-swapped within each word.
        *word = u16::from_be_bytes([a, b]);
    }
}

fn atapi_test_unit_ready(dev: &mut AtaDevice, _packet: &[u8]) -> CoreResult<AtapiOutcome> {
    let ready = dev.cdrom.as_ref().map(|c| c.is_ready()).unwrap_or(false);
    if dev.unit_attention {
        dev.unit_attention = false;
        dev.sense = SenseData::UNIT_ATTENTION_MEDIUM_CHANGED;
        return dev.abort("unit attention: medium changed").map(|_| AtapiOutcome { delay_us: 0, data: vec![] });
    }
    if !ready {
        dev.sense = SenseData::NOT_READY;
        return dev.abort("test unit ready: not ready").map(|_| AtapiOutcome { delay_us: 0, data: vec![] });
    }
    dev.sense = SenseData::NO_SENSE;
    Ok(AtapiOutcome { delay_us: 1, data: vec![] })
}

fn atapi_request_sense(dev: &mut AtaDevice, _packet: &[u8]) -> CoreResult<AtapiOutcome> {
    let sense = dev.sense;
    let mut data = vec![0u8; 18];
    data[0] = 0x70;
    data[2] = sense.sense_key;
    data[7] = 10;
    data[12] = sense.asc;
    data[13] = sense.ascq;
    Ok(AtapiOutcome { delay_us: 1, data })
}

fn atapi_inquiry(_dev: &mut AtaDevice, _packet: &[u8]) -> CoreResult<AtapiOutcome> {
    let mut data = vec![0u8; 36];
    data[0] = 0x05; // CD-ROM device
    data[1] = 0x80; // removable
    data[2] = 0x02; // ANSI version
    data[3] = 0x02;
    data[4] = 31; // additional length
    data[8..16].copy_from_slice(b"VIRTUAL ");
    data[16..32].copy_from_slice(b"PS1-CORE CD-ROM ");
    data[32..36].copy_from_slice(b"1.0 ");
    Ok(AtapiOutcome { delay_us: 1, data })
}

fn atapi_start_stop_unit(dev: &mut AtaDevice, packet: &[u8]) -> CoreResult<AtapiOutcome> {
    let load_eject = packet[4] & 0x02 != 0;
    let start = packet[4] & 0x01 != 0;
    if let Some(cdrom) = dev.cdrom.as_mut() {
        if load_eject && !start {
            cdrom.set_door_lock(false);
        }
    }
    Ok(AtapiOutcome { delay_us: 1, data: vec![] })
}

fn atapi_prevent_allow(dev: &mut AtaDevice, packet: &[u8]) -> CoreResult<AtapiOutcome> {
    let prevent = packet[4] & 0x01 != 0;
    if let Some(cdrom) = dev.cdrom.as_mut() {
        cdrom.set_door_lock(prevent);
    }
    Ok(AtapiOutcome { delay_us: 1, data: vec![] })
}

fn atapi_get_event_status(_dev: &mut AtaDevice, _packet: &[u8]) -> CoreResult<AtapiOutcome> {
    Ok(AtapiOutcome { delay_us: 1, data: vec![0u8; 8] })
}

fn atapi_pause_resume(dev: &mut AtaDevice, packet: &[u8]) -> CoreResult<AtapiOutcome> {
    let resume = packet[8] & 0x01 != 0;
    if let Some(cdrom) = dev.cdrom.as_mut() {
        if resume {
            cdrom.audio.resume();
        } else {
            cdrom.audio.pause();
        }
    }
    Ok(AtapiOutcome { delay_us: 1, data: vec![] })
}

/// `READ TOC` format 0 (table), encoded as
/// `len_msb len_lsb first last {8-byte entries}... lead-out entry`.
fn atapi_read_toc(dev: &mut AtaDevice, packet: &[u8]) -> CoreResult<AtapiOutcome> {
    let msf = packet[1] & 0x02 != 0;
    let Some(cdrom) = dev.cdrom.as_ref() else {
        dev.sense = SenseData::NOT_READY;
        return dev.abort("READ TOC with no CD-ROM attached").map(|_| AtapiOutcome { delay_us: 0, data: vec![] });
    };
    let Some(disc) = cdrom.disc() else {
        dev.sense = SenseData::NOT_READY;
        return dev.abort("READ TOC with no disc").map(|_| AtapiOutcome { delay_us: 0, data: vec![] });
    };

    let first = disc.tracks.first().map(|t| t.num).unwrap_or(1);
    let last = disc.tracks.last().map(|t| t.num).unwrap_or(1);
    let mut body = Vec::new();
    body.push(first);
    body.push(last);
    for t in &disc.tracks {
        encode_toc_entry(&mut body, t.num, t.attr, t.start_lba, msf);
    }
    encode_toc_entry(&mut body, 0xAA, 0x00, disc.lead_out_lba, msf);

    let total_len = (body.len() + 2) as u16;
    let mut data = Vec::with_capacity(total_len as usize);
    data.push((total_len >> 8) as u8);
    data.push((total_len & 0xFF) as u8);
    data.extend_from_slice(&body);
    Ok(AtapiOutcome { delay_us: 1, data })
}

fn encode_toc_entry(out: &mut Vec<u8>, track_num: u8, attr: u8, lba: i64, msf: bool) {
    out.push(0); // reserved
    out.push(attr | 0x10); // ADR=1
    out.push(track_num);
    out.push(0); // reserved
    if msf {
        let m = Msf::from_lba(lba);
        out.push(0);
        out.push(m.min);
        out.push(m.sec);
        out.push(m.frame);
    } else {
        out.extend_from_slice(&(lba as u32).to_be_bytes());
    }
}

/// `READ SUB-CHANNEL`, sub-channel Q, current-position format: status byte
/// plus absolute and track-relative MSF/LBA position.
fn atapi_read_sub_channel(dev: &mut AtaDevice, packet: &[u8]) -> CoreResult<AtapiOutcome> {
    let msf = packet[1] & 0x02 != 0;
    let mut data = vec![0u8; 16];

    data[1] = match dev.cdrom.as_ref().map(|c| c.audio.status) {
        Some(super::cdrom::AudioStatus::Playing) => 0x11,
        Some(super::cdrom::AudioStatus::Paused) => 0x12,
        Some(super::cdrom::AudioStatus::SuccessStop) => 0x13,
        Some(super::cdrom::AudioStatus::ErrorStop) => 0x14,
        _ => 0x15,
    };
    data[3] = 12; // sub-channel data length, little endian low byte
    data[4] = 0x01; // format: current position

    if let Some(cdrom) = dev.cdrom.as_ref() {
        if let Some(lba) = cdrom.audio.current_lba() {
            let disc = cdrom.disc();
            let track = disc.as_ref().and_then(|d| d.track_containing(lba));
            let (track_num, track_start) = track.map(|t| (t.num, t.start_lba)).unwrap_or((0, 0));
            data[5] = 0x10; // ADR=1, 2-channel audio control bits left at 0
            data[6] = track_num;
            data[7] = 1; // index
            let rel_lba = lba - track_start;
            if msf {
                let abs = Msf::from_lba(lba);
                data[9] = abs.min;
                data[10] = abs.sec;
                data[11] = abs.frame;
                let rel = Msf::from_lba(rel_lba);
                data[13] = rel.min;
                data[14] = rel.sec;
                data[15] = rel.frame;
            } else {
                data[8..12].copy_from_slice(&(lba as u32).to_be_bytes());
                data[12..16].copy_from_slice(&(rel_lba as u32).to_be_bytes());
            }
        }
    }

    Ok(AtapiOutcome { delay_us: 1, data })
}

fn atapi_read_disc_info(_dev: &mut AtaDevice, _packet: &[u8]) -> CoreResult<AtapiOutcome> {
    Ok(AtapiOutcome { delay_us: 1, data: vec![0u8; 34] })
}

fn atapi_read_cdrom_capacity(dev: &mut AtaDevice, _packet: &[u8]) -> CoreResult<AtapiOutcome> {
    let lead_out = dev.cdrom.as_ref().and_then(|c| c.disc()).map(|d| d.lead_out_lba).unwrap_or(0);
    let mut data = vec![0u8; 8];
    data[0..4].copy_from_slice(&(lead_out as u32).to_be_bytes());
    data[4..8].copy_from_slice(&super::cdrom::DATA_SECTOR_BYTES.to_be_bytes());
    Ok(AtapiOutcome { delay_us: 1, data })
}

fn atapi_mode_sense(_dev: &mut AtaDevice, _packet: &[u8]) -> CoreResult<AtapiOutcome> {
    Ok(AtapiOutcome { delay_us: 1, data: vec![0u8; 8] })
}

fn atapi_mode_select(_dev: &mut AtaDevice, _packet: &[u8]) -> CoreResult<AtapiOutcome> {
    Ok(AtapiOutcome { delay_us: 1, data: vec![] })
}

fn atapi_seek(_dev: &mut AtaDevice, _packet: &[u8]) -> CoreResult<AtapiOutcome> {
    Ok(AtapiOutcome { delay_us: 5_000, data: vec![] })
}

fn atapi_play_audio_msf(dev: &mut AtaDevice, packet: &[u8]) -> CoreResult<AtapiOutcome> {
    let start = Msf { min: packet[3], sec: packet[4], frame: packet[5] }.to_lba();
    let end = Msf { min: packet[6], sec: packet[7], frame: packet[8] }.to_lba();
    let Some(cdrom) = dev.cdrom.as_mut() else {
        return dev.abort("PLAY AUDIO MSF with no CD-ROM").map(|_| AtapiOutcome { delay_us: 0, data: vec![] });
    };
    if let Some(disc) = cdrom.disc() {
        if let Some(track) = disc.track_containing(start) {
            let track = track.clone();
            let _ = cdrom.audio.play(&track, end);
        }
    }
    Ok(AtapiOutcome { delay_us: 1, data: vec![] })
}

fn atapi_read_10(dev: &mut AtaDevice, packet: &[u8]) -> CoreResult<AtapiOutcome> {
    let lba = u32::from_be_bytes([packet[2], packet[3], packet[4], packet[5]]) as i64;
    let count = u16::from_be_bytes([packet[7], packet[8]]) as usize;
    let ready = dev.cdrom.as_ref().map(|c| c.is_ready()).unwrap_or(false);
    if !ready {
        dev.sense = SenseData::NOT_READY;
        return dev.abort("READ(10) while not ready").map(|_| AtapiOutcome { delay_us: 0, data: vec![] });
    }
    let Some(cdrom) = dev.cdrom.as_ref() else {
        dev.sense = SenseData::NOT_READY;
        return dev.abort("READ(10) with no CD-ROM attached").map(|_| AtapiOutcome { delay_us: 0, data: vec![] });
    };
    match cdrom.read_sectors(lba, count) {
        Ok(data) => Ok(AtapiOutcome { delay_us: count as u64 * 10, data }),
        Err(_) => {
            dev.sense = SenseData::HARDWARE_ERROR;
            dev.abort("READ(10) sector read failure").map(|_| AtapiOutcome { delay_us: 0, data: vec![] })
        }
    }
}

pub fn build_command_table() -> CommandTable {
    let mut ata: HashMap<u8, (&'static str, AtaHandler)> = HashMap::new();
    ata.insert(ATA_CMD_IDENTIFY_DEVICE, ("IDENTIFY DEVICE", ata_identify_device));
    ata.insert(ATA_CMD_IDENTIFY_PACKET_DEVICE, ("IDENTIFY PACKET DEVICE", ata_identify_packet_device));
    ata.insert(ATA_CMD_READ_SECTORS, ("READ SECTORS", ata_read_sectors));
    ata.insert(ATA_CMD_WRITE_SECTORS, ("WRITE SECTORS", ata_write_sectors));
    ata.insert(ATA_CMD_DEVICE_RESET, ("DEVICE RESET", ata_device_reset));
    ata.insert(ATA_CMD_EXEC_DIAGNOSTIC, ("EXECUTE DEVICE DIAGNOSTIC", ata_exec_diagnostic));

    let mut atapi: HashMap<u8, (&'static str, AtapiHandler)> = HashMap::new();
    atapi.insert(ATAPI_TEST_UNIT_READY, ("TEST UNIT READY", atapi_test_unit_ready));
    atapi.insert(ATAPI_REQUEST_SENSE, ("REQUEST SENSE", atapi_request_sense));
    atapi.insert(ATAPI_INQUIRY, ("INQUIRY", atapi_inquiry));
    atapi.insert(ATAPI_MODE_SELECT, ("MODE SELECT", atapi_mode_select));
    atapi.insert(ATAPI_MODE_SENSE, ("MODE SENSE", atapi_mode_sense));
    atapi.insert(ATAPI_START_STOP_UNIT, ("START/STOP UNIT", atapi_start_stop_unit));
    atapi.insert(ATAPI_PREVENT_ALLOW, ("PREVENT/ALLOW", atapi_prevent_allow));
    atapi.insert(ATAPI_READ_10, ("READ", atapi_read_10));
    atapi.insert(ATAPI_SEEK, ("SEEK", atapi_seek));
    atapi.insert(ATAPI_READ_SUB_CHANNEL, ("READ SUB-CHANNEL", atapi_read_sub_channel));
    atapi.insert(ATAPI_READ_TOC, ("READ TOC", atapi_read_toc));
    atapi.insert(ATAPI_READ_DISC_INFO, ("READ DISC INFO", atapi_read_disc_info));
    atapi.insert(ATAPI_GET_EVENT_STATUS, ("GET EVENT STATUS NOTIFICATION", atapi_get_event_status));
    atapi.insert(ATAPI_READ_CDROM_CAPACITY, ("READ CD-ROM CAPACITY", atapi_read_cdrom_capacity));
    atapi.insert(ATAPI_PAUSE_RESUME, ("PAUSE/RESUME", atapi_pause_resume));
    atapi.insert(ATAPI_PLAY_AUDIO_MSF, ("PLAY AUDIO (MSF)", atapi_play_audio_msf));

    CommandTable { ata, atapi }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSelect {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveSelect {
    Master,
    Slave,
}

/// One IDE channel: master + slave device, selected by the drive-select bit.
pub struct AtaChannel {
    pub master: AtaDevice,
    pub slave: AtaDevice,
    pub selected: DriveSelect,
}

impl AtaChannel {
    pub fn empty() -> Self {
        AtaChannel { master: AtaDevice::none(), slave: AtaDevice::none(), selected: DriveSelect::Master }
    }

    pub fn selected_device(&mut self) -> &mut AtaDevice {
        match self.selected {
            DriveSelect::Master => &mut self.master,
            DriveSelect::Slave => &mut self.slave,
        }
    }
}

/// Two-channel ATA/ATAPI controller.
pub struct AtaController {
    pub primary: AtaChannel,
    pub secondary: AtaChannel,
    pub table: CommandTable,
}

impl AtaController {
    pub fn new() -> Self {
        AtaController { primary: AtaChannel::empty(), secondary: AtaChannel::empty(), table: build_command_table() }
    }

    pub fn channel(&mut self, sel: ChannelSelect) -> &mut AtaChannel {
        match sel {
            ChannelSelect::Primary => &mut self.primary,
            ChannelSelect::Secondary => &mut self.secondary,
        }
    }

    /// Dispatches an ATA command opcode on the currently selected device.
    /// Unknown opcodes abort with the correct error taxonomy.
    pub fn dispatch_ata(
        &mut self,
        sched: &mut Scheduler,
        sel: ChannelSelect,
        opcode: u8,
        args: AtaCommandArgs,
    ) -> CoreResult<()> {
        let handler = self.table.ata.get(&opcode).copied();
        let channel = self.channel(sel);
        let dev = channel.selected_device();
        match handler {
            Some((_name, f)) => {
                dev.status.insert(StatusReg::BSY);
                let delay_us = f(dev, &args)?;
                dev.status.remove(StatusReg::BSY);
                dev.status.insert(StatusReg::DRDY | StatusReg::DSC);
                dev.interrupt_pending = true;
                let _ = sched.now_ns();
                let _ = delay_us;
                Ok(())
            }
            None => dev.abort(format!("unknown ATA opcode 0x{opcode:02X}")),
        }
    }

    /// Dispatches an ATAPI packet on the currently selected device, setting
    /// `{c_d, i_o}` so the host knows the next bus phase.
    pub fn dispatch_atapi(
        &mut self,
        sel: ChannelSelect,
        packet: &[u8],
    ) -> CoreResult<Vec<u8>> {
        let opcode = packet[0];
        let handler = self.table.atapi.get(&opcode).copied();
        let channel = self.channel(sel);
        let dev = channel.selected_device();
        match handler {
            Some((_name, f)) => {
                dev.status.insert(StatusReg::BSY);
                let outcome = f(dev, packet)?;
                dev.status.remove(StatusReg::BSY);
                dev.status.insert(StatusReg::DRDY);
                if !outcome.data.is_empty() {
                    dev.status.insert(StatusReg::DRQ);
                    dev.interrupt_reason = InterruptReason::I_O;
                } else {
                    dev.interrupt_reason = InterruptReason::C_D | InterruptReason::I_O;
                }
                dev.interrupt_pending = true;
                dev.buffer = outcome.data.clone();
                dev.buffer_pos = 0;
                Ok(outcome.data)
            }
            None => {
                dev.sense = SenseData::ILLEGAL_REQUEST;
                dev.abort(format!("unknown ATAPI opcode 0x{opcode:02X}")).map(|_| Vec::new())
            }
        }
    }
}

impl Default for AtaController {
    fn default() -> Self {
        Self::new()
    }
}
