/// Software CD-ROM controller serving a disc image
///
/// `VirtualDrive` answers the command protocol the way the hardware does:
/// an acknowledge for every command, a second completion interrupt for
/// blocking ones, and one data-ready interrupt per sector while reading.
/// Sectors are only produced once every queued response has been taken, so
/// data never overtakes an acknowledge.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::command::{Command, IntrResult};
use crate::controller::{Controller, IrqPacket, MediaFlag};
use crate::drive::Drive;
use crate::image::DiscImage;
use crate::position::{btoi, itob, Position};
use crate::status::{DriveStatus, ModeFlags};

/// Second response byte of an error interrupt
mod error_code {
    /// Seek target unreachable or sector unreadable
    pub const SEEK_FAILED: u8 = 0x04;
    /// Parameter out of range
    pub const INVALID_PARAMETER: u8 = 0x10;
    /// Unknown opcode
    pub const INVALID_COMMAND: u8 = 0x20;
    /// Parameter missing
    pub const WRONG_PARAMETER_COUNT: u8 = 0x40;
    /// No disc, or lid open
    pub const NOT_READY: u8 = 0x80;
}

/// Controller firmware date and version reported by `Test` 0x20
const FIRMWARE_VERSION: [u8; 4] = [0x94, 0x09, 0x19, 0xC0];

/// Mode after `Init`: whole-sector delivery
const INIT_MODE: u8 = ModeFlags::SIZE;

/// Counters for asserting how the driver used the drive
#[derive(Debug, Clone, Default)]
pub struct DriveStats {
    /// Every opcode received, in order
    pub commands: Vec<u8>,
    /// `ReadN`/`ReadS` commands received
    pub read_commands: usize,
    /// Data-ready interrupts raised per LBA
    pub sector_reads: HashMap<u32, usize>,
}

impl DriveStats {
    /// How many times a sector was delivered
    pub fn sectors_read(&self, lba: u32) -> usize {
        self.sector_reads.get(&lba).copied().unwrap_or(0)
    }

    /// Total sectors delivered
    pub fn total_sectors_read(&self) -> usize {
        self.sector_reads.values().sum()
    }

    /// Number of times a command was received
    pub fn count(&self, command: Command) -> usize {
        self.commands.iter().filter(|&&op| op == command.opcode()).count()
    }
}

/// Disc drive emulation over an in-memory [`DiscImage`]
#[derive(Debug, Default)]
pub struct VirtualDrive {
    disc: Option<DiscImage>,
    lid_open: bool,
    /// Sticky shell-open status bit
    shell_latch: bool,
    motor: bool,
    reading: bool,
    mode: ModeFlags,
    filter: [u8; 2],
    /// Target of the last `Setloc`, consumed by the next read or seek
    target: Option<u32>,
    /// Next LBA the head will deliver
    head: u32,
    irq_queue: VecDeque<IrqPacket>,
    pending_sector: Option<u32>,
    bad_sectors: HashSet<u32>,
    media: Option<MediaFlag>,
    frames: u64,
    stats: DriveStats,
}

impl VirtualDrive {
    /// Create a drive with a disc inserted and the lid closed
    pub fn new(disc: DiscImage) -> Self {
        Self {
            disc: Some(disc),
            motor: true,
            mode: ModeFlags(INIT_MODE),
            ..Self::default()
        }
    }

    /// Create a drive with no disc and the lid open
    pub fn empty() -> Self {
        Self {
            lid_open: true,
            shell_latch: true,
            ..Self::default()
        }
    }

    /// Attach the media-changed flag the lid detector sets
    pub fn with_media_flag(mut self, media: MediaFlag) -> Self {
        self.media = Some(media);
        self
    }

    /// Wrap the drive in a [`Drive`] sharing one media-changed flag
    pub fn into_drive(self) -> Drive<Self> {
        let media = self.media.clone().unwrap_or_default();
        Drive::with_media_flag(self.with_media_flag(media.clone()), media)
    }

    /// The inserted disc
    pub fn disc(&self) -> Option<&DiscImage> {
        self.disc.as_ref()
    }

    /// Open the lid, stopping any read
    pub fn open_lid(&mut self) {
        log::debug!("Lid opened");
        self.lid_open = true;
        self.shell_latch = true;
        self.motor = false;
        if self.reading {
            self.reading = false;
            self.pending_sector = None;
            self.push_error(error_code::NOT_READY);
        }
        self.media_changed();
    }

    /// Close the lid; the shell-open bit stays set until the next `Nop`
    pub fn close_lid(&mut self) {
        log::debug!("Lid closed");
        self.lid_open = false;
        self.motor = self.disc.is_some();
        self.media_changed();
    }

    /// Replace the disc, as if the lid had been opened and closed
    pub fn swap_disc(&mut self, disc: Option<DiscImage>) -> Option<DiscImage> {
        self.open_lid();
        let previous = std::mem::replace(&mut self.disc, disc);
        self.head = 0;
        self.target = None;
        self.close_lid();
        previous
    }

    /// Make a sector unreadable
    pub fn mark_bad_sector(&mut self, lba: u32) {
        self.bad_sectors.insert(lba);
    }

    /// Make every sector readable again
    pub fn clear_bad_sectors(&mut self) {
        self.bad_sectors.clear();
    }

    /// Usage counters
    pub fn stats(&self) -> &DriveStats {
        &self.stats
    }

    /// Reset the usage counters
    pub fn reset_stats(&mut self) {
        self.stats = DriveStats::default();
    }

    /// Vertical blanks waited for so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn media_changed(&self) {
        if let Some(media) = &self.media {
            media.set();
        }
    }

    fn status(&self) -> u8 {
        let mut status = 0;
        if self.motor {
            status |= DriveStatus::STANDBY;
        }
        if self.lid_open || self.shell_latch {
            status |= DriveStatus::SHELL_OPEN;
        }
        if self.reading {
            status |= DriveStatus::READ;
        }
        status
    }

    fn sector_count(&self) -> u32 {
        self.disc.as_ref().map_or(0, DiscImage::sector_count)
    }

    fn sessions(&self) -> &[u32] {
        match &self.disc {
            Some(disc) => disc.sessions(),
            None => &[],
        }
    }

    fn push(&mut self, kind: IntrResult, response: Vec<u8>) {
        self.irq_queue.push_back(IrqPacket::new(kind, response));
    }

    fn ack(&mut self) {
        let status = self.status();
        self.push(IntrResult::Acknowledge, vec![status]);
    }

    fn complete(&mut self) {
        let status = self.status();
        self.push(IntrResult::Complete, vec![status]);
    }

    fn push_error(&mut self, code: u8) {
        let mut status = self.status() | DriveStatus::ERROR;
        if code == error_code::SEEK_FAILED {
            status |= DriveStatus::SEEK_ERROR;
        }
        self.push(IntrResult::DiskError, vec![status, code]);
    }

    /// Stop the head and forget any undelivered sector
    fn stop_reading(&mut self) {
        self.reading = false;
        self.pending_sector = None;
    }

    /// Commands answered even without a readable disc
    fn works_without_disc(command: Command) -> bool {
        matches!(
            command,
            Command::Nop
                | Command::Init
                | Command::Reset
                | Command::Getparam
                | Command::Setmode
                | Command::Setfilter
                | Command::Test
                | Command::Stop
                | Command::Pause
                | Command::Mute
                | Command::Demute
        )
    }

    fn execute(&mut self, command: Command, params: &[u8]) {
        if (self.lid_open || self.disc.is_none()) && !Self::works_without_disc(command) {
            self.push_error(error_code::NOT_READY);
            return;
        }

        match command {
            Command::Nop => {
                self.ack();
                if !self.lid_open {
                    self.shell_latch = false;
                }
            }
            Command::Setloc => match Position::from_bytes(params).map(|p| p.to_lba()) {
                Some(lba) if lba >= 0 && (lba as u32) < self.sector_count() => {
                    self.target = Some(lba as u32);
                    self.ack();
                }
                Some(lba) => {
                    log::debug!("Setloc to LBA {} beyond end of disc", lba);
                    self.push_error(error_code::INVALID_PARAMETER);
                }
                None => self.push_error(error_code::WRONG_PARAMETER_COUNT),
            },
            Command::ReadN | Command::ReadS => {
                self.stats.read_commands += 1;
                if let Some(lba) = self.target.take() {
                    self.head = lba;
                }
                self.motor = true;
                self.reading = true;
                self.ack();
            }
            Command::Pause | Command::Stop => {
                self.stop_reading();
                self.ack();
                if command == Command::Stop {
                    self.motor = false;
                }
                self.complete();
            }
            Command::Standby => {
                self.motor = true;
                self.ack();
                self.complete();
            }
            Command::Init | Command::Reset => {
                self.stop_reading();
                self.irq_queue.clear();
                self.target = None;
                self.mode = ModeFlags(INIT_MODE);
                self.motor = self.disc.is_some() && !self.lid_open;
                self.ack();
                if command == Command::Init {
                    self.complete();
                }
            }
            Command::Setmode => match params.first() {
                Some(&mode) => {
                    self.mode = ModeFlags(mode);
                    self.ack();
                }
                None => self.push_error(error_code::WRONG_PARAMETER_COUNT),
            },
            Command::Setfilter => {
                if params.len() >= 2 {
                    self.filter = [params[0], params[1]];
                }
                self.ack();
            }
            Command::Getparam => {
                let status = self.status();
                self.push(
                    IntrResult::Acknowledge,
                    vec![status, self.mode.0, 0, self.filter[0], self.filter[1]],
                );
            }
            Command::GetlocL => {
                let pos = Position::from_lba(self.head);
                self.push(
                    IntrResult::Acknowledge,
                    vec![pos.minute, pos.second, pos.sector, 0x02, 0x00, 0x00, 0x08, 0x00],
                );
            }
            Command::GetlocP => {
                let track = self.track_of(self.head);
                let start = self.sessions().get(track as usize - 1).copied().unwrap_or(0);
                let relative = Position::from_lba(self.head - start);
                let absolute = Position::from_lba(self.head);
                self.push(
                    IntrResult::Acknowledge,
                    vec![
                        itob(track),
                        0x01,
                        relative.minute,
                        relative.second,
                        relative.sector,
                        absolute.minute,
                        absolute.second,
                        absolute.sector,
                    ],
                );
            }
            Command::Setsession => {
                let session = params.first().copied().unwrap_or(0) as usize;
                self.stop_reading();
                self.target = None;
                self.ack();
                match session.checked_sub(1).and_then(|i| self.sessions().get(i).copied()) {
                    Some(start) => {
                        self.head = start;
                        self.complete();
                    }
                    None => {
                        log::debug!("Setsession {}: no such session", session);
                        self.push_error(error_code::SEEK_FAILED);
                    }
                }
            }
            Command::GetTN => {
                let status = self.status();
                let last = self.sessions().len() as u8;
                self.push(IntrResult::Acknowledge, vec![status, 0x01, itob(last)]);
            }
            Command::GetTD => {
                let track = params.first().map(|&t| btoi(t) as usize);
                let start = match track {
                    Some(0) => Some(self.sector_count()),
                    Some(n) => self.sessions().get(n - 1).copied(),
                    None => None,
                };
                match start {
                    Some(lba) => {
                        let pos = Position::from_lba(lba);
                        let status = self.status();
                        self.push(IntrResult::Acknowledge, vec![status, pos.minute, pos.second]);
                    }
                    None => self.push_error(error_code::INVALID_PARAMETER),
                }
            }
            Command::SeekL | Command::SeekP => {
                self.stop_reading();
                if let Some(lba) = self.target.take() {
                    self.head = lba;
                }
                self.ack();
                self.complete();
            }
            Command::Test => match params.first() {
                Some(0x20) => self.push(IntrResult::Acknowledge, FIRMWARE_VERSION.to_vec()),
                _ => self.push_error(error_code::INVALID_PARAMETER),
            },
            Command::GetID => {
                self.ack();
                let status = self.status();
                self.push(
                    IntrResult::Complete,
                    vec![status, 0x00, 0x20, 0x00, b'S', b'C', b'E', b'A'],
                );
            }
            Command::GetQ | Command::ReadToc => {
                self.ack();
                self.complete();
            }
            Command::Play | Command::Forward | Command::Backward => {
                // Data discs only: accepted, but nothing plays
                self.stop_reading();
                self.ack();
            }
            Command::Mute | Command::Demute => self.ack(),
        }
    }

    /// Track (one per session) holding an LBA
    fn track_of(&self, lba: u32) -> u8 {
        self.sessions().iter().filter(|&&start| start <= lba).count().max(1) as u8
    }

    /// Deliver the sector under the head, if reading
    fn next_sector(&mut self) -> Option<IrqPacket> {
        if !self.reading {
            return None;
        }

        let lba = self.head;
        if lba >= self.sector_count() {
            log::debug!("Read reached end of disc at LBA {}", lba);
            self.stop_reading();
            return Some(IrqPacket::new(IntrResult::DataEnd, vec![self.status()]));
        }
        if self.bad_sectors.contains(&lba) {
            log::debug!("Unreadable sector at LBA {}", lba);
            self.stop_reading();
            let status = self.status() | DriveStatus::ERROR;
            return Some(IrqPacket::new(
                IntrResult::DiskError,
                vec![status, error_code::SEEK_FAILED],
            ));
        }

        self.pending_sector = Some(lba);
        self.head += 1;
        *self.stats.sector_reads.entry(lba).or_default() += 1;
        Some(IrqPacket::new(IntrResult::DataReady, vec![self.status()]))
    }
}

impl Controller for VirtualDrive {
    fn send(&mut self, opcode: u8, params: &[u8]) {
        self.stats.commands.push(opcode);
        match Command::from_opcode(opcode) {
            Some(command) => self.execute(command, params),
            None => {
                log::warn!("Unknown opcode {:#04X}", opcode);
                self.push_error(error_code::INVALID_COMMAND);
            }
        }
    }

    fn poll_irq(&mut self) -> Option<IrqPacket> {
        match self.irq_queue.pop_front() {
            Some(packet) => Some(packet),
            None => self.next_sector(),
        }
    }

    fn get_sector(&mut self, buf: &mut [u8]) -> usize {
        let Some(lba) = self.pending_sector.take() else {
            return 0;
        };
        let Some(disc) = &self.disc else {
            return 0;
        };

        let copy = |src: &[u8], dst: &mut [u8]| {
            let len = src.len().min(dst.len());
            dst[..len].copy_from_slice(&src[..len]);
            len
        };
        if self.mode.whole_sector() {
            disc.read_sector_xa(lba).map_or(0, |s| copy(&s, buf))
        } else {
            disc.read_sector(lba).map_or(0, |s| copy(s, buf))
        }
    }

    fn vsync(&mut self) {
        self.frames += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::constants::{ISO_MAGIC, SECTOR_SIZE};
    use crate::image::IsoBuilder;

    fn drive() -> VirtualDrive {
        VirtualDrive::new(IsoBuilder::new("EMU").build().unwrap())
    }

    fn drain(drive: &mut VirtualDrive) -> Vec<IntrResult> {
        std::iter::from_fn(|| drive.irq_queue.pop_front().map(|p| p.kind)).collect()
    }

    #[test]
    fn test_blocking_command_two_phase() {
        let mut drive = drive();
        drive.send(Command::Pause.opcode(), &[]);
        assert_eq!(drain(&mut drive), vec![IntrResult::Acknowledge, IntrResult::Complete]);

        drive.send(Command::Nop.opcode(), &[]);
        assert_eq!(drain(&mut drive), vec![IntrResult::Acknowledge]);
    }

    #[test]
    fn test_sectors_follow_acknowledge() {
        let mut drive = drive();
        drive.send(Command::Setloc.opcode(), &Position::from_lba(16).to_bytes());
        drive.send(Command::Setmode.opcode(), &[0x80]);
        drive.send(Command::ReadN.opcode(), &[]);

        for _ in 0..3 {
            assert_eq!(drive.poll_irq().unwrap().kind, IntrResult::Acknowledge);
        }
        let packet = drive.poll_irq().unwrap();
        assert_eq!(packet.kind, IntrResult::DataReady);
        assert!(DriveStatus(packet.response[0]).reading());

        let mut buf = vec![0u8; SECTOR_SIZE];
        assert_eq!(drive.get_sector(&mut buf), SECTOR_SIZE);
        assert_eq!(&buf[1..6], ISO_MAGIC);
        assert_eq!(drive.get_sector(&mut buf), 0);
        assert_eq!(drive.stats().sectors_read(16), 1);
    }

    #[test]
    fn test_read_to_end_of_disc() {
        let mut drive = drive();
        let last = drive.sector_count() - 1;
        drive.send(Command::Setloc.opcode(), &Position::from_lba(last).to_bytes());
        drive.send(Command::ReadN.opcode(), &[]);
        drain(&mut drive);

        assert_eq!(drive.poll_irq().unwrap().kind, IntrResult::DataReady);
        assert_eq!(drive.poll_irq().unwrap().kind, IntrResult::DataEnd);
        assert!(drive.poll_irq().is_none());
    }

    #[test]
    fn test_bad_sector_stops_read() {
        let mut drive = drive();
        drive.mark_bad_sector(17);
        drive.send(Command::Setloc.opcode(), &Position::from_lba(16).to_bytes());
        drive.send(Command::ReadS.opcode(), &[]);
        drain(&mut drive);

        assert_eq!(drive.poll_irq().unwrap().kind, IntrResult::DataReady);
        let err = drive.poll_irq().unwrap();
        assert_eq!(err.kind, IntrResult::DiskError);
        assert!(DriveStatus(err.response[0]).command_error());
        assert!(drive.poll_irq().is_none());
    }

    #[test]
    fn test_lid_latch() {
        let media = MediaFlag::new();
        let mut drive = drive().with_media_flag(media.clone());
        drive.open_lid();
        assert!(media.is_set());

        drive.send(Command::Setloc.opcode(), &[0x00, 0x02, 0x16]);
        assert_eq!(drive.poll_irq().unwrap().kind, IntrResult::DiskError);

        drive.close_lid();
        drive.send(Command::Nop.opcode(), &[]);
        let first = drive.poll_irq().unwrap();
        assert!(DriveStatus(first.response[0]).shell_open());
        drive.send(Command::Nop.opcode(), &[]);
        let second = drive.poll_irq().unwrap();
        assert!(!DriveStatus(second.response[0]).shell_open());
    }

    #[test]
    fn test_setsession() {
        let image = IsoBuilder::new("ONE")
            .session(IsoBuilder::new("TWO"))
            .build()
            .unwrap();
        let second = image.sessions()[1];
        let mut drive = VirtualDrive::new(image);

        drive.send(Command::Setsession.opcode(), &[2]);
        assert_eq!(drain(&mut drive), vec![IntrResult::Acknowledge, IntrResult::Complete]);
        assert_eq!(drive.head, second);

        drive.send(Command::Setsession.opcode(), &[3]);
        assert_eq!(drain(&mut drive), vec![IntrResult::Acknowledge, IntrResult::DiskError]);
    }

    #[test]
    fn test_unknown_opcode() {
        let mut drive = drive();
        drive.send(0x17, &[]);
        let err = drive.poll_irq().unwrap();
        assert_eq!(err.kind, IntrResult::DiskError);
        assert_eq!(err.response[1], error_code::INVALID_COMMAND);
    }

    #[test]
    fn test_swap_disc() {
        let mut drive = drive().with_media_flag(MediaFlag::new());
        let old = drive.swap_disc(Some(IsoBuilder::new("NEW").build().unwrap()));
        assert_eq!(old.unwrap().volume_label().as_deref(), Some("EMU"));
        assert_eq!(drive.disc().unwrap().volume_label().as_deref(), Some("NEW"));
        assert!(drive.shell_latch);
    }
}
