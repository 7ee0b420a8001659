/// Multi-sector read pipeline with bounded retry and cancellation
///
/// A read displaces the ready callback, copies each incoming sector into its
/// buffer and pauses the drive once the last one arrives. Failed attempts
/// are restarted from normal context by [`Drive::read_sync`].

use crate::command::{Command, IntrResult};
use crate::controller::Controller;
use crate::drive::{Callback, CallbackSlot, Drive, SyncMode, SPIN_LIMIT};
use crate::error::{CdError, Result};
use crate::position::Position;
use crate::status::ModeFlags;

/// Progress of the current read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Sectors still to arrive; zero means the read completed
    Remaining(usize),
    /// The read failed and no attempts remain
    Error,
    /// The read was cancelled
    Aborted,
}

impl ReadStatus {
    /// Whether the read has finished one way or another
    pub fn is_done(self) -> bool {
        !matches!(self, ReadStatus::Remaining(n) if n > 0)
    }

    /// Numeric form: sectors remaining, -1 on error, -2 when aborted
    pub fn code(self) -> i32 {
        match self {
            ReadStatus::Remaining(n) => n as i32,
            ReadStatus::Error => -1,
            ReadStatus::Aborted => -2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadPhase {
    Reading,
    Done,
    /// Done, and the data handed out
    Taken,
    Failed,
    Aborted,
}

pub(crate) struct ReadState {
    start: Position,
    sectors: usize,
    sector_size: usize,
    mode: ModeFlags,
    buffer: Vec<u8>,
    received: usize,
    attempts: u32,
    max_attempts: u32,
    phase: ReadPhase,
    /// Ready callback displaced for the duration of the read
    pub saved_ready: Option<Callback>,
}

impl ReadState {
    /// Still running, or failed with a retry to come
    pub fn is_active(&self) -> bool {
        match self.phase {
            ReadPhase::Reading => true,
            ReadPhase::Failed => self.attempts < self.max_attempts,
            ReadPhase::Done | ReadPhase::Taken | ReadPhase::Aborted => false,
        }
    }

    fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

impl<C: Controller> Drive<C> {
    /// Read `sectors` sectors from the last `Setloc` position
    ///
    /// Uses `ReadN`, which retries at the controller level.
    pub fn read(&mut self, sectors: usize, mode: ModeFlags) -> Result<()> {
        self.read_retry(sectors, mode, 1)
    }

    /// Read `sectors` sectors from the last `Setloc` position, restarting
    /// the whole read up to `attempts` times
    ///
    /// With more than one attempt the read is issued as `ReadS` and retries
    /// are driven by [`Drive::read_sync`]. The mode is applied with
    /// `Setmode` first. Fails with [`CdError::ReadStart`] if a command could
    /// not be issued or a read is already running.
    pub fn read_retry(&mut self, sectors: usize, mode: ModeFlags, attempts: u32) -> Result<()> {
        if sectors == 0 {
            return Err(CdError::ReadStart);
        }
        if self.read.as_ref().is_some_and(ReadState::is_active) {
            log::warn!("Read requested while another is running");
            return Err(CdError::ReadStart);
        }

        let sector_size = mode.sector_size();
        let saved_ready = self.callbacks.replace(CallbackSlot::Ready, None);
        self.read = Some(ReadState {
            start: self.state.last_position,
            sectors,
            sector_size,
            mode,
            buffer: vec![0; sectors * sector_size],
            received: 0,
            attempts: 0,
            max_attempts: attempts.max(1),
            phase: ReadPhase::Reading,
            saved_ready,
        });

        if let Err(err) = self.start_read_attempt() {
            log::warn!("Could not start read: {}", err);
            self.finish_read();
            self.read = None;
            return Err(CdError::ReadStart);
        }
        Ok(())
    }

    /// Wait for (or poll) the current read
    ///
    /// A failed attempt is restarted here while attempts remain, so callers
    /// polling must keep calling this. Waiting also lets the final `Pause`
    /// complete before returning.
    pub fn read_sync(&mut self, mode: SyncMode) -> ReadStatus {
        if mode == SyncMode::Poll {
            self.handle_interrupt();
            return self.read_progress();
        }

        let mut idle = 0;
        loop {
            let status = self.read_progress();
            if status.is_done() {
                self.spin_until(|d| d.state.sync_pending.is_none());
                return status;
            }

            if self.handle_interrupt() {
                idle = 0;
            } else {
                idle += 1;
                if idle >= SPIN_LIMIT {
                    log::error!("Timed out waiting for sector data");
                    self.give_up_read();
                    return ReadStatus::Error;
                }
            }
        }
    }

    /// Cancel the current read
    ///
    /// No read callback fires for it. The drive may still be stopping; wait
    /// with [`Drive::read_sync`] before issuing new commands.
    pub fn read_break(&mut self) {
        let Some(read) = self.read.as_mut() else {
            return;
        };
        if !read.is_active() {
            return;
        }

        let stop = read.phase == ReadPhase::Reading;
        read.phase = ReadPhase::Aborted;
        log::debug!("Read at {} aborted", read.start);
        if stop {
            self.state.transmit(&mut self.bus, Command::Pause, &[]);
        }
        self.finish_read();
    }

    /// Take the data of a completed read
    ///
    /// Returns `None` once the data has been taken.
    pub fn take_read_data(&mut self) -> Option<Vec<u8>> {
        let read = self.read.as_mut().filter(|r| r.phase == ReadPhase::Done)?;
        read.phase = ReadPhase::Taken;
        Some(std::mem::take(&mut read.buffer))
    }

    /// Read `sectors` sectors from `lba` and wait for the data
    pub fn read_sectors(&mut self, lba: u32, sectors: usize, mode: ModeFlags, attempts: u32) -> Result<Vec<u8>> {
        self.control(Command::Setloc, Some(&Position::from_lba(lba).to_bytes()))?;
        self.read_retry(sectors, mode, attempts)?;

        match self.read_sync(SyncMode::Wait) {
            ReadStatus::Remaining(0) => self.take_read_data().ok_or(CdError::ReadStart),
            ReadStatus::Aborted => Err(CdError::Aborted),
            _ => Err(CdError::ReadFailed {
                attempts: attempts.max(1),
            }),
        }
    }

    pub(crate) fn read_active(&self) -> bool {
        self.read.as_ref().is_some_and(|r| r.phase == ReadPhase::Reading)
    }

    pub(crate) fn read_sector_ready(&mut self, response: &[u8]) {
        let Some(read) = self.read.as_mut() else {
            return;
        };

        let offset = read.received * read.sector_size;
        let sector = &mut read.buffer[offset..offset + read.sector_size];
        let copied = self.bus.get_sector(sector);
        if copied < read.sector_size {
            log::warn!("Short sector transfer: {} of {} bytes", copied, read.sector_size);
        }

        read.received += 1;
        if read.received < read.sectors {
            return;
        }

        read.phase = ReadPhase::Done;
        log::trace!("Read of {} sector(s) at {} complete", read.sectors, read.start);
        self.state.transmit(&mut self.bus, Command::Pause, &[]);
        self.finish_read();
        self.fire(CallbackSlot::Read, IntrResult::Complete, response);
    }

    pub(crate) fn read_error(&mut self, response: &[u8]) {
        let Some(read) = self.read.as_mut() else {
            return;
        };

        read.phase = ReadPhase::Failed;
        log::warn!(
            "Read error at {} after {} sector(s), attempt {} of {}",
            read.start,
            read.received,
            read.attempts,
            read.max_attempts
        );
        let exhausted = read.exhausted();

        self.state.transmit(&mut self.bus, Command::Pause, &[]);
        if exhausted {
            self.finish_read();
            self.fire(CallbackSlot::Read, IntrResult::DiskError, response);
        }
    }

    fn read_progress(&mut self) -> ReadStatus {
        let Some(read) = self.read.as_ref() else {
            return ReadStatus::Error;
        };
        let (phase, exhausted) = (read.phase, read.exhausted());
        let (sectors, received) = (read.sectors, read.received);

        match phase {
            ReadPhase::Reading => ReadStatus::Remaining(sectors - received),
            ReadPhase::Done | ReadPhase::Taken => ReadStatus::Remaining(0),
            ReadPhase::Aborted => ReadStatus::Aborted,
            ReadPhase::Failed if exhausted => ReadStatus::Error,
            ReadPhase::Failed => match self.start_read_attempt() {
                Ok(()) => ReadStatus::Remaining(sectors),
                Err(err) => {
                    log::error!("Could not restart read: {}", err);
                    self.give_up_read();
                    ReadStatus::Error
                }
            },
        }
    }

    fn start_read_attempt(&mut self) -> Result<()> {
        let read = self.read.as_mut().ok_or(CdError::ReadStart)?;
        read.attempts += 1;
        read.received = 0;
        read.phase = ReadPhase::Reading;

        let (start, mode) = (read.start, read.mode);
        let command = if read.max_attempts == 1 {
            Command::ReadN
        } else {
            Command::ReadS
        };
        if read.attempts > 1 {
            log::warn!(
                "Retrying read at {} (attempt {} of {})",
                start,
                read.attempts,
                read.max_attempts
            );
        }

        self.control(Command::Setmode, Some(&[mode.0]))?;
        self.control(command, Some(&start.to_bytes()))?;
        Ok(())
    }

    fn give_up_read(&mut self) {
        if let Some(read) = self.read.as_mut() {
            read.phase = ReadPhase::Failed;
            read.attempts = read.max_attempts;
        }
        self.finish_read();
    }

    fn finish_read(&mut self) {
        if let Some(read) = self.read.as_mut() {
            let saved = read.saved_ready.take();
            self.callbacks.replace(CallbackSlot::Ready, saved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu::VirtualDrive;
    use crate::format::constants::{ISO_MAGIC, RAW_SECTOR_DATA_SIZE, SECTOR_SIZE};
    use crate::image::IsoBuilder;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn drive() -> Drive<VirtualDrive> {
        let image = IsoBuilder::new("READS").build().unwrap();
        let mut drive = VirtualDrive::new(image).into_drive();
        drive.init().unwrap();
        drive
    }

    fn record_read_events(drive: &mut Drive<VirtualDrive>) -> Rc<RefCell<Vec<IntrResult>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        drive.set_read_callback(Some(Box::new(move |kind, _, _| sink.borrow_mut().push(kind))));
        events
    }

    #[test]
    fn test_read_volume_descriptor() {
        let mut drive = drive();
        let events = record_read_events(&mut drive);
        let data = drive.read_sectors(16, 2, ModeFlags(ModeFlags::SPEED), 1).unwrap();

        assert_eq!(data.len(), 2 * SECTOR_SIZE);
        assert_eq!(data[0], 1);
        assert_eq!(&data[1..6], ISO_MAGIC);
        assert_eq!(data[SECTOR_SIZE], 0xFF);
        assert_eq!(*events.borrow(), vec![IntrResult::Complete]);
        assert_eq!(drive.mode(), ModeFlags(ModeFlags::SPEED));

        // The data is handed out once
        assert!(drive.take_read_data().is_none());
        assert_eq!(drive.read_sync(SyncMode::Poll), ReadStatus::Remaining(0));
    }

    #[test]
    fn test_whole_sector_mode() {
        let mut drive = drive();
        let data = drive
            .read_sectors(16, 1, ModeFlags(ModeFlags::SPEED | ModeFlags::SIZE), 1)
            .unwrap();
        assert_eq!(data.len(), RAW_SECTOR_DATA_SIZE);
        // Header and subheader come first
        assert_eq!(&data[12 + 1..12 + 6], ISO_MAGIC);
    }

    #[test]
    fn test_retry_bound() {
        let mut drive = drive();
        drive.controller_mut().mark_bad_sector(17);
        let events = record_read_events(&mut drive);

        let loc = Position::from_lba(16);
        drive.control(Command::Setloc, Some(&loc.to_bytes())).unwrap();
        let before = drive.controller().stats().read_commands;
        drive.read_retry(4, ModeFlags(ModeFlags::SPEED), 3).unwrap();

        assert_eq!(drive.read_sync(SyncMode::Wait), ReadStatus::Error);
        assert_eq!(drive.controller().stats().read_commands - before, 3);
        assert_eq!(*events.borrow(), vec![IntrResult::DiskError]);
        assert!(drive.take_read_data().is_none());
    }

    #[test]
    fn test_poll_drives_retries() {
        let mut drive = drive();
        drive.controller_mut().mark_bad_sector(16);
        let loc = Position::from_lba(16);
        drive.control(Command::Setloc, Some(&loc.to_bytes())).unwrap();
        drive.read_retry(1, ModeFlags(ModeFlags::SPEED), 2).unwrap();

        let mut status = ReadStatus::Remaining(1);
        for _ in 0..1000 {
            status = drive.read_sync(SyncMode::Poll);
            if status.is_done() {
                break;
            }
        }
        assert_eq!(status, ReadStatus::Error);
        assert_eq!(status.code(), -1);
    }

    #[test]
    fn test_abort() {
        let mut drive = drive();
        let events = record_read_events(&mut drive);
        let loc = Position::from_lba(16);
        drive.control(Command::Setloc, Some(&loc.to_bytes())).unwrap();
        drive.read(8, ModeFlags(ModeFlags::SPEED)).unwrap();

        assert!(!drive.read_sync(SyncMode::Poll).is_done());
        drive.read_break();

        assert_eq!(drive.read_sync(SyncMode::Wait), ReadStatus::Aborted);
        assert_eq!(ReadStatus::Aborted.code(), -2);
        assert!(events.borrow().is_empty());
        assert!(!drive.sync_pending());
    }

    #[test]
    fn test_ready_callback_restored() {
        let mut drive = drive();
        let hits = Rc::new(RefCell::new(0));
        let counter = hits.clone();
        drive.set_ready_callback(Some(Box::new(move |_, _, _| *counter.borrow_mut() += 1)));

        drive.read_sectors(16, 3, ModeFlags(ModeFlags::SPEED), 1).unwrap();
        assert_eq!(*hits.borrow(), 0);
        assert!(drive.set_ready_callback(None).is_some());
    }

    #[test]
    fn test_zero_sectors_rejected() {
        let mut drive = drive();
        assert!(matches!(
            drive.read(0, ModeFlags::default()),
            Err(CdError::ReadStart)
        ));
    }
}
