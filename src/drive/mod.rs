/// Command/response engine for the CD-ROM controller
///
/// `Drive` owns the controller, tracks the single in-flight blocking command,
/// dispatches interrupts to the registered callbacks and hosts the sector
/// read pipeline.

/// Interrupt-context callbacks
pub mod callback;
/// Multi-sector read pipeline
pub mod read;
mod state;

pub use callback::{Callback, CallbackSlot, IrqContext};
pub use read::ReadStatus;
pub use state::PARAMETER_BUFFER_DEPTH;

use crate::command::{Command, IntrResult};
use crate::controller::{Controller, IrqPacket, MediaFlag};
use crate::error::{CdError, Result};
use crate::position::{btoi, itob, Position};
use crate::status::{DriveStatus, ModeFlags};
use callback::Callbacks;
use read::ReadState;
use state::{checked_param, location_param, ControllerState};

/// Consecutive idle interrupt polls before a wait gives up
pub const SPIN_LIMIT: u32 = 100_000;

/// How a sync call behaves while the awaited event is outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Block until the event arrives
    Wait,
    /// Return the current state immediately
    Poll,
}

/// Driver for one CD-ROM controller
pub struct Drive<C: Controller> {
    bus: C,
    state: ControllerState,
    callbacks: Callbacks,
    read: Option<ReadState>,
    media: MediaFlag,
}

impl<C: Controller> Drive<C> {
    /// Wrap a controller with a fresh media-changed flag
    pub fn new(bus: C) -> Self {
        Self::with_media_flag(bus, MediaFlag::new())
    }

    /// Wrap a controller, sharing the platform's media-changed flag
    pub fn with_media_flag(bus: C, media: MediaFlag) -> Self {
        Self {
            bus,
            state: ControllerState::default(),
            callbacks: Callbacks::default(),
            read: None,
            media,
        }
    }

    /// Reset the controller and mark the media as changed so the
    /// filesystem is parsed on first use
    pub fn init(&mut self) -> Result<()> {
        log::debug!("Initializing CD-ROM controller");
        self.read = None;
        self.state.reset();

        self.control(Command::Nop, None)?;
        self.control_b(Command::Init, None)?;
        self.media.set();

        log::debug!("CD-ROM ready, status {}", self.state.last_status);
        Ok(())
    }

    /// Shared media-changed flag
    pub fn media_flag(&self) -> &MediaFlag {
        &self.media
    }

    /// Underlying controller
    pub fn controller(&self) -> &C {
        &self.bus
    }

    /// Mutable access to the underlying controller
    pub fn controller_mut(&mut self) -> &mut C {
        &mut self.bus
    }

    /// Last command issued
    pub fn last_command(&self) -> Option<Command> {
        self.state.last_command
    }

    /// Last position set with `Setloc`, directly or implicitly
    pub fn last_position(&self) -> Position {
        self.state.last_position
    }

    /// Last mode set with `Setmode`
    ///
    /// Does not reflect mode changes the controller makes on its own, e.g.
    /// after `Init`.
    pub fn mode(&self) -> ModeFlags {
        self.state.last_mode
    }

    /// Most recent status byte
    pub fn status(&self) -> DriveStatus {
        self.state.last_status
    }

    /// Response bytes of the most recent blocking command completion
    pub fn last_response(&self) -> &[u8] {
        &self.state.sync_response
    }

    /// Whether a blocking command is still executing
    pub fn sync_pending(&self) -> bool {
        self.state.sync_pending.is_some()
    }

    /// Issue a command and wait for its acknowledge
    ///
    /// Location-bearing commands (`ReadN`, `ReadS`, `SeekL`, `SeekP`) given
    /// a position send it as a separate `Setloc` first. Returns the
    /// acknowledge response.
    pub fn control(&mut self, command: Command, param: Option<&[u8]>) -> Result<Vec<u8>> {
        if command.takes_location() {
            if let Some(loc) = param {
                let loc = location_param(command, loc)?;
                self.issue_and_ack(Command::Setloc, loc)?;
            }
            return self.issue_and_ack(command, &[]);
        }

        let params = checked_param(command, param)?;
        self.issue_and_ack(command, params)
    }

    /// Issue a command and, if it is blocking, wait for completion
    ///
    /// Returns the completion response for blocking commands, the
    /// acknowledge response otherwise.
    pub fn control_b(&mut self, command: Command, param: Option<&[u8]>) -> Result<Vec<u8>> {
        let ack = self.control(command, param)?;
        if !command.is_blocking() {
            return Ok(ack);
        }

        match self.sync(SyncMode::Wait) {
            (IntrResult::Complete, _) => Ok(self.state.sync_response.clone()),
            (_, status) => Err(CdError::CommandRejected { command, status }),
        }
    }

    /// Issue a command without waiting for the acknowledge
    ///
    /// Safe from interrupt context. At most two commands may be awaiting
    /// acknowledge; a location parameter counts as a second command.
    pub fn control_f(&mut self, command: Command, param: Option<&[u8]>) -> Result<()> {
        self.state.issue_nowait(&mut self.bus, command, param)
    }

    /// Issue a raw packet with an explicit parameter list and wait for the
    /// acknowledge; no implicit `Setloc` is sent
    pub fn command(&mut self, command: Command, params: &[u8]) -> Result<Vec<u8>> {
        self.issue_and_ack(command, params)
    }

    /// Issue a raw packet without waiting for the acknowledge
    pub fn command_f(&mut self, command: Command, params: &[u8]) {
        self.state.transmit(&mut self.bus, command, params);
    }

    /// Wait for (or poll) the in-flight blocking command
    ///
    /// The result is `Complete` when no blocking command is outstanding and
    /// the last one finished, `DiskError` if it failed (or the wait timed
    /// out), `NoIntr` when polling a command that is still running. It comes
    /// with the status byte as of the return, after any queued interrupt
    /// has been serviced.
    pub fn sync(&mut self, mode: SyncMode) -> (IntrResult, DriveStatus) {
        let result = match mode {
            SyncMode::Wait => {
                if self.state.sync_pending.is_none() {
                    self.handle_interrupt();
                }
                if self.spin_until(|d| d.state.sync_pending.is_none()) {
                    self.state.sync_result
                } else {
                    IntrResult::DiskError
                }
            }
            SyncMode::Poll => {
                self.handle_interrupt();
                if self.state.sync_pending.is_some() {
                    IntrResult::NoIntr
                } else {
                    self.state.sync_result
                }
            }
        };
        (result, self.state.last_status)
    }

    /// Register a callback for blocking command completion
    pub fn set_sync_callback(&mut self, callback: Option<Callback>) -> Option<Callback> {
        self.set_callback(CallbackSlot::Sync, callback)
    }

    /// Register a callback for incoming sector or report data
    ///
    /// While a pipeline read is running the new callback replaces the
    /// displaced one and takes effect when the read finishes.
    pub fn set_ready_callback(&mut self, callback: Option<Callback>) -> Option<Callback> {
        self.set_callback(CallbackSlot::Ready, callback)
    }

    /// Register a callback for auto-pause and end of disc
    pub fn set_auto_pause_callback(&mut self, callback: Option<Callback>) -> Option<Callback> {
        self.set_callback(CallbackSlot::AutoPause, callback)
    }

    /// Register a callback for pipeline read completion
    pub fn set_read_callback(&mut self, callback: Option<Callback>) -> Option<Callback> {
        self.set_callback(CallbackSlot::Read, callback)
    }

    /// Install a callback in a slot, returning the previous one
    pub fn set_callback(&mut self, slot: CallbackSlot, callback: Option<Callback>) -> Option<Callback> {
        if slot == CallbackSlot::Ready {
            if let Some(read) = self.read.as_mut().filter(|r| r.is_active()) {
                return std::mem::replace(&mut read.saved_ready, callback);
            }
        }
        self.callbacks.replace(slot, callback)
    }

    /// Service one pending controller interrupt
    ///
    /// This is the body of the controller IRQ handler; the wait loops call
    /// it while spinning. Returns whether an interrupt was pending.
    pub fn handle_interrupt(&mut self) -> bool {
        match self.bus.poll_irq() {
            Some(packet) => {
                self.dispatch(packet);
                true
            }
            None => false,
        }
    }

    /// Spin until an externally signalled condition holds
    ///
    /// Used with flags written by callbacks. Returns false if the controller
    /// went idle for longer than the wait budget.
    pub fn wait_until(&mut self, mut condition: impl FnMut() -> bool) -> bool {
        self.spin_until(|_| condition())
    }

    /// Wait for the next vertical blank
    pub fn vsync(&mut self) {
        self.bus.vsync();
    }

    /// Read the table of contents: one start position per track
    pub fn get_toc(&mut self) -> Result<Vec<Position>> {
        let tn = self.control(Command::GetTN, None)?;
        if tn.len() < 3 {
            return Err(CdError::parse(tn.len(), "GetTN response too short"));
        }
        let (first, last) = (btoi(tn[1]), btoi(tn[2]));

        let mut toc = Vec::new();
        for track in first..=last {
            let td = self.control(Command::GetTD, Some(&[itob(track)]))?;
            if td.len() < 3 {
                return Err(CdError::parse(td.len(), "GetTD response too short"));
            }
            toc.push(Position {
                minute: td[1],
                second: td[2],
                sector: 0,
                track,
            });
        }

        log::debug!("Table of contents: {} track(s)", toc.len());
        Ok(toc)
    }

    fn issue_and_ack(&mut self, command: Command, params: &[u8]) -> Result<Vec<u8>> {
        self.handle_interrupt();
        if command.is_blocking() {
            if let Some(pending) = self.state.sync_pending {
                return Err(CdError::Busy(pending));
            }
        }

        // Let earlier non-blocking issues drain out of the parameter buffer
        if !self.spin_until(|d| d.state.in_flight.is_empty()) {
            return Err(CdError::Timeout);
        }

        self.state.last_ack = None;
        self.state.transmit(&mut self.bus, command, params);
        if !self.spin_until(|d| d.state.in_flight.is_empty()) {
            return Err(CdError::Timeout);
        }

        match self.state.last_ack.take() {
            Some(packet) if packet.kind == IntrResult::Acknowledge => Ok(packet.response),
            Some(packet) => {
                let status = DriveStatus(packet.status_byte().unwrap_or(DriveStatus::ERROR));
                log::warn!("{:?} rejected by controller (status {})", command, status);
                Err(CdError::CommandRejected { command, status })
            }
            None => Err(CdError::Timeout),
        }
    }

    fn spin_until(&mut self, mut done: impl FnMut(&Self) -> bool) -> bool {
        let mut idle = 0;
        loop {
            if done(self) {
                return true;
            }
            if self.handle_interrupt() {
                idle = 0;
            } else {
                idle += 1;
                if idle >= SPIN_LIMIT {
                    log::error!("Timed out waiting for the CD-ROM controller");
                    return false;
                }
            }
        }
    }

    fn dispatch(&mut self, packet: IrqPacket) {
        match packet.kind {
            IntrResult::Acknowledge => {
                let command = self.state.in_flight.pop_front();
                if command.is_none() {
                    log::warn!("Acknowledge with no command in flight");
                }
                self.state.latch_status(command, &packet.response);
                self.state.last_ack = Some(packet);
            }
            IntrResult::Complete => {
                let command = self.state.sync_pending.take();
                self.state.latch_status(command, &packet.response);
                self.state.sync_result = IntrResult::Complete;
                self.state.sync_response = packet.response.clone();
                self.fire(CallbackSlot::Sync, IntrResult::Complete, &packet.response);
            }
            IntrResult::DiskError => {
                self.state.latch_status(None, &packet.response);
                if let Some(command) = self.state.in_flight.pop_front() {
                    // Rejected at the acknowledge stage
                    let blocking = command.is_blocking();
                    self.state.last_ack = Some(packet.clone());
                    if blocking && self.state.sync_pending == Some(command) {
                        self.state.sync_pending = None;
                        self.state.sync_result = IntrResult::DiskError;
                        self.fire(CallbackSlot::Sync, IntrResult::DiskError, &packet.response);
                    }
                } else if self.state.sync_pending.take().is_some() {
                    self.state.sync_result = IntrResult::DiskError;
                    self.state.sync_response = packet.response.clone();
                    self.fire(CallbackSlot::Sync, IntrResult::DiskError, &packet.response);
                } else if self.read_active() {
                    self.read_error(&packet.response);
                } else {
                    self.fire(CallbackSlot::Ready, IntrResult::DiskError, &packet.response);
                }
            }
            IntrResult::DataReady => {
                self.state.latch_status(None, &packet.response);
                if self.read_active() {
                    self.read_sector_ready(&packet.response);
                } else {
                    self.fire(CallbackSlot::Ready, IntrResult::DataReady, &packet.response);
                }
            }
            IntrResult::DataEnd => {
                self.state.latch_status(None, &packet.response);
                if self.read_active() {
                    log::warn!("End of disc reached during read");
                    self.read_error(&packet.response);
                }
                self.fire(CallbackSlot::AutoPause, IntrResult::DataEnd, &packet.response);
            }
            IntrResult::NoIntr => {}
        }
    }

    fn fire(&mut self, slot: CallbackSlot, kind: IntrResult, response: &[u8]) {
        let Some(mut callback) = self.callbacks.slot_mut(slot).take() else {
            if slot == CallbackSlot::Ready && kind == IntrResult::DiskError {
                log::warn!("Disk error with no ready callback registered");
            }
            return;
        };

        let mut ctx = IrqContext::new(&mut self.bus, &mut self.state);
        callback(kind, response, &mut ctx);

        if !self.callbacks.is_set(slot) {
            *self.callbacks.slot_mut(slot) = Some(callback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu::VirtualDrive;
    use crate::image::IsoBuilder;
    use std::cell::Cell;
    use std::rc::Rc;

    fn drive() -> Drive<VirtualDrive> {
        let image = IsoBuilder::new("TEST").build().unwrap();
        let mut drive = VirtualDrive::new(image).into_drive();
        drive.init().unwrap();
        drive
    }

    #[test]
    fn test_init_marks_media_changed() {
        let drive = drive();
        assert!(drive.media_flag().is_set());
        assert_eq!(drive.last_command(), Some(Command::Init));
        assert!(!drive.sync_pending());
    }

    #[test]
    fn test_missing_parameter() {
        let mut drive = drive();
        assert!(matches!(
            drive.control(Command::Setloc, None),
            Err(CdError::MissingParameter(Command::Setloc))
        ));
        assert!(matches!(
            drive.control_f(Command::Setmode, None),
            Err(CdError::MissingParameter(Command::Setmode))
        ));
    }

    #[test]
    fn test_location_sends_setloc_first() {
        let mut drive = drive();
        let loc = Position::from_lba(20);
        drive.control_b(Command::SeekL, Some(&loc.to_bytes())).unwrap();
        assert_eq!(drive.last_position(), loc);

        let sent = drive.controller().stats().commands.clone();
        let tail = &sent[sent.len() - 2..];
        assert_eq!(tail, &[Command::Setloc.opcode(), Command::SeekL.opcode()]);
    }

    #[test]
    fn test_raw_command_skips_setloc() {
        let mut drive = drive();
        let before = drive.controller().stats().commands.len();
        drive.command(Command::ReadS, &[]).unwrap();
        drive.control_b(Command::Pause, None).unwrap();
        let sent = &drive.controller().stats().commands[before..];
        assert_eq!(sent, &[Command::ReadS.opcode(), Command::Pause.opcode()]);
    }

    #[test]
    fn test_second_blocking_command_is_busy() {
        let mut drive = drive();
        drive.control_f(Command::Standby, None).unwrap();
        assert!(drive.sync_pending());

        // Only the acknowledge gets serviced before the check
        let before = drive.controller().stats().commands.len();
        let result = drive.control(Command::Pause, None);
        assert!(matches!(result, Err(CdError::Busy(Command::Standby))));
        assert_eq!(drive.controller().stats().commands.len(), before);

        assert_eq!(drive.sync(SyncMode::Wait).0, IntrResult::Complete);
        drive.control_b(Command::Pause, None).unwrap();
    }

    #[test]
    fn test_sync_poll_and_wait() {
        let mut drive = drive();
        drive.control(Command::Standby, None).unwrap();
        assert_eq!(drive.sync(SyncMode::Wait).0, IntrResult::Complete);
        assert_eq!(drive.sync(SyncMode::Poll).0, IntrResult::Complete);
    }

    #[test]
    fn test_sync_reports_status() {
        let mut drive = drive();
        drive.controller_mut().open_lid();
        drive.control(Command::Nop, None).unwrap();

        let (result, status) = drive.sync(SyncMode::Wait);
        assert_eq!(result, IntrResult::Complete);
        assert!(status.shell_open());
        assert_eq!(status, drive.status());

        let (_, status) = drive.sync(SyncMode::Poll);
        assert!(status.shell_open());
    }

    #[test]
    fn test_read_past_end_fires_auto_pause() {
        let mut drive = drive();
        let last = drive.controller().disc().unwrap().sector_count() - 1;

        let ends = Rc::new(Cell::new(0));
        let counter = ends.clone();
        drive.set_auto_pause_callback(Some(Box::new(move |kind, _, _| {
            assert_eq!(kind, IntrResult::DataEnd);
            counter.set(counter.get() + 1);
        })));
        let readies = Rc::new(Cell::new(0));
        let ready_counter = readies.clone();
        drive.set_ready_callback(Some(Box::new(move |_, _, _| {
            ready_counter.set(ready_counter.get() + 1);
        })));

        let loc = Position::from_lba(last);
        drive.control(Command::Setloc, Some(&loc.to_bytes())).unwrap();
        drive.read_retry(4, ModeFlags(ModeFlags::SPEED), 1).unwrap();

        assert_eq!(drive.read_sync(SyncMode::Wait), ReadStatus::Error);
        assert_eq!(ends.get(), 1);
        // The pipeline owned the data-ready events
        assert_eq!(readies.get(), 0);
        assert!(drive.take_read_data().is_none());

        // The displaced ready callback is back
        assert!(drive.set_ready_callback(None).is_some());
    }

    #[test]
    fn test_sync_callback_and_restore() {
        let mut drive = drive();
        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        let previous = drive.set_sync_callback(Some(Box::new(move |kind, _, _| {
            assert_eq!(kind, IntrResult::Complete);
            counter.set(counter.get() + 1);
        })));
        assert!(previous.is_none());

        drive.control_b(Command::Pause, None).unwrap();
        assert_eq!(fired.get(), 1);

        let ours = drive.set_sync_callback(None);
        assert!(ours.is_some());
        drive.control_b(Command::Pause, None).unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_nop_clears_shell_open() {
        let mut drive = drive();
        drive.controller_mut().open_lid();
        drive.control(Command::Nop, None).unwrap();
        assert!(drive.status().shell_open());

        drive.controller_mut().close_lid();
        drive.control(Command::Nop, None).unwrap();
        assert!(drive.status().shell_open());
        drive.control(Command::Nop, None).unwrap();
        assert!(!drive.status().shell_open());
    }

    #[test]
    fn test_setloc_past_end_rejected() {
        let mut drive = drive();
        let loc = Position::from_lba(100_000);
        let err = drive.control(Command::Setloc, Some(&loc.to_bytes())).unwrap_err();
        assert!(matches!(err, CdError::CommandRejected { command: Command::Setloc, .. }));
    }

    #[test]
    fn test_get_toc() {
        let mut drive = drive();
        let toc = drive.get_toc().unwrap();
        assert_eq!(toc.len(), 1);
        assert_eq!(toc[0].track, 1);
        assert_eq!(toc[0].to_string(), "00:02:00");
    }

    #[test]
    fn test_getlocl_keeps_status() {
        let mut drive = drive();
        let status = drive.status();
        let loc = drive.control(Command::GetlocL, None).unwrap();
        assert_eq!(loc.len(), 8);
        assert_eq!(drive.status(), status);
    }
}
