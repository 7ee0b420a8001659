/// Interrupt-context callbacks and the capability handed to them

use crate::command::{Command, IntrResult};
use crate::controller::Controller;
use crate::drive::state::ControllerState;
use crate::error::Result;
use crate::position::Position;
use crate::status::{DriveStatus, ModeFlags};

/// Handler run from the controller interrupt
///
/// Receives the interrupt class, the response bytes latched with it and an
/// [`IrqContext`]. Handlers must return quickly and must not allocate.
pub type Callback = Box<dyn FnMut(IntrResult, &[u8], &mut IrqContext<'_>)>;

/// Event classes a callback can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackSlot {
    /// Completion or error of a blocking command
    Sync,
    /// Sector or report data available, or a read error
    Ready,
    /// Auto-pause at end of track, or end of disc
    AutoPause,
    /// Completion or final failure of a pipeline read
    Read,
}

#[derive(Default)]
pub(crate) struct Callbacks {
    sync: Option<Callback>,
    ready: Option<Callback>,
    auto_pause: Option<Callback>,
    read: Option<Callback>,
}

impl Callbacks {
    pub fn slot_mut(&mut self, slot: CallbackSlot) -> &mut Option<Callback> {
        match slot {
            CallbackSlot::Sync => &mut self.sync,
            CallbackSlot::Ready => &mut self.ready,
            CallbackSlot::AutoPause => &mut self.auto_pause,
            CallbackSlot::Read => &mut self.read,
        }
    }

    pub fn is_set(&self, slot: CallbackSlot) -> bool {
        match slot {
            CallbackSlot::Sync => self.sync.is_some(),
            CallbackSlot::Ready => self.ready.is_some(),
            CallbackSlot::AutoPause => self.auto_pause.is_some(),
            CallbackSlot::Read => self.read.is_some(),
        }
    }

    /// Install a callback, returning the previous one
    pub fn replace(&mut self, slot: CallbackSlot, callback: Option<Callback>) -> Option<Callback> {
        std::mem::replace(self.slot_mut(slot), callback)
    }
}

/// What a callback may do while running in interrupt context
///
/// Only non-blocking operations are reachable: sector transfers, issuing
/// commands without waiting for the acknowledge, and state accessors.
pub struct IrqContext<'a> {
    bus: &'a mut dyn Controller,
    state: &'a mut ControllerState,
}

impl<'a> IrqContext<'a> {
    pub(crate) fn new(bus: &'a mut dyn Controller, state: &'a mut ControllerState) -> Self {
        Self { bus, state }
    }

    /// Transfer the pending sector into `buf`
    pub fn get_sector(&mut self, buf: &mut [u8]) -> usize {
        self.bus.get_sector(buf)
    }

    /// Start a background transfer of the pending sector into `buf`
    pub fn get_sector_dma(&mut self, buf: &mut [u8]) -> usize {
        self.bus.get_sector_dma(buf)
    }

    /// Whether a background sector transfer is still running
    pub fn dma_busy(&self) -> bool {
        self.bus.dma_busy()
    }

    /// Issue a command without waiting for its acknowledge
    pub fn control_f(&mut self, command: Command, param: Option<&[u8]>) -> Result<()> {
        self.state.issue_nowait(&mut *self.bus, command, param)
    }

    /// Issue a raw packet without waiting for its acknowledge
    pub fn command_f(&mut self, command: Command, params: &[u8]) {
        self.state.transmit(&mut *self.bus, command, params);
    }

    /// Most recent status byte
    pub fn status(&self) -> DriveStatus {
        self.state.last_status
    }

    /// Last command issued
    pub fn last_command(&self) -> Option<Command> {
        self.state.last_command
    }

    /// Last position set with `Setloc`
    pub fn last_position(&self) -> Position {
        self.state.last_position
    }

    /// Last mode set with `Setmode`
    pub fn mode(&self) -> ModeFlags {
        self.state.last_mode
    }
}
