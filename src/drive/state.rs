/// Controller state shared by the normal-context issue calls and the
/// interrupt path

use std::collections::VecDeque;

use crate::command::{Command, IntrResult, ParamShape};
use crate::controller::{Controller, IrqPacket};
use crate::error::{CdError, Result};
use crate::position::Position;
use crate::status::{DriveStatus, ModeFlags};

/// Commands the controller can hold before acknowledging the oldest
pub const PARAMETER_BUFFER_DEPTH: usize = 2;

/// Last-issued command, position, mode and status, plus in-flight tracking
///
/// The interrupt path is the only writer of `last_status`, the acknowledge
/// queue and the sync fields; normal-context code reads them between
/// interrupts.
#[derive(Debug, Default)]
pub(crate) struct ControllerState {
    pub last_command: Option<Command>,
    pub last_position: Position,
    pub last_mode: ModeFlags,
    pub last_status: DriveStatus,
    /// Commands transmitted but not yet acknowledged, oldest first
    pub in_flight: VecDeque<Command>,
    /// Outcome of the most recent acknowledge (or acknowledge-stage error)
    pub last_ack: Option<IrqPacket>,
    /// Blocking command awaiting its completion interrupt
    pub sync_pending: Option<Command>,
    pub sync_result: IntrResult,
    pub sync_response: Vec<u8>,
}

impl ControllerState {
    /// Forget in-flight bookkeeping, used when the controller is re-initialized
    pub fn reset(&mut self) {
        self.in_flight.clear();
        self.last_ack = None;
        self.sync_pending = None;
        self.sync_result = IntrResult::Complete;
        self.sync_response.clear();
    }

    /// Latch the status byte from a response, if the command reports one
    pub fn latch_status(&mut self, command: Option<Command>, response: &[u8]) {
        let reports = command.map_or(true, Command::reports_status);
        if reports {
            if let Some(&status) = response.first() {
                self.last_status = DriveStatus(status);
            }
        }
    }

    /// Write one command to the controller without waiting
    pub fn transmit(&mut self, bus: &mut dyn Controller, command: Command, params: &[u8]) {
        if self.in_flight.len() >= PARAMETER_BUFFER_DEPTH {
            log::warn!(
                "{:?} issued with {} commands awaiting acknowledge",
                command,
                self.in_flight.len()
            );
        }

        match command {
            Command::Setloc => {
                if let Some(pos) = Position::from_bytes(params) {
                    self.last_position = pos;
                }
            }
            Command::Setmode => {
                if let Some(&mode) = params.first() {
                    self.last_mode = ModeFlags(mode);
                }
            }
            _ => {}
        }

        if command.is_blocking() {
            self.sync_pending = Some(command);
            self.sync_result = IntrResult::NoIntr;
        }

        log::trace!("CD command {:?} {:02X?}", command, params);
        self.last_command = Some(command);
        self.in_flight.push_back(command);
        bus.send(command.opcode(), params);
    }

    /// Issue a command without waiting, with the implicit `Setloc` for
    /// location-bearing commands
    ///
    /// Passing a location here puts two commands in flight; callers issuing
    /// from interrupt context must keep the two-command limit in mind.
    pub fn issue_nowait(
        &mut self,
        bus: &mut dyn Controller,
        command: Command,
        param: Option<&[u8]>,
    ) -> Result<()> {
        if command.takes_location() {
            if let Some(loc) = param {
                let loc = location_param(command, loc)?;
                self.transmit(bus, Command::Setloc, loc);
            }
            self.transmit(bus, command, &[]);
            return Ok(());
        }

        let params = checked_param(command, param)?;
        self.transmit(bus, command, params);
        Ok(())
    }
}

/// Validate a parameter against the command's shape
pub(crate) fn checked_param<'a>(command: Command, param: Option<&'a [u8]>) -> Result<&'a [u8]> {
    match command.param_shape() {
        ParamShape::None | ParamShape::Location => Ok(&[]),
        ParamShape::Required(len) => match param {
            Some(p) if p.len() >= len => Ok(&p[..len]),
            _ => Err(CdError::MissingParameter(command)),
        },
        ParamShape::Optional(len) => Ok(param.map_or(&[][..], |p| &p[..len.min(p.len())])),
    }
}

/// Validate a position parameter for a location-bearing command
pub(crate) fn location_param(command: Command, loc: &[u8]) -> Result<&[u8]> {
    if loc.len() < 3 {
        return Err(CdError::MissingParameter(command));
    }
    Ok(&loc[..3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_param_required() {
        assert!(matches!(
            checked_param(Command::Setmode, None),
            Err(CdError::MissingParameter(Command::Setmode))
        ));
        assert_eq!(checked_param(Command::Setmode, Some(&[0x80, 0x01])).unwrap(), &[0x80]);
    }

    #[test]
    fn test_checked_param_optional_and_none() {
        assert!(checked_param(Command::Play, None).unwrap().is_empty());
        assert_eq!(checked_param(Command::Play, Some(&[0x02])).unwrap(), &[0x02]);
        assert!(checked_param(Command::Nop, Some(&[1, 2, 3])).unwrap().is_empty());
    }

    #[test]
    fn test_location_param() {
        assert!(location_param(Command::ReadN, &[0x00, 0x02]).is_err());
        assert_eq!(location_param(Command::ReadN, &[0, 2, 0x16, 0]).unwrap(), &[0, 2, 0x16]);
    }

    #[test]
    fn test_latch_status_skips_getloc() {
        let mut state = ControllerState::default();
        state.latch_status(Some(Command::Nop), &[0x12]);
        assert_eq!(state.last_status, DriveStatus(0x12));
        state.latch_status(Some(Command::GetlocL), &[0x00, 0x02, 0x17]);
        assert_eq!(state.last_status, DriveStatus(0x12));
    }
}
