/// Multi-session discovery: locate a session's volume descriptor by scanning
/// raw sectors from the session start

use std::cell::Cell;
use std::rc::Rc;

use crate::command::{Command, IntrResult};
use crate::controller::Controller;
use crate::drive::{Callback, IrqContext, SyncMode};
use crate::error::{CdError, IsoError, Result};
use crate::filesystem::{IsoFileSystem, IsoResult};
use crate::format::constants::{ISO_MAGIC, SECTOR_SIZE, VD_MAGIC_OFFSET, VD_TYPE_PRIMARY};
use crate::position::Position;
use crate::status::{DriveStatus, ModeFlags};

/// Frames to wait for the drive to stop after the scan pauses it
const STOP_WAIT_FRAMES: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanOutcome {
    Scanning,
    Found,
    NotFound,
    Failed,
}

fn is_volume_descriptor(sector: &[u8]) -> bool {
    sector.first() == Some(&VD_TYPE_PRIMARY)
        && sector.get(VD_MAGIC_OFFSET..VD_MAGIC_OFFSET + ISO_MAGIC.len()) == Some(&ISO_MAGIC[..])
}

fn stop_scan(ctx: &mut IrqContext<'_>, outcome: &Cell<ScanOutcome>, result: ScanOutcome) {
    if let Err(err) = ctx.control_f(Command::Pause, None) {
        log::warn!("Could not pause session scan: {}", err);
    }
    outcome.set(result);
}

/// Data-ready handler that checks each sector for a volume descriptor
///
/// The sector buffer is allocated here, before the handler is installed.
fn scan_callback(outcome: Rc<Cell<ScanOutcome>>, limit: usize) -> Callback {
    let mut sector = vec![0u8; SECTOR_SIZE];
    let mut scanned = 0usize;

    Box::new(move |kind, _response, ctx| {
        if outcome.get() != ScanOutcome::Scanning {
            return;
        }
        match kind {
            IntrResult::DataReady => {
                ctx.get_sector(&mut sector);
                if is_volume_descriptor(&sector) {
                    stop_scan(ctx, &outcome, ScanOutcome::Found);
                    return;
                }
                scanned += 1;
                if scanned >= limit {
                    stop_scan(ctx, &outcome, ScanOutcome::NotFound);
                }
            }
            IntrResult::DiskError => stop_scan(ctx, &outcome, ScanOutcome::Failed),
            _ => {}
        }
    })
}

/// End-of-disc handler: the drive has already stopped
fn end_callback(outcome: Rc<Cell<ScanOutcome>>) -> Callback {
    Box::new(move |kind, _response, _ctx| {
        if kind == IntrResult::DataEnd && outcome.get() == ScanOutcome::Scanning {
            outcome.set(ScanOutcome::NotFound);
        }
    })
}

impl<C: Controller> IsoFileSystem<C> {
    /// Mount session `session` (1-based) of a multi-session disc
    ///
    /// Seeks to the session, scans forward for its volume descriptor and
    /// re-primes the volume cache there, as a media change would. On failure
    /// the latched error says why and the existing caches are left as they
    /// were.
    pub fn load_session(&mut self, session: u8) -> Result<()> {
        self.error = IsoError::Okay;

        if let Err(err) = self.drive.control_b(Command::Setsession, Some(&[session])) {
            log::debug!("Setsession {} failed: {}", session, err);
            self.restart_controller();
            self.error = IsoError::SeekError;
            return Err(CdError::NoSession(session));
        }

        let result = self
            .scan_session()
            .and_then(|offset| self.switch_volume(offset));
        self.latch(result)?;

        log::debug!(
            "Session {} mounted at offset {}",
            session,
            self.volume.session_offset
        );
        Ok(())
    }

    fn restart_controller(&mut self) {
        if let Err(err) = self.drive.control(Command::Nop, None) {
            log::warn!("Nop after failed session seek: {}", err);
        }
        if let Err(err) = self.drive.control_b(Command::Init, None) {
            log::warn!("Controller init after failed session seek: {}", err);
        }
    }

    /// Read forward from the session start until a volume descriptor
    /// arrives, returning the session's sector offset
    fn scan_session(&mut self) -> IsoResult<u32> {
        let outcome = Rc::new(Cell::new(ScanOutcome::Scanning));
        let limit = self.options.scan_limit;

        let saved_ready = self
            .drive
            .set_ready_callback(Some(scan_callback(Rc::clone(&outcome), limit)));
        let saved_pause = self
            .drive
            .set_auto_pause_callback(Some(end_callback(Rc::clone(&outcome))));

        let started = self
            .drive
            .control(Command::Setmode, Some(&[ModeFlags::SPEED]))
            .and_then(|_| self.drive.control(Command::ReadN, None));
        let finished = match started {
            Ok(_) => self.drive.wait_until(|| outcome.get() != ScanOutcome::Scanning),
            Err(err) => {
                log::warn!("Could not start session scan: {}", err);
                false
            }
        };
        if !finished {
            self.drive.command_f(Command::Pause, &[]);
        }
        self.drive.sync(SyncMode::Wait);

        self.drive.set_ready_callback(saved_ready);
        self.drive.set_auto_pause_callback(saved_pause);

        match outcome.get() {
            ScanOutcome::Found => {}
            ScanOutcome::Failed => return Err(IsoError::ReadError),
            ScanOutcome::Scanning if !finished => return Err(IsoError::ReadError),
            _ => {
                log::debug!("No volume descriptor within {} sectors", limit);
                return Err(IsoError::InvalidFilesystem);
            }
        }

        self.wait_for_stop()?;

        let response = self.drive.control(Command::GetlocL, None).map_err(|err| {
            log::warn!("GetlocL failed: {}", err);
            IsoError::SeekError
        })?;
        let position = Position::from_bytes(&response).ok_or(IsoError::SeekError)?;

        let offset = position.to_lba() - self.options.session_lba_correction;
        log::debug!("Volume descriptor found, head at {}", position);
        u32::try_from(offset).map_err(|_| IsoError::InvalidFilesystem)
    }

    /// Poll with `Nop` once per frame until the drive is no longer reading
    fn wait_for_stop(&mut self) -> IsoResult<()> {
        for _ in 0..STOP_WAIT_FRAMES {
            self.drive.vsync();
            let response = self.drive.control(Command::Nop, None).map_err(|err| {
                log::warn!("Nop while waiting for the drive to stop: {}", err);
                IsoError::ReadError
            })?;
            let status = DriveStatus(response.first().copied().unwrap_or(0));
            if !status.busy() {
                self.drive.sync(SyncMode::Wait);
                return Ok(());
            }
        }

        log::warn!("Drive still busy after {} frames", STOP_WAIT_FRAMES);
        Err(IsoError::ReadError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu::VirtualDrive;
    use crate::image::IsoBuilder;

    fn two_sessions() -> IsoFileSystem<VirtualDrive> {
        let image = IsoBuilder::new("FIRST")
            .file("OLD.TXT", b"old".to_vec())
            .session(IsoBuilder::new("SECOND").file("NEW.TXT", b"new".to_vec()))
            .build()
            .unwrap();
        IsoFileSystem::new(VirtualDrive::new(image).into_drive())
    }

    #[test]
    fn test_volume_descriptor_check() {
        let image = IsoBuilder::new("X").build().unwrap();
        assert!(is_volume_descriptor(image.read_sector(16).unwrap()));
        assert!(!is_volume_descriptor(image.read_sector(17).unwrap()));
        assert!(!is_volume_descriptor(&[]));
    }

    #[test]
    fn test_load_second_session() {
        let mut fs = two_sessions();
        assert_eq!(fs.get_volume_label().unwrap(), "FIRST");

        fs.load_session(2).unwrap();
        assert_eq!(fs.iso_error(), IsoError::Okay);
        assert_eq!(fs.get_volume_label().unwrap(), "SECOND");
        assert!(fs.search_file("NEW.TXT").unwrap().is_some());
        assert!(fs.search_file("OLD.TXT").unwrap().is_none());

        fs.load_session(1).unwrap();
        assert_eq!(fs.get_volume_label().unwrap(), "FIRST");
    }

    #[test]
    fn test_missing_session() {
        let mut fs = two_sessions();
        assert_eq!(fs.get_volume_label().unwrap(), "FIRST");

        assert!(matches!(fs.load_session(3), Err(CdError::NoSession(3))));
        assert_eq!(fs.iso_error(), IsoError::SeekError);
        assert!(!fs.drive().sync_pending());

        // Still mounted on the first session
        assert_eq!(fs.get_volume_label().unwrap(), "FIRST");
    }

    #[test]
    fn test_callbacks_restored() {
        let mut fs = two_sessions();
        let previous = fs.drive_mut().set_ready_callback(Some(Box::new(|_, _, _| {})));
        assert!(previous.is_none());

        fs.load_session(2).unwrap();
        assert!(fs.drive_mut().set_ready_callback(None).is_some());
        assert!(fs.drive_mut().set_auto_pause_callback(None).is_none());
    }
}
