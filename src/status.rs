/// CD-ROM controller status and mode register definitions
///
/// The status byte accompanies almost every controller response; the mode
/// byte is written with `Setmode` and governs how sectors are delivered.

use std::fmt;

use crate::format::constants::{RAW_SECTOR_DATA_SIZE, SECTOR_SIZE};

/// Controller status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveStatus(pub u8);

impl DriveStatus {
    /// Command error - Bit 0
    /// Set when an invalid command or parameters are sent
    pub const ERROR: u8 = 0x01;

    /// Motor standby - Bit 1
    /// Set whenever the spindle motor is powered on or spinning up
    pub const STANDBY: u8 = 0x02;

    /// Seek error - Bit 2
    pub const SEEK_ERROR: u8 = 0x04;

    /// ID error - Bit 3
    /// Set if the disc has been rejected due to being unlicensed
    pub const ID_ERROR: u8 = 0x08;

    /// Shell open - Bit 4
    /// Lid is open or has been opened before; cleared by a `Nop` once closed
    pub const SHELL_OPEN: u8 = 0x10;

    /// Reading - Bit 5
    pub const READ: u8 = 0x20;

    /// Seeking - Bit 6
    pub const SEEK: u8 = 0x40;

    /// Playing CD-DA - Bit 7
    pub const PLAY: u8 = 0x80;

    /// Mask of the bits that indicate the drive head is busy
    pub const BUSY_MASK: u8 = Self::READ | Self::SEEK | Self::PLAY;

    /// Create a new DriveStatus from a raw byte
    #[inline]
    pub fn new(value: u8) -> Self {
        DriveStatus(value)
    }

    /// Check if the command error bit is set
    #[inline]
    pub fn command_error(&self) -> bool {
        (self.0 & Self::ERROR) != 0
    }

    /// Check if the motor standby bit is set
    #[inline]
    pub fn standby(&self) -> bool {
        (self.0 & Self::STANDBY) != 0
    }

    /// Check if the seek error bit is set
    #[inline]
    pub fn seek_error(&self) -> bool {
        (self.0 & Self::SEEK_ERROR) != 0
    }

    /// Check if the disc was rejected
    #[inline]
    pub fn id_error(&self) -> bool {
        (self.0 & Self::ID_ERROR) != 0
    }

    /// Check if the lid is or was open
    #[inline]
    pub fn shell_open(&self) -> bool {
        (self.0 & Self::SHELL_OPEN) != 0
    }

    /// Check if the drive is reading
    #[inline]
    pub fn reading(&self) -> bool {
        (self.0 & Self::READ) != 0
    }

    /// Check if the drive is seeking
    #[inline]
    pub fn seeking(&self) -> bool {
        (self.0 & Self::SEEK) != 0
    }

    /// Check if the drive is playing audio
    #[inline]
    pub fn playing(&self) -> bool {
        (self.0 & Self::PLAY) != 0
    }

    /// Check if the head is reading, seeking or playing
    #[inline]
    pub fn busy(&self) -> bool {
        (self.0 & Self::BUSY_MASK) != 0
    }

    /// Check if any error flag is set
    #[inline]
    pub fn has_error(&self) -> bool {
        (self.0 & (Self::ERROR | Self::SEEK_ERROR | Self::ID_ERROR)) != 0
    }
}

impl fmt::Display for DriveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            write!(f, "IDLE")?;
        } else {
            let mut flags = Vec::new();
            if self.command_error() {
                flags.push("ERROR");
            }
            if self.standby() {
                flags.push("STANDBY");
            }
            if self.seek_error() {
                flags.push("SEEKERR");
            }
            if self.id_error() {
                flags.push("IDERR");
            }
            if self.shell_open() {
                flags.push("OPEN");
            }
            if self.reading() {
                flags.push("READ");
            }
            if self.seeking() {
                flags.push("SEEK");
            }
            if self.playing() {
                flags.push("PLAY");
            }
            write!(f, "{}", flags.join("|"))?;
        }
        Ok(())
    }
}

/// Controller mode byte, applied with `Setmode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModeFlags(pub u8);

impl ModeFlags {
    /// Enable CD-DA playback
    pub const DA: u8 = 0x01;

    /// Auto-pause at the end of a track
    pub const AUTO_PAUSE: u8 = 0x02;

    /// Send report packets during CD-DA playback
    pub const REPORT: u8 = 0x04;

    /// Enable the XA sector filter
    pub const XA_FILTER: u8 = 0x08;

    /// Ignore previously set sector size and location
    pub const IGNORE: u8 = 0x10;

    /// Deliver 2340 bytes per sector instead of 2048
    pub const SIZE: u8 = 0x20;

    /// Enable XA-ADPCM playback
    pub const REALTIME: u8 = 0x40;

    /// Read at double speed
    pub const SPEED: u8 = 0x80;

    /// Create new mode flags from a raw byte
    #[inline]
    pub fn new(value: u8) -> Self {
        ModeFlags(value)
    }

    /// Double speed mode, the usual mode for data reads
    #[inline]
    pub fn double_speed() -> Self {
        ModeFlags(Self::SPEED)
    }

    /// Check if whole-sector (2340 byte) delivery is enabled
    #[inline]
    pub fn whole_sector(&self) -> bool {
        (self.0 & Self::SIZE) != 0
    }

    /// Check if double speed is enabled
    #[inline]
    pub fn double(&self) -> bool {
        (self.0 & Self::SPEED) != 0
    }

    /// Bytes delivered per sector in this mode
    #[inline]
    pub fn sector_size(&self) -> usize {
        if self.whole_sector() {
            RAW_SECTOR_DATA_SIZE
        } else {
            SECTOR_SIZE
        }
    }
}

impl fmt::Display for ModeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "NONE");
        }
        let names = [
            (Self::DA, "DA"),
            (Self::AUTO_PAUSE, "AP"),
            (Self::REPORT, "REPT"),
            (Self::XA_FILTER, "SF"),
            (Self::IGNORE, "IGNORE"),
            (Self::SIZE, "SIZE"),
            (Self::REALTIME, "RT"),
            (Self::SPEED, "SPEED"),
        ];
        let flags: Vec<&str> = names
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", flags.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_flags() {
        let st = DriveStatus(DriveStatus::STANDBY | DriveStatus::READ);
        assert!(st.standby());
        assert!(st.reading());
        assert!(st.busy());
        assert!(!st.has_error());
        assert!(!st.shell_open());
    }

    #[test]
    fn test_status_errors() {
        let st = DriveStatus(DriveStatus::ERROR | DriveStatus::SHELL_OPEN);
        assert!(st.command_error());
        assert!(st.shell_open());
        assert!(st.has_error());
        assert!(!st.busy());
    }

    #[test]
    fn test_status_display() {
        let st = DriveStatus(DriveStatus::STANDBY | DriveStatus::SHELL_OPEN);
        assert_eq!(st.to_string(), "STANDBY|OPEN");
        assert_eq!(DriveStatus(0).to_string(), "IDLE");
    }

    #[test]
    fn test_mode_sector_size() {
        assert_eq!(ModeFlags::double_speed().sector_size(), 2048);
        assert_eq!(ModeFlags(ModeFlags::SIZE | ModeFlags::SPEED).sector_size(), 2340);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(ModeFlags(ModeFlags::SIZE | ModeFlags::SPEED).to_string(), "SIZE|SPEED");
        assert_eq!(ModeFlags(0).to_string(), "NONE");
    }
}
