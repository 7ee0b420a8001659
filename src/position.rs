/// Disc position codec
///
/// Converts between zero-based logical block addresses and the
/// minute/second/sector (BCD) coordinates the controller speaks natively.

use std::fmt;

use crate::format::constants::{LEAD_IN_SECTORS, MAX_LBA, SECONDS_PER_MINUTE, SECTORS_PER_SECOND};

/// Convert a binary value (0-99) to BCD
#[inline]
pub fn itob(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Convert a BCD value to binary
///
/// Each nibble must hold a decimal digit; other values give meaningless
/// results, just as they do on the controller.
#[inline]
pub fn btoi(bcd: u8) -> u8 {
    (bcd >> 4) * 10 + (bcd & 0x0F)
}

/// Minute/second/sector disc coordinates, each field in BCD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Position {
    /// Minutes (BCD)
    pub minute: u8,
    /// Seconds (BCD)
    pub second: u8,
    /// Sector or frame (BCD)
    pub sector: u8,
    /// Track number, ignored by `Setloc`
    pub track: u8,
}

impl Position {
    /// Create a position from decimal minute, second and sector values
    pub fn from_msf(minute: u8, second: u8, sector: u8) -> Self {
        Self {
            minute: itob(minute),
            second: itob(second),
            sector: itob(sector),
            track: 0,
        }
    }

    /// Translate a logical block address to disc coordinates
    ///
    /// The lead-in offset is added first, so LBA 0 becomes 00:02:00.
    /// Addresses past `MAX_LBA` clamp to 99:59:74.
    pub fn from_lba(lba: u32) -> Self {
        let absolute = lba.min(MAX_LBA) + LEAD_IN_SECTORS;
        let per_minute = SECTORS_PER_SECOND * SECONDS_PER_MINUTE;

        Self::from_msf(
            (absolute / per_minute) as u8,
            ((absolute % per_minute) / SECTORS_PER_SECOND) as u8,
            (absolute % SECTORS_PER_SECOND) as u8,
        )
    }

    /// Translate disc coordinates back to a logical block address
    ///
    /// Positions inside the lead-in map to negative addresses. All three
    /// fields must be valid BCD.
    pub fn to_lba(&self) -> i32 {
        let minutes = btoi(self.minute) as i32;
        let seconds = btoi(self.second) as i32;
        let sectors = btoi(self.sector) as i32;

        (minutes * SECONDS_PER_MINUTE as i32 + seconds) * SECTORS_PER_SECOND as i32 + sectors
            - LEAD_IN_SECTORS as i32
    }

    /// Parameter bytes for `Setloc`
    pub fn to_bytes(&self) -> [u8; 3] {
        [self.minute, self.second, self.sector]
    }

    /// Read a position from the first three bytes of a response
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [minute, second, sector, ..] => Some(Self {
                minute: *minute,
                second: *second,
                sector: *sector,
                track: 0,
            }),
            _ => None,
        }
    }

    /// Parse `MM:SS:FF` (decimal) into a position
    pub fn parse_msf(text: &str) -> Option<Self> {
        let mut parts = text.split(':').map(|p| p.trim().parse::<u8>().ok());
        let minute = parts.next()??;
        let second = parts.next()??;
        let sector = parts.next()??;
        if parts.next().is_some() || minute > 99 || second > 59 || sector > 74 {
            return None;
        }
        Some(Self::from_msf(minute, second, sector))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            btoi(self.minute),
            btoi(self.second),
            btoi(self.sector)
        )
    }
}
