/// Disc image formats and constants

/// Format constants
pub mod constants;

pub use constants::*;

/// On-disk layout of a disc image file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscImageFormat {
    /// 2048-byte user data sectors (`.iso`)
    Iso,
    /// 2352-byte raw Mode 1 sectors (`.bin`)
    RawMode1,
    /// 2352-byte raw Mode 2 Form 1 sectors (`.bin`)
    RawMode2,
}

impl DiscImageFormat {
    /// Size of one sector in the image file
    pub fn stored_sector_size(&self) -> usize {
        match self {
            DiscImageFormat::Iso => SECTOR_SIZE,
            DiscImageFormat::RawMode1 | DiscImageFormat::RawMode2 => RAW_SECTOR_SIZE,
        }
    }

    /// Offset of user data within a stored sector
    pub fn data_offset(&self) -> usize {
        match self {
            DiscImageFormat::Iso => 0,
            DiscImageFormat::RawMode1 => RAW_MODE1_DATA_OFFSET,
            DiscImageFormat::RawMode2 => RAW_MODE2_DATA_OFFSET,
        }
    }

    /// Get a human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            DiscImageFormat::Iso => "ISO (2048)",
            DiscImageFormat::RawMode1 => "BIN Mode 1 (2352)",
            DiscImageFormat::RawMode2 => "BIN Mode 2 Form 1 (2352)",
        }
    }
}

/// Detect the image format from the first sector and the file length
pub fn detect_format(head: &[u8], file_len: usize) -> Option<DiscImageFormat> {
    if head.len() >= 16 && head[..12] == RAW_SECTOR_SYNC && file_len % RAW_SECTOR_SIZE == 0 {
        return match head[15] {
            1 => Some(DiscImageFormat::RawMode1),
            2 => Some(DiscImageFormat::RawMode2),
            _ => None,
        };
    }

    if file_len % SECTOR_SIZE == 0 {
        Some(DiscImageFormat::Iso)
    } else {
        None
    }
}
