/// Disc geometry, ISO9660 layout offsets and magic bytes

/// User data bytes in a cooked (Mode 1 / Mode 2 Form 1) sector
pub const SECTOR_SIZE: usize = 2048;

/// Sector size shift, `SECTOR_SIZE == 1 << SECTOR_SHIFT`
pub const SECTOR_SHIFT: usize = 11;

/// Bytes delivered per sector in whole-sector mode (raw sector minus sync)
pub const RAW_SECTOR_DATA_SIZE: usize = 2340;

/// Full raw sector size as stored in `.bin` images
pub const RAW_SECTOR_SIZE: usize = 2352;

/// Raw sector sync pattern
pub const RAW_SECTOR_SYNC: [u8; 12] = [
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
];

/// Offset of user data in a raw Mode 1 sector
pub const RAW_MODE1_DATA_OFFSET: usize = 16;

/// Offset of user data in a raw Mode 2 Form 1 sector
pub const RAW_MODE2_DATA_OFFSET: usize = 24;

/// Lead-in sectors preceding LBA 0 (two seconds)
pub const LEAD_IN_SECTORS: u32 = 150;

/// Sectors per second of disc time
pub const SECTORS_PER_SECOND: u32 = 75;

/// Seconds per minute of disc time
pub const SECONDS_PER_MINUTE: u32 = 60;

/// Highest address a position can express (99:59:74 less the lead-in)
pub const MAX_LBA: u32 = 100 * SECONDS_PER_MINUTE * SECTORS_PER_SECOND - 1 - LEAD_IN_SECTORS;

/// Sector of the primary volume descriptor, relative to the session start
pub const VOLUME_DESCRIPTOR_LBA: u32 = 16;

/// Volume descriptor standard identifier
pub const ISO_MAGIC: &[u8; 5] = b"CD001";

/// Volume descriptor type of a primary volume descriptor
pub const VD_TYPE_PRIMARY: u8 = 0x01;

/// Volume descriptor type of the set terminator
pub const VD_TYPE_TERMINATOR: u8 = 0xFF;

/// Offset of the standard identifier in a volume descriptor
pub const VD_MAGIC_OFFSET: usize = 1;

/// Offset of the volume identifier (label)
pub const VD_VOLUME_ID_OFFSET: usize = 40;

/// Length of the volume identifier
pub const VD_VOLUME_ID_LEN: usize = 32;

/// Offset of the volume space size (both-endian 32-bit)
pub const VD_VOLUME_SPACE_OFFSET: usize = 80;

/// Offset of the path table size (both-endian 32-bit)
pub const VD_PATH_TABLE_SIZE_OFFSET: usize = 132;

/// Offset of the type L path table location (little-endian 32-bit)
pub const VD_PATH_TABLE_L_OFFSET: usize = 140;

/// Offset of the type M path table location (big-endian 32-bit)
pub const VD_PATH_TABLE_M_OFFSET: usize = 148;

/// Offset of the root directory record
pub const VD_ROOT_RECORD_OFFSET: usize = 156;

/// Fixed part of a path table entry
pub const PATH_ENTRY_HEADER_SIZE: usize = 8;

/// Fixed part of a directory record
pub const DIR_RECORD_HEADER_SIZE: usize = 33;

/// Directory record flag marking a sub-directory
pub const DIR_FLAG_DIRECTORY: u8 = 0x02;

/// Canonical path separator used when rebuilding path table paths
pub const PATH_SEPARATOR: char = '\\';

/// Size of the scratch buffer paths are rebuilt into
pub const PATH_SCRATCH_SIZE: usize = 128;

/// Round a byte length up to a whole number of sectors
#[inline]
pub fn sectors_for(bytes: usize) -> usize {
    (bytes + SECTOR_SIZE - 1) >> SECTOR_SHIFT
}

/// Snap a byte offset forward to the next sector boundary
#[inline]
pub fn align_to_sector(offset: usize) -> usize {
    sectors_for(offset) << SECTOR_SHIFT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sectors_for() {
        assert_eq!(sectors_for(0), 0);
        assert_eq!(sectors_for(1), 1);
        assert_eq!(sectors_for(2048), 1);
        assert_eq!(sectors_for(2049), 2);
        assert_eq!(sectors_for(6144), 3);
    }

    #[test]
    fn test_align_to_sector() {
        assert_eq!(align_to_sector(0), 0);
        assert_eq!(align_to_sector(100), 2048);
        assert_eq!(align_to_sector(2048), 2048);
        assert_eq!(align_to_sector(2050), 4096);
    }
}
