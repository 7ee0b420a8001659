/// ISO9660 directory records: decoding, the single-directory cache and
/// iteration cursors

use crate::controller::Controller;
use crate::error::IsoError;
use crate::filesystem::buffer::SectorBuffer;
use crate::filesystem::{FileHandle, IsoFileSystem, IsoResult};
use crate::format::constants::{
    align_to_sector, sectors_for, DIR_FLAG_DIRECTORY, DIR_RECORD_HEADER_SIZE, MAX_LBA, SECTOR_SIZE,
};
use crate::position::Position;

/// Version suffix appended to file names that lack one
pub const VERSION_SUFFIX: &str = ";1";

/// Longest directory extent read into the cache
pub const MAX_DIRECTORY_SECTORS: usize = 64;

/// One decoded directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirRecord {
    /// First sector of the entry
    pub lba: u32,
    /// Size in bytes
    pub size: u32,
    /// Flag byte
    pub flags: u8,
    /// Raw identifier, `\0` for `.` and `\x01` for `..`
    pub name: Vec<u8>,
}

impl DirRecord {
    /// Decode a record from the start of `buf`
    ///
    /// Validates that the declared length covers the header and name and
    /// fits in `buf`, and that the extent starts at an addressable sector.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let len = *buf.first()? as usize;
        if len < DIR_RECORD_HEADER_SIZE || len > buf.len() {
            return None;
        }

        let name_len = buf[32] as usize;
        if DIR_RECORD_HEADER_SIZE + name_len > len {
            return None;
        }

        let lba = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]);
        if lba > MAX_LBA {
            return None;
        }

        Some(Self {
            lba,
            size: u32::from_le_bytes([buf[10], buf[11], buf[12], buf[13]]),
            flags: buf[25],
            name: buf[DIR_RECORD_HEADER_SIZE..DIR_RECORD_HEADER_SIZE + name_len].to_vec(),
        })
    }

    /// Whether the entry is a sub-directory
    pub fn is_dir(&self) -> bool {
        self.flags & DIR_FLAG_DIRECTORY != 0
    }

    /// Identifier as text
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    fn to_handle(&self, name: String) -> FileHandle {
        FileHandle {
            position: Position::from_lba(self.lba),
            size: self.size,
            name,
            is_dir: self.is_dir(),
        }
    }
}

/// Walks the records of a directory extent in on-disc order
///
/// A zero length byte inside a sector is end-of-sector padding and snaps the
/// cursor to the next sector; one at the very start of a sector ends the
/// directory early.
#[derive(Debug, Clone)]
struct RecordWalker<'a> {
    buf: &'a [u8],
    offset: usize,
    malformed: bool,
}

impl<'a> RecordWalker<'a> {
    fn new(buf: &'a [u8], offset: usize) -> Self {
        Self {
            buf,
            offset,
            malformed: false,
        }
    }
}

impl Iterator for RecordWalker<'_> {
    type Item = DirRecord;

    fn next(&mut self) -> Option<DirRecord> {
        loop {
            let len = *self.buf.get(self.offset)? as usize;
            if len == 0 {
                if self.offset % SECTOR_SIZE == 0 {
                    log::trace!("Directory ends early at offset {}", self.offset);
                    self.offset = self.buf.len();
                    return None;
                }
                self.offset = align_to_sector(self.offset);
                continue;
            }

            let in_sector = self.offset % SECTOR_SIZE;
            let record = if in_sector + len > SECTOR_SIZE {
                None
            } else {
                DirRecord::decode(&self.buf[self.offset..])
            };
            let Some(record) = record else {
                log::warn!("Malformed directory record at offset {}", self.offset);
                self.offset = self.buf.len();
                self.malformed = true;
                return None;
            };

            self.offset += len;
            return Some(record);
        }
    }
}

/// The one directory extent kept resident, keyed by its first sector
#[derive(Debug, Default)]
pub(crate) struct DirectoryCache {
    lba: Option<u32>,
    buffer: SectorBuffer,
}

impl DirectoryCache {
    /// Whether the extent starting at `lba` is resident
    pub fn is_loaded(&self, lba: u32) -> bool {
        self.lba == Some(lba)
    }

    /// Forget the resident extent so the next request reads again
    pub fn invalidate(&mut self) {
        self.lba = None;
    }

    /// Replace the resident extent
    pub fn store(&mut self, lba: u32, buffer: SectorBuffer) {
        self.buffer = buffer;
        self.lba = Some(lba);
    }

    /// First file entry named `name`, sub-directories skipped
    ///
    /// `;1` is appended when the name carries no version. A malformed
    /// record before any match makes the directory invalid.
    pub fn find_file(&self, name: &str) -> IsoResult<Option<FileHandle>> {
        let wanted = with_version(name);
        let mut walker = RecordWalker::new(self.buffer.as_slice(), 0);
        let found = walker
            .by_ref()
            .filter(|r| !r.is_dir())
            .find(|r| r.name == wanted.as_bytes());

        match found {
            Some(record) => Ok(Some(record.to_handle(wanted))),
            None if walker.malformed => Err(IsoError::InvalidFilesystem),
            None => Ok(None),
        }
    }

    /// Private copy of the resident extent for iteration
    pub fn snapshot(&self, is_root: bool) -> DirCursor {
        DirCursor {
            buffer: self.buffer.as_slice().to_vec(),
            offset: 0,
            index: 0,
            is_root,
        }
    }
}

impl<C: Controller> IsoFileSystem<C> {
    /// Make the directory extent at `lba` resident
    ///
    /// The first sector is read on its own to learn the extent size from
    /// the `.` record; larger extents are then read again from the start.
    /// The cache marker is only set once the whole extent is in.
    pub(crate) fn load_directory(&mut self, lba: u32) -> IsoResult<()> {
        if self.directory.is_loaded(lba) {
            return Ok(());
        }
        self.directory.invalidate();

        let first = self.read_sectors(lba, 1)?;
        let Some(dot) = DirRecord::decode(&first) else {
            log::warn!("No directory record at sector {}", lba);
            return Err(IsoError::InvalidFilesystem);
        };

        let size = dot.size as usize;
        let sectors = sectors_for(size).clamp(1, MAX_DIRECTORY_SECTORS);
        if sectors < sectors_for(size) {
            log::warn!("Directory at {} truncated to {} sectors", lba, sectors);
        }
        let data = if sectors > 1 {
            self.read_sectors(lba, sectors)?
        } else {
            first
        };

        log::trace!("Directory at {}: {} bytes", lba, size);
        self.directory.store(lba, SectorBuffer::from_sectors(data, size));
        Ok(())
    }
}

fn with_version(name: &str) -> String {
    if name.contains(';') {
        name.to_string()
    } else {
        format!("{}{}", name, VERSION_SUFFIX)
    }
}

/// Directory iteration cursor over a private snapshot of the extent
///
/// Independent of the shared directory cache, so iteration is unaffected by
/// later lookups in other directories. Dropping the cursor closes it.
#[derive(Debug, Clone)]
pub struct DirCursor {
    buffer: Vec<u8>,
    offset: usize,
    index: usize,
    is_root: bool,
}

impl DirCursor {
    /// Decode the next entry
    ///
    /// The first two entries of a sub-directory are reported as `.` and
    /// `..`; the root omits them.
    pub fn read(&mut self) -> Option<FileHandle> {
        loop {
            let mut walker = RecordWalker::new(&self.buffer, self.offset);
            let record = walker.next();
            self.offset = walker.offset;
            let record = record?;

            let index = self.index;
            self.index += 1;
            let name = match index {
                0 | 1 if self.is_root => continue,
                0 => ".".to_string(),
                1 => "..".to_string(),
                _ => record.name_str(),
            };
            return Some(record.to_handle(name));
        }
    }

    /// Size of the snapshot in bytes
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Iterator for DirCursor {
    type Item = FileHandle;

    fn next(&mut self) -> Option<FileHandle> {
        self.read()
    }
}
