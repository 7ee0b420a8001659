/// Primary volume descriptor and the path table cache

use crate::command::Command;
use crate::controller::Controller;
use crate::error::IsoError;
use crate::filesystem::buffer::SectorBuffer;
use crate::filesystem::{IsoFileSystem, IsoResult};
use crate::filesystem::path_table::PathTable;
use crate::format::constants::{
    sectors_for, ISO_MAGIC, MAX_LBA, VD_MAGIC_OFFSET, VD_PATH_TABLE_L_OFFSET,
    VD_PATH_TABLE_SIZE_OFFSET, VD_ROOT_RECORD_OFFSET, VD_TYPE_PRIMARY, VD_VOLUME_ID_LEN,
    VD_VOLUME_ID_OFFSET, VD_VOLUME_SPACE_OFFSET, VOLUME_DESCRIPTOR_LBA,
};
use crate::status::DriveStatus;

/// Largest path table accepted
pub const MAX_PATH_TABLE_SIZE: u32 = 0x10000;

/// Fields of the primary volume descriptor used by the resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDescriptor {
    /// Volume identifier, trailing padding removed
    pub label: String,
    /// Total sectors in the volume, counted from the start of the disc
    pub volume_space: u32,
    /// Path table size in bytes
    pub path_table_size: u32,
    /// First sector of the type L path table
    pub path_table_lba: u32,
    /// First sector of the root directory record
    pub root_lba: u32,
    /// Size of the root directory record in bytes
    pub root_size: u32,
    /// Session the descriptor was read from, as a sector offset
    pub session_offset: u32,
}

impl VolumeDescriptor {
    /// Decode a descriptor sector
    ///
    /// Only the little-endian halves of both-endian fields are read.
    pub fn parse(sector: &[u8], session_offset: u32) -> IsoResult<Self> {
        let buf = SectorBuffer::from_sectors(sector.to_vec(), sector.len());

        let magic = buf.get(VD_MAGIC_OFFSET, ISO_MAGIC.len());
        if buf.byte(0) != Some(VD_TYPE_PRIMARY) || magic != Some(&ISO_MAGIC[..]) {
            log::debug!("No volume descriptor at session offset {}", session_offset);
            return Err(IsoError::InvalidFilesystem);
        }

        let field = |offset| buf.u32_le(offset).ok_or(IsoError::InvalidFilesystem);
        let path_table_size = field(VD_PATH_TABLE_SIZE_OFFSET)?;
        if path_table_size == 0 || path_table_size > MAX_PATH_TABLE_SIZE {
            log::warn!("Implausible path table size {}", path_table_size);
            return Err(IsoError::InvalidFilesystem);
        }

        let label = buf
            .get(VD_VOLUME_ID_OFFSET, VD_VOLUME_ID_LEN)
            .map(|id| String::from_utf8_lossy(id).trim_end().to_string())
            .ok_or(IsoError::InvalidFilesystem)?;

        let path_table_lba = field(VD_PATH_TABLE_L_OFFSET)?;
        let root_lba = field(VD_ROOT_RECORD_OFFSET + 2)?;
        if path_table_lba > MAX_LBA || root_lba > MAX_LBA {
            log::warn!(
                "Descriptor points past the disc (path table {}, root {})",
                path_table_lba,
                root_lba
            );
            return Err(IsoError::InvalidFilesystem);
        }

        Ok(Self {
            label,
            volume_space: field(VD_VOLUME_SPACE_OFFSET)?,
            path_table_size,
            path_table_lba,
            root_lba,
            root_size: field(VD_ROOT_RECORD_OFFSET + 10)?,
            session_offset,
        })
    }
}

/// Cached descriptor and path table of the mounted session
#[derive(Debug, Default)]
pub(crate) struct VolumeCache {
    pub descriptor: Option<VolumeDescriptor>,
    pub path_table: SectorBuffer,
    /// Session offset of the last successful load
    pub session_offset: u32,
}

impl VolumeCache {
    fn clear(&mut self) {
        self.descriptor = None;
        self.path_table.clear();
    }
}

impl<C: Controller> IsoFileSystem<C> {
    /// Make sure the descriptor and path table of the current session are
    /// cached
    ///
    /// A media change drops back to the first session.
    pub(crate) fn ensure_volume(&mut self) -> IsoResult<()> {
        self.check_lid()?;
        let offset = if self.drive.media_flag().is_set() {
            0
        } else {
            self.volume.session_offset
        };
        self.load_descriptor(offset)
    }

    /// Load the descriptor at `16 + offset` and the path table it points at
    ///
    /// A no-op while the media flag is clear and a descriptor is cached. On
    /// failure the cache is left empty and the flag stays set, so the next
    /// call tries again.
    pub(crate) fn load_descriptor(&mut self, offset: u32) -> IsoResult<()> {
        if !self.drive.media_flag().is_set() && self.volume.descriptor.is_some() {
            return Ok(());
        }

        log::debug!("Reading volume descriptor at session offset {}", offset);
        self.volume.clear();
        self.directory.invalidate();

        let (descriptor, path_table) = self.read_volume(offset)?;
        self.install_volume(descriptor, path_table);
        Ok(())
    }

    /// Mount the volume at `offset` in place of the current one
    ///
    /// Nothing cached changes unless the new descriptor and path table both
    /// read and validate.
    pub(crate) fn switch_volume(&mut self, offset: u32) -> IsoResult<()> {
        log::debug!("Switching to volume at session offset {}", offset);
        let (descriptor, path_table) = self.read_volume(offset)?;

        self.directory.invalidate();
        self.install_volume(descriptor, path_table);
        Ok(())
    }

    fn read_volume(&mut self, offset: u32) -> IsoResult<(VolumeDescriptor, SectorBuffer)> {
        let lba = offset
            .checked_add(VOLUME_DESCRIPTOR_LBA)
            .filter(|&lba| lba <= MAX_LBA)
            .ok_or(IsoError::InvalidFilesystem)?;
        let sector = self.read_sectors(lba, 1)?;
        let descriptor = VolumeDescriptor::parse(&sector, offset)?;

        let size = descriptor.path_table_size as usize;
        let sectors = sectors_for(size).max(1);
        let table = self.read_sectors(descriptor.path_table_lba, sectors)?;
        let path_table = SectorBuffer::from_sectors(table, size);
        PathTable::parse(path_table.as_slice())?;

        Ok((descriptor, path_table))
    }

    fn install_volume(&mut self, descriptor: VolumeDescriptor, path_table: SectorBuffer) {
        log::debug!(
            "Mounted volume '{}': {} sectors, path table {} bytes at {}",
            descriptor.label,
            descriptor.volume_space,
            descriptor.path_table_size,
            descriptor.path_table_lba
        );
        self.volume.session_offset = descriptor.session_offset;
        self.volume.path_table = path_table;
        self.volume.descriptor = Some(descriptor);
        self.drive.media_flag().clear();
    }

    /// Fail with `LidOpen` if the shell-open bit survives a second `Nop`
    ///
    /// The bit is sticky: if it clears on the second `Nop` the lid was
    /// opened and closed since the last check, so the media is marked as
    /// changed.
    fn check_lid(&mut self) -> IsoResult<()> {
        if !self.nop_shell_open()? {
            return Ok(());
        }
        if self.nop_shell_open()? {
            log::debug!("Lid is open");
            return Err(IsoError::LidOpen);
        }

        self.drive.media_flag().set();
        Ok(())
    }

    fn nop_shell_open(&mut self) -> IsoResult<bool> {
        let response = self.drive.control(Command::Nop, None).map_err(|err| {
            log::warn!("Nop failed: {}", err);
            IsoError::ReadError
        })?;
        let status = DriveStatus(response.first().copied().unwrap_or(0));
        Ok(status.shell_open())
    }
}
