/// ISO9660 filesystem access through the drive
///
/// The volume descriptor and path table of the mounted session are cached
/// until the media changes; one directory extent is cached at a time.
/// Every public call resets the latched [`IsoError`] and sets it again on
/// the first fault, so [`IsoFileSystem::iso_error`] always describes the
/// most recent call.

pub mod buffer;
pub mod directory;
pub mod path_table;
pub mod session;
pub mod volume;

pub use directory::{DirCursor, DirRecord};
pub use path_table::{PathTable, PathTableEntry};
pub use volume::VolumeDescriptor;

use crate::command::Command;
use crate::controller::Controller;
use crate::drive::{Drive, ReadStatus, SyncMode};
use crate::error::{CdError, IsoError, Result};
use crate::format::constants::{sectors_for, PATH_SEPARATOR, SECTOR_SIZE};
use crate::position::Position;
use crate::status::ModeFlags;
use directory::DirectoryCache;
use path_table::normalize_path;
use volume::VolumeCache;

type IsoResult<T> = std::result::Result<T, IsoError>;

/// A file or directory found on the disc
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    /// Start of the extent
    pub position: Position,
    /// Size in bytes
    pub size: u32,
    /// Identifier as recorded, version suffix included
    pub name: String,
    /// Whether the entry is a sub-directory
    pub is_dir: bool,
}

impl FileHandle {
    /// Start of the extent as a logical block address
    pub fn lba(&self) -> u32 {
        self.position.to_lba().max(0) as u32
    }

    /// Sectors occupied by the extent
    pub fn sectors(&self) -> usize {
        sectors_for(self.size as usize)
    }
}

/// Filesystem information
#[derive(Debug)]
pub struct FileSystemInfo {
    /// Filesystem type name
    pub fs_type: String,
    /// Volume label
    pub label: String,
    /// Sectors in the volume
    pub volume_sectors: u32,
    /// Block size in bytes
    pub block_size: usize,
    /// Number of directories, the root included
    pub directories: usize,
    /// Sector offset of the mounted session
    pub session_offset: u32,
}

/// Whole-directory and whole-file access
pub trait FileSystem {
    /// List the entries of a directory
    fn read_dir(&mut self, path: &str) -> Result<Vec<FileHandle>>;

    /// Read a file's contents
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>>;

    /// Get filesystem information
    fn info(&mut self) -> Result<FileSystemInfo>;
}

/// Tuning for filesystem reads and session discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsOptions {
    /// Attempts per sector read before it counts as failed
    pub read_attempts: u32,
    /// Mode applied for filesystem reads; whole-sector delivery is masked off
    pub read_mode: ModeFlags,
    /// Sectors scanned for a volume descriptor before a session is rejected
    pub scan_limit: usize,
    /// Subtracted from the head position after a session scan to get the
    /// session offset
    pub session_lba_correction: i32,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            read_attempts: 3,
            read_mode: ModeFlags(ModeFlags::SPEED),
            scan_limit: 512,
            session_lba_correction: 17,
        }
    }
}

impl FsOptions {
    /// Default options with a different read attempt budget
    pub fn with_read_attempts(attempts: u32) -> Self {
        Self {
            read_attempts: attempts.max(1),
            ..Self::default()
        }
    }

    /// Default options reading at single speed
    pub fn single_speed() -> Self {
        Self {
            read_mode: ModeFlags::default(),
            ..Self::default()
        }
    }
}

/// ISO9660 filesystem mounted through a [`Drive`]
pub struct IsoFileSystem<C: Controller> {
    drive: Drive<C>,
    options: FsOptions,
    volume: VolumeCache,
    directory: DirectoryCache,
    error: IsoError,
}

impl<C: Controller> IsoFileSystem<C> {
    /// Mount lazily: nothing is read until the first call
    pub fn new(drive: Drive<C>) -> Self {
        Self::with_options(drive, FsOptions::default())
    }

    /// Mount with explicit options
    pub fn with_options(drive: Drive<C>, options: FsOptions) -> Self {
        Self {
            drive,
            options,
            volume: VolumeCache::default(),
            directory: DirectoryCache::default(),
            error: IsoError::Okay,
        }
    }

    /// The underlying drive
    pub fn drive(&self) -> &Drive<C> {
        &self.drive
    }

    /// The underlying drive, mutably
    pub fn drive_mut(&mut self) -> &mut Drive<C> {
        &mut self.drive
    }

    /// Give the drive back, dropping the caches
    pub fn into_drive(self) -> Drive<C> {
        self.drive
    }

    /// Options in use
    pub fn options(&self) -> &FsOptions {
        &self.options
    }

    /// Error code latched by the last filesystem call
    pub fn iso_error(&self) -> IsoError {
        self.error
    }

    /// Descriptor of the mounted session, if cached
    pub fn descriptor(&self) -> Option<&VolumeDescriptor> {
        self.volume.descriptor.as_ref()
    }

    /// Look up a file by path
    ///
    /// `path` is a directory path and a file name separated by `\` or `/`;
    /// `;1` is appended to the name when it has no version. Returns
    /// `Ok(None)` if the directory or file does not exist. A missing
    /// directory is detected from the path table alone.
    pub fn search_file(&mut self, path: &str) -> Result<Option<FileHandle>> {
        self.error = IsoError::Okay;
        let result = self.find_file(path);
        self.latch(result)
    }

    /// Open a directory for iteration
    ///
    /// The cursor iterates a private copy of the directory extent and is
    /// unaffected by later calls. Returns `Ok(None)` if the directory does
    /// not exist.
    pub fn open_dir(&mut self, path: &str) -> Result<Option<DirCursor>> {
        self.error = IsoError::Okay;
        let result = self.snapshot_dir(path);
        self.latch(result)
    }

    /// Close a directory cursor
    pub fn close_dir(&mut self, cursor: DirCursor) {
        drop(cursor);
    }

    /// Volume identifier of the mounted session, trailing spaces removed
    pub fn get_volume_label(&mut self) -> Result<String> {
        self.error = IsoError::Okay;
        let result = self.ensure_volume().and_then(|()| {
            self.volume
                .descriptor
                .as_ref()
                .map(|d| d.label.clone())
                .ok_or(IsoError::InvalidFilesystem)
        });
        self.latch(result)
    }

    /// Number of directories in the path table
    pub fn count_entries(&mut self) -> Result<usize> {
        self.error = IsoError::Okay;
        let result = self
            .ensure_volume()
            .and_then(|()| PathTable::parse(self.volume.path_table.as_slice()).map(|t| t.len()));
        self.latch(result)
    }

    /// Absolute path of every directory, in path table order
    pub fn list_directories(&mut self) -> Result<Vec<String>> {
        self.error = IsoError::Okay;
        let result = self
            .ensure_volume()
            .and_then(|()| PathTable::parse(self.volume.path_table.as_slice()).map(|t| t.paths()));
        self.latch(result)
    }

    fn find_file(&mut self, path: &str) -> IsoResult<Option<FileHandle>> {
        self.ensure_volume()?;

        let path = normalize_path(path);
        let (dir, name) = match path.rfind(PATH_SEPARATOR) {
            Some(split) => (&path[..split], &path[split + 1..]),
            None => ("", path.as_str()),
        };
        if name.is_empty() {
            return Ok(None);
        }

        let Some((lba, _)) = self.resolve_dir(dir)? else {
            log::debug!("Directory '{}' not in path table", dir);
            return Ok(None);
        };
        self.load_directory(lba)?;
        self.directory.find_file(name)
    }

    fn snapshot_dir(&mut self, path: &str) -> IsoResult<Option<DirCursor>> {
        self.ensure_volume()?;

        let Some((lba, is_root)) = self.resolve_dir(path)? else {
            log::debug!("Directory '{}' not in path table", path);
            return Ok(None);
        };
        self.load_directory(lba)?;
        Ok(Some(self.directory.snapshot(is_root)))
    }

    /// First sector of a directory and whether it is the root
    fn resolve_dir(&self, path: &str) -> IsoResult<Option<(u32, bool)>> {
        let table = PathTable::parse(self.volume.path_table.as_slice())?;
        Ok(table
            .resolve(path)
            .and_then(|index| table.get(index).map(|entry| (entry.lba, index == 1))))
    }

    fn file_contents(&mut self, path: &str) -> IsoResult<Option<Vec<u8>>> {
        let Some(handle) = self.find_file(path)? else {
            return Ok(None);
        };
        if handle.is_dir || handle.size == 0 {
            return Ok(Some(Vec::new()));
        }

        let mut data = self.read_sectors(handle.lba(), handle.sectors())?;
        data.truncate(handle.size as usize);
        Ok(Some(data))
    }

    /// Seek to `lba` and read `sectors` cooked sectors with retry
    fn read_sectors(&mut self, lba: u32, sectors: usize) -> IsoResult<Vec<u8>> {
        let position = Position::from_lba(lba);
        if let Err(err) = self.drive.control(Command::Setloc, Some(&position.to_bytes())) {
            log::warn!("Seek to {} failed: {}", position, err);
            return Err(IsoError::SeekError);
        }

        let mode = ModeFlags(self.options.read_mode.0 & !ModeFlags::SIZE);
        if let Err(err) = self.drive.read_retry(sectors, mode, self.options.read_attempts) {
            log::warn!("Read at {} could not start: {}", position, err);
            return Err(IsoError::ReadError);
        }

        match self.drive.read_sync(SyncMode::Wait) {
            ReadStatus::Remaining(0) => self.drive.take_read_data().ok_or(IsoError::ReadError),
            status => {
                log::warn!(
                    "Read of {} sector(s) at {} failed ({})",
                    sectors,
                    position,
                    status.code()
                );
                Err(IsoError::ReadError)
            }
        }
    }

    /// Record the first fault of a call as the latched error
    fn latch<T>(&mut self, result: IsoResult<T>) -> Result<T> {
        result.map_err(|err| {
            self.error = err;
            CdError::Iso(err)
        })
    }
}

impl<C: Controller> FileSystem for IsoFileSystem<C> {
    fn read_dir(&mut self, path: &str) -> Result<Vec<FileHandle>> {
        match self.open_dir(path)? {
            Some(cursor) => Ok(cursor.collect()),
            None => Err(CdError::FileNotFound(path.to_string())),
        }
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>> {
        self.error = IsoError::Okay;
        let result = self.file_contents(path);
        self.latch(result)?
            .ok_or_else(|| CdError::FileNotFound(path.to_string()))
    }

    fn info(&mut self) -> Result<FileSystemInfo> {
        let directories = self.count_entries()?;
        let descriptor = self
            .volume
            .descriptor
            .as_ref()
            .ok_or(CdError::Iso(IsoError::InvalidFilesystem))?;

        Ok(FileSystemInfo {
            fs_type: "ISO9660".to_string(),
            label: descriptor.label.clone(),
            volume_sectors: descriptor.volume_space,
            block_size: SECTOR_SIZE,
            directories,
            session_offset: descriptor.session_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu::VirtualDrive;
    use crate::image::IsoBuilder;

    fn mount(builder: IsoBuilder) -> IsoFileSystem<VirtualDrive> {
        IsoFileSystem::new(VirtualDrive::new(builder.build().unwrap()).into_drive())
    }

    fn game() -> IsoFileSystem<VirtualDrive> {
        mount(
            IsoBuilder::new("GAME")
                .file("SYSTEM.CNF", b"BOOT = cdrom:\\MAIN.EXE;1".to_vec())
                .file("DATA/LEVEL1.BIN", vec![0xAA; 4096])
                .file("DATA/LEVEL2.BIN", vec![0xBB; 3000])
                .file("DATA/MAPS/WORLD.MAP", b"map".to_vec())
                .directory("MUSIC"),
        )
    }

    #[test]
    fn test_volume_label() {
        let mut fs = game();
        assert_eq!(fs.get_volume_label().unwrap(), "GAME");
        assert_eq!(fs.iso_error(), IsoError::Okay);
    }

    #[test]
    fn test_search_file() {
        let mut fs = game();
        let handle = fs.search_file("DATA/LEVEL1.BIN").unwrap().unwrap();
        assert_eq!(handle.name, "LEVEL1.BIN;1");
        assert_eq!(handle.size, 4096);
        assert_eq!(handle.sectors(), 2);
        assert!(!handle.is_dir);

        assert!(fs.search_file("\\DATA\\LEVEL2.BIN;1").unwrap().is_some());
        assert!(fs.search_file("SYSTEM.CNF").unwrap().is_some());
        assert!(fs.search_file("DATA/MAPS/WORLD.MAP").unwrap().is_some());
        assert!(fs.search_file("DATA/MISSING.BIN").unwrap().is_none());
        // Sub-directories are not files
        assert!(fs.search_file("DATA/MAPS").unwrap().is_none());
        assert_eq!(fs.iso_error(), IsoError::Okay);
    }

    #[test]
    fn test_read_file() {
        let mut fs = game();
        let data = fs.read_file("DATA/LEVEL2.BIN").unwrap();
        assert_eq!(data.len(), 3000);
        assert!(data.iter().all(|&b| b == 0xBB));

        assert!(matches!(fs.read_file("NOPE.BIN"), Err(CdError::FileNotFound(_))));
    }

    #[test]
    fn test_read_dir() {
        let mut fs = game();
        let names: Vec<String> = fs.read_dir("DATA").unwrap().into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec![".", "..", "LEVEL1.BIN;1", "LEVEL2.BIN;1", "MAPS"]);

        let root: Vec<String> = fs.read_dir("/").unwrap().into_iter().map(|h| h.name).collect();
        assert_eq!(root, vec!["DATA", "MUSIC", "SYSTEM.CNF;1"]);

        assert!(matches!(fs.read_dir("NOWHERE"), Err(CdError::FileNotFound(_))));
    }

    #[test]
    fn test_directory_listing() {
        let mut fs = game();
        assert_eq!(fs.count_entries().unwrap(), 4);
        assert_eq!(
            fs.list_directories().unwrap(),
            vec!["\\", "\\DATA", "\\MUSIC", "\\DATA\\MAPS"]
        );
    }

    #[test]
    fn test_info() {
        let mut fs = game();
        let info = fs.info().unwrap();
        assert_eq!(info.fs_type, "ISO9660");
        assert_eq!(info.label, "GAME");
        assert_eq!(info.directories, 4);
        assert_eq!(info.session_offset, 0);
        assert_eq!(info.volume_sectors, fs.drive().controller().disc().unwrap().sector_count());
    }

    #[test]
    fn test_invalid_filesystem_latched() {
        let blank = crate::image::DiscImage::from_sectors(vec![vec![0; SECTOR_SIZE]; 40]);
        let mut fs = IsoFileSystem::new(VirtualDrive::new(blank).into_drive());

        assert!(matches!(
            fs.get_volume_label(),
            Err(CdError::Iso(IsoError::InvalidFilesystem))
        ));
        assert_eq!(fs.iso_error(), IsoError::InvalidFilesystem);
        assert!(fs.descriptor().is_none());
    }

    #[test]
    fn test_read_error_latched() {
        let mut drive = VirtualDrive::new(IsoBuilder::new("GAME").build().unwrap());
        drive.mark_bad_sector(16);
        let mut fs = IsoFileSystem::with_options(drive.into_drive(), FsOptions::with_read_attempts(2));

        assert!(fs.get_volume_label().is_err());
        assert_eq!(fs.iso_error(), IsoError::ReadError);
        assert_eq!(fs.drive().controller().stats().read_commands, 2);

        // The next call retries from scratch and succeeds
        fs.drive_mut().controller_mut().clear_bad_sectors();
        assert_eq!(fs.get_volume_label().unwrap(), "GAME");
        assert_eq!(fs.iso_error(), IsoError::Okay);
    }

    #[test]
    fn test_error_reset_each_call() {
        let mut fs = game();
        fs.drive_mut().controller_mut().open_lid();
        assert!(fs.search_file("SYSTEM.CNF").is_err());
        assert_eq!(fs.iso_error(), IsoError::LidOpen);

        fs.drive_mut().controller_mut().close_lid();
        assert!(fs.search_file("SYSTEM.CNF").unwrap().is_some());
        assert_eq!(fs.iso_error(), IsoError::Okay);
    }
}
