/// Builder for creating ISO9660 images

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CdError, Result};
use crate::format::constants::*;
use crate::image::DiscImage;

/// Sectors left unused between one session's volume and the next session
pub const SESSION_GAP_SECTORS: u32 = 32;

/// Longest file or directory identifier accepted
const MAX_NAME_LEN: usize = 30;

/// Builder for constructing ISO9660 disc images in memory
///
/// Names are stored upper-case. Files get the `;1` version suffix.
/// Directories are laid out in path table order, followed by file data.
#[derive(Debug, Clone)]
pub struct IsoBuilder {
    label: String,
    directories: BTreeSet<String>,
    reserved: BTreeMap<String, u32>,
    files: BTreeMap<String, Vec<u8>>,
    sessions: Vec<IsoBuilder>,
}

struct DirNode {
    path: String,
    name: String,
    /// Index of the parent in path table order; the root is its own parent
    parent: usize,
    sectors: u32,
    lba: u32,
}

struct DirEntry {
    name: String,
    is_dir: bool,
    /// Index into the directory list or the file list
    target: usize,
}

impl IsoBuilder {
    /// Create a builder for an empty volume
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_ascii_uppercase(),
            directories: BTreeSet::new(),
            reserved: BTreeMap::new(),
            files: BTreeMap::new(),
            sessions: Vec::new(),
        }
    }

    /// Add a directory (and any missing parents)
    pub fn directory(mut self, path: &str) -> Self {
        let path = normalize(path);
        if !path.is_empty() {
            self.directories.insert(path);
        }
        self
    }

    /// Add a file; missing parent directories are created
    pub fn file(mut self, path: &str, data: impl Into<Vec<u8>>) -> Self {
        self.files.insert(normalize(path), data.into());
        self
    }

    /// Make a directory's extent at least `sectors` long
    ///
    /// Unused space after the last record reads as zeros.
    pub fn reserve_directory(mut self, path: &str, sectors: u32) -> Self {
        let path = normalize(path);
        if !path.is_empty() {
            self.directories.insert(path.clone());
        }
        self.reserved.insert(path, sectors);
        self
    }

    /// Append another session written after this one
    pub fn session(mut self, next: IsoBuilder) -> Self {
        self.sessions.push(next);
        self
    }

    /// Build the image
    pub fn build(self) -> Result<DiscImage> {
        let mut sectors = self.layout(0)?;
        let mut starts = vec![0];

        for session in &self.sessions {
            let base = sectors.len() as u32 + SESSION_GAP_SECTORS;
            sectors.resize(base as usize, vec![0; SECTOR_SIZE]);
            sectors.extend(session.layout(base)?);
            starts.push(base);
        }

        let mut image = DiscImage::from_sectors(sectors);
        image.sessions = starts;
        Ok(image)
    }

    /// Lay out one session starting at `base`, returning its sectors
    fn layout(&self, base: u32) -> Result<Vec<Vec<u8>>> {
        self.validate()?;

        let mut dirs = self.directory_tree();
        let files: Vec<(&String, &Vec<u8>)> = self.files.iter().collect();

        // Children of every directory, sorted by name
        let mut children: Vec<Vec<DirEntry>> = (0..dirs.len()).map(|_| Vec::new()).collect();
        for (index, dir) in dirs.iter().enumerate().skip(1) {
            children[dir.parent].push(DirEntry {
                name: dir.name.clone(),
                is_dir: true,
                target: index,
            });
        }
        for (index, (path, _)) in files.iter().enumerate() {
            let (parent, name) = split_parent(path);
            let parent = dirs
                .iter()
                .position(|d| d.path == parent)
                .ok_or_else(|| CdError::invalid_format(format!("No directory for {}", path)))?;
            children[parent].push(DirEntry {
                name: format!("{};1", name),
                is_dir: false,
                target: index,
            });
        }
        for list in &mut children {
            list.sort_by(|a, b| a.name.cmp(&b.name));
        }

        let path_table_size: usize = dirs.iter().map(|d| path_entry_size(&d.name)).sum();
        let path_table_sectors = sectors_for(path_table_size) as u32;

        // Extent sizes first, then addresses
        for (index, dir) in dirs.iter_mut().enumerate() {
            let names = children[index].iter().map(|c| c.name.len());
            let used = record_extent(names);
            let reserved = self.reserved.get(&dir.path).copied().unwrap_or(0);
            dir.sectors = used.max(reserved).max(1);
        }

        let l_table = base + VOLUME_DESCRIPTOR_LBA + 2;
        let m_table = l_table + path_table_sectors;
        let mut next = m_table + path_table_sectors;
        for dir in dirs.iter_mut() {
            dir.lba = next;
            next += dir.sectors;
        }
        let mut file_lbas = Vec::with_capacity(files.len());
        for (_, data) in &files {
            file_lbas.push(next);
            next += sectors_for(data.len()) as u32;
        }
        let end = next;

        let mut sectors = vec![vec![0u8; SECTOR_SIZE]; (end - base) as usize];
        let local = |lba: u32| (lba - base) as usize;

        // Volume descriptors
        let root = &dirs[0];
        let root_record = dir_record(&[0], root.lba, root.sectors * SECTOR_SIZE as u32, true);
        sectors[local(base + VOLUME_DESCRIPTOR_LBA)] = self.primary_descriptor(
            end,
            path_table_size as u32,
            l_table,
            m_table,
            &root_record,
        );
        let terminator = &mut sectors[local(base + VOLUME_DESCRIPTOR_LBA + 1)];
        terminator[0] = VD_TYPE_TERMINATOR;
        terminator[VD_MAGIC_OFFSET..VD_MAGIC_OFFSET + 5].copy_from_slice(ISO_MAGIC);
        terminator[6] = 1;

        // Path tables
        let (l_bytes, m_bytes) = path_tables(&dirs);
        write_extent(&mut sectors, local(l_table), &l_bytes);
        write_extent(&mut sectors, local(m_table), &m_bytes);

        // Directory records
        for (index, dir) in dirs.iter().enumerate() {
            let parent = &dirs[dir.parent];
            let mut records = vec![
                dir_record(&[0], dir.lba, dir.sectors * SECTOR_SIZE as u32, true),
                dir_record(&[1], parent.lba, parent.sectors * SECTOR_SIZE as u32, true),
            ];
            for child in &children[index] {
                let (lba, size) = if child.is_dir {
                    let d = &dirs[child.target];
                    (d.lba, d.sectors * SECTOR_SIZE as u32)
                } else {
                    (file_lbas[child.target], files[child.target].1.len() as u32)
                };
                records.push(dir_record(child.name.as_bytes(), lba, size, child.is_dir));
            }

            let mut extent = Vec::new();
            for record in records {
                let in_sector = extent.len() % SECTOR_SIZE;
                if in_sector + record.len() > SECTOR_SIZE {
                    extent.resize(align_to_sector(extent.len()), 0);
                }
                extent.extend_from_slice(&record);
            }
            write_extent(&mut sectors, local(dir.lba), &extent);
        }

        // File data
        for ((_, data), lba) in files.iter().zip(&file_lbas) {
            write_extent(&mut sectors, local(*lba), data);
        }

        log::debug!(
            "Laid out volume {} at {}: {} directories, {} files, {} sectors",
            self.label,
            base,
            dirs.len(),
            files.len(),
            end - base
        );
        Ok(sectors)
    }

    fn validate(&self) -> Result<()> {
        if self.label.len() > VD_VOLUME_ID_LEN {
            return Err(CdError::invalid_format(format!(
                "Volume label longer than {} characters",
                VD_VOLUME_ID_LEN
            )));
        }

        let names = self.directories.iter().chain(self.files.keys());
        for path in names {
            if path.is_empty() {
                return Err(CdError::invalid_format("Empty path"));
            }
            if let Some(bad) = path
                .split('/')
                .find(|c| c.is_empty() || c.len() > MAX_NAME_LEN)
            {
                return Err(CdError::invalid_format(format!(
                    "Invalid name component '{}' in {}",
                    bad, path
                )));
            }
        }

        if let Some(clash) = self.files.keys().find(|f| self.directories.contains(*f)) {
            return Err(CdError::invalid_format(format!(
                "{} is both a file and a directory",
                clash
            )));
        }
        Ok(())
    }

    /// Every directory in path table order: by level, then parent, then name
    fn directory_tree(&self) -> Vec<DirNode> {
        let mut all = BTreeSet::new();
        let parents = self.files.keys().map(|f| split_parent(f).0.to_string());
        for path in self.directories.iter().cloned().chain(parents) {
            let mut current = path.as_str();
            while !current.is_empty() {
                all.insert(current.to_string());
                current = split_parent(current).0;
            }
        }

        let mut nodes = vec![DirNode {
            path: String::new(),
            name: String::new(),
            parent: 0,
            sectors: 0,
            lba: 0,
        }];
        let mut level_start = 0;
        while level_start < nodes.len() {
            let level_end = nodes.len();
            for parent in level_start..level_end {
                let prefix = nodes[parent].path.clone();
                for path in all.iter().filter(|p| split_parent(p).0 == prefix) {
                    nodes.push(DirNode {
                        path: path.clone(),
                        name: split_parent(path).1.to_string(),
                        parent,
                        sectors: 0,
                        lba: 0,
                    });
                }
            }
            level_start = level_end;
        }
        nodes
    }

    fn primary_descriptor(
        &self,
        volume_end: u32,
        path_table_size: u32,
        l_table: u32,
        m_table: u32,
        root_record: &[u8],
    ) -> Vec<u8> {
        let mut pvd = vec![0u8; SECTOR_SIZE];
        pvd[0] = VD_TYPE_PRIMARY;
        pvd[VD_MAGIC_OFFSET..VD_MAGIC_OFFSET + 5].copy_from_slice(ISO_MAGIC);
        pvd[6] = 1;

        // System and volume identifiers are space padded
        pvd[8..VD_VOLUME_ID_OFFSET + VD_VOLUME_ID_LEN].fill(b' ');
        let label = self.label.as_bytes();
        pvd[VD_VOLUME_ID_OFFSET..VD_VOLUME_ID_OFFSET + label.len()].copy_from_slice(label);

        put_both32(&mut pvd, VD_VOLUME_SPACE_OFFSET, volume_end);
        put_both16(&mut pvd, 120, 1);
        put_both16(&mut pvd, 124, 1);
        put_both16(&mut pvd, 128, SECTOR_SIZE as u16);
        put_both32(&mut pvd, VD_PATH_TABLE_SIZE_OFFSET, path_table_size);
        pvd[VD_PATH_TABLE_L_OFFSET..VD_PATH_TABLE_L_OFFSET + 4].copy_from_slice(&l_table.to_le_bytes());
        pvd[VD_PATH_TABLE_M_OFFSET..VD_PATH_TABLE_M_OFFSET + 4].copy_from_slice(&m_table.to_be_bytes());
        pvd[VD_ROOT_RECORD_OFFSET..VD_ROOT_RECORD_OFFSET + root_record.len()].copy_from_slice(root_record);
        pvd[881] = 1;
        pvd
    }
}

/// Upper-case a path and strip separators at either end; `\` is accepted
fn normalize(path: &str) -> String {
    path.replace('\\', "/")
        .trim_matches('/')
        .to_ascii_uppercase()
}

fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

fn path_entry_size(name: &str) -> usize {
    let len = name.len().max(1);
    PATH_ENTRY_HEADER_SIZE + len + (len & 1)
}

fn path_tables(dirs: &[DirNode]) -> (Vec<u8>, Vec<u8>) {
    let mut l_table = Vec::new();
    let mut m_table = Vec::new();

    for dir in dirs {
        let name: &[u8] = if dir.name.is_empty() { &[0] } else { dir.name.as_bytes() };
        let parent = (dir.parent + 1) as u16;
        for (table, little) in [(&mut l_table, true), (&mut m_table, false)] {
            table.push(name.len() as u8);
            table.push(0);
            if little {
                table.extend_from_slice(&dir.lba.to_le_bytes());
                table.extend_from_slice(&parent.to_le_bytes());
            } else {
                table.extend_from_slice(&dir.lba.to_be_bytes());
                table.extend_from_slice(&parent.to_be_bytes());
            }
            table.extend_from_slice(name);
            if name.len() & 1 == 1 {
                table.push(0);
            }
        }
    }
    (l_table, m_table)
}

/// Sectors needed for `.`, `..` and the given names, with records kept
/// inside sector boundaries
fn record_extent(names: impl Iterator<Item = usize>) -> u32 {
    let mut offset = 0;
    for len in [1, 1].into_iter().chain(names) {
        let size = record_size(len);
        if offset % SECTOR_SIZE + size > SECTOR_SIZE {
            offset = align_to_sector(offset);
        }
        offset += size;
    }
    sectors_for(offset) as u32
}

fn record_size(name_len: usize) -> usize {
    DIR_RECORD_HEADER_SIZE + name_len + (1 - name_len % 2)
}

fn dir_record(name: &[u8], lba: u32, size: u32, is_dir: bool) -> Vec<u8> {
    let mut record = vec![0u8; record_size(name.len())];
    record[0] = record.len() as u8;
    put_both32(&mut record, 2, lba);
    put_both32(&mut record, 10, size);
    // Recording date: 2000-01-01 00:00:00 GMT
    record[18..25].copy_from_slice(&[100, 1, 1, 0, 0, 0, 0]);
    if is_dir {
        record[25] = DIR_FLAG_DIRECTORY;
    }
    put_both16(&mut record, 28, 1);
    record[32] = name.len() as u8;
    record[DIR_RECORD_HEADER_SIZE..DIR_RECORD_HEADER_SIZE + name.len()].copy_from_slice(name);
    record
}

fn write_extent(sectors: &mut [Vec<u8>], first: usize, data: &[u8]) {
    for (sector, chunk) in sectors[first..].iter_mut().zip(data.chunks(SECTOR_SIZE)) {
        sector[..chunk.len()].copy_from_slice(chunk);
    }
}

fn put_both16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    buf[offset + 2..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_both32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    buf[offset + 4..offset + 8].copy_from_slice(&value.to_be_bytes());
}

impl Default for IsoBuilder {
    fn default() -> Self {
        Self::new("CDROM")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le32(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
    }

    #[test]
    fn test_builder_empty_volume() {
        let image = IsoBuilder::new("empty").build().unwrap();
        let pvd = image.read_sector(16).unwrap();

        assert_eq!(pvd[0], VD_TYPE_PRIMARY);
        assert_eq!(&pvd[1..6], ISO_MAGIC);
        assert_eq!(&pvd[40..45], b"EMPTY");
        assert_eq!(pvd[45], b' ');
        assert_eq!(image.read_sector(17).unwrap()[0], VD_TYPE_TERMINATOR);

        // Root only: a single 10-byte path table entry
        assert_eq!(le32(pvd, VD_PATH_TABLE_SIZE_OFFSET), 10);
        assert_eq!(le32(pvd, VD_PATH_TABLE_L_OFFSET), 18);
        assert_eq!(le32(pvd, VD_VOLUME_SPACE_OFFSET), image.sector_count());
        assert_eq!(image.sessions(), &[0]);
    }

    #[test]
    fn test_builder_layout() {
        let image = IsoBuilder::new("GAME")
            .directory("data")
            .file("DATA/LEVEL1.BIN", vec![0xAB; 4096])
            .file("README.TXT", b"hello".to_vec())
            .build()
            .unwrap();

        let pvd = image.read_sector(16).unwrap();
        // Root (10) + DATA (12)
        assert_eq!(le32(pvd, VD_PATH_TABLE_SIZE_OFFSET), 22);

        let table = image.read_sector(18).unwrap();
        assert_eq!(&table[..2], &[1, 0]);
        assert_eq!(&table[10..12], &[4, 0]);
        assert_eq!(&table[16..18], &[1, 0]);
        assert_eq!(&table[18..22], b"DATA");

        let data_lba = le32(table, 12);
        let dir = image.read_sector(data_lba).unwrap();
        // ".", "..", then LEVEL1.BIN;1
        assert_eq!(dir[0], 34);
        assert_eq!(dir[34], 34);
        let entry = &dir[68..];
        assert_eq!(entry[32], 12);
        assert_eq!(&entry[33..45], b"LEVEL1.BIN;1");
        assert_eq!(le32(entry, 10), 4096);
        assert_eq!(entry[25] & DIR_FLAG_DIRECTORY, 0);

        let file = image.read_sector(le32(entry, 2)).unwrap();
        assert!(file.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_records_do_not_straddle_sectors() {
        let mut builder = IsoBuilder::new("MANY");
        for i in 0..80 {
            builder = builder.file(&format!("FILE{:04}.DAT", i), vec![i as u8]);
        }
        let image = builder.build().unwrap();

        let root_lba = le32(image.read_sector(16).unwrap(), VD_ROOT_RECORD_OFFSET + 2);
        let root_size = le32(image.read_sector(16).unwrap(), VD_ROOT_RECORD_OFFSET + 10);
        assert!(root_size > SECTOR_SIZE as u32);

        let second = image.read_sector(root_lba + 1).unwrap();
        assert_eq!(second[0] as usize, record_size(14));
        assert_eq!(second[32], 14);
    }

    #[test]
    fn test_reserved_directory_extent() {
        let image = IsoBuilder::new("RES")
            .reserve_directory("SAVE", 3)
            .build()
            .unwrap();
        let table = image.read_sector(18).unwrap();
        let save_lba = le32(table, 12);
        let record = image.read_sector(save_lba).unwrap();
        assert_eq!(le32(record, 10), 3 * SECTOR_SIZE as u32);
    }

    #[test]
    fn test_second_session() {
        let image = IsoBuilder::new("FIRST")
            .file("A.TXT", b"a".to_vec())
            .session(IsoBuilder::new("SECOND").file("B.TXT", b"b".to_vec()))
            .build()
            .unwrap();

        assert_eq!(image.sessions().len(), 2);
        let start = image.sessions()[1];
        let pvd = image.read_sector(start + 16).unwrap();
        assert_eq!(&pvd[1..6], ISO_MAGIC);
        assert_eq!(&pvd[40..46], b"SECOND");
        assert_eq!(le32(pvd, VD_PATH_TABLE_L_OFFSET), start + 18);
        assert_eq!(le32(pvd, VD_VOLUME_SPACE_OFFSET), image.sector_count());

        let mut rescanned = image.clone();
        rescanned.scan_sessions();
        assert_eq!(rescanned.sessions(), image.sessions());
    }

    #[test]
    fn test_invalid_names() {
        assert!(IsoBuilder::new("X").file("A//B", vec![]).build().is_err());
        let long = "N".repeat(40);
        assert!(IsoBuilder::new("X").file(&long, vec![]).build().is_err());
        assert!(IsoBuilder::new(&"L".repeat(33)).build().is_err());
        assert!(IsoBuilder::new("X")
            .directory("SAME")
            .file("SAME", vec![])
            .build()
            .is_err());
    }
}
