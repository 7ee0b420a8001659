/// ISO9660 path table decoding and path resolution

use crate::error::IsoError;
use crate::format::constants::{
    MAX_LBA, PATH_ENTRY_HEADER_SIZE, PATH_SCRATCH_SIZE, PATH_SEPARATOR,
};

/// One decoded path table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathTableEntry<'a> {
    /// Directory name; empty for the root
    pub name: &'a [u8],
    /// First sector of the directory record
    pub lba: u32,
    /// One-based index of the parent entry
    pub parent: u16,
}

impl<'a> PathTableEntry<'a> {
    /// Decode the entry at `offset`, returning it with the offset of the
    /// next entry
    ///
    /// Returns `None` at the end of the table (zero name length) or if the
    /// entry would run past the buffer.
    pub fn decode(buf: &'a [u8], offset: usize) -> Option<(Self, usize)> {
        let header = buf.get(offset..offset + PATH_ENTRY_HEADER_SIZE)?;
        let name_len = header[0] as usize;
        if name_len == 0 {
            return None;
        }

        let name_start = offset + PATH_ENTRY_HEADER_SIZE;
        let name = buf.get(name_start..name_start + name_len)?;
        let lba = u32::from_le_bytes([header[2], header[3], header[4], header[5]]);
        let parent = u16::from_le_bytes([header[6], header[7]]);

        // Names are padded to an even length
        let next = name_start + name_len + (name_len & 1);
        let name = if name == b"\0" { &name[..0] } else { name };
        Some((Self { name, lba, parent }, next))
    }
}

/// Decoded view of a cached path table
#[derive(Debug)]
pub struct PathTable<'a> {
    entries: Vec<PathTableEntry<'a>>,
}

impl<'a> PathTable<'a> {
    /// Decode every entry in `buf`
    ///
    /// Entries whose parent index points forward (or at themselves, other
    /// than the root) make the table inconsistent, as do directories past
    /// the last addressable sector.
    pub fn parse(buf: &'a [u8]) -> Result<Self, IsoError> {
        let mut entries = Vec::new();
        let mut offset = 0;

        while offset < buf.len() {
            let Some((entry, next)) = PathTableEntry::decode(buf, offset) else {
                break;
            };
            let index = entries.len() + 1;
            let parent = entry.parent as usize;
            if parent == 0 || parent > index || (parent == index && index != 1) {
                log::warn!("Path table entry {} has invalid parent {}", index, parent);
                return Err(IsoError::InvalidFilesystem);
            }
            if entry.lba > MAX_LBA {
                log::warn!("Path table entry {} starts at sector {}", index, entry.lba);
                return Err(IsoError::InvalidFilesystem);
            }
            entries.push(entry);
            offset = next;
        }

        if entries.is_empty() {
            log::warn!("Path table has no root entry");
            return Err(IsoError::InvalidFilesystem);
        }
        Ok(Self { entries })
    }

    /// Number of directories, the root included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty (never true for a parsed table)
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry by one-based index
    pub fn get(&self, index: usize) -> Option<&PathTableEntry<'a>> {
        index.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Rebuild the absolute path of an entry into `scratch`, right to left
    ///
    /// The result starts with a separator for every directory but the
    /// root, whose path is empty. Returns `None` if the path does not fit.
    pub fn path_of<'s>(
        &self,
        index: usize,
        scratch: &'s mut [u8; PATH_SCRATCH_SIZE],
    ) -> Option<&'s [u8]> {
        let mut pos = PATH_SCRATCH_SIZE;
        let mut current = index;

        while current > 1 {
            let entry = self.get(current)?;
            let needed = entry.name.len() + 1;
            if needed > pos {
                return None;
            }
            pos -= entry.name.len();
            scratch[pos..pos + entry.name.len()].copy_from_slice(entry.name);
            pos -= 1;
            scratch[pos] = PATH_SEPARATOR as u8;
            current = entry.parent as usize;
        }

        Some(&scratch[pos..])
    }

    /// Find the entry for a directory path
    ///
    /// Scans from the root in table order and compares case-sensitively;
    /// the first match wins. Returns the one-based index.
    pub fn resolve(&self, path: &str) -> Option<usize> {
        let wanted = normalize_path(path);
        let mut scratch = [0u8; PATH_SCRATCH_SIZE];

        (1..=self.entries.len()).find(|&index| {
            self.path_of(index, &mut scratch)
                .map(|p| trim_separators(p) == wanted.as_bytes())
                .unwrap_or(false)
        })
    }

    /// Absolute path of every directory, in table order
    pub fn paths(&self) -> Vec<String> {
        let mut scratch = [0u8; PATH_SCRATCH_SIZE];
        (1..=self.entries.len())
            .filter_map(|index| {
                let path = self.path_of(index, &mut scratch)?;
                if path.is_empty() {
                    Some(PATH_SEPARATOR.to_string())
                } else {
                    Some(String::from_utf8_lossy(path).into_owned())
                }
            })
            .collect()
    }
}

/// Convert `/` separators to `\` and strip separators at either end
pub fn normalize_path(path: &str) -> String {
    path.trim()
        .replace('/', "\\")
        .trim_matches(PATH_SEPARATOR)
        .to_string()
}

fn trim_separators(path: &[u8]) -> &[u8] {
    let sep = PATH_SEPARATOR as u8;
    let start = path.iter().position(|&b| b != sep).unwrap_or(path.len());
    &path[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &[u8], lba: u32, parent: u16) -> Vec<u8> {
        let mut e = vec![name.len() as u8, 0];
        e.extend_from_slice(&lba.to_le_bytes());
        e.extend_from_slice(&parent.to_le_bytes());
        e.extend_from_slice(name);
        if name.len() % 2 == 1 {
            e.push(0);
        }
        e
    }

    fn table() -> Vec<u8> {
        let mut t = entry(&[0], 20, 1);
        t.extend(entry(b"DATA", 21, 1));
        t.extend(entry(b"MUSIC", 22, 1));
        t.extend(entry(b"LEVELS", 23, 2));
        t
    }

    #[test]
    fn test_decode_entry() {
        let buf = entry(b"MUSIC", 22, 1);
        let (decoded, next) = PathTableEntry::decode(&buf, 0).unwrap();
        assert_eq!(decoded.name, b"MUSIC");
        assert_eq!(decoded.lba, 22);
        assert_eq!(decoded.parent, 1);
        assert_eq!(next, 14);
    }

    #[test]
    fn test_decode_truncated() {
        let buf = entry(b"MUSIC", 22, 1);
        assert!(PathTableEntry::decode(&buf[..10], 0).is_none());
        assert!(PathTableEntry::decode(&buf[..4], 0).is_none());
    }

    #[test]
    fn test_paths_rebuilt() {
        let buf = table();
        let table = PathTable::parse(&buf).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.paths(), vec!["\\", "\\DATA", "\\MUSIC", "\\DATA\\LEVELS"]);
    }

    #[test]
    fn test_resolve() {
        let buf = table();
        let table = PathTable::parse(&buf).unwrap();
        assert_eq!(table.resolve(""), Some(1));
        assert_eq!(table.resolve("\\"), Some(1));
        assert_eq!(table.resolve("DATA"), Some(2));
        assert_eq!(table.resolve("/DATA/LEVELS"), Some(4));
        assert_eq!(table.resolve("\\DATA\\LEVELS\\"), Some(4));
        assert_eq!(table.get(4).unwrap().lba, 23);
        // Case-sensitive
        assert_eq!(table.resolve("data"), None);
        assert_eq!(table.resolve("LEVELS"), None);
    }

    #[test]
    fn test_path_too_long() {
        let mut buf = entry(&[0], 20, 1);
        let long = [b'D'; 30];
        for i in 0..5u16 {
            buf.extend(entry(&long, 21 + i as u32, i + 1));
        }
        let table = PathTable::parse(&buf).unwrap();
        let mut scratch = [0u8; PATH_SCRATCH_SIZE];
        assert!(table.path_of(5, &mut scratch).is_some());
        assert!(table.path_of(6, &mut scratch).is_none());
    }

    #[test]
    fn test_forward_parent_rejected() {
        let mut buf = entry(&[0], 20, 1);
        buf.extend(entry(b"DATA", 21, 3));
        assert_eq!(PathTable::parse(&buf).unwrap_err(), IsoError::InvalidFilesystem);
        assert_eq!(PathTable::parse(&[]).unwrap_err(), IsoError::InvalidFilesystem);
    }

    #[test]
    fn test_unaddressable_directory_rejected() {
        let mut buf = entry(&[0], 20, 1);
        buf.extend(entry(b"DATA", u32::MAX, 1));
        assert_eq!(PathTable::parse(&buf).unwrap_err(), IsoError::InvalidFilesystem);
    }
}
