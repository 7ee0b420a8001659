/// Disc image data structures

/// Builder for synthetic ISO9660 images
pub mod builder;

pub use builder::IsoBuilder;

use crate::error::{CdError, Result};
use crate::format::constants::*;
use crate::format::DiscImageFormat;
use crate::position::Position;
use std::path::Path;

/// XA subheader of a Mode 2 Form 1 data sector (file, channel, submode data)
const XA_DATA_SUBHEADER: [u8; 8] = [0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x08, 0x00];

/// Main disc image container
///
/// Sectors are kept cooked (2048 bytes of user data each); headers and
/// subheaders are synthesized when a whole sector is requested.
#[derive(Debug, Clone)]
pub struct DiscImage {
    /// Layout of the file the image was loaded from or will be saved as
    pub(crate) format: DiscImageFormat,
    /// User data, one entry per logical block
    pub(crate) sectors: Vec<Vec<u8>>,
    /// Start LBA of each session, first session first
    pub(crate) sessions: Vec<u32>,
    /// Has the image been modified?
    pub(crate) changed: bool,
    /// Original filename if loaded from disk
    pub(crate) filename: Option<String>,
}

impl DiscImage {
    /// Open an `.iso` or raw `.bin` image, detecting the layout from its
    /// contents
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        crate::io::read_image(path)
    }

    /// Create a single-session image from cooked sectors
    ///
    /// Short sectors are zero-padded to 2048 bytes.
    pub fn from_sectors(sectors: Vec<Vec<u8>>) -> Self {
        let sectors = sectors
            .into_iter()
            .map(|mut s| {
                s.resize(SECTOR_SIZE, 0);
                s
            })
            .collect();

        Self {
            format: DiscImageFormat::Iso,
            sectors,
            sessions: vec![0],
            changed: true,
            filename: None,
        }
    }

    /// Create a single-session image from a flat `.iso` byte stream
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() || data.len() % SECTOR_SIZE != 0 {
            return Err(CdError::invalid_format(format!(
                "{} bytes is not a whole number of sectors",
                data.len()
            )));
        }
        Ok(Self::from_sectors(
            data.chunks(SECTOR_SIZE).map(<[u8]>::to_vec).collect(),
        ))
    }

    /// Get the file layout
    pub fn format(&self) -> DiscImageFormat {
        self.format
    }

    /// Change the layout used by [`DiscImage::save`]
    pub fn set_format(&mut self, format: DiscImageFormat) {
        self.format = format;
        self.changed = true;
    }

    /// Get the original filename if loaded from disk
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Number of logical blocks
    pub fn sector_count(&self) -> u32 {
        self.sectors.len() as u32
    }

    /// Start LBA of each session
    pub fn sessions(&self) -> &[u32] {
        &self.sessions
    }

    /// Record an additional session starting at `lba`
    pub fn add_session(&mut self, lba: u32) {
        if !self.sessions.contains(&lba) {
            self.sessions.push(lba);
            self.sessions.sort_unstable();
            self.changed = true;
        }
    }

    /// Read the user data of a sector
    pub fn read_sector(&self, lba: u32) -> Result<&[u8]> {
        self.sectors
            .get(lba as usize)
            .map(Vec::as_slice)
            .ok_or_else(|| CdError::parse(lba as usize, "Sector beyond end of disc"))
    }

    /// Replace the user data of a sector
    pub fn write_sector(&mut self, lba: u32, data: &[u8]) -> Result<()> {
        let sector = self
            .sectors
            .get_mut(lba as usize)
            .ok_or_else(|| CdError::parse(lba as usize, "Sector beyond end of disc"))?;

        let len = data.len().min(SECTOR_SIZE);
        sector[..len].copy_from_slice(&data[..len]);
        sector[len..].fill(0);
        self.changed = true;
        Ok(())
    }

    /// Sector as delivered in whole-sector mode: header, subheader, user data
    /// and an (unused) error correction area
    pub fn read_sector_xa(&self, lba: u32) -> Result<Vec<u8>> {
        let data = self.read_sector(lba)?;
        let mut sector = Vec::with_capacity(RAW_SECTOR_DATA_SIZE);
        sector.extend_from_slice(&Position::from_lba(lba).to_bytes());
        sector.push(2);
        sector.extend_from_slice(&XA_DATA_SUBHEADER);
        sector.extend_from_slice(data);
        sector.resize(RAW_SECTOR_DATA_SIZE, 0);
        Ok(sector)
    }

    /// Full 2352-byte sector in the given raw layout
    pub fn read_sector_raw(&self, lba: u32, format: DiscImageFormat) -> Result<Vec<u8>> {
        let data = self.read_sector(lba)?;
        let mut sector = Vec::with_capacity(RAW_SECTOR_SIZE);
        match format {
            DiscImageFormat::Iso => sector.extend_from_slice(data),
            DiscImageFormat::RawMode1 => {
                sector.extend_from_slice(&RAW_SECTOR_SYNC);
                sector.extend_from_slice(&Position::from_lba(lba).to_bytes());
                sector.push(1);
                sector.extend_from_slice(data);
                sector.resize(RAW_SECTOR_SIZE, 0);
            }
            DiscImageFormat::RawMode2 => {
                sector.extend_from_slice(&RAW_SECTOR_SYNC);
                sector.extend_from_slice(&self.read_sector_xa(lba)?);
            }
        }
        Ok(sector)
    }

    /// Volume label of the first session, if it carries a primary volume
    /// descriptor
    pub fn volume_label(&self) -> Option<String> {
        self.volume_end(VOLUME_DESCRIPTOR_LBA)?;
        let pvd = self.read_sector(VOLUME_DESCRIPTOR_LBA).ok()?;
        let label = &pvd[VD_VOLUME_ID_OFFSET..VD_VOLUME_ID_OFFSET + VD_VOLUME_ID_LEN];
        Some(String::from_utf8_lossy(label).trim_end().to_string())
    }

    /// Save the image in its current layout
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        crate::io::write_image(self, path)?;
        self.changed = false;
        Ok(())
    }

    /// Check if the image has been modified
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Mark the image as unchanged
    pub fn mark_unchanged(&mut self) {
        self.changed = false;
    }

    /// Total user data capacity in bytes
    pub fn total_capacity(&self) -> usize {
        self.sectors.len() * SECTOR_SIZE
    }

    /// Locate session starts by looking for primary volume descriptors
    /// past the end of each session's volume
    pub(crate) fn scan_sessions(&mut self) {
        let mut sessions = vec![0];
        let mut lba = self
            .volume_end(VOLUME_DESCRIPTOR_LBA)
            .unwrap_or(0)
            .max(VOLUME_DESCRIPTOR_LBA + 1);

        while lba < self.sector_count() {
            match self.volume_end(lba) {
                Some(end) if lba >= VOLUME_DESCRIPTOR_LBA => {
                    sessions.push(lba - VOLUME_DESCRIPTOR_LBA);
                    lba = end.max(lba + 1);
                }
                _ => lba += 1,
            }
        }

        if sessions.len() > 1 {
            log::debug!("Found {} sessions", sessions.len());
        }
        self.sessions = sessions;
    }

    /// Volume space size recorded by the primary volume descriptor at `lba`
    fn volume_end(&self, lba: u32) -> Option<u32> {
        let data = self.sectors.get(lba as usize)?;
        if data[0] != VD_TYPE_PRIMARY || &data[VD_MAGIC_OFFSET..VD_MAGIC_OFFSET + 5] != ISO_MAGIC {
            return None;
        }
        let space = &data[VD_VOLUME_SPACE_OFFSET..VD_VOLUME_SPACE_OFFSET + 4];
        Some(u32::from_le_bytes([space[0], space[1], space[2], space[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_sectors_pads() {
        let image = DiscImage::from_sectors(vec![vec![1, 2, 3], vec![]]);
        assert_eq!(image.sector_count(), 2);
        assert_eq!(image.read_sector(0).unwrap().len(), SECTOR_SIZE);
        assert_eq!(&image.read_sector(0).unwrap()[..4], &[1, 2, 3, 0]);
        assert_eq!(image.sessions(), &[0]);
        assert!(image.is_changed());
    }

    #[test]
    fn test_from_bytes_rejects_partial_sector() {
        assert!(DiscImage::from_bytes(&[0u8; 100]).is_err());
        assert_eq!(
            DiscImage::from_bytes(&vec![0u8; SECTOR_SIZE * 3]).unwrap().sector_count(),
            3
        );
    }

    #[test]
    fn test_read_write_sector() {
        let mut image = DiscImage::from_sectors(vec![Vec::new(); 4]);
        image.mark_unchanged();
        image.write_sector(2, &[0x42; 16]).unwrap();
        let sector = image.read_sector(2).unwrap();
        assert!(sector[..16].iter().all(|&b| b == 0x42));
        assert_eq!(sector[16], 0);
        assert!(image.is_changed());
        assert!(image.write_sector(4, &[0]).is_err());
        assert!(image.read_sector(4).is_err());
    }

    #[test]
    fn test_xa_sector_layout() {
        let mut image = DiscImage::from_sectors(vec![Vec::new(); 20]);
        image.write_sector(16, b"\x01CD001").unwrap();
        let xa = image.read_sector_xa(16).unwrap();
        assert_eq!(xa.len(), RAW_SECTOR_DATA_SIZE);
        assert_eq!(&xa[..4], &[0x00, 0x02, 0x16, 0x02]);
        assert_eq!(&xa[13..18], ISO_MAGIC);

        let raw = image.read_sector_raw(16, DiscImageFormat::RawMode1).unwrap();
        assert_eq!(raw.len(), RAW_SECTOR_SIZE);
        assert_eq!(&raw[..12], &RAW_SECTOR_SYNC);
        assert_eq!(raw[15], 1);
        assert_eq!(&raw[17..22], ISO_MAGIC);
    }

    #[test]
    fn test_volume_label() {
        let image = IsoBuilder::new("MY_DISC").build().unwrap();
        assert_eq!(image.volume_label().as_deref(), Some("MY_DISC"));
        assert!(DiscImage::from_sectors(vec![Vec::new(); 20]).volume_label().is_none());
    }

    #[test]
    fn test_add_session_sorted() {
        let mut image = DiscImage::from_sectors(vec![Vec::new(); 4]);
        image.add_session(300);
        image.add_session(100);
        image.add_session(300);
        assert_eq!(image.sessions(), &[0, 100, 300]);
    }
}
