/// Sector-multiple cache buffers with bounds-checked field access

use crate::format::constants::{sectors_for, SECTOR_SIZE};

/// Bytes read from whole sectors, of which the first `len` are meaningful
///
/// Every accessor checks bounds against `len` and returns `None` past it,
/// so record decoders never read the padding or beyond the allocation.
#[derive(Debug, Clone, Default)]
pub struct SectorBuffer {
    data: Vec<u8>,
    len: usize,
}

impl SectorBuffer {
    /// Wrap sector data, keeping `len` bytes meaningful
    ///
    /// `len` is clamped to the data actually read.
    pub fn from_sectors(data: Vec<u8>, len: usize) -> Self {
        let len = len.min(data.len());
        Self { data, len }
    }

    /// Meaningful length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds nothing
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sectors covered by the meaningful bytes
    pub fn sectors(&self) -> usize {
        sectors_for(self.len)
    }

    /// Meaningful bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Bytes `offset..offset + len`, if in bounds
    pub fn get(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.as_slice().get(offset..end)
    }

    /// Byte at `offset`
    pub fn byte(&self, offset: usize) -> Option<u8> {
        self.as_slice().get(offset).copied()
    }

    /// Little-endian half of a 16-bit field
    pub fn u16_le(&self, offset: usize) -> Option<u16> {
        let b = self.get(offset, 2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Little-endian half of a 32-bit field
    pub fn u32_le(&self, offset: usize) -> Option<u32> {
        let b = self.get(offset, 4)?;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Release the contents
    pub fn clear(&mut self) {
        self.data = Vec::new();
        self.len = 0;
    }

    /// Allocated size, always a whole number of sectors when filled by a
    /// sector read
    pub fn capacity_sectors(&self) -> usize {
        self.data.len() / SECTOR_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_checked() {
        let mut data = vec![0u8; SECTOR_SIZE];
        data[..6].copy_from_slice(&[0x0A, 0x00, 0x14, 0x00, 0x00, 0x00]);
        let buf = SectorBuffer::from_sectors(data, 10);

        assert_eq!(buf.len(), 10);
        assert_eq!(buf.sectors(), 1);
        assert_eq!(buf.capacity_sectors(), 1);
        assert_eq!(buf.u32_le(2), Some(20));
        assert_eq!(buf.u16_le(0), Some(10));
        assert_eq!(buf.byte(9), Some(0));
        // Padding past the declared length is not reachable
        assert_eq!(buf.byte(10), None);
        assert_eq!(buf.u32_le(8), None);
        assert_eq!(buf.get(usize::MAX, 2), None);
    }

    #[test]
    fn test_len_clamped_and_clear() {
        let mut buf = SectorBuffer::from_sectors(vec![1, 2, 3], 100);
        assert_eq!(buf.len(), 3);
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.as_slice(), &[] as &[u8]);
    }
}
