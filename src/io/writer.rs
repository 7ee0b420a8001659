/// Disc image file writer

use crate::error::Result;
use crate::format::DiscImageFormat;
use crate::image::DiscImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write an image to disk in its current layout
pub fn write_image<P: AsRef<Path>>(image: &DiscImage, path: P) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_sectors(&mut file, image)?;
    file.flush()?;
    Ok(())
}

/// Write every sector in the image's layout
fn write_sectors<W: Write>(out: &mut W, image: &DiscImage) -> Result<()> {
    for lba in 0..image.sector_count() {
        match image.format {
            DiscImageFormat::Iso => out.write_all(image.read_sector(lba)?)?,
            raw => out.write_all(&image.read_sector_raw(lba, raw)?)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::constants::{RAW_SECTOR_SIZE, SECTOR_SIZE};

    #[test]
    fn test_write_iso_layout() {
        let image = DiscImage::from_sectors(vec![vec![7; 10]; 3]);
        let mut out = Vec::new();
        write_sectors(&mut out, &image).unwrap();
        assert_eq!(out.len(), 3 * SECTOR_SIZE);
        assert_eq!(out[SECTOR_SIZE], 7);
        assert_eq!(out[SECTOR_SIZE + 10], 0);
    }

    #[test]
    fn test_write_raw_layout() {
        let mut image = DiscImage::from_sectors(vec![vec![7; 10]; 2]);
        image.set_format(DiscImageFormat::RawMode1);
        let mut out = Vec::new();
        write_sectors(&mut out, &image).unwrap();
        assert_eq!(out.len(), 2 * RAW_SECTOR_SIZE);
        assert_eq!(out[RAW_SECTOR_SIZE + 16], 7);
    }
}
