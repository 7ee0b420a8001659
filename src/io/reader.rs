/// Disc image file reader

use crate::error::{CdError, Result};
use crate::format::constants::*;
use crate::format::{detect_format, DiscImageFormat};
use crate::image::DiscImage;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Check if a file has a raw image extension (`.bin`, `.img`)
pub fn is_raw_file<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("bin") || e.eq_ignore_ascii_case("img"))
        .unwrap_or(false)
}

/// Read an `.iso` or raw `.bin` image from disk
///
/// The layout is detected from the sync pattern of the first sector, so the
/// extension is only used in error messages.
pub fn read_image<P: AsRef<Path>>(path: P) -> Result<DiscImage> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    let format = detect_format(&data[..data.len().min(16)], data.len()).ok_or_else(|| {
        CdError::invalid_format(format!(
            "{} is not a whole number of 2048 or 2352-byte sectors",
            path.display()
        ))
    })?;
    if format != DiscImageFormat::Iso && !is_raw_file(path) {
        log::debug!("{} holds raw sectors despite its extension", path.display());
    }

    let mut image = parse_sectors(&data, format)?;
    image.filename = path.file_name().map(|n| n.to_string_lossy().into_owned());
    image.scan_sessions();
    image.mark_unchanged();

    log::debug!(
        "Loaded {} sectors from {} ({})",
        image.sector_count(),
        path.display(),
        format.name()
    );
    Ok(image)
}

/// Split image bytes into cooked sectors
fn parse_sectors(data: &[u8], format: DiscImageFormat) -> Result<DiscImage> {
    if data.is_empty() {
        return Err(CdError::invalid_format("Empty image"));
    }

    let stored = format.stored_sector_size();
    let offset = format.data_offset();
    let mut sectors = Vec::with_capacity(data.len() / stored);

    for (index, raw) in data.chunks(stored).enumerate() {
        if raw.len() < stored {
            return Err(CdError::parse(index * stored, "Truncated sector"));
        }
        if format != DiscImageFormat::Iso && raw[..12] != RAW_SECTOR_SYNC {
            return Err(CdError::parse(index * stored, "Missing sector sync pattern"));
        }
        sectors.push(raw[offset..offset + SECTOR_SIZE].to_vec());
    }

    let mut image = DiscImage::from_sectors(sectors);
    image.format = format;
    Ok(image)
}
