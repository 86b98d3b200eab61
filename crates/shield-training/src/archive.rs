//! Extraction of downloaded dataset archives.

use crate::error::{TrainingError, TrainingResult};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    Tar,
}

/// Identify an archive from its leading bytes.
#[must_use]
pub fn detect_format(header: &[u8]) -> Option<ArchiveFormat> {
    if header.starts_with(b"PK\x03\x04") {
        Some(ArchiveFormat::Zip)
    } else if header.starts_with(&[0x1f, 0x8b]) {
        Some(ArchiveFormat::TarGz)
    } else if header.len() >= 262 && &header[257..262] == b"ustar" {
        Some(ArchiveFormat::Tar)
    } else {
        None
    }
}

/// Unpack `archive` into `dest`, returning the detected format.
pub fn extract(archive: &Path, dest: &Path) -> TrainingResult<ArchiveFormat> {
    let mut file = File::open(archive)?;
    let mut header = Vec::with_capacity(512);
    (&mut file).take(512).read_to_end(&mut header)?;
    file.seek(SeekFrom::Start(0))?;

    let format = detect_format(&header).ok_or_else(|| {
        TrainingError::Acquisition(format!("{} is not a zip or tar archive", archive.display()))
    })?;
    debug!(?format, "extracting {} into {}", archive.display(), dest.display());

    std::fs::create_dir_all(dest)?;
    match format {
        ArchiveFormat::Zip => extract_zip(file, dest)?,
        ArchiveFormat::TarGz => tar::Archive::new(GzDecoder::new(BufReader::new(file))).unpack(dest)?,
        ArchiveFormat::Tar => tar::Archive::new(BufReader::new(file)).unpack(dest)?,
    }
    Ok(format)
}

fn extract_zip(file: File, dest: &Path) -> TrainingResult<()> {
    let mut zip = zip::ZipArchive::new(BufReader::new(file))?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("skipping zip entry with unsafe path: {}", entry.name());
            continue;
        };
        let out = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = File::create(&out)?;
        std::io::copy(&mut entry, &mut writer)?;
    }
    Ok(())
}
