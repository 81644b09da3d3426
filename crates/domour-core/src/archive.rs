use std::io::{Cursor, Read};

use domour_platform::ArchiveFormat;
use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to open {format} archive: {details}")]
    Corrupt {
        format: ArchiveFormat,
        details: String,
    },
    #[error("binary {entry} not found in {format} archive")]
    EntryNotFound {
        entry: String,
        format: ArchiveFormat,
    },
    #[error("failed to read archive entry {entry}: {source}")]
    Read {
        entry: String,
        #[source]
        source: std::io::Error,
    },
}

impl ArchiveError {
    fn corrupt(format: ArchiveFormat, error: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            format,
            details: error.to_string(),
        }
    }

    fn read(entry: &str, source: std::io::Error) -> Self {
        Self::Read {
            entry: entry.to_string(),
            source,
        }
    }
}

/// Return the contents of the first regular file in `archive` whose base name
/// is exactly `expected`. Releases often nest the binary under a versioned
/// directory, so the directory part of entry paths is ignored.
///
/// # Errors
/// Returns [`ArchiveError::Corrupt`] when the container cannot be decoded and
/// [`ArchiveError::EntryNotFound`] when no entry matches.
pub fn extract_entry(
    archive: &[u8],
    expected: &str,
    format: ArchiveFormat,
) -> Result<Vec<u8>, ArchiveError> {
    let contents = match format {
        ArchiveFormat::Zip => extract_from_zip(archive, expected)?,
        ArchiveFormat::TarGz => extract_from_tar_gz(archive, expected)?,
    };

    contents.ok_or_else(|| ArchiveError::EntryNotFound {
        entry: expected.to_string(),
        format,
    })
}

fn extract_from_zip(data: &[u8], expected: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|error| ArchiveError::corrupt(ArchiveFormat::Zip, error))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|error| ArchiveError::corrupt(ArchiveFormat::Zip, error))?;
        if entry.is_dir() || base_name(entry.name()) != expected {
            continue;
        }

        debug!("Extracting {} from zip archive", entry.name());
        let mut contents = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
        entry
            .read_to_end(&mut contents)
            .map_err(|error| ArchiveError::read(expected, error))?;
        return Ok(Some(contents));
    }

    Ok(None)
}

fn extract_from_tar_gz(data: &[u8], expected: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
    let decoder = flate2::read::GzDecoder::new(data);
    let mut archive = tar::Archive::new(decoder);
    let entries = archive
        .entries()
        .map_err(|error| ArchiveError::corrupt(ArchiveFormat::TarGz, error))?;

    for entry in entries {
        let mut entry = entry.map_err(|error| ArchiveError::corrupt(ArchiveFormat::TarGz, error))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        if base_name(&path) != expected {
            continue;
        }

        debug!("Extracting {path} from tar.gz archive");
        let mut contents = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
        entry
            .read_to_end(&mut contents)
            .map_err(|error| ArchiveError::read(expected, error))?;
        return Ok(Some(contents));
    }

    Ok(None)
}

/// Last path component, tolerating both separators and trailing slashes.
fn base_name(path: &str) -> &str {
    path.trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
}
