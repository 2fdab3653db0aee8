//! Cleaning and archiving of the distributable root.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Error while cleaning or archiving.
#[derive(Debug, Error)]
pub enum PackageError {
    /// Filesystem error on a specific path
    #[error("{path}: {source}")]
    Io {
        /// Path being read or written
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
    /// Directory walk failed
    #[error("Failed to walk {path}: {source}")]
    Walk {
        /// Directory being walked
        path: PathBuf,
        /// Underlying error
        source: walkdir::Error,
    },
    /// Zip encoding failed
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// What ended up in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Archive written
    pub archive: PathBuf,
    /// Number of file entries
    pub files: usize,
    /// Size of the archive in bytes
    pub size: u64,
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PackageError + '_ {
    move |source| PackageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Remove the distributable root and everything in it.
///
/// Returns `false` if there was nothing to remove.
pub fn clean_dir(dir: &Path) -> Result<bool, PackageError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(io_error(dir)(e)),
    }
}

/// Archive the contents of `dist` into a zip file at `archive`.
///
/// Entries are added in sorted order with a fixed timestamp, so the same
/// inputs always produce the same bytes. A missing or empty `dist` produces
/// an empty archive.
pub fn create_archive(dist: &Path, archive: &Path) -> Result<ArchiveSummary, PackageError> {
    if let Some(parent) = archive.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let file = File::create(archive).map_err(io_error(archive))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut files = 0;
    if dist.is_dir() {
        for entry in WalkDir::new(dist).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|source| PackageError::Walk {
                path: dist.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path == archive {
                continue;
            }

            let name = path
                .strip_prefix(dist)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            if entry.file_type().is_dir() {
                zip.add_directory(name, options)?;
            } else {
                debug!(entry = %name, "adding to archive");
                zip.start_file(name, options)?;
                let mut source = File::open(path).map_err(io_error(path))?;
                io::copy(&mut source, &mut zip).map_err(io_error(path))?;
                files += 1;
            }
        }
    }

    zip.finish()?;
    let size = fs::metadata(archive).map_err(io_error(archive))?.len();
    Ok(ArchiveSummary {
        archive: archive.to_path_buf(),
        files,
        size,
    })
}
