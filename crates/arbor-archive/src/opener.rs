use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use arbor_core::sync::lock_or_recover;
use zip::ZipArchive;

use crate::error::ArchiveError;

/// Opens archives for the [`ArchiveManager`](crate::ArchiveManager).
///
/// `open` must be safe to retry and must not leave anything behind when it
/// fails.
pub trait ArchiveOpener: Send + Sync {
    type Archive: Send + Sync;

    fn open(&self, path: &Path) -> Result<Self::Archive, ArchiveError>;
}

/// Opens zip-format archives (jars, jmods) from the local file system.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipOpener;

impl ArchiveOpener for ZipOpener {
    type Archive = OpenArchive;

    fn open(&self, path: &Path) -> Result<OpenArchive, ArchiveError> {
        let file = File::open(path).map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let zip = ZipArchive::new(file).map_err(|source| ArchiveError::Zip {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(OpenArchive {
            path: path.to_path_buf(),
            zip: Mutex::new(zip),
        })
    }
}

/// An opened zip archive. Dropping it closes the file.
pub struct OpenArchive {
    path: PathBuf,
    zip: Mutex<ZipArchive<File>>,
}

impl OpenArchive {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> usize {
        lock_or_recover(&self.zip, "arbor.archive").len()
    }

    pub fn entry_names(&self) -> Vec<String> {
        lock_or_recover(&self.zip, "arbor.archive")
            .file_names()
            .map(str::to_owned)
            .collect()
    }

    /// Read an entry from the archive.
    ///
    /// Returns `Ok(None)` when the entry isn't present.
    pub fn read(&self, name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let mut zip = lock_or_recover(&self.zip, "arbor.archive");
        let result = match zip.by_name(name) {
            Ok(mut entry) => {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf).with_context(|| {
                    format!("failed to read {} from {}", name, self.path.display())
                })?;
                Ok(Some(buf))
            }
            Err(zip::result::ZipError::FileNotFound) => Ok(None),
            Err(err) => Err(err).with_context(|| {
                format!("failed to read {} from zip {}", name, self.path.display())
            }),
        };
        result
    }
}

impl std::fmt::Debug for OpenArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenArchive")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
