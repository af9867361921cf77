use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to open archive {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read zip {}: {source}", path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    /// Returned without touching the file system while a previous failure is
    /// still cached.
    #[error("archive {} is known to be invalid: {reason}", path.display())]
    KnownInvalid { path: PathBuf, reason: String },
}

impl ArchiveError {
    pub fn is_known_invalid(&self) -> bool {
        matches!(self, ArchiveError::KnownInvalid { .. })
    }
}

pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;
