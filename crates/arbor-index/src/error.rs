#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("a scan is already in progress (scan {active})")]
    ScanInProgress { active: u64 },
    /// The scan this handle belongs to has already ended or been aborted.
    #[error("scan {scan} is no longer active")]
    StaleScan { scan: u64 },
    #[error("scan cancelled")]
    Cancelled,
}

impl From<arbor_core::Cancelled> for IndexError {
    fn from(_: arbor_core::Cancelled) -> Self {
        IndexError::Cancelled
    }
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
