#[derive(Debug, thiserror::Error)]
pub enum ClasspathError {
    /// The initializer failed. The failure value (if any) is memoized, so the
    /// next lookup reports [`Lookup::Failed`](crate::Lookup::Failed) instead of retrying.
    #[error("failed to resolve {key}: {source}")]
    Resolution {
        key: String,
        #[source]
        source: ResolutionError,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
}

/// Error returned by an [`Initializer`](crate::Initializer).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ResolutionError {
    message: String,
}

impl ResolutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type Result<T, E = ClasspathError> = std::result::Result<T, E>;
