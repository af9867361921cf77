use arbor_core::{Cancelled, Handle};

/// Failure reported by a [`StructureBuilder`](crate::StructureBuilder).
#[derive(Debug, thiserror::Error)]
pub enum StructuralError {
    #[error("{0} does not exist")]
    NotFound(Handle),
    #[error("failed to read {handle}: {source}")]
    Unreadable {
        handle: Handle,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed source for {handle}: {message}")]
    Malformed { handle: Handle, message: String },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The element has no backing resource. Never cached.
    #[error("{0} does not exist")]
    NotFound(Handle),
    /// Computing the element's structure failed. Never cached; the next open retries.
    #[error("failed to compute structure of {handle}")]
    Structural {
        handle: Handle,
        #[source]
        source: StructuralError,
    },
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
    #[error("model manager has been shut down")]
    ShutDown,
}

impl ModelError {
    pub(crate) fn from_structural(handle: &Handle, err: StructuralError) -> Self {
        match err {
            StructuralError::NotFound(missing) => ModelError::NotFound(missing),
            StructuralError::Cancelled(cancelled) => ModelError::Cancelled(cancelled),
            source => ModelError::Structural {
                handle: handle.clone(),
                source,
            },
        }
    }
}

pub type Result<T, E = ModelError> = std::result::Result<T, E>;

/// Failure reported by a close callback. Collected by the close pass, never propagated.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CloseError {
    message: String,
}

impl CloseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
