use std::time::Duration;

/// Errors surfaced by every stage of the filesystem-operations pipeline.
///
/// The first five variants are ordinary, expected outcomes the FUSE layer
/// translates into errno values. `ProtocolViolation` means an internal
/// invariant broke (a malformed batch response, or a write against a parent
/// whose identity was never cached) and must surface as an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum FaoError {
    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("file too large: {path} would grow to {size} bytes")]
    FileTooLarge { path: String, size: u64 },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("remote transport failure: {0}")]
    Transport(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FaoError {
    /// Whether this error is an expected filesystem condition rather than
    /// an internal or transport failure.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            FaoError::NotFound(_)
                | FaoError::NotADirectory(_)
                | FaoError::IsADirectory(_)
                | FaoError::AlreadyExists(_)
                | FaoError::FileTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FaoError>;
