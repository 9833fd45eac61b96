//! Error taxonomy shared by every filesystem provider.

use std::io;

use thiserror::Error;

/// Errors that can occur while resolving, reading, or writing a path.
///
/// Messages carry logical (realm-relative) paths only; physical locations are
/// logged, never surfaced.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path or realm does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A directory operation was attempted on something else.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// A file operation was attempted on a directory.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// The storage or remote host rejected the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A remote session could not be established or was lost.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The write exceeds the configured limit or the storage is full.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The path tries to leave its realm root.
    #[error("path traversal detected: {0}")]
    PathTraversal(String),

    /// The upload file name is empty once sanitized.
    #[error("invalid file name: {0:?}")]
    InvalidFilename(String),

    /// A streamed transfer failed partway.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Any other I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FsError {
    /// Map an I/O error for `path` onto the taxonomy.
    pub fn from_io(err: io::Error, path: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            io::ErrorKind::PermissionDenied => FsError::PermissionDenied(path.to_string()),
            io::ErrorKind::NotADirectory => FsError::NotADirectory(path.to_string()),
            io::ErrorKind::IsADirectory => FsError::IsADirectory(path.to_string()),
            io::ErrorKind::StorageFull => FsError::QuotaExceeded(path.to_string()),
            _ => FsError::Io(err),
        }
    }

    /// Whether the error means "nothing there" from the caller's point of view.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FsError::NotFound(_)
                | FsError::PathTraversal(_)
                | FsError::NotADirectory(_)
                | FsError::IsADirectory(_)
        )
    }
}
