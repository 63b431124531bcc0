//! Storage Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! The variants are deliberately coarse: the executor and undo engine decide
//! per journal entry what to do based on the *kind* of filesystem failure
//! (mark the entry failed, fall back to copy+delete, ...), never on the
//! message text.

use derive_more::{Display, Error};
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::path::{Path, PathBuf};

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// File already exists (for operations that require new files)
    #[display("file already exists: {}", _0.display())]
    AlreadyExists(#[error(not(source))] PathBuf),
    /// No space left on the device (or quota exceeded)
    #[display("disk full: {}", _0.display())]
    DiskFull(#[error(not(source))] PathBuf),
    /// A rename was attempted across filesystems
    #[display("cross-device move: {}", _0.display())]
    CrossDevice(#[error(not(source))] PathBuf),
    /// Path contains invalid characters or escapes its root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Copied content did not match the original
    #[display("verification failed: {}", _0.display())]
    Verification(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}
impl ErrorKind {
    /// Classify an [`std::io::Error`] raised while operating on `path`.
    pub fn from_io(e: IoError, path: &Path) -> Self {
        match e.kind() {
            IoErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            IoErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            IoErrorKind::AlreadyExists => Self::AlreadyExists(path.to_path_buf()),
            IoErrorKind::StorageFull | IoErrorKind::QuotaExceeded => Self::DiskFull(path.to_path_buf()),
            IoErrorKind::CrossesDevices => Self::CrossDevice(path.to_path_buf()),
            _ => Self::Io(e),
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::DiskFull(_))
    }
}
