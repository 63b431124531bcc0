//! Library Error Types
//!
//! Two families of errors live here:
//!
//! - [`ErrorKind`] aborts whatever operation raised it (a plan, a run, an
//!   undo). Journal failures always end up here.
//! - [`EntryErrorKind`] describes why a *single* journal entry could not be
//!   applied or reverted. It is recorded against the entry, reported in the
//!   run summary, and the run carries on with the next entry.

use darkroom_journal::RunId;
use derive_more::{Display, Error};
use std::path::PathBuf;

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) type EntryResult<T> = std::result::Result<T, exn::Exn<EntryErrorKind>>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid naming scheme")]
    Scheme,
    #[display("no destination directory configured")]
    NoDestination,
    #[display("destination directory is not valid UTF-8: {}", _0.display())]
    InvalidDestination(#[error(not(source))] PathBuf),
    #[display("source directory not found: {}", _0.display())]
    SourceNotFound(#[error(not(source))] PathBuf),
    #[display("unable to read source directory")]
    Storage,
    #[display("journal error")]
    Journal,
    #[display("another run is in progress (lock held on {})", _0.display())]
    Locked(#[error(not(source))] PathBuf),
    #[display("unable to acquire run lock: {}", _0.display())]
    Lock(#[error(not(source))] PathBuf),
    #[display("run not found: {_0}")]
    RunNotFound(#[error(not(source))] RunId),
    #[display("cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Locked(_))
    }
}

/// Why one entry couldn't be applied or undone.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum EntryErrorKind {
    #[display("journal entry has no destination or fingerprint")]
    Incomplete,
    #[display("source file is missing: {}", _0.display())]
    SourceMissing(#[error(not(source))] PathBuf),
    #[display("source file changed since planning: {}", _0.display())]
    SourceChanged(#[error(not(source))] PathBuf),
    #[display("destination already exists: {}", _0.display())]
    DestinationOccupied(#[error(not(source))] PathBuf),
    #[display("organised file is missing: {}", _0.display())]
    DestinationMissing(#[error(not(source))] PathBuf),
    #[display("organised file no longer matches the journal: {}", _0.display())]
    DestinationChanged(#[error(not(source))] PathBuf),
    #[display("original location is occupied: {}", _0.display())]
    SourceOccupied(#[error(not(source))] PathBuf),
    #[display("copy does not match the original: {}", _0.display())]
    CopyMismatch(#[error(not(source))] PathBuf),
    #[display("{_0}")]
    Storage(#[error(not(source))] String),
}

impl EntryErrorKind {
    /// Wrap a storage error, keeping its message for the run summary.
    pub(crate) fn storage(e: darkroom_storage::error::Error) -> Self {
        Self::Storage((*e).to_string())
    }
}
