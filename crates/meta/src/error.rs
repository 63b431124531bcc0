//! Metadata Error Types
//!
//! None of these are fatal to an organising run. A file whose metadata can't
//! be decoded is still organised, just by its modification time instead.

use derive_more::{Display, Error};

/// A decoding error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for metadata extraction.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The file extension is not a known photo format.
    #[display("unsupported format: {_0}")]
    Unsupported(#[error(not(source))] String),
    /// The container was read but carries no EXIF block.
    #[display("no metadata found")]
    NoMetadata,
    /// The EXIF block (or the container around it) is broken.
    #[display("malformed metadata: {_0}")]
    Malformed(#[error(not(source))] String),
    /// The file could not be read.
    #[display("unable to read file: {_0}")]
    Io(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
