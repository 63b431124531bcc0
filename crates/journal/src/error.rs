//! Journal Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! Every error in this crate is fatal to the run that hits it: a journal that
//! can't be written to can't guarantee the run is reversible.

use derive_more::{Display, Error};

use crate::models::RunId;

/// A journal error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for journal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    #[display("run not found: {_0}")]
    RunNotFound(#[error(not(source))] RunId),
    #[display("journal entry not found: run {run_id}, sequence {sequence}")]
    EntryNotFound { run_id: RunId, sequence: u32 },
    /// A status update that the entry (or run) lifecycle doesn't allow.
    #[display("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    /// Stored data could not be converted back into a model.
    #[display("invalid journal data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
