//! Durable, queryable record of every organising run.
//!
//! Each run gets a row in `runs` and one row per planned file operation in
//! `journal_entries`. Entries are written *before* the filesystem is touched
//! and their status is committed after every individual move, so that the
//! journal always describes a state the undo engine can walk back from, even
//! after a crash.

mod db;
pub mod error;
pub mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{
    EntryCounts, EntryStatus, JournalEntry, NewEntry, NewRun, OperationKind, Run, RunId, RunOverview, RunStatus,
};
pub use crate::repo::Repository;
