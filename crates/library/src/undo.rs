//! Reverting a run.
//!
//! Entries are walked in *descending* sequence order, the reverse of how they
//! were applied. That way a file placed in a directory created by an earlier
//! entry is moved out before that entry tries to remove the directory, and
//! `_n` suffixes are unwound in the opposite order they were handed out.
//!
//! Nothing is reverted blindly: a file is only moved back (or a copy
//! deleted) after its fingerprint matches the journal. An entry that fails
//! this check is marked [`UndoFailed`](EntryStatus::UndoFailed) with the
//! reason, and undo carries on. Running undo again retries exactly those.

use crate::dirs::{create_parents, remove_if_empty};
use crate::error::{EntryErrorKind, EntryResult, ErrorKind, Result};
use crate::execute::RunContext;
use crate::lock::RunLock;
use crate::{Context, Failure};
use darkroom_journal::{EntryStatus, JournalEntry, OperationKind, Repository, RunId, RunStatus};
use darkroom_storage::error::ErrorKind as StorageErrorKind;
use darkroom_storage::{BackendHandle, Fingerprint, fingerprint};
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoSummary {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Files moved back, or copies removed.
    pub undone: u64,
    /// Entries that needed no filesystem change.
    pub skipped: u64,
    pub failed_to_undo: u64,
    pub failures: Vec<Failure>,
}

/// What reverting one entry amounted to.
enum Reverted {
    /// A file was moved back, or a copy deleted.
    Restored,
    /// Nothing on disk needed changing.
    NoOp,
}

/// Revert every applied entry of `run_id`.
///
/// Undoing a run that is already [`Undone`](RunStatus::Undone) does nothing.
///
/// # Errors
/// - [`Locked`](ErrorKind::Locked) if another run holds the run lock.
/// - [`RunNotFound`](ErrorKind::RunNotFound) for an unknown run.
/// - [`Journal`](ErrorKind::Journal) if the journal can't be read or written.
#[instrument(skip(backend, journal, ctx))]
pub async fn undo(backend: &BackendHandle, journal: &Repository, ctx: &Context, run_id: RunId) -> Result<UndoSummary> {
    let lock = RunLock::acquire(&ctx.lock_path)?;
    let run = journal
        .get_run(run_id)
        .await
        .or_raise(|| ErrorKind::Journal)?
        .ok_or_raise(|| ErrorKind::RunNotFound(run_id))?;
    lock.record(run_id)?;
    let mut summary = UndoSummary {
        run_id,
        status: run.status,
        undone: 0,
        skipped: 0,
        failed_to_undo: 0,
        failures: Vec::new(),
    };
    if run.status == RunStatus::Undone {
        tracing::info!(%run_id, "run already undone");
        return Ok(summary);
    }
    let run = RunContext::new(run.id, ctx.cancel.clone(), lock);
    let mut entries = journal.entries_for_run(run.run_id).await.or_raise(|| ErrorKind::Journal)?;
    entries.reverse();
    // Entries undone by an earlier pass may have created directories that
    // only became empty during this one.
    let created_dirs: Vec<PathBuf> = entries.iter().flat_map(|e| e.created_dirs.iter().cloned()).collect();

    let mut interrupted = false;
    for entry in entries {
        if run.cancel.is_cancelled() {
            interrupted = true;
            break;
        }
        let reverted = match entry.status {
            EntryStatus::Undone => continue,
            // Never applied, so there is nothing to revert.
            EntryStatus::Failed => {
                summary.skipped += 1;
                continue;
            },
            EntryStatus::Planned => reconcile(backend, &entry).await,
            EntryStatus::Applied | EntryStatus::UndoFailed => revert(backend, &entry).await,
        };
        match reverted {
            Ok(reverted) => {
                journal
                    .update_entry_status(run.run_id, entry.sequence, EntryStatus::Undone, None)
                    .await
                    .or_raise(|| ErrorKind::Journal)?;
                match reverted {
                    Reverted::Restored => summary.undone += 1,
                    Reverted::NoOp => summary.skipped += 1,
                }
            },
            Err(e) => {
                let reason = (*e).to_string();
                tracing::warn!(run_id = %run.run_id, sequence = entry.sequence, path = %entry.source.display(), %reason, "unable to undo entry");
                journal
                    .update_entry_status(run.run_id, entry.sequence, EntryStatus::UndoFailed, Some(&reason))
                    .await
                    .or_raise(|| ErrorKind::Journal)?;
                summary.failed_to_undo += 1;
                summary.failures.push(Failure { path: entry.source, reason });
            },
        }
    }

    summary.status = match summary.failed_to_undo == 0 && !interrupted {
        true => RunStatus::Undone,
        false => RunStatus::UndoIncomplete,
    };
    if summary.status == RunStatus::Undone {
        let removed = remove_if_empty(backend, &created_dirs).await;
        tracing::debug!(run_id = %run.run_id, removed, "swept directories created by the run");
    }
    journal.set_run_status(run.run_id, summary.status).await.or_raise(|| ErrorKind::Journal)?;
    tracing::info!(
        run_id = %run.run_id,
        status = %summary.status,
        undone = summary.undone,
        skipped = summary.skipped,
        failed = summary.failed_to_undo,
        "undo finished"
    );
    Ok(summary)
}

/// Revert an entry that was applied.
async fn revert(backend: &BackendHandle, entry: &JournalEntry) -> EntryResult<Reverted> {
    let (destination, expected) = match entry.kind {
        OperationKind::SkipDuplicate | OperationKind::SkipUnreadable => return Ok(Reverted::NoOp),
        OperationKind::Move | OperationKind::Copy => match (&entry.destination, &entry.fingerprint) {
            (Some(destination), Some(expected)) => (destination, expected),
            _ => exn::bail!(EntryErrorKind::Incomplete),
        },
    };
    let reverted = match entry.kind {
        OperationKind::Move => {
            verify_destination(backend, destination, expected).await?;
            move_back(backend, destination, &entry.source).await?;
            Reverted::Restored
        },
        _ => remove_copy(backend, &entry.source, destination, expected).await?,
    };
    remove_if_empty(backend, &entry.created_dirs).await;
    Ok(reverted)
}

/// Settle an entry left [`Planned`](EntryStatus::Planned) by an interrupted
/// run.
///
/// A crash between moving a file and committing the entry leaves the file at
/// its destination with the source gone. Only that exact situation is moved
/// back; anything else is left alone. A copy that matches the original is
/// removed, and anything else found where the copy should be is reported.
async fn reconcile(backend: &BackendHandle, entry: &JournalEntry) -> EntryResult<Reverted> {
    let (OperationKind::Move | OperationKind::Copy, Some(destination), Some(expected)) =
        (entry.kind, &entry.destination, &entry.fingerprint)
    else {
        return Ok(Reverted::NoOp);
    };
    if entry.kind == OperationKind::Copy {
        let reverted = remove_copy(backend, &entry.source, destination, expected).await?;
        if matches!(reverted, Reverted::Restored) {
            tracing::info!(path = %destination.display(), "removed copy made by an interrupted run");
        }
        return Ok(reverted);
    }
    if !matches!(backend.exists(&entry.source).await, Ok(false)) {
        return Ok(Reverted::NoOp);
    }
    if verify_destination(backend, destination, expected).await.is_err() {
        return Ok(Reverted::NoOp);
    }
    match move_back(backend, destination, &entry.source).await {
        Ok(()) => {
            tracing::info!(path = %entry.source.display(), "restored file moved by an interrupted run");
            Ok(Reverted::Restored)
        },
        Err(e) => {
            tracing::warn!(path = %entry.source.display(), reason = %(*e), "unable to restore file moved by an interrupted run");
            Ok(Reverted::NoOp)
        },
    }
}

/// Delete a copy, never the original.
///
/// A copy that is already gone needs nothing. One whose original has since
/// disappeared is the only one left, so it stays.
async fn remove_copy(
    backend: &BackendHandle,
    source: &Path,
    destination: &Path,
    expected: &Fingerprint,
) -> EntryResult<Reverted> {
    if !backend.exists(destination).await.map_err(EntryErrorKind::storage)? {
        return Ok(Reverted::NoOp);
    }
    if !backend.exists(source).await.map_err(EntryErrorKind::storage)? {
        exn::bail!(EntryErrorKind::SourceMissing(source.to_path_buf()));
    }
    verify_destination(backend, destination, expected).await?;
    backend.delete(destination).await.map_err(EntryErrorKind::storage)?;
    Ok(Reverted::Restored)
}

async fn verify_destination(backend: &BackendHandle, destination: &Path, expected: &Fingerprint) -> EntryResult<()> {
    let actual = match fingerprint(backend.as_ref(), destination).await {
        Ok(actual) => actual,
        Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => {
            exn::bail!(EntryErrorKind::DestinationMissing(destination.to_path_buf()))
        },
        Err(e) => exn::bail!(EntryErrorKind::storage(e)),
    };
    if &actual != expected {
        exn::bail!(EntryErrorKind::DestinationChanged(destination.to_path_buf()));
    }
    Ok(())
}

/// Move an organised file back to where it came from, recreating the
/// original directory if it has since been removed.
async fn move_back(backend: &BackendHandle, destination: &Path, source: &Path) -> EntryResult<()> {
    if backend.exists(source).await.map_err(EntryErrorKind::storage)? {
        exn::bail!(EntryErrorKind::SourceOccupied(source.to_path_buf()));
    }
    create_parents(backend, source).await.map_err(EntryErrorKind::storage)?;
    backend.relocate(destination, source).await.map_err(EntryErrorKind::storage)?;
    Ok(())
}
