//! Applying a [`Plan`].
//!
//! The whole plan is journaled (every entry [`Planned`](EntryStatus::Planned))
//! before the first file is touched. Entries are then applied strictly one at
//! a time in sequence order, and each entry's new status is committed
//! straight after its filesystem change. At any moment the journal describes
//! the filesystem up to the last committed entry, which is what makes a crash
//! recoverable by [`undo`](crate::undo::undo).

mod apply;

use self::apply::apply_entry;
use crate::error::{ErrorKind, Result};
use crate::lock::RunLock;
use crate::plan::Plan;
use crate::{Context, Failure};
use darkroom_journal::{EntryStatus, NewEntry, NewRun, Repository, RunId, RunStatus};
use darkroom_storage::BackendHandle;
use exn::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// State held for the lifetime of one run.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: RunId,
    pub cancel: CancellationToken,
    // Released when the run context is dropped.
    _lock: RunLock,
}
impl RunContext {
    pub(crate) fn new(run_id: RunId, cancel: CancellationToken, lock: RunLock) -> Self {
        Self { run_id, cancel, _lock: lock }
    }
}

/// Outcome of applying a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Files moved or copied.
    pub applied: u64,
    /// Duplicate and unreadable files, left where they were.
    pub skipped: u64,
    pub failed: u64,
    /// Entries never attempted because the run was cancelled.
    pub pending: u64,
    pub failures: Vec<Failure>,
}
impl RunSummary {
    fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            status: RunStatus::InProgress,
            applied: 0,
            skipped: 0,
            failed: 0,
            pending: 0,
            failures: Vec::new(),
        }
    }
}

/// Journal and apply `plan`.
///
/// Per-file failures are recorded against their entry and the run carries
/// on. Journal failures abort the run immediately and leave it
/// [`InProgress`](RunStatus::InProgress), for the consistency check to find.
///
/// # Errors
/// - [`Locked`](ErrorKind::Locked) if another run holds the run lock.
/// - [`Journal`](ErrorKind::Journal) if the journal can't be written.
/// - [`Cancelled`](ErrorKind::Cancelled) if cancelled before the run started.
#[instrument(skip_all, fields(source = %plan.source_root.display(), operations = plan.operations.len()))]
pub async fn execute(backend: &BackendHandle, journal: &Repository, ctx: &Context, plan: Plan) -> Result<RunSummary> {
    let lock = RunLock::acquire(&ctx.lock_path)?;
    if ctx.cancel.is_cancelled() {
        exn::bail!(ErrorKind::Cancelled);
    }
    let run = journal
        .create_run(&NewRun {
            source_root: plan.source_root.clone(),
            destination_root: plan.destination_root.clone(),
            scheme: plan.scheme.clone(),
        })
        .await
        .or_raise(|| ErrorKind::Journal)?;
    lock.record(run.id)?;
    let run = RunContext::new(run.id, ctx.cancel.clone(), lock);
    let entries: Vec<NewEntry> = plan.operations.into_iter().map(NewEntry::from).collect();
    journal.append_entries(run.run_id, &entries).await.or_raise(|| ErrorKind::Journal)?;
    let entries = journal.entries_for_run(run.run_id).await.or_raise(|| ErrorKind::Journal)?;
    tracing::info!(run_id = %run.run_id, entries = entries.len(), "run started");

    let mut summary = RunSummary::new(run.run_id);
    let mut cancelled = false;
    for entry in entries {
        // Only ever between two entries, never half way through one.
        if cancelled || run.cancel.is_cancelled() {
            cancelled = true;
            summary.pending += 1;
            continue;
        }
        match apply_entry(backend, &entry).await {
            Ok(created) => {
                journal.mark_applied(run.run_id, entry.sequence, &created).await.or_raise(|| ErrorKind::Journal)?;
                match entry.kind.is_skip() {
                    true => summary.skipped += 1,
                    false => summary.applied += 1,
                }
                tracing::debug!(run_id = %run.run_id, sequence = entry.sequence, kind = %entry.kind, path = %entry.source.display(), "applied");
            },
            Err(e) => {
                let reason = (*e).to_string();
                tracing::warn!(run_id = %run.run_id, sequence = entry.sequence, path = %entry.source.display(), %reason, "entry failed");
                journal
                    .update_entry_status(run.run_id, entry.sequence, EntryStatus::Failed, Some(&reason))
                    .await
                    .or_raise(|| ErrorKind::Journal)?;
                summary.failed += 1;
                summary.failures.push(Failure { path: entry.source, reason });
            },
        }
    }

    summary.status = match (cancelled, summary.failed) {
        (true, _) => RunStatus::Cancelled,
        (false, 0) => RunStatus::Completed,
        (false, _) => RunStatus::PartiallyFailed,
    };
    journal.close_run(run.run_id, summary.status).await.or_raise(|| ErrorKind::Journal)?;
    tracing::info!(
        run_id = %run.run_id,
        status = %summary.status,
        applied = summary.applied,
        skipped = summary.skipped,
        failed = summary.failed,
        pending = summary.pending,
        "run finished"
    );
    Ok(summary)
}
