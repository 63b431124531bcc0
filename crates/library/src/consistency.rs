//! Startup consistency check.
//!
//! A run still [`InProgress`](RunStatus::InProgress) while nobody holds the
//! run lock was interrupted: the process crashed or was killed mid-run. Such
//! runs are reported, never resumed. Undoing them is the user's call.

use crate::error::{ErrorKind, Result};
use crate::lock::RunLock;
use darkroom_journal::{Repository, RunOverview, RunStatus};
use exn::ResultExt;
use std::path::Path;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Runs left in progress, newest first, with their per-status counts.
    pub interrupted: Vec<RunOverview>,
    /// Another process is applying or undoing a run right now, so an
    /// in-progress run may simply be running.
    pub run_active: bool,
}
impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.interrupted.is_empty()
    }
}

#[instrument(skip(journal))]
pub async fn check_consistency(journal: &Repository, lock_path: &Path) -> Result<ConsistencyReport> {
    let (run_active, holder) = match RunLock::acquire(lock_path) {
        Ok(_lock) => (false, None),
        Err(e) if matches!(&*e, ErrorKind::Locked(_)) => (true, RunLock::holder(lock_path)),
        Err(e) => return Err(e),
    };
    let mut interrupted = journal.list_runs().await.or_raise(|| ErrorKind::Journal)?;
    // The run holding the lock is live, not interrupted.
    interrupted.retain(|overview| overview.run.status == RunStatus::InProgress && Some(overview.run.id) != holder);
    for overview in &interrupted {
        tracing::warn!(
            run_id = %overview.run.id,
            planned = overview.counts.planned,
            applied = overview.counts.applied,
            "run was interrupted; undo it to restore the original layout"
        );
    }
    Ok(ConsistencyReport { interrupted, run_active })
}
