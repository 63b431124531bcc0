//! Repository for runs and their journal entries.
//!
//! Every write is its own transaction and is committed before the call
//! returns. Status updates read the current status inside the same
//! transaction and refuse transitions the lifecycle doesn't allow, so a
//! buggy caller can never, say, mark an entry Applied twice.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::path;
use crate::models::{
    EntryRow, EntryStatus, JournalEntry, NewEntry, NewRun, Run, RunId, RunOverview, RunOverviewRow, RunRow,
    RunStatus,
};
use exn::{OptionExt, ResultExt};
use sqlx::SqlitePool;
use std::path::PathBuf;
use time::UtcDateTime;
use tracing::instrument;

/// Journal store for organising runs.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn now() -> i64 {
        UtcDateTime::now().unix_timestamp()
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Open a new run in the [`InProgress`](RunStatus::InProgress) state.
    #[instrument(skip(self, run), fields(source = %run.source_root.display()))]
    pub async fn create_run(&self, run: &NewRun) -> Result<Run> {
        let row: RunRow = sqlx::query_as(include_str!("../queries/create_run.sql"))
            .bind(path::encode(&run.source_root)?)
            .bind(path::encode(&run.destination_root)?)
            .bind(&run.scheme)
            .bind(Self::now())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let run = Run::try_from(row)?;
        tracing::debug!(run_id = %run.id, "run created");
        Ok(run)
    }

    /// Get a run by its ID.
    pub async fn get_run(&self, run_id: RunId) -> Result<Option<Run>> {
        let row: Option<RunRow> = sqlx::query_as(include_str!("../queries/get_run.sql"))
            .bind(run_id.get())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Run::try_from).transpose()
    }

    /// List every run, newest first, along with per-status entry counts.
    pub async fn list_runs(&self) -> Result<Vec<RunOverview>> {
        let rows: Vec<RunOverviewRow> = sqlx::query_as(include_str!("../queries/list_runs.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(RunOverview::try_from).collect()
    }

    /// All runs currently in `status`, oldest first.
    pub async fn runs_with_status(&self, status: RunStatus) -> Result<Vec<Run>> {
        let rows: Vec<RunRow> = sqlx::query_as(include_str!("../queries/runs_with_status.sql"))
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Run::try_from).collect()
    }

    /// Finish applying a run: record its final status and completion time.
    pub async fn close_run(&self, run_id: RunId, status: RunStatus) -> Result<()> {
        self.transition_run(run_id, status, Some(Self::now())).await
    }

    /// Change the status of a run without touching its completion time (used
    /// by undo).
    pub async fn set_run_status(&self, run_id: RunId, status: RunStatus) -> Result<()> {
        self.transition_run(run_id, status, None).await
    }

    #[instrument(skip(self))]
    async fn transition_run(&self, run_id: RunId, status: RunStatus, completed_at: Option<i64>) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let current: Option<String> = sqlx::query_scalar("SELECT status FROM runs WHERE run_id = ?")
            .bind(run_id.get())
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let current: RunStatus = current.ok_or_raise(|| ErrorKind::RunNotFound(run_id))?.parse()?;
        if !current.can_transition_to(status) {
            exn::bail!(ErrorKind::InvalidTransition { from: current.as_str(), to: status.as_str() });
        }
        sqlx::query(include_str!("../queries/update_run_status.sql"))
            .bind(status.as_str())
            .bind(completed_at)
            .bind(run_id.get())
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Entries
    // =========================================================================

    /// Append every entry of a plan to a run, all in the
    /// [`Planned`](EntryStatus::Planned) state, in one transaction.
    ///
    /// Sequence numbers are assigned from 1 in the order given.
    #[instrument(skip(self, entries), fields(entries = entries.len()))]
    pub async fn append_entries(&self, run_id: RunId, entries: &[NewEntry]) -> Result<()> {
        let now = Self::now();
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        for (index, entry) in entries.iter().enumerate() {
            let sequence = i64::try_from(index + 1).or_raise(|| ErrorKind::InvalidData("sequence number"))?;
            let destination = entry.destination.as_ref().map(path::encode).transpose()?;
            let size = entry
                .fingerprint
                .as_ref()
                .map(|f| i64::try_from(f.size))
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("content size"))?;
            sqlx::query(include_str!("../queries/insert_entry.sql"))
                .bind(run_id.get())
                .bind(sequence)
                .bind(path::encode(&entry.source)?)
                .bind(destination)
                .bind(entry.kind.as_str())
                .bind(entry.fingerprint.as_ref().map(|f| f.hash.as_str()))
                .bind(size)
                .bind(entry.reason.as_deref())
                .bind(now)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// All entries of a run, in ascending sequence order.
    pub async fn entries_for_run(&self, run_id: RunId) -> Result<Vec<JournalEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(include_str!("../queries/entries_for_run.sql"))
            .bind(run_id.get())
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(JournalEntry::try_from).collect()
    }

    /// Change the status of one entry, recording why (or clearing the reason
    /// when `None`).
    pub async fn update_entry_status(
        &self,
        run_id: RunId,
        sequence: u32,
        status: EntryStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Self::check_entry_transition(&mut tx, run_id, sequence, status).await?;
        sqlx::query(include_str!("../queries/update_entry_status.sql"))
            .bind(status.as_str())
            .bind(reason)
            .bind(Self::now())
            .bind(run_id.get())
            .bind(i64::from(sequence))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Mark an entry [`Applied`](EntryStatus::Applied) together with the
    /// directories that were created for it.
    pub async fn mark_applied(&self, run_id: RunId, sequence: u32, created_dirs: &[PathBuf]) -> Result<()> {
        let dirs = created_dirs.iter().map(path::utf8).collect::<Result<Vec<_>>>()?;
        let dirs = serde_json::to_string(&dirs).or_raise(|| ErrorKind::InvalidData("created directories"))?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Self::check_entry_transition(&mut tx, run_id, sequence, EntryStatus::Applied).await?;
        sqlx::query(include_str!("../queries/mark_applied.sql"))
            .bind(dirs)
            .bind(Self::now())
            .bind(run_id.get())
            .bind(i64::from(sequence))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn check_entry_transition(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        run_id: RunId,
        sequence: u32,
        next: EntryStatus,
    ) -> Result<()> {
        let current: Option<String> = sqlx::query_scalar(include_str!("../queries/get_entry_status.sql"))
            .bind(run_id.get())
            .bind(i64::from(sequence))
            .fetch_optional(&mut **tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let current: EntryStatus = current.ok_or_raise(|| ErrorKind::EntryNotFound { run_id, sequence })?.parse()?;
        if !current.can_transition_to(next) {
            exn::bail!(ErrorKind::InvalidTransition { from: current.as_str(), to: next.as_str() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OperationKind;
    use darkroom_storage::Fingerprint;

    async fn repo() -> Repository {
        Repository::from(&Database::connect_in_memory().await.unwrap())
    }

    fn new_run() -> NewRun {
        NewRun {
            source_root: PathBuf::from("/photos/inbox"),
            destination_root: PathBuf::from("/photos/library"),
            scheme: "YYYY/MM".to_string(),
        }
    }

    fn entry(name: &str, kind: OperationKind) -> NewEntry {
        NewEntry {
            source: PathBuf::from("/photos/inbox").join(name),
            destination: Some(PathBuf::from("/photos/library/2024/03").join(name)),
            kind,
            fingerprint: Some(Fingerprint::of_bytes(name)),
            reason: None,
        }
    }

    #[tokio::test]
    async fn test_run_ids_increase() {
        let repo = repo().await;
        let first = repo.create_run(&new_run()).await.unwrap();
        let second = repo.create_run(&new_run()).await.unwrap();
        assert!(second.id > first.id);
        assert_eq!(first.status, RunStatus::InProgress);
        assert_eq!(first.completed_at, None);
    }

    #[tokio::test]
    async fn test_entries_are_sequenced_from_one() {
        let repo = repo().await;
        let run = repo.create_run(&new_run()).await.unwrap();
        let unreadable = NewEntry {
            destination: None,
            fingerprint: None,
            reason: Some("permission denied".to_string()),
            ..entry("c.jpg", OperationKind::SkipUnreadable)
        };
        repo.append_entries(run.id, &[entry("a.jpg", OperationKind::Move), entry("b.jpg", OperationKind::Copy), unreadable])
            .await
            .unwrap();
        let entries = repo.entries_for_run(run.id).await.unwrap();
        assert_eq!(entries.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(entries.iter().all(|e| e.status == EntryStatus::Planned));
        assert_eq!(entries[0].fingerprint, Some(Fingerprint::of_bytes("a.jpg")));
        assert_eq!(entries[2].destination, None);
        assert_eq!(entries[2].reason.as_deref(), Some("permission denied"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_source_paths_keep_their_bytes() {
        use std::os::unix::ffi::OsStrExt;
        let repo = repo().await;
        let run = repo.create_run(&new_run()).await.unwrap();
        let source = PathBuf::from("/photos/inbox").join(std::ffi::OsStr::from_bytes(b"caf\xe9.jpg"));
        repo.append_entries(run.id, &[NewEntry { source: source.clone(), ..entry("cafe.jpg", OperationKind::Move) }])
            .await
            .unwrap();
        let entries = repo.entries_for_run(run.id).await.unwrap();
        assert_eq!(entries[0].source, source);
    }

    #[tokio::test]
    async fn test_mark_applied_records_created_dirs() {
        let repo = repo().await;
        let run = repo.create_run(&new_run()).await.unwrap();
        repo.append_entries(run.id, &[entry("a.jpg", OperationKind::Move)]).await.unwrap();
        let dirs = vec![PathBuf::from("/photos/library/2024"), PathBuf::from("/photos/library/2024/03")];
        repo.mark_applied(run.id, 1, &dirs).await.unwrap();
        let entries = repo.entries_for_run(run.id).await.unwrap();
        assert_eq!(entries[0].status, EntryStatus::Applied);
        assert_eq!(entries[0].created_dirs, dirs);
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_rejected() {
        let repo = repo().await;
        let run = repo.create_run(&new_run()).await.unwrap();
        repo.append_entries(run.id, &[entry("a.jpg", OperationKind::Move)]).await.unwrap();
        repo.update_entry_status(run.id, 1, EntryStatus::Failed, Some("disk full")).await.unwrap();
        let err = repo.mark_applied(run.id, 1, &[]).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidTransition { from: "failed", to: "applied" }));
        let err = repo.update_entry_status(run.id, 1, EntryStatus::Undone, None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidTransition { .. }));
        // The rejected update left the entry alone.
        let entries = repo.entries_for_run(run.id).await.unwrap();
        assert_eq!(entries[0].status, EntryStatus::Failed);
        assert_eq!(entries[0].reason.as_deref(), Some("disk full"));
    }

    #[tokio::test]
    async fn test_missing_entry() {
        let repo = repo().await;
        let run = repo.create_run(&new_run()).await.unwrap();
        let err = repo.update_entry_status(run.id, 9, EntryStatus::Applied, None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::EntryNotFound { sequence: 9, .. }));
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let repo = repo().await;
        let run = repo.create_run(&new_run()).await.unwrap();
        repo.close_run(run.id, RunStatus::Completed).await.unwrap();
        let closed = repo.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(closed.status, RunStatus::Completed);
        assert!(closed.completed_at.is_some());
        // Can't be closed twice.
        let err = repo.close_run(run.id, RunStatus::PartiallyFailed).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidTransition { .. }));
        repo.set_run_status(run.id, RunStatus::Undone).await.unwrap();
        assert_eq!(repo.get_run(run.id).await.unwrap().unwrap().status, RunStatus::Undone);
        assert!(repo.get_run(RunId::from(999)).await.unwrap().is_none());
        let err = repo.set_run_status(RunId::from(999), RunStatus::Undone).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::RunNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_runs_with_counts() {
        let repo = repo().await;
        let empty = repo.create_run(&new_run()).await.unwrap();
        let run = repo.create_run(&new_run()).await.unwrap();
        repo.append_entries(run.id, &[entry("a.jpg", OperationKind::Move), entry("b.jpg", OperationKind::Move)])
            .await
            .unwrap();
        repo.mark_applied(run.id, 1, &[]).await.unwrap();
        repo.update_entry_status(run.id, 2, EntryStatus::Failed, Some("boom")).await.unwrap();

        let runs = repo.list_runs().await.unwrap();
        assert_eq!(runs.len(), 2);
        // Newest first.
        assert_eq!(runs[0].run.id, run.id);
        assert_eq!(runs[0].counts.total, 2);
        assert_eq!(runs[0].counts.applied, 1);
        assert_eq!(runs[0].counts.failed, 1);
        assert_eq!(runs[0].counts.planned, 0);
        assert_eq!(runs[1].run.id, empty.id);
        assert_eq!(runs[1].counts, Default::default());

        repo.close_run(empty.id, RunStatus::Completed).await.unwrap();
        let in_progress = repo.runs_with_status(RunStatus::InProgress).await.unwrap();
        assert_eq!(in_progress.iter().map(|r| r.id).collect::<Vec<_>>(), vec![run.id]);
    }

    #[tokio::test]
    async fn test_survives_reconnect() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("journal.sqlite3");
        let run_id = {
            let db = Database::connect(&path).await.unwrap();
            let repo = Repository::from(&db);
            let run = repo.create_run(&new_run()).await.unwrap();
            repo.append_entries(run.id, &[entry("a.jpg", OperationKind::Move)]).await.unwrap();
            repo.mark_applied(run.id, 1, &[]).await.unwrap();
            db.close().await;
            run.id
        };
        let db = Database::connect(&path).await.unwrap();
        let entries = Repository::from(&db).entries_for_run(run_id).await.unwrap();
        assert_eq!(entries[0].status, EntryStatus::Applied);
    }
}
