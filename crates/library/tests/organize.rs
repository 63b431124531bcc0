mod common;

use async_trait::async_trait;
use common::{Harness, mock, paths};
use darkroom_library::error::ErrorKind;
use darkroom_library::{EntryStatus, OperationKind, RunLock, RunStatus};
use darkroom_storage::backend::{Fault, StorageBackend};
use darkroom_storage::error::Result as StorageResult;
use darkroom_storage::{BackendHandle, FileInfo};
use futures::Stream;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use time::macros::datetime;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_two_photos_organised_and_undone() {
    let h = Harness::new(
        &[("/in/img1.jpg", "first"), ("/in/img2.jpg", "second")],
        &[("img1.jpg", datetime!(2024-03-01 14:15:16))],
        "YYYY/MM",
    )
    .await;

    let plan = h.library.scan(Path::new("/in")).await.unwrap();
    let destinations: Vec<_> = plan.operations.iter().map(|op| op.destination.clone().unwrap()).collect();
    assert_eq!(destinations, paths(&["/out/2024/03/img1.jpg", "/out/2023/07/img2.jpg"]));

    let summary = h.library.organize(Path::new("/in")).await.unwrap();
    assert_eq!((summary.applied, summary.failed, summary.skipped), (2, 0, 0));
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(h.mock.paths().await, paths(&["/out/2023/07/img2.jpg", "/out/2024/03/img1.jpg"]));

    let undone = h.library.undo(summary.run_id).await.unwrap();
    assert_eq!((undone.undone, undone.failed_to_undo), (2, 0));
    assert_eq!(undone.status, RunStatus::Undone);
    assert_eq!(h.mock.paths().await, paths(&["/in/img1.jpg", "/in/img2.jpg"]));
    assert_eq!(h.contents("/in/img1.jpg").await.as_deref(), Some("first"));
}

#[tokio::test]
async fn test_round_trip_leaves_no_directories_behind() {
    let h = Harness::new(
        &[
            ("/in/a.jpg", "a"),
            ("/in/trip/b.nef", "b"),
            ("/in/trip/c.jpg", "c"),
            ("/in/notes.txt", "not a photo"),
            ("/out/existing/d.jpg", "d"),
        ],
        &[("a.jpg", datetime!(2022-01-02 03:04:05)), ("b.nef", datetime!(2021-12-31 23:59:59))],
        "{{ year }}/{{ month }}/{{ day }}",
    )
    .await;
    let files_before = h.mock.paths().await;
    let dirs_before = h.mock.dirs().await;

    let summary = h.library.organize(Path::new("/in")).await.unwrap();
    assert_eq!(summary.applied, 3);
    assert_eq!(h.contents("/in/notes.txt").await.as_deref(), Some("not a photo"));

    let undone = h.library.undo(summary.run_id).await.unwrap();
    assert_eq!(undone.status, RunStatus::Undone);
    assert_eq!(h.mock.paths().await, files_before);
    assert_eq!(h.mock.dirs().await, dirs_before);
}

#[tokio::test]
async fn test_planning_is_idempotent() {
    let h = Harness::new(
        &[("/in/x/img.jpg", "one"), ("/in/y/img.jpg", "two"), ("/in/z/img.jpg", "one")],
        &[],
        "YYYY",
    )
    .await;
    let first = h.library.scan(Path::new("/in")).await.unwrap();
    let second = h.library.scan(Path::new("/in")).await.unwrap();
    assert_eq!(first, second);

    h.library.organize(Path::new("/in")).await.unwrap();
    // Only the in-plan duplicate was left behind; it is still a duplicate.
    let again = h.library.organize(Path::new("/in")).await.unwrap();
    assert_eq!((again.applied, again.skipped, again.failed), (0, 1, 0));
}

#[tokio::test]
async fn test_collision_is_disambiguated_and_restored() {
    let h = Harness::new(&[("/in/img.jpg", "mine"), ("/out/2023/img.jpg", "someone else's")], &[], "YYYY").await;
    let summary = h.library.organize(Path::new("/in")).await.unwrap();
    assert_eq!(summary.applied, 1);
    assert_eq!(h.contents("/out/2023/img.jpg").await.as_deref(), Some("someone else's"));
    assert_eq!(h.contents("/out/2023/img_1.jpg").await.as_deref(), Some("mine"));

    h.library.undo(summary.run_id).await.unwrap();
    assert_eq!(h.mock.paths().await, paths(&["/in/img.jpg", "/out/2023/img.jpg"]));
}

#[tokio::test]
async fn test_duplicate_is_skipped_and_kept() {
    let h = Harness::new(&[("/in/img.jpg", "same"), ("/out/2023/img.jpg", "same")], &[], "YYYY").await;
    let summary = h.library.organize(Path::new("/in")).await.unwrap();
    assert_eq!((summary.applied, summary.skipped), (0, 1));
    assert_eq!(h.mock.paths().await, paths(&["/in/img.jpg", "/out/2023/img.jpg"]));

    let entries = h.journal.entries_for_run(summary.run_id).await.unwrap();
    assert_eq!(entries[0].kind, OperationKind::SkipDuplicate);
    assert_eq!(entries[0].status, EntryStatus::Applied);
}

#[tokio::test]
async fn test_partial_failure_continues_and_undoes() {
    let h = Harness::new(
        &[("/in/a.jpg", "a"), ("/in/b.jpg", "b"), ("/in/c.jpg", "c")],
        &[("b.jpg", datetime!(2024-05-06 07:08:09))],
        "YYYY",
    )
    .await;
    h.mock.inject(Fault::Deny(PathBuf::from("/out/2024")));
    let summary = h.library.organize(Path::new("/in")).await.unwrap();
    assert_eq!(summary.status, RunStatus::PartiallyFailed);
    assert_eq!((summary.applied, summary.failed), (2, 1));
    assert_eq!(summary.failures[0].path, Path::new("/in/b.jpg"));
    assert!(summary.failures[0].reason.contains("permission denied"));
    assert_eq!(h.mock.paths().await, paths(&["/in/b.jpg", "/out/2023/a.jpg", "/out/2023/c.jpg"]));

    h.mock.clear_faults();
    let undone = h.library.undo(summary.run_id).await.unwrap();
    assert_eq!(undone.status, RunStatus::Undone);
    assert_eq!((undone.undone, undone.skipped), (2, 1));
    assert_eq!(h.mock.paths().await, paths(&["/in/a.jpg", "/in/b.jpg", "/in/c.jpg"]));
}

#[tokio::test]
async fn test_undo_runs_in_reverse_order() {
    // The first file creates /out/2023, the second lands inside it. Only
    // reversing in descending sequence order lets the directory be removed.
    let h = Harness::new(&[("/in/a.jpg", "a"), ("/in/b.jpg", "b")], &[], "YYYY").await;
    let summary = h.library.organize(Path::new("/in")).await.unwrap();
    let entries = h.journal.entries_for_run(summary.run_id).await.unwrap();
    assert_eq!(entries[0].created_dirs, paths(&["/out", "/out/2023"]));
    assert!(entries[1].created_dirs.is_empty());

    h.library.undo(summary.run_id).await.unwrap();
    let dirs = h.mock.dirs().await;
    assert!(!dirs.contains(&PathBuf::from("/out/2023")));
    assert!(!dirs.contains(&PathBuf::from("/out")));
    let entries = h.journal.entries_for_run(summary.run_id).await.unwrap();
    assert!(entries.iter().all(|entry| entry.status == EntryStatus::Undone));
}

#[tokio::test]
async fn test_modified_destination_blocks_undo_until_fixed() {
    let h = Harness::new(&[("/in/a.jpg", "a"), ("/in/b.jpg", "b")], &[], "YYYY").await;
    let summary = h.library.organize(Path::new("/in")).await.unwrap();
    h.backend.write(Path::new("/out/2023/a.jpg"), b"edited").await.unwrap();

    let undone = h.library.undo(summary.run_id).await.unwrap();
    assert_eq!(undone.status, RunStatus::UndoIncomplete);
    assert_eq!((undone.undone, undone.failed_to_undo), (1, 1));
    assert_eq!(undone.failures[0].path, Path::new("/in/a.jpg"));
    assert!(undone.failures[0].reason.contains("no longer matches"));
    assert_eq!(h.contents("/out/2023/a.jpg").await.as_deref(), Some("edited"));
    // The other entry was still reverted, but the shared directory stays.
    assert_eq!(h.contents("/in/b.jpg").await.as_deref(), Some("b"));

    h.backend.write(Path::new("/out/2023/a.jpg"), b"a").await.unwrap();
    let retried = h.library.undo(summary.run_id).await.unwrap();
    assert_eq!(retried.status, RunStatus::Undone);
    assert_eq!((retried.undone, retried.failed_to_undo), (1, 0));
    assert_eq!(h.mock.paths().await, paths(&["/in/a.jpg", "/in/b.jpg"]));

    let again = h.library.undo(summary.run_id).await.unwrap();
    assert_eq!((again.undone, again.skipped, again.failed_to_undo), (0, 0, 0));
}

#[tokio::test]
async fn test_retried_undo_removes_directories_from_earlier_pass() {
    let h = Harness::new(&[("/in/a.jpg", "a"), ("/in/b.jpg", "b")], &[], "YYYY").await;
    let before = h.mock.dirs().await;
    let summary = h.library.organize(Path::new("/in")).await.unwrap();
    // a.jpg created /out/2023; b.jpg, reverted first, is the one held up.
    h.backend.write(Path::new("/out/2023/b.jpg"), b"edited").await.unwrap();

    let undone = h.library.undo(summary.run_id).await.unwrap();
    assert_eq!(undone.status, RunStatus::UndoIncomplete);
    assert_eq!(undone.failures[0].path, Path::new("/in/b.jpg"));
    let entries = h.journal.entries_for_run(summary.run_id).await.unwrap();
    assert_eq!(entries[0].status, EntryStatus::Undone);
    assert!(!entries[0].created_dirs.is_empty());

    h.backend.write(Path::new("/out/2023/b.jpg"), b"b").await.unwrap();
    let retried = h.library.undo(summary.run_id).await.unwrap();
    assert_eq!(retried.status, RunStatus::Undone);
    assert_eq!(retried.undone, 1);
    assert_eq!(h.mock.paths().await, paths(&["/in/a.jpg", "/in/b.jpg"]));
    assert_eq!(h.mock.dirs().await, before);
}

#[tokio::test]
async fn test_runs_are_exclusive() {
    let h = Harness::new(&[("/in/a.jpg", "a")], &[], "YYYY").await;
    let _held = RunLock::acquire(&h.lock_path).unwrap();
    let err = h.library.organize(Path::new("/in")).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Locked(_)));
    assert!(err.is_retryable());
    assert_eq!(h.mock.paths().await, paths(&["/in/a.jpg"]));
}

#[tokio::test]
async fn test_run_listing() {
    let h = Harness::new(&[("/in/a.jpg", "a"), ("/in/b.jpg", "b")], &[], "YYYY").await;
    let first = h.library.organize(Path::new("/in")).await.unwrap();
    h.library.undo(first.run_id).await.unwrap();
    let second = h.library.organize(Path::new("/in")).await.unwrap();
    assert!(second.run_id > first.run_id);

    let runs = h.library.list_runs().await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].run.id, second.run_id);
    assert_eq!(runs[0].run.status, RunStatus::Completed);
    assert_eq!(runs[0].counts.applied, 2);
    assert_eq!(runs[1].run.status, RunStatus::Undone);
    assert_eq!(runs[1].counts.undone, 2);
    assert!(h.library.check_consistency().await.unwrap().is_clean());
}

/// Cancels its token as soon as the first file has been moved.
struct CancelAfterFirstMove {
    inner: BackendHandle,
    cancel: CancellationToken,
}

#[async_trait]
impl StorageBackend for CancelAfterFirstMove {
    fn name(&self) -> &str {
        self.inner.name()
    }
    fn list_stream<'a>(&'a self, root: &'a Path) -> Pin<Box<dyn Stream<Item = StorageResult<FileInfo>> + Send + 'a>> {
        self.inner.list_stream(root)
    }
    async fn exists(&self, path: &Path) -> StorageResult<bool> {
        self.inner.exists(path).await
    }
    async fn stat(&self, path: &Path) -> StorageResult<FileInfo> {
        self.inner.stat(path).await
    }
    async fn reader(&self, path: &Path) -> StorageResult<Box<dyn Read + Send + 'static>> {
        self.inner.reader(path).await
    }
    async fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        self.inner.write(path, data).await
    }
    async fn create_dir(&self, path: &Path) -> StorageResult<()> {
        self.inner.create_dir(path).await
    }
    async fn remove_dir(&self, path: &Path) -> StorageResult<()> {
        self.inner.remove_dir(path).await
    }
    async fn is_empty_dir(&self, path: &Path) -> StorageResult<bool> {
        self.inner.is_empty_dir(path).await
    }
    async fn delete(&self, path: &Path) -> StorageResult<()> {
        self.inner.delete(path).await
    }
    async fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
        self.inner.rename(from, to).await?;
        self.cancel.cancel();
        Ok(())
    }
    async fn copy(&self, from: &Path, to: &Path) -> StorageResult<u64> {
        self.inner.copy(from, to).await
    }
}

#[tokio::test]
async fn test_cancelled_run_stops_between_files() {
    let files = [("/in/a.jpg", "a"), ("/in/b.jpg", "b"), ("/in/c.jpg", "c")];
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let mut h = Harness::with_backend(mock(&files).await, &[], "YYYY", move |inner| -> BackendHandle {
        Arc::new(CancelAfterFirstMove { inner, cancel: token })
    })
    .await;
    // Plan on the harness backend, then hand the cancelling token to the run.
    let plan = h.library.scan(Path::new("/in")).await.unwrap();
    h.library = h.library.with_cancellation(cancel);
    let summary = h.library.apply(plan).await.unwrap();
    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!((summary.applied, summary.pending), (1, 2));
    assert_eq!(h.mock.paths().await, paths(&["/in/b.jpg", "/in/c.jpg", "/out/2023/a.jpg"]));

    let entries = h.journal.entries_for_run(summary.run_id).await.unwrap();
    let statuses: Vec<_> = entries.iter().map(|entry| entry.status).collect();
    assert_eq!(statuses, [EntryStatus::Applied, EntryStatus::Planned, EntryStatus::Planned]);

    h.library = h.library.with_cancellation(CancellationToken::new());
    let undone = h.library.undo(summary.run_id).await.unwrap();
    assert_eq!(undone.status, RunStatus::Undone);
    assert_eq!((undone.undone, undone.skipped), (1, 2));
    assert_eq!(h.mock.paths().await, paths(&["/in/a.jpg", "/in/b.jpg", "/in/c.jpg"]));
}
