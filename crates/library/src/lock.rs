//! Run-level exclusivity.
//!
//! Only one run (organise or undo) may touch the filesystem at a time. The
//! lock is an advisory `flock` on a file next to the journal, so it is
//! released by the OS if the process dies. The holder writes its run id into
//! the file so others can tell which run is live.

use darkroom_journal::RunId;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Held for as long as a run is applying or undoing entries. Dropping it
/// releases the lock.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
}

impl RunLock {
    /// Take the lock without waiting.
    ///
    /// Returns [`Locked`](ErrorKind::Locked) if another run holds it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|_| ErrorKind::Lock(path.to_path_buf()))?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|_| ErrorKind::Lock(path.to_path_buf()))?;
        // Fully qualified: std grew inherent `File` locking methods that
        // shadow some of the `FileExt` ones.
        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
                || e.kind() == std::io::ErrorKind::WouldBlock
            {
                exn::bail!(ErrorKind::Locked(path.to_path_buf()));
            }
            exn::bail!(ErrorKind::Lock(path.to_path_buf()));
        }
        // Whatever a previous holder recorded is stale now.
        file.set_len(0).map_err(|_| ErrorKind::Lock(path.to_path_buf()))?;
        tracing::debug!(path = %path.display(), "run lock acquired");
        Ok(Self { path: path.to_path_buf(), file })
    }

    /// Record which run holds the lock.
    pub fn record(&self, run_id: RunId) -> Result<()> {
        let write = |mut file: &File| -> std::io::Result<()> {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            write!(file, "{run_id}")?;
            file.flush()
        };
        write(&self.file).map_err(|_| ErrorKind::Lock(self.path.clone()))?;
        Ok(())
    }

    /// The run recorded by whoever holds the lock at `path`, if it could be
    /// read.
    pub fn holder(path: impl AsRef<Path>) -> Option<RunId> {
        std::fs::read_to_string(path).ok()?.parse().ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lock file used alongside a journal database: `journal.sqlite3` gets
/// `journal.sqlite3.lock`.
pub fn lock_path_for(journal: impl AsRef<Path>) -> PathBuf {
    let mut path = journal.as_ref().as_os_str().to_owned();
    path.push(".lock");
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_locked() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("journal.sqlite3.lock");
        let first = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Locked(_)));
        assert!(err.is_retryable());
        drop(first);
        RunLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_holder_is_recorded_and_cleared() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("journal.sqlite3.lock");
        let lock = RunLock::acquire(&path).unwrap();
        assert_eq!(RunLock::holder(&path), None);
        lock.record(RunId::from(12)).unwrap();
        assert_eq!(RunLock::holder(&path), Some(RunId::from(12)));
        drop(lock);
        let _next = RunLock::acquire(&path).unwrap();
        assert_eq!(RunLock::holder(&path), None);
    }

    #[test]
    fn test_lock_path_for_journal() {
        assert_eq!(lock_path_for("/data/journal.sqlite3"), PathBuf::from("/data/journal.sqlite3.lock"));
    }
}
