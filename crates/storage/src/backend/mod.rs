//! Storage backend trait and implementations.
//!
//! This module defines the [`StorageBackend`] trait: the filesystem boundary
//! the organiser performs every mutation through. It exists so that the
//! planner, executor and undo engine can be exercised against an in-memory
//! backend with injected faults, and so every failure comes back as a
//! classified [`ErrorKind`] instead of a raw `io::Error`.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::{Fault, MockBackend};
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use crate::fingerprint::fingerprint;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::io::Read;
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;
pub(crate) type BoxSyncRead = Box<dyn Read + Send + 'static>;

/// Unified interface for filesystem operations.
///
/// All paths are absolute. Unlike a general purpose storage layer, no
/// operation here silently overwrites an existing file: [`rename`](Self::rename)
/// and [`copy`](Self::copy) fail with [`AlreadyExists`](ErrorKind::AlreadyExists)
/// when the destination is occupied, because a silent overwrite is exactly
/// the kind of data loss an organising run must never cause.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use darkroom_storage::{backend::StorageBackend, error::Result};
///
/// async fn size_of(backend: &dyn StorageBackend, path: &Path) -> Result<u64> {
///     if backend.exists(path).await? {
///         Ok(backend.stat(path).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the backend (used for logging only).
    fn name(&self) -> &str;

    /// List all files below `root`.
    ///
    /// Default implementation of this method is to collect all the results
    /// from [`list_stream()`](Self::list_stream) into a [`Vec`] before
    /// returning.
    async fn list(&self, root: &Path) -> Result<Vec<FileInfo>> {
        self.list_stream(root).try_collect().await
    }

    /// Recursively stream metadata for every regular file below `root`.
    ///
    /// Order is unspecified; callers that need determinism sort afterwards.
    /// Unreadable directories are yielded as errors without ending the stream.
    fn list_stream<'a>(&'a self, root: &'a Path) -> FileInfoStream<'a>;

    /// Check if a file or directory exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get file metadata without reading contents.
    ///
    /// Returns [`NotFound`](ErrorKind::NotFound) if the file does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Open a file for streaming (chunked) reads.
    ///
    /// Returns a `'static` boxed [`Read`] suitable for use inside
    /// [`spawn_blocking`](tokio::task::spawn_blocking).
    async fn reader(&self, path: &Path) -> Result<BoxSyncRead>;

    /// Write a whole file, creating parent directories as needed. Overwrites.
    ///
    /// Only used for fixtures and tooling; the organiser itself never writes
    /// file contents.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Create a single directory. Succeeds if it already exists.
    async fn create_dir(&self, path: &Path) -> Result<()>;

    /// Remove a directory, only if it is empty.
    async fn remove_dir(&self, path: &Path) -> Result<()>;

    /// Whether a directory has no entries at all.
    async fn is_empty_dir(&self, path: &Path) -> Result<bool>;

    /// Delete a file.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Rename a file. The destination's parent must exist and the destination
    /// itself must not.
    ///
    /// Fails with [`CrossDevice`](ErrorKind::CrossDevice) when `from` and
    /// `to` are on different filesystems; see [`relocate`](Self::relocate).
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Copy a file, returning the number of bytes copied. The destination's
    /// parent must exist and the destination itself must not.
    async fn copy(&self, from: &Path, to: &Path) -> Result<u64>;

    /// Move a file, transparently falling back to copy, verify, delete when a
    /// plain rename crosses filesystems.
    ///
    /// The fallback verifies the copy's fingerprint before deleting the
    /// original. If the original can't be deleted afterwards the copy is
    /// removed again so the operation fails as a whole.
    async fn relocate(&self, from: &Path, to: &Path) -> Result<()> {
        match self.rename(from, to).await {
            Err(e) if matches!(&*e, ErrorKind::CrossDevice(_)) => {
                tracing::debug!(from = %from.display(), to = %to.display(), "rename crosses devices; copying instead");
            },
            other => return other,
        }
        self.copy(from, to).await?;
        let verified = async {
            let (original, copied) = (fingerprint(self, from).await?, fingerprint(self, to).await?);
            match original == copied {
                true => Ok(()),
                false => Err(exn::Exn::from(ErrorKind::Verification(to.to_path_buf()))),
            }
        };
        if let Err(e) = verified.await {
            _ = self.delete(to).await;
            return Err(e);
        }
        if let Err(e) = self.delete(from).await {
            _ = self.delete(to).await;
            return Err(e);
        }
        Ok(())
    }
}
