//! Local filesystem storage backend.
//!
//! Operates directly on absolute paths using `tokio::fs` for async I/O.

use crate::backend::{BoxSyncRead, FileInfoStream};
use crate::error::{ErrorKind, Result};
use crate::{FileInfo, StorageBackend};
use async_stream::stream;
use async_trait::async_trait;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tokio::fs::{self, DirEntry};

enum WalkEntry {
    File(FileInfo),
    Descend(PathBuf),
    Skip,
}

/// Local filesystem storage backend.
///
/// # Examples
///
/// ```no_run
/// use darkroom_storage::backend::{LocalBackend, StorageBackend};
/// use std::path::Path;
///
/// # async fn example() -> darkroom_storage::error::Result<()> {
/// let backend = LocalBackend::new("local");
/// let photos = backend.list(Path::new("/home/me/Pictures/inbox")).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
}
impl LocalBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn require_absolute(path: &Path) -> Result<()> {
        if !path.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
        }
        Ok(())
    }

    /// Re-use same data collection from file metadata for both list and stat functions
    fn metadata(path: &Path, metadata: Metadata) -> Result<FileInfo> {
        let modified = metadata.modified().map_err(|e| ErrorKind::from_io(e, path))?.into();
        Ok(FileInfo::new(PathBuf::from(path), metadata.len(), modified))
    }

    async fn process_entry(&self, entry: DirEntry) -> Result<WalkEntry> {
        let path = entry.path();
        // Deliberately not following symlinks: a link pointing back up the
        // tree would otherwise walk forever, and moving a link target is
        // surprising.
        let metadata = fs::symlink_metadata(&path).await.map_err(|e| ErrorKind::from_io(e, &path))?;
        if metadata.is_dir() {
            return Ok(WalkEntry::Descend(path));
        }
        if metadata.is_file() {
            return Ok(WalkEntry::File(Self::metadata(&path, metadata)?));
        }
        Ok(WalkEntry::Skip)
    }

    fn rename_error(e: std::io::Error, from: &Path, to: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound if !from.exists() => ErrorKind::NotFound(from.to_path_buf()),
            _ => ErrorKind::from_io(e, to),
        }
    }

    /// `rename(2)` happily replaces an existing file, so refuse up front.
    async fn ensure_vacant(path: &Path) -> Result<()> {
        match fs::symlink_metadata(path).await {
            Ok(_) => exn::bail!(ErrorKind::AlreadyExists(path.to_path_buf())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ErrorKind::from_io(e, path).into()),
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, root: &'a Path) -> FileInfoStream<'a> {
        if let Err(e) = Self::require_absolute(root) {
            return Box::pin(futures::stream::once(async { Result::Err(e) }));
        }
        let mut stack = vec![root.to_path_buf()];

        Box::pin(stream! {
            'dirs: while let Some(current) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // Walking a directory that doesn't exist results in an
                    // empty list not an error.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(err) => {
                        yield Err(exn::Exn::from(ErrorKind::from_io(err, &current)));
                        continue 'dirs;
                    }
                };

                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(e) => { yield Err(exn::Exn::from(ErrorKind::from_io(e, &current))); continue 'entries; },
                    };
                    match self.process_entry(entry).await {
                        Ok(WalkEntry::File(f)) => yield Ok(f),
                        Ok(WalkEntry::Descend(d)) => stack.push(d),
                        Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    };
                }
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Self::require_absolute(path)?;
        Ok(fs::try_exists(path).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        Self::require_absolute(path)?;
        let metadata = fs::metadata(path).await.map_err(|e| ErrorKind::from_io(e, path))?;
        Self::metadata(path, metadata)
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        Self::require_absolute(path)?;
        let file = fs::File::open(path).await.map_err(|e| ErrorKind::from_io(e, path))?;
        Ok(Box::new(std::io::BufReader::new(file.into_std().await)))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        Self::require_absolute(path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| ErrorKind::from_io(e, parent))?;
        }
        Ok(fs::write(path, data).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    async fn create_dir(&self, path: &Path) -> Result<()> {
        Self::require_absolute(path)?;
        match fs::create_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
            Err(e) => Err(ErrorKind::from_io(e, path).into()),
        }
    }

    async fn remove_dir(&self, path: &Path) -> Result<()> {
        Self::require_absolute(path)?;
        Ok(fs::remove_dir(path).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    async fn is_empty_dir(&self, path: &Path) -> Result<bool> {
        Self::require_absolute(path)?;
        let mut entries = fs::read_dir(path).await.map_err(|e| ErrorKind::from_io(e, path))?;
        Ok(entries.next_entry().await.map_err(|e| ErrorKind::from_io(e, path))?.is_none())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        Self::require_absolute(path)?;
        Ok(fs::remove_file(path).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        Self::require_absolute(from)?;
        Self::require_absolute(to)?;
        // Linking fails if `to` exists, atomically, so a file that turns up
        // there between checking and moving is never overwritten.
        match fs::hard_link(from, to).await {
            Ok(()) => {
                if let Err(e) = fs::remove_file(from).await {
                    _ = fs::remove_file(to).await;
                    exn::bail!(ErrorKind::from_io(e, from));
                }
                Ok(())
            },
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::AlreadyExists
                        | std::io::ErrorKind::NotFound
                        | std::io::ErrorKind::CrossesDevices
                ) =>
            {
                Err(Self::rename_error(e, from, to).into())
            },
            // No hard links on this filesystem (FAT, some network mounts).
            Err(_) => {
                Self::ensure_vacant(to).await?;
                Ok(fs::rename(from, to).await.map_err(|e| Self::rename_error(e, from, to))?)
            },
        }
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<u64> {
        Self::require_absolute(from)?;
        Self::require_absolute(to)?;
        // `create_new` closes the window between checking and writing that
        // `fs::copy` would leave open.
        let mut source = fs::File::open(from).await.map_err(|e| ErrorKind::from_io(e, from))?;
        let mut target = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(to)
            .await
            .map_err(|e| ErrorKind::from_io(e, to))?;
        let copied = match tokio::io::copy(&mut source, &mut target).await {
            Ok(n) => n,
            Err(e) => {
                drop(target);
                // Don't leave a truncated copy behind (e.g. on a full disk).
                _ = fs::remove_file(to).await;
                exn::bail!(ErrorKind::from_io(e, to));
            },
        };
        if let Err(e) = target.sync_all().await {
            drop(target);
            _ = fs::remove_file(to).await;
            exn::bail!(ErrorKind::from_io(e, to));
        }
        // Carry over the modification time, which the resolver may depend on
        // when the file is moved back.
        if let Ok(modified) = source.metadata().await.and_then(|m| m.modified()) {
            _ = target.into_std().await.set_modified(modified);
        }
        Ok(copied)
    }
}
