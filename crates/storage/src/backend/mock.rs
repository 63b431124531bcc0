//! In-memory storage backend for testing.

use super::{BoxSyncRead, FileInfoStream};
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::file::FileInfo;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::io::{Cursor, Error as IoError, ErrorKind as IoErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// A failure the mock backend should produce on purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Reads and mutations touching this path (or anything below it) fail
    /// with [`PermissionDenied`](ErrorKind::PermissionDenied).
    Deny(PathBuf),
    /// Every rename fails with [`CrossDevice`](ErrorKind::CrossDevice).
    CrossDevice,
    /// Copies silently flip the last byte of the copied data.
    CorruptCopies,
}

#[derive(Default)]
struct Tree {
    files: HashMap<PathBuf, (OffsetDateTime, Vec<u8>)>,
    dirs: BTreeSet<PathBuf>,
}
impl Tree {
    fn insert_file(&mut self, path: PathBuf, modified: OffsetDateTime, data: Vec<u8>) {
        self.dirs.extend(path.ancestors().skip(1).map(Path::to_path_buf));
        self.files.insert(path, (modified, data));
    }

    fn occupied(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path)
    }

    fn parent_exists(&self, path: &Path) -> bool {
        path.parent().is_none_or(|parent| self.dirs.contains(parent))
    }
}

/// In-memory storage backend for testing.
///
/// Files and directories live in maps behind a [`RwLock`], so all trait
/// methods can operate on `&self` without external synchronisation. Like the
/// local backend it only accepts absolute paths, and directories have to
/// exist before anything is renamed or copied into them.
///
/// # Examples
///
/// ```
/// use darkroom_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([
///     ("/inbox/IMG_0001.jpg", b"jpeg bytes"),
/// ]);
/// assert!(backend.exists(Path::new("/inbox/IMG_0001.jpg")).await?);
/// assert!(backend.exists(Path::new("/inbox")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    tree: RwLock<Tree>,
    faults: Mutex<Vec<Fault>>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files. Parent directories are
    /// created implicitly.
    ///
    /// Panics if any path is relative. If test setup is wrong, then test
    /// should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let mut tree = Tree::default();
        let now = OffsetDateTime::now_utc();
        for (path, data) in files {
            let path = path.into();
            if !path.is_absolute() {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_files: invalid path {}", path.display());
            }
            tree.insert_file(path, now, data.into());
        }
        Self {
            name: "mock".to_string(),
            tree: RwLock::new(tree),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Inject a fault for every following call.
    pub fn with_fault(self, fault: Fault) -> Self {
        self.inject(fault);
        self
    }

    /// Inject a fault for every following call.
    pub fn inject(&self, fault: Fault) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).push(fault);
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Override the modification time of an existing file.
    ///
    /// Panics if the file does not exist.
    pub async fn set_modified(&self, path: impl AsRef<Path>, modified: OffsetDateTime) {
        let mut tree = self.tree.write().await;
        match tree.files.get_mut(path.as_ref()) {
            Some((m, _)) => *m = modified,
            None => panic!("MockBackend::set_modified: no file at {}", path.as_ref().display()),
        }
    }

    /// Snapshot of every file path currently stored, sorted.
    pub async fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.tree.read().await.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Snapshot of every directory currently stored, sorted.
    pub async fn dirs(&self) -> Vec<PathBuf> {
        self.tree.read().await.dirs.iter().cloned().collect()
    }

    /// Raw contents of a file, if it exists.
    pub async fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.tree.read().await.files.get(path.as_ref()).map(|(_, data)| data.clone())
    }

    fn has_fault(&self, fault: &Fault) -> bool {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).contains(fault)
    }

    fn check_denied(&self, path: &Path) -> Result<()> {
        let faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        for fault in faults.iter() {
            if let Fault::Deny(denied) = fault
                && path.starts_with(denied)
            {
                exn::bail!(ErrorKind::PermissionDenied(path.to_path_buf()));
            }
        }
        Ok(())
    }

    fn absolute(path: &Path) -> Result<()> {
        if !path.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
        }
        Ok(())
    }

    /// Shared preconditions for rename and copy.
    fn check_transfer(&self, tree: &Tree, from: &Path, to: &Path) -> Result<()> {
        Self::absolute(from)?;
        Self::absolute(to)?;
        self.check_denied(from)?;
        self.check_denied(to)?;
        if !tree.files.contains_key(from) {
            exn::bail!(ErrorKind::NotFound(from.to_path_buf()));
        }
        if !tree.parent_exists(to) {
            exn::bail!(ErrorKind::NotFound(to.to_path_buf()));
        }
        if tree.occupied(to) {
            exn::bail!(ErrorKind::AlreadyExists(to.to_path_buf()));
        }
        Ok(())
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, root: &'a Path) -> FileInfoStream<'a> {
        if let Err(e) = Self::absolute(root) {
            return Box::pin(futures::stream::once(async { Err(e) }));
        }
        Box::pin(stream! {
            // Snapshot matching entries under the read lock, then drop it
            // before yielding to avoid holding the lock across yield points.
            let entries: Vec<FileInfo> = {
                let guard = self.tree.read().await;
                guard
                    .files
                    .iter()
                    .filter(|(path, _)| path.starts_with(root) && path.as_path() != root)
                    .map(|(path, (modified, data))| FileInfo::new(path.clone(), data.len() as u64, *modified))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        Self::absolute(path)?;
        Ok(self.tree.read().await.occupied(path))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        Self::absolute(path)?;
        let guard = self.tree.read().await;
        let (modified, data) =
            guard.files.get(path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.to_path_buf())))?;
        Ok(FileInfo::new(path, data.len() as u64, *modified))
    }

    async fn reader(&self, path: &Path) -> Result<BoxSyncRead> {
        Self::absolute(path)?;
        self.check_denied(path)?;
        let guard = self.tree.read().await;
        let (_, data) = guard.files.get(path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.to_path_buf())))?;
        Ok(Box::new(Cursor::new(data.clone())))
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        Self::absolute(path)?;
        self.check_denied(path)?;
        self.tree.write().await.insert_file(path.to_path_buf(), OffsetDateTime::now_utc(), data.to_vec());
        Ok(())
    }

    async fn create_dir(&self, path: &Path) -> Result<()> {
        Self::absolute(path)?;
        self.check_denied(path)?;
        let mut tree = self.tree.write().await;
        if tree.files.contains_key(path) {
            exn::bail!(ErrorKind::AlreadyExists(path.to_path_buf()));
        }
        if !tree.parent_exists(path) {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        tree.dirs.insert(path.to_path_buf());
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<()> {
        Self::absolute(path)?;
        self.check_denied(path)?;
        let mut tree = self.tree.write().await;
        if !tree.dirs.contains(path) {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let has_children = tree.files.keys().chain(tree.dirs.iter()).any(|p| p.parent() == Some(path));
        if has_children {
            exn::bail!(ErrorKind::Io(IoError::from(IoErrorKind::DirectoryNotEmpty)));
        }
        tree.dirs.remove(path);
        Ok(())
    }

    async fn is_empty_dir(&self, path: &Path) -> Result<bool> {
        Self::absolute(path)?;
        let tree = self.tree.read().await;
        if !tree.dirs.contains(path) {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        Ok(!tree.files.keys().chain(tree.dirs.iter()).any(|p| p.parent() == Some(path)))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        Self::absolute(path)?;
        self.check_denied(path)?;
        self.tree
            .write()
            .await
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.to_path_buf())))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut tree = self.tree.write().await;
        self.check_transfer(&tree, from, to)?;
        if self.has_fault(&Fault::CrossDevice) {
            exn::bail!(ErrorKind::CrossDevice(to.to_path_buf()));
        }
        if let Some(entry) = tree.files.remove(from) {
            tree.files.insert(to.to_path_buf(), entry);
        }
        Ok(())
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<u64> {
        let mut tree = self.tree.write().await;
        self.check_transfer(&tree, from, to)?;
        let Some((modified, mut data)) = tree.files.get(from).cloned() else {
            exn::bail!(ErrorKind::NotFound(from.to_path_buf()));
        };
        if self.has_fault(&Fault::CorruptCopies)
            && let Some(last) = data.last_mut()
        {
            *last ^= 0xFF;
        }
        let size = data.len() as u64;
        tree.files.insert(to.to_path_buf(), (modified, data));
        Ok(size)
    }
}
