//! Directory bookkeeping shared by the executor and the undo engine.

use darkroom_storage::BackendHandle;
use darkroom_storage::error::Result as StorageResult;
use std::path::{Path, PathBuf};

/// Create every missing ancestor of `path`, outermost first, and return the
/// ones that were actually created (in creation order).
///
/// On failure, directories created by this call are removed again.
pub(crate) async fn create_parents(backend: &BackendHandle, path: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut missing = Vec::new();
    for ancestor in path.ancestors().skip(1) {
        if ancestor.as_os_str().is_empty() || backend.exists(ancestor).await? {
            break;
        }
        missing.push(ancestor.to_path_buf());
    }
    missing.reverse();
    let mut created = Vec::with_capacity(missing.len());
    for dir in missing {
        if let Err(e) = backend.create_dir(&dir).await {
            remove_if_empty(backend, &created).await;
            return Err(e);
        }
        created.push(dir);
    }
    Ok(created)
}

/// Remove `dirs` deepest first, skipping any that aren't empty (or are gone
/// already). Returns how many were removed.
pub(crate) async fn remove_if_empty(backend: &BackendHandle, dirs: &[PathBuf]) -> usize {
    let mut ordered: Vec<&PathBuf> = dirs.iter().collect();
    ordered.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    let mut removed = 0;
    for dir in ordered {
        match backend.is_empty_dir(dir).await {
            Ok(true) => match backend.remove_dir(dir).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(path = %dir.display(), error = %(*e), "unable to remove directory"),
            },
            Ok(false) => tracing::debug!(path = %dir.display(), "directory not empty; leaving it"),
            Err(e) => tracing::debug!(path = %dir.display(), error = %(*e), "directory already gone"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use darkroom_storage::backend::{Fault, MockBackend};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_creates_only_missing_ancestors() {
        let backend: BackendHandle = Arc::new(MockBackend::with_files([("/out/keep.jpg", "k")]));
        let created = create_parents(&backend, Path::new("/out/2024/03/a.jpg")).await.unwrap();
        assert_eq!(created, [PathBuf::from("/out/2024"), PathBuf::from("/out/2024/03")]);
        assert!(create_parents(&backend, Path::new("/out/2024/03/b.jpg")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_creation_is_rolled_back() {
        let mock = MockBackend::with_files([("/out/keep.jpg", "k")]).with_fault(Fault::Deny("/out/2024/03".into()));
        let mock = Arc::new(mock);
        let backend: BackendHandle = mock.clone();
        assert!(create_parents(&backend, Path::new("/out/2024/03/a.jpg")).await.is_err());
        assert!(!mock.dirs().await.contains(&PathBuf::from("/out/2024")));
    }

    #[tokio::test]
    async fn test_removes_deepest_first_and_keeps_non_empty() {
        let mock = Arc::new(MockBackend::with_files([("/out/2023/b.jpg", "b")]));
        let backend: BackendHandle = mock.clone();
        let created = create_parents(&backend, Path::new("/out/2024/03/a.jpg")).await.unwrap();
        let mut dirs = created.clone();
        dirs.push(PathBuf::from("/out/2023"));
        assert_eq!(remove_if_empty(&backend, &dirs).await, 2);
        assert!(mock.dirs().await.contains(&PathBuf::from("/out/2023")));
        assert!(!mock.dirs().await.contains(&PathBuf::from("/out/2024")));
    }
}
