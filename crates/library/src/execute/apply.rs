use crate::dirs::{create_parents, remove_if_empty};
use crate::error::{EntryErrorKind, EntryResult};
use darkroom_journal::{JournalEntry, OperationKind};
use darkroom_storage::error::ErrorKind as StorageErrorKind;
use darkroom_storage::{BackendHandle, Fingerprint, fingerprint};
use std::path::{Path, PathBuf};

/// Perform one journal entry against the filesystem, returning the
/// directories that had to be created for it.
///
/// Either the whole entry takes effect or none of it does: directories
/// created along the way are removed again if the transfer fails.
pub(crate) async fn apply_entry(backend: &BackendHandle, entry: &JournalEntry) -> EntryResult<Vec<PathBuf>> {
    let (destination, expected) = match entry.kind {
        OperationKind::SkipDuplicate | OperationKind::SkipUnreadable => return Ok(Vec::new()),
        OperationKind::Move | OperationKind::Copy => match (&entry.destination, &entry.fingerprint) {
            (Some(destination), Some(expected)) => (destination, expected),
            _ => exn::bail!(EntryErrorKind::Incomplete),
        },
    };
    verify_source(backend, &entry.source, expected).await?;
    if backend.exists(destination).await.map_err(EntryErrorKind::storage)? {
        exn::bail!(EntryErrorKind::DestinationOccupied(destination.clone()));
    }
    let created = create_parents(backend, destination).await.map_err(EntryErrorKind::storage)?;
    let transferred = match entry.kind {
        OperationKind::Move => {
            backend.relocate(&entry.source, destination).await.map_err(|e| exn::Exn::from(transfer_error(e)))
        },
        _ => copy_verified(backend, &entry.source, destination, expected).await,
    };
    if let Err(e) = transferred {
        remove_if_empty(backend, &created).await;
        return Err(e);
    }
    Ok(created)
}

/// The source must still be the file that was planned: same size, same
/// content.
async fn verify_source(backend: &BackendHandle, source: &Path, expected: &Fingerprint) -> EntryResult<()> {
    let stat = match backend.stat(source).await {
        Ok(stat) => stat,
        Err(e) if matches!(&*e, StorageErrorKind::NotFound(_)) => {
            exn::bail!(EntryErrorKind::SourceMissing(source.to_path_buf()))
        },
        Err(e) => exn::bail!(EntryErrorKind::storage(e)),
    };
    if stat.size != expected.size {
        exn::bail!(EntryErrorKind::SourceChanged(source.to_path_buf()));
    }
    let actual = fingerprint(backend.as_ref(), source).await.map_err(EntryErrorKind::storage)?;
    if &actual != expected {
        exn::bail!(EntryErrorKind::SourceChanged(source.to_path_buf()));
    }
    Ok(())
}

async fn copy_verified(backend: &BackendHandle, from: &Path, to: &Path, expected: &Fingerprint) -> EntryResult<()> {
    backend.copy(from, to).await.map_err(transfer_error)?;
    let copied = match fingerprint(backend.as_ref(), to).await {
        Ok(copied) => copied,
        Err(e) => {
            _ = backend.delete(to).await;
            exn::bail!(EntryErrorKind::storage(e));
        },
    };
    if &copied != expected {
        _ = backend.delete(to).await;
        exn::bail!(EntryErrorKind::CopyMismatch(to.to_path_buf()));
    }
    Ok(())
}

fn transfer_error(e: darkroom_storage::error::Error) -> EntryErrorKind {
    let specific = match &*e {
        StorageErrorKind::AlreadyExists(path) => Some(EntryErrorKind::DestinationOccupied(path.clone())),
        StorageErrorKind::Verification(path) => Some(EntryErrorKind::CopyMismatch(path.clone())),
        _ => None,
    };
    specific.unwrap_or_else(|| EntryErrorKind::storage(e))
}
