use crate::Context;
use crate::scheme::DateSource;
use darkroom_meta::{Metadata, MetadataExtractor};
use darkroom_storage::{BackendHandle, FileInfo, Fingerprint, fingerprint};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::instrument;

/// Everything the classifier needs to know about one candidate file.
#[derive(Debug)]
pub(crate) struct Inspection {
    pub source: PathBuf,
    pub outcome: Result<Inspected, String>,
}

#[derive(Debug)]
pub(crate) struct Inspected {
    pub fingerprint: Fingerprint,
    /// Absolute destination, before any disambiguation.
    pub destination: PathBuf,
    pub date_source: DateSource,
}

/// Fingerprint, extract metadata from, and resolve the destination of one
/// file.
///
/// Never fails as a whole: a file that can't be read ends up with an `Err`
/// outcome carrying the reason, and is planned as unreadable. Missing or
/// broken metadata only means falling back to the modification time.
#[instrument(level = "debug", skip_all, fields(path = %file.path.display()))]
pub(crate) async fn inspect(
    backend: &BackendHandle,
    extractor: &Arc<dyn MetadataExtractor>,
    ctx: &Context,
    file: FileInfo,
) -> Inspection {
    let outcome = inspect_inner(backend, extractor, ctx, &file).await;
    if let Err(reason) = &outcome {
        tracing::warn!(path = %file.path.display(), %reason, "file will be skipped");
    }
    Inspection { source: file.path, outcome }
}

async fn inspect_inner(
    backend: &BackendHandle,
    extractor: &Arc<dyn MetadataExtractor>,
    ctx: &Context,
    file: &FileInfo,
) -> Result<Inspected, String> {
    let fingerprint = fingerprint(backend.as_ref(), &file.path).await.map_err(|e| (*e).to_string())?;
    let metadata = read_metadata(extractor, file).await;
    let resolved = ctx
        .scheme
        .resolve(&file.path, metadata.as_ref(), Some(file.modified))
        .map_err(|e| format!("no destination could be derived: {}", *e))?;
    Ok(Inspected {
        fingerprint,
        destination: ctx.destination_root.join(resolved.path),
        date_source: resolved.date_source,
    })
}

/// Metadata extraction is synchronous file I/O, so it runs on the blocking
/// pool. Any failure just means "no metadata".
async fn read_metadata(extractor: &Arc<dyn MetadataExtractor>, file: &FileInfo) -> Option<Metadata> {
    let extractor = Arc::clone(extractor);
    let path = file.path.clone();
    match tokio::task::spawn_blocking(move || extractor.extract(&path)).await {
        Ok(Ok(metadata)) => Some(metadata),
        Ok(Err(e)) => {
            tracing::debug!(path = %file.path.display(), reason = %(*e), "no usable metadata");
            None
        },
        Err(e) => {
            tracing::warn!(path = %file.path.display(), error = %e, "metadata extraction panicked");
            None
        },
    }
}
