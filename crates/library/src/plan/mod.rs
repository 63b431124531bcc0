//! Organise planning.
//!
//! Turns a source tree into an ordered list of [`PlannedOperation`]s without
//! touching the filesystem. Planning happens in two passes:
//!
//! 1. **Inspection** (parallel): every candidate file is fingerprinted, its
//!    metadata extracted and its destination resolved through the
//!    [`Scheme`](crate::Scheme). Up to [`Context::concurrency`] files are in
//!    flight at once.
//! 2. **Classification** (sequential, in source path order): each file's
//!    destination is checked against the disk *and* against every
//!    destination claimed earlier in the same plan, deciding between a move
//!    (or copy), a duplicate skip, or a disambiguated destination.
//!
//! Because inspection results are re-sorted before classification, the same
//! tree always produces the same plan regardless of which file finished
//! hashing first.

mod inspect;

use self::inspect::{Inspected, Inspection, inspect};
use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::scheme::DateSource;
use darkroom_journal::{NewEntry, OperationKind};
use darkroom_meta::{Format, MetadataExtractor};
use darkroom_storage::{BackendHandle, FileInfo, Fingerprint, fingerprint, is_hidden_below, is_strictly_within};
use exn::ResultExt;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::instrument;

/// How many `_n` suffixes are tried before a file is given up on.
pub const MAX_DISAMBIGUATION_ATTEMPTS: u32 = 10_000;

/// One file's fate, as decided by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOperation {
    pub source: PathBuf,
    /// Absent only when the file couldn't be read at all.
    pub destination: Option<PathBuf>,
    pub kind: OperationKind,
    /// Absent only when the file couldn't be read at all.
    pub fingerprint: Option<Fingerprint>,
    /// Why a file is skipped, for the journal and the summary.
    pub reason: Option<String>,
}
impl From<PlannedOperation> for NewEntry {
    fn from(op: PlannedOperation) -> Self {
        NewEntry {
            source: op.source,
            destination: op.destination,
            kind: op.kind,
            fingerprint: op.fingerprint,
            reason: op.reason,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Every regular file found below the source root.
    pub discovered: u64,
    /// Hidden files and files that aren't photos.
    pub ignored: u64,
    pub moves: u64,
    pub copies: u64,
    pub duplicates: u64,
    pub unreadable: u64,
    /// Photos that ended up in the `unknown` bucket.
    pub undated: u64,
}

/// An ordered, not yet applied, set of operations. Also what
/// [`Library::scan`](crate::Library::scan) returns as a preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub scheme: String,
    /// Sorted by source path.
    pub operations: Vec<PlannedOperation>,
    pub stats: PlanStats,
}
impl Plan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Build a [`Plan`] for every photo below `source_root`.
///
/// Per-file problems never fail the plan; they become
/// [`SkipUnreadable`](OperationKind::SkipUnreadable) operations.
///
/// # Errors
/// - [`SourceNotFound`](ErrorKind::SourceNotFound) if `source_root` doesn't exist.
/// - [`InvalidDestination`](ErrorKind::InvalidDestination) if the library root
///   isn't valid UTF-8.
/// - [`Cancelled`](ErrorKind::Cancelled) if the context's token fires.
/// - [`Storage`](ErrorKind::Storage) if the backend fails outside a single file.
#[instrument(skip_all, fields(source = %source_root.display(), destination = %ctx.destination_root.display()))]
pub async fn plan(
    backend: &BackendHandle,
    extractor: &Arc<dyn MetadataExtractor>,
    ctx: &Context,
    source_root: &Path,
) -> Result<Plan> {
    // Directories created below the library root are journaled as text.
    if ctx.destination_root.to_str().is_none() {
        exn::bail!(ErrorKind::InvalidDestination(ctx.destination_root.clone()));
    }
    if !backend.exists(source_root).await.or_raise(|| ErrorKind::Storage)? {
        exn::bail!(ErrorKind::SourceNotFound(source_root.to_path_buf()));
    }
    let mut stats = PlanStats::default();
    let candidates = discover(backend, ctx, source_root, &mut stats).await?;
    tracing::info!(candidates = candidates.len(), ignored = stats.ignored, "discovery complete");

    let mut inspections = Vec::with_capacity(candidates.len());
    let mut pending = candidates.into_iter().map(|file| inspect(backend, extractor, ctx, file));
    let mut processing = FuturesUnordered::new();
    processing.extend(pending.by_ref().take(ctx.concurrency));
    while let Some(inspection) = processing.next().await {
        if ctx.cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        inspections.push(inspection);
        // Pop-n-push.
        if let Some(next) = pending.next() {
            processing.push(next);
        }
    }
    inspections.sort_by(|a, b| a.source.cmp(&b.source));

    let mut classifier = Classifier::new(backend, ctx);
    let mut operations = Vec::with_capacity(inspections.len());
    for inspection in inspections {
        if ctx.cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let operation = classifier.classify(inspection).await;
        stats.record(&operation);
        operations.push(operation);
    }
    stats.undated = classifier.undated;

    tracing::info!(
        moves = stats.moves,
        copies = stats.copies,
        duplicates = stats.duplicates,
        unreadable = stats.unreadable,
        "plan ready"
    );
    Ok(Plan {
        source_root: source_root.to_path_buf(),
        destination_root: ctx.destination_root.clone(),
        scheme: ctx.scheme.as_str().to_string(),
        operations,
        stats,
    })
}

/// Walk the source tree and keep the files worth inspecting, sorted.
async fn discover(
    backend: &BackendHandle,
    ctx: &Context,
    source_root: &Path,
    stats: &mut PlanStats,
) -> Result<Vec<FileInfo>> {
    // Organising into a folder inside the source must not pick up files that
    // were organised by an earlier run.
    let skip_destination = is_strictly_within(&ctx.destination_root, source_root);
    let mut candidates = Vec::new();
    let mut files = backend.list_stream(source_root);
    while let Some(file) = files.next().await {
        if ctx.cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let file = match file {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(error = %(*e), "skipping unreadable part of the source tree");
                continue;
            },
        };
        if skip_destination && file.path.starts_with(&ctx.destination_root) {
            continue;
        }
        stats.discovered += 1;
        let hidden = !ctx.include_hidden && is_hidden_below(&file.path, source_root);
        if hidden || Format::from_path(&file.path).is_none() {
            tracing::trace!(path = %file.path.display(), hidden, "ignored");
            stats.ignored += 1;
            continue;
        }
        candidates.push(file);
    }
    candidates.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(candidates)
}

impl PlanStats {
    fn record(&mut self, op: &PlannedOperation) {
        match op.kind {
            OperationKind::Move => self.moves += 1,
            OperationKind::Copy => self.copies += 1,
            OperationKind::SkipDuplicate => self.duplicates += 1,
            OperationKind::SkipUnreadable => self.unreadable += 1,
        }
    }
}

/// What is at a candidate destination, compared with the file being placed.
enum Slot {
    Free,
    Identical,
    Different,
}

/// Assigns destinations in source path order, remembering every destination
/// already claimed by this plan.
struct Classifier<'a> {
    backend: &'a BackendHandle,
    ctx: &'a Context,
    claimed: HashMap<PathBuf, Fingerprint>,
    /// Fingerprints of files already on disk at some candidate destination.
    /// `None` when the occupant couldn't be read.
    occupants: HashMap<PathBuf, Option<Fingerprint>>,
    undated: u64,
}

impl<'a> Classifier<'a> {
    fn new(backend: &'a BackendHandle, ctx: &'a Context) -> Self {
        Self { backend, ctx, claimed: HashMap::new(), occupants: HashMap::new(), undated: 0 }
    }

    async fn classify(&mut self, inspection: Inspection) -> PlannedOperation {
        let Inspection { source, outcome } = inspection;
        let Inspected { fingerprint, destination, date_source } = match outcome {
            Ok(inspected) => inspected,
            Err(reason) => return unreadable(source, None, None, reason),
        };
        if date_source == DateSource::Unknown {
            self.undated += 1;
        }
        for attempt in 0..=MAX_DISAMBIGUATION_ATTEMPTS {
            let candidate = match attempt {
                0 => destination.clone(),
                n => match disambiguate(&destination, n) {
                    Some(candidate) => candidate,
                    None => break,
                },
            };
            match self.slot(&source, &candidate, &fingerprint).await {
                Slot::Free => {
                    self.claimed.insert(candidate.clone(), fingerprint.clone());
                    let kind = match self.ctx.keep_originals {
                        true => OperationKind::Copy,
                        false => OperationKind::Move,
                    };
                    return PlannedOperation {
                        source,
                        destination: Some(candidate),
                        kind,
                        fingerprint: Some(fingerprint),
                        reason: None,
                    };
                },
                Slot::Identical => {
                    let reason = match candidate == source {
                        true => "already organised",
                        false => "identical file already at destination",
                    };
                    return PlannedOperation {
                        source,
                        destination: Some(candidate),
                        kind: OperationKind::SkipDuplicate,
                        fingerprint: Some(fingerprint),
                        reason: Some(reason.to_string()),
                    };
                },
                Slot::Different => tracing::debug!(path = %candidate.display(), "destination taken"),
            }
        }
        let reason = format!("no free destination near {}", destination.display());
        unreadable(source, Some(destination), Some(fingerprint), reason)
    }

    async fn slot(&mut self, source: &Path, candidate: &Path, fingerprint: &Fingerprint) -> Slot {
        if candidate == source {
            return Slot::Identical;
        }
        if let Some(claimed) = self.claimed.get(candidate) {
            return match claimed == fingerprint {
                true => Slot::Identical,
                false => Slot::Different,
            };
        }
        let occupant = match self.occupants.entry(candidate.to_path_buf()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => match self.backend.exists(candidate).await {
                Ok(false) => return Slot::Free,
                Ok(true) => entry.insert(fingerprint_occupant(self.backend, candidate).await).clone(),
                Err(e) => {
                    tracing::warn!(path = %candidate.display(), error = %(*e), "unable to check destination");
                    entry.insert(None).clone()
                },
            },
        };
        match occupant {
            Some(occupant) if &occupant == fingerprint => Slot::Identical,
            _ => Slot::Different,
        }
    }
}

/// Unreadable occupants (or directories sitting where a file would go) count
/// as different content.
async fn fingerprint_occupant(backend: &BackendHandle, path: &Path) -> Option<Fingerprint> {
    fingerprint(backend.as_ref(), path).await.ok()
}

fn unreadable(
    source: PathBuf,
    destination: Option<PathBuf>,
    fingerprint: Option<Fingerprint>,
    reason: String,
) -> PlannedOperation {
    PlannedOperation { source, destination, kind: OperationKind::SkipUnreadable, fingerprint, reason: Some(reason) }
}

/// `2024/03/img.jpg` becomes `2024/03/img_{n}.jpg`.
pub(crate) fn disambiguate(path: &Path, n: u32) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_string_lossy();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    Some(path.with_file_name(name))
}
