//! Reversible photo organising.
//!
//! The pipeline is **scan → plan → apply → (undo)**:
//!
//! - [`plan`](plan::plan) walks a source tree and decides, without touching
//!   anything, where every photo should go according to a [`Scheme`].
//! - [`execute`](execute::execute) journals the plan and applies it one file
//!   at a time.
//! - [`undo`](undo::undo) walks the journal backwards and puts everything
//!   back where it was.
//!
//! Front-ends should only need [`Library`], which wires those together with a
//! storage backend, a metadata extractor and a journal.

mod consistency;
mod dirs;
pub mod error;
pub mod execute;
mod lock;
pub mod plan;
mod scheme;
pub mod undo;

pub use crate::consistency::{ConsistencyReport, check_consistency};
pub use crate::execute::{RunContext, RunSummary};
pub use crate::lock::{RunLock, lock_path_for};
pub use crate::plan::{Plan, PlanStats, PlannedOperation};
pub use crate::scheme::{DateSource, Resolved, Scheme, sanitize};
pub use crate::undo::UndoSummary;
pub use darkroom_journal::{EntryStatus, OperationKind, RunId, RunOverview, RunStatus};

use crate::error::{ErrorKind, Result};
use darkroom_config::Config;
use darkroom_journal::{Database, Repository};
use darkroom_meta::{ExifExtractor, MetadataExtractor};
use darkroom_storage::BackendHandle;
use darkroom_storage::backend::LocalBackend;
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// A file that couldn't be organised (or restored), and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub path: PathBuf,
    pub reason: String,
}

/// Everything an operation needs to know that isn't the filesystem or the
/// journal. Passed explicitly; there is no global state.
#[derive(Debug, Clone)]
pub struct Context {
    pub destination_root: PathBuf,
    pub scheme: Arc<Scheme>,
    /// Copy instead of move.
    pub keep_originals: bool,
    pub include_hidden: bool,
    /// Files inspected at once while planning. Always at least 1.
    pub concurrency: usize,
    pub lock_path: PathBuf,
    pub cancel: CancellationToken,
}

impl Context {
    pub fn new(destination_root: impl Into<PathBuf>, scheme: Scheme) -> Self {
        Self {
            destination_root: destination_root.into(),
            scheme: Arc::new(scheme),
            keep_originals: false,
            include_hidden: false,
            concurrency: darkroom_config::DEFAULT_CONCURRENCY,
            lock_path: PathBuf::from("darkroom.lock"),
            cancel: CancellationToken::new(),
        }
    }

    pub fn keep_originals(mut self, keep: bool) -> Self {
        self.keep_originals = keep;
        self
    }

    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = path.into();
        self
    }

    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Entry point for front-ends.
///
/// # Examples
///
/// ```no_run
/// use darkroom_config::Config;
/// use darkroom_library::Library;
/// use std::path::Path;
///
/// # async fn run() -> darkroom_library::error::Result<()> {
/// let config = Config::default();
/// let library = Library::open(&config).await?;
/// let preview = library.scan(Path::new("/home/me/Inbox")).await?;
/// println!("{} files to organise", preview.stats.moves);
/// let summary = library.organize(Path::new("/home/me/Inbox")).await?;
/// library.undo(summary.run_id).await?;
/// # Ok(())
/// # }
/// ```
pub struct Library {
    backend: BackendHandle,
    extractor: Arc<dyn MetadataExtractor>,
    journal: Repository,
    destination: Option<PathBuf>,
    scheme: Arc<Scheme>,
    keep_originals: bool,
    include_hidden: bool,
    concurrency: usize,
    lock_path: PathBuf,
    cancel: CancellationToken,
}

impl Library {
    /// Open the library described by `config`: the local filesystem, EXIF
    /// metadata and the journal database at `journal.path`.
    ///
    /// # Errors
    /// [`Scheme`](ErrorKind::Scheme) if the naming scheme doesn't compile,
    /// [`Journal`](ErrorKind::Journal) if the journal can't be opened.
    #[instrument(skip_all, fields(journal = %config.journal.path.display()))]
    pub async fn open(config: &Config) -> Result<Self> {
        let database = Database::connect(&config.journal.path).await.or_raise(|| ErrorKind::Journal)?;
        Self::new(Arc::new(LocalBackend::new("local")), Arc::new(ExifExtractor), Repository::from(&database), config)
    }

    /// Assemble a library from its parts. The lock file defaults to one next
    /// to the configured journal.
    pub fn new(
        backend: BackendHandle,
        extractor: Arc<dyn MetadataExtractor>,
        journal: Repository,
        config: &Config,
    ) -> Result<Self> {
        let scheme: Scheme = config.library.scheme.parse()?;
        Ok(Self {
            backend,
            extractor,
            journal,
            destination: config.library.destination.clone(),
            scheme: Arc::new(scheme),
            keep_originals: config.library.keep_originals,
            include_hidden: config.library.include_hidden,
            concurrency: config.concurrency.max(1),
            lock_path: lock_path_for(&config.journal.path),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = path.into();
        self
    }

    /// Replace the cancellation token, e.g. with one shared with a signal
    /// handler.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Cancelling this token stops any running scan, organise or undo at the
    /// next file boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn context(&self) -> Result<Context> {
        let destination = self.destination.clone().ok_or_raise(|| ErrorKind::NoDestination)?;
        Ok(self.context_for(destination))
    }

    fn context_for(&self, destination_root: PathBuf) -> Context {
        Context {
            destination_root,
            scheme: Arc::clone(&self.scheme),
            keep_originals: self.keep_originals,
            include_hidden: self.include_hidden,
            concurrency: self.concurrency,
            lock_path: self.lock_path.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Preview what organising `source` would do. Touches nothing.
    pub async fn scan(&self, source: &Path) -> Result<Plan> {
        plan::plan(&self.backend, &self.extractor, &self.context()?, source).await
    }

    /// Plan and apply in one go.
    pub async fn organize(&self, source: &Path) -> Result<RunSummary> {
        let ctx = self.context()?;
        let plan = plan::plan(&self.backend, &self.extractor, &ctx, source).await?;
        execute::execute(&self.backend, &self.journal, &ctx, plan).await
    }

    /// Apply a plan previously returned by [`scan`](Self::scan). Every entry
    /// is re-checked against the filesystem before it is applied.
    pub async fn apply(&self, plan: Plan) -> Result<RunSummary> {
        execute::execute(&self.backend, &self.journal, &self.context()?, plan).await
    }

    pub async fn undo(&self, run_id: RunId) -> Result<UndoSummary> {
        // Undo works from the journal alone, no destination needed.
        let ctx = self.context_for(self.destination.clone().unwrap_or_default());
        undo::undo(&self.backend, &self.journal, &ctx, run_id).await
    }

    /// Every run, newest first, with per-status entry counts.
    pub async fn list_runs(&self) -> Result<Vec<RunOverview>> {
        self.journal.list_runs().await.or_raise(|| ErrorKind::Journal)
    }

    pub async fn check_consistency(&self) -> Result<ConsistencyReport> {
        check_consistency(&self.journal, &self.lock_path).await
    }
}
