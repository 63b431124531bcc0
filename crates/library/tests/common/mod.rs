#![allow(dead_code)]

use darkroom_config::Config;
use darkroom_journal::{Database, Repository};
use darkroom_library::Library;
use darkroom_meta::error::{ErrorKind as MetaErrorKind, Result as MetaResult};
use darkroom_meta::{Format, Metadata, MetadataExtractor};
use darkroom_storage::BackendHandle;
use darkroom_storage::backend::MockBackend;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use time::macros::datetime;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Modification time every mock file starts with.
pub const DEFAULT_MODIFIED: OffsetDateTime = datetime!(2023-07-10 09:30 UTC);

/// Mock paths don't exist on disk, so metadata is looked up by file name
/// instead of being read.
#[derive(Default)]
pub struct StubExtractor {
    captured: HashMap<String, PrimitiveDateTime>,
}
impl StubExtractor {
    pub fn with(captured: &[(&str, PrimitiveDateTime)]) -> Self {
        Self { captured: captured.iter().map(|(name, at)| (name.to_string(), *at)).collect() }
    }
}
impl MetadataExtractor for StubExtractor {
    fn extract(&self, path: &Path) -> MetaResult<Metadata> {
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        match self.captured.get(&name) {
            Some(at) => Ok(Metadata {
                captured_at: Some(*at),
                make: Some("Canon".to_string()),
                model: Some("Canon EOS R5".to_string()),
                ..Metadata::empty(Format::from_path(path).unwrap_or(Format::Jpeg))
            }),
            None => exn::bail!(MetaErrorKind::NoMetadata),
        }
    }
}

pub struct Harness {
    pub mock: Arc<MockBackend>,
    pub backend: BackendHandle,
    pub journal: Repository,
    pub library: Library,
    pub lock_path: PathBuf,
    _temp: TempDir,
}

impl Harness {
    pub async fn new(files: &[(&str, &str)], captured: &[(&str, PrimitiveDateTime)], scheme: &str) -> Self {
        Self::with_backend(mock(files).await, captured, scheme, |backend| backend).await
    }

    /// Like [`new`](Self::new), but lets the test wrap the mock backend.
    pub async fn with_backend(
        mock: MockBackend,
        captured: &[(&str, PrimitiveDateTime)],
        scheme: &str,
        wrap: impl FnOnce(BackendHandle) -> BackendHandle,
    ) -> Self {
        let mock = Arc::new(mock);
        let handle: BackendHandle = mock.clone();
        let backend = wrap(handle);
        let temp = tempfile::tempdir().unwrap();
        let journal = Repository::from(&Database::connect_in_memory().await.unwrap());
        let mut config = Config::default();
        config.library.destination = Some(PathBuf::from("/out"));
        config.library.scheme = scheme.to_string();
        config.journal.path = temp.path().join("journal.sqlite3");
        config.concurrency = 4;
        let library =
            Library::new(backend.clone(), Arc::new(StubExtractor::with(captured)), journal.clone(), &config).unwrap();
        Harness {
            mock,
            backend,
            journal,
            library,
            lock_path: temp.path().join("journal.sqlite3.lock"),
            _temp: temp,
        }
    }

    pub async fn contents(&self, path: &str) -> Option<String> {
        self.mock.contents(path).await.map(|data| String::from_utf8(data).unwrap())
    }
}

/// A mock backend holding `files`, all with [`DEFAULT_MODIFIED`].
pub async fn mock(files: &[(&str, &str)]) -> MockBackend {
    let backend = MockBackend::with_files(files.iter().map(|(path, data)| (*path, data.as_bytes())));
    for (path, _) in files {
        backend.set_modified(path, DEFAULT_MODIFIED).await;
    }
    backend
}

pub fn paths(paths: &[&str]) -> Vec<PathBuf> {
    paths.iter().map(PathBuf::from).collect()
}
