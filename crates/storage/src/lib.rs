pub mod backend;
pub mod error;
mod file;
mod fingerprint;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::file::FileInfo;
pub use crate::fingerprint::{CHUNK_SIZE, Fingerprint, fingerprint};
pub use crate::path::{is_hidden_below, is_strictly_within, validate as validate_path};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
