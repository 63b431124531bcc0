pub mod error;
mod extract;
pub mod models;

use std::path::Path;
use tracing::instrument;

use crate::error::Result;
pub use crate::extract::{ExifExtractor, MetadataExtractor};
pub use crate::models::{Format, Gps, Metadata};

/// Easy, top-level entrypoint for reading the [`Metadata`] of a photo on disk
/// with the default [`ExifExtractor`].
///
/// Blocking: call from [`spawn_blocking`](https://docs.rs/tokio/latest/tokio/task/fn.spawn_blocking.html)
/// when inside an async runtime.
#[instrument(fields(path = %path.as_ref().display()))]
pub fn extract(path: impl AsRef<Path> + std::fmt::Debug) -> Result<Metadata> {
    ExifExtractor.extract(path.as_ref())
}
