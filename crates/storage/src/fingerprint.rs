//! Content fingerprinting.
//!
//! A [`Fingerprint`] is a BLAKE3 digest plus the byte size of a file. Two files
//! with equal fingerprints are treated as having identical content; that is
//! the only notion of "duplicate" the organiser has.

use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fmt;
use std::io::Read;
use std::path::Path;
use tracing::instrument;

/// Files are hashed in chunks of this size, so memory use stays flat
/// regardless of how large a RAW file is.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Content digest and size of a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Lowercase hex BLAKE3 digest (64 characters).
    pub hash: String,
    /// File size in bytes.
    pub size: u64,
}
impl Fingerprint {
    pub fn new(hash: impl Into<String>, size: u64) -> Self {
        Self { hash: hash.into(), size }
    }

    /// Fingerprint an in-memory buffer (mostly useful in tests).
    pub fn of_bytes(data: impl AsRef<[u8]>) -> Self {
        let data = data.as_ref();
        Self::new(blake3::hash(data).to_string(), data.len() as u64)
    }

    /// Hash everything `reader` yields, `CHUNK_SIZE` bytes at a time.
    pub fn of_reader(mut reader: impl Read) -> std::io::Result<Self> {
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut size = 0u64;
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..read]);
            size += read as u64;
        }
        Ok(Self::new(hasher.finalize().to_string(), size))
    }
}
impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", &self.hash[..self.hash.len().min(12)], self.size)
    }
}

/// Compute the [`Fingerprint`] of the file at `path`.
///
/// The reader is opened asynchronously through the backend, hashing happens on
/// a blocking thread.
#[instrument(skip(backend), fields(path = %path.display()))]
pub async fn fingerprint<B: StorageBackend + ?Sized>(backend: &B, path: &Path) -> Result<Fingerprint> {
    let reader = backend.reader(path).await?;
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || Fingerprint::of_reader(reader).map_err(|e| ErrorKind::from_io(e, &owned)))
        .await
        .or_raise(|| ErrorKind::Io(std::io::Error::other("fingerprint task panicked")))?
        .map_err(exn::Exn::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reader_matches_in_memory_digest() {
        // Spans more than one chunk so the loop is exercised.
        let data = vec![7u8; CHUNK_SIZE * 2 + 17];
        let streamed = Fingerprint::of_reader(Cursor::new(&data)).unwrap();
        assert_eq!(streamed, Fingerprint::of_bytes(&data));
        assert_eq!(streamed.size, data.len() as u64);
        assert_eq!(streamed.hash.len(), 64);
    }

    #[test]
    fn test_different_content_differs() {
        assert_ne!(Fingerprint::of_bytes(b"one"), Fingerprint::of_bytes(b"two"));
        assert_eq!(Fingerprint::of_bytes(b""), Fingerprint::of_reader(Cursor::new(b"")).unwrap());
    }

    #[tokio::test]
    async fn test_fingerprint_local_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("img.jpg");
        std::fs::write(&path, b"not really a jpeg").unwrap();
        let backend = crate::backend::LocalBackend::new("local");
        let fp = fingerprint(&backend, &path).await.unwrap();
        assert_eq!(fp, Fingerprint::of_bytes(b"not really a jpeg"));
    }

    #[tokio::test]
    async fn test_fingerprint_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = crate::backend::LocalBackend::new("local");
        let err = fingerprint(&backend, &temp_dir.path().join("nope.jpg")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }
}
