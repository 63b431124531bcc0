//! Path validation helpers.
//!
//! Destination paths are produced by rendering user-supplied schemes against
//! camera-supplied strings, so they have to be checked before being joined
//! onto a destination root.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a path that is meant to be relative to some root directory.
/// Ensures that it can't escape the root (no `..` traversal), isn't absolute
/// and doesn't resolve to the root itself.
///
/// > **Note:** This does **not** normalize backslashes, non-UTF8 bytes, or
/// >           platform-specific weirdness. Null bytes are explicitly rejected.
///
/// # Returns
/// Returns the normalized path if valid, or [`InvalidPath`](crate::error::ErrorKind::InvalidPath)
/// if invalid.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use darkroom_storage::validate_path;
/// // Valid paths
/// assert!(validate_path("2024/03/img1.jpg").is_ok());
/// assert!(validate_path("2024/../2023/img.jpg").is_ok()); // (never leaves the root)
/// // Invalid paths
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("2024/../../b").is_err());
/// assert!(validate_path("a\0b").is_err());
/// // Paths get resolved
/// assert_eq!(
///     validate_path("wrong/../2024/./03//img.jpg/").unwrap(),
///     Path::new("2024/03/img.jpg")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let mut components = Vec::new();
    for component in path.as_ref().components() {
        match component {
            Component::Normal(s) => {
                // Null bytes pass through Path::components() on Unix but cause
                // truncation in C-based syscalls, so reject them explicitly.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.as_ref().to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Whether `path` lies *strictly* inside `root` (component-wise, so
/// `/photos-sorted` is not inside `/photos`).
pub fn is_strictly_within(path: &Path, root: &Path) -> bool {
    path != root && path.starts_with(root)
}

/// Whether any component of `path` below `root` is hidden (starts with a dot).
pub fn is_hidden_below(path: &Path, root: &Path) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| matches!(c, Component::Normal(s) if s.as_encoded_bytes().first() == Some(&b'.')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        assert_eq!(validate(Path::new("2024/03/img1.jpg")).unwrap(), Path::new("2024/03/img1.jpg"));
        assert_eq!(validate(Path::new("unknown/img.cr2")).unwrap(), Path::new("unknown/img.cr2"));
        assert_eq!(validate(Path::new("img.jpg")).unwrap(), Path::new("img.jpg"));
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(validate(Path::new("2024//03//a.jpg")).unwrap(), Path::new("2024/03/a.jpg"));
        assert_eq!(validate(Path::new("2024/./03/./a.jpg")).unwrap(), Path::new("2024/03/a.jpg"));
        // A leading slash from a badly written scheme is made relative.
        assert_eq!(validate(Path::new("/2024/a.jpg")).unwrap(), Path::new("2024/a.jpg"));
    }

    #[test]
    fn test_traversal_attempts() {
        assert!(validate(Path::new("../etc/passwd")).is_err());
        assert!(validate(Path::new("a/../../b")).is_err());
        assert!(validate(Path::new("..")).is_err());
        assert!(validate(Path::new("../..")).is_err());
    }

    #[test]
    fn test_invalid_characters() {
        assert!(validate(Path::new("a\0b")).is_err());
        assert!(validate(Path::new("\0")).is_err());
    }

    #[test]
    fn test_empty_paths() {
        assert!(validate(Path::new("")).is_err());
        assert!(validate(Path::new(".")).is_err());
        assert!(validate(Path::new("./.")).is_err());
        assert!(validate(Path::new("//")).is_err());
    }

    #[test]
    fn test_strictly_within() {
        assert!(is_strictly_within(Path::new("/photos/sorted"), Path::new("/photos")));
        assert!(!is_strictly_within(Path::new("/photos"), Path::new("/photos")));
        assert!(!is_strictly_within(Path::new("/photos-sorted"), Path::new("/photos")));
    }

    #[test]
    fn test_hidden_below_root() {
        let root = Path::new("/home/me/.photos");
        // The root itself being hidden doesn't count.
        assert!(!is_hidden_below(Path::new("/home/me/.photos/a.jpg"), root));
        assert!(is_hidden_below(Path::new("/home/me/.photos/.thumbs/a.jpg"), root));
        assert!(is_hidden_below(Path::new("/home/me/.photos/trip/.a.jpg"), root));
    }
}
