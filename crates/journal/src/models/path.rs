//! File paths are stored as the raw bytes the operating system handed us, so
//! a name that isn't valid UTF-8 survives the trip through the journal
//! unchanged and can still be moved back on undo.

use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use std::path::{Path, PathBuf};

#[cfg(unix)]
pub(crate) fn encode(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    Ok(path.as_ref().as_os_str().as_bytes().to_vec())
}

#[cfg(unix)]
pub(crate) fn decode(bytes: Vec<u8>) -> Result<PathBuf> {
    use std::os::unix::ffi::OsStringExt;
    Ok(PathBuf::from(std::ffi::OsString::from_vec(bytes)))
}

#[cfg(not(unix))]
pub(crate) fn encode(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    Ok(utf8(path)?.into_bytes())
}

#[cfg(not(unix))]
pub(crate) fn decode(bytes: Vec<u8>) -> Result<PathBuf> {
    use exn::ResultExt;
    Ok(PathBuf::from(String::from_utf8(bytes).or_raise(|| ErrorKind::InvalidData("path"))?))
}

/// For paths kept inside JSON columns, which only hold text.
pub(crate) fn utf8(path: impl AsRef<Path>) -> Result<String> {
    Ok(path.as_ref().to_str().ok_or_raise(|| ErrorKind::InvalidData("path"))?.to_string())
}
