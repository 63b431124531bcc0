use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
    str::FromStr,
};

use crate::error::{Error, ErrorKind};

/// Photo format, as told by the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Jpeg,
    Tiff,
    Png,
    Bmp,
    Gif,
    Heic,
    Webp,
    Avif,
    /// Generic `.raw` files
    Raw,
    /// Canon
    Cr2,
    /// Canon (ISO base media container)
    Cr3,
    /// Nikon
    Nef,
    /// Sony
    Arw,
    /// Olympus
    Orf,
    /// Panasonic
    Rw2,
    /// Adobe digital negative
    Dng,
    /// Fujifilm
    Raf,
}
impl Format {
    /// Detect the format of a path from its extension (case-insensitive).
    ///
    /// Returns `None` for anything that isn't a photo.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref().extension()?.to_str()?.parse().ok()
    }

    /// Canonical lowercase extension for the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Tiff => "tiff",
            Self::Png => "png",
            Self::Bmp => "bmp",
            Self::Gif => "gif",
            Self::Heic => "heic",
            Self::Webp => "webp",
            Self::Avif => "avif",
            Self::Raw => "raw",
            Self::Cr2 => "cr2",
            Self::Cr3 => "cr3",
            Self::Nef => "nef",
            Self::Arw => "arw",
            Self::Orf => "orf",
            Self::Rw2 => "rw2",
            Self::Dng => "dng",
            Self::Raf => "raf",
        }
    }

    /// Whether the container is one EXIF can be read from.
    pub fn carries_exif(&self) -> bool {
        !matches!(self, Self::Bmp | Self::Gif | Self::Raw)
    }
}
impl FromStr for Format {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Self::Jpeg,
            "tif" | "tiff" => Self::Tiff,
            "png" => Self::Png,
            "bmp" => Self::Bmp,
            "gif" => Self::Gif,
            "heic" | "heif" => Self::Heic,
            "webp" => Self::Webp,
            "avif" => Self::Avif,
            "raw" => Self::Raw,
            "cr2" => Self::Cr2,
            "cr3" => Self::Cr3,
            "nef" => Self::Nef,
            "arw" => Self::Arw,
            "orf" => Self::Orf,
            "rw2" => Self::Rw2,
            "dng" => Self::Dng,
            "raf" => Self::Raf,
            _ => exn::bail!(ErrorKind::Unsupported(s.to_string())),
        })
    }
}
impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}
