use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::path::Path;

use exif::{Exif, In, Tag, Value};
use exn::ResultExt;
use time::PrimitiveDateTime;
use time::macros::format_description;

use crate::error::{ErrorKind, Result};
use crate::models::{Format, Gps, Metadata};

/// Anything that can turn a photo on disk into [`Metadata`].
///
/// Implementations must never panic on malformed input; broken files come
/// back as an [`ErrorKind`] and the caller carries on without metadata.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Metadata>;
}

/// Reads EXIF tags from JPEG, TIFF (and TIFF-based RAW), HEIF, PNG and WebP
/// containers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExifExtractor;

impl ExifExtractor {
    /// Extract metadata from an already opened container.
    pub fn read(&self, mut reader: impl BufRead + Seek, format: Format) -> Result<Metadata> {
        if !format.carries_exif() {
            exn::bail!(ErrorKind::NoMetadata);
        }
        let exif = exif::Reader::new().read_from_container(&mut reader).map_err(|e| match e {
            exif::Error::Io(e) => ErrorKind::Io(e.to_string()),
            exif::Error::NotFound(_) => ErrorKind::NoMetadata,
            other => ErrorKind::Malformed(other.to_string()),
        })?;
        Ok(Metadata {
            captured_at: captured_at(&exif),
            make: ascii(&exif, Tag::Make),
            model: ascii(&exif, Tag::Model),
            lens: ascii(&exif, Tag::LensModel),
            gps: gps(&exif),
            format,
        })
    }
}

impl MetadataExtractor for ExifExtractor {
    fn extract(&self, path: &Path) -> Result<Metadata> {
        let format = match Format::from_path(path) {
            Some(format) => format,
            None => exn::bail!(ErrorKind::Unsupported(path.display().to_string())),
        };
        let file = File::open(path).or_raise(|| ErrorKind::Io(path.display().to_string()))?;
        self.read(BufReader::new(file), format)
    }
}

/// First string of an ASCII field, with padding and NULs stripped.
fn ascii(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Ascii(values) = &field.value else {
        return None;
    };
    let value = String::from_utf8_lossy(values.first()?);
    let value = value.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!value.is_empty()).then(|| value.to_string())
}

/// `DateTimeOriginal`, falling back to `DateTime`.
fn captured_at(exif: &Exif) -> Option<PrimitiveDateTime> {
    [Tag::DateTimeOriginal, Tag::DateTime]
        .into_iter()
        .find_map(|tag| ascii(exif, tag).as_deref().and_then(parse_datetime))
}

/// EXIF timestamps look like `2024:03:01 14:05:09`. Anything after the
/// seconds (sub-second digits, stray offsets) is ignored; blank placeholder
/// values like `    :  :     ` simply don't parse.
pub(crate) fn parse_datetime(value: &str) -> Option<PrimitiveDateTime> {
    let format = format_description!("[year]:[month]:[day] [hour]:[minute]:[second]");
    PrimitiveDateTime::parse(value.get(..19)?, &format).ok()
}

fn gps(exif: &Exif) -> Option<Gps> {
    let latitude = coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef)?;
    let longitude = coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef)?;
    Gps::new(latitude, longitude)
}

fn coordinate(exif: &Exif, tag: Tag, reference: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    let [degrees, minutes, seconds] = parts.as_slice() else {
        return None;
    };
    let (degrees, minutes, seconds) = (degrees.to_f64(), minutes.to_f64(), seconds.to_f64());
    let reference = ascii(exif, reference).unwrap_or_default();
    Some(Gps::dms_to_decimal(degrees, minutes, seconds, &reference))
}
