//! Destination naming schemes.
//!
//! Turns a photo's [`Metadata`] into the directory it belongs in, using a
//! user-configured [upon] template. The template syntax follows upon's
//! Mustache-like conventions (`{{ variable }}`, `{{ value|formatter }}`),
//! extended with two path-friendly helpers:
//!
//! - **`slug`**: converts strings to URL-safe slugs, stripping quotation marks
//!   first to avoid artifacts like leading/trailing hyphens.
//! - **`truncate`**: truncates strings to a maximum byte length at a character
//!   boundary, usable as either `truncate(value, n)` or `{{ value|truncate: n }}`.
//!
//! For the common case, a scheme without any `{{` may use the compact tokens
//! `YYYY`, `MM` and `DD` instead: `YYYY/MM` is the same scheme as
//! `{{ year }}/{{ month }}`. Only words made up entirely of those tokens are
//! expanded (`YYYYMMDD`, `MM-DD`), so literal text such as `SUMMER` is left
//! alone.
//!
//! # Template Variables
//!
//! | Variable      | Description                                             |
//! |---------------|---------------------------------------------------------|
//! | `year`        | Four digit year                                         |
//! | `month`       | Two digit month (`01`-`12`)                             |
//! | `day`         | Two digit day of the month                              |
//! | `hour`        | Two digit hour (24h)                                    |
//! | `minute`      | Two digit minute                                        |
//! | `second`      | Two digit second                                        |
//! | `make`        | Camera manufacturer, or `unknown`                       |
//! | `model`       | Camera model, or `unknown`                              |
//! | `camera`      | Make and model combined, or `unknown`                   |
//! | `lens`        | Lens model, or `unknown`                                |
//! | `format`      | Canonical format name (`jpg`, `nef`, ...)               |
//! | `stem`        | Original file name without extension                    |
//! | `ext`         | Original extension, lowercased                          |
//! | `date_source` | Where the date came from: `captured` or `modified`      |
//! | `lat`         | GPS latitude to one decimal place (~11 km), or `unknown` |
//! | `lon`         | GPS longitude to one decimal place, or `unknown`        |
//! | `location`    | `lat,lon` together, or `unknown`                        |
//!
//! Every camera-supplied string is escaped before it reaches the template, so
//! a model name like `EOS 5D Mark II/III` can't create extra directories.
//!
//! Files without any usable date (no capture time and no modification time)
//! always go to `unknown/<file name>`, whatever the scheme.
//!
//! # Example
//!
//! ```
//! use darkroom_library::{DateSource, Scheme};
//! use darkroom_meta::{Format, Metadata};
//! use std::path::Path;
//! use time::macros::datetime;
//!
//! let scheme: Scheme = "{{ year }}/{{ camera|slug }}".parse().unwrap();
//! let metadata = Metadata {
//!     captured_at: Some(datetime!(2024-03-01 10:20:30)),
//!     make: Some("Canon".to_string()),
//!     model: Some("Canon EOS R5".to_string()),
//!     ..Metadata::empty(Format::Jpeg)
//! };
//! let resolved = scheme.resolve(Path::new("/in/IMG_0001.JPG"), Some(&metadata), None).unwrap();
//! assert_eq!(resolved.path, Path::new("2024/canon-eos-r5/IMG_0001.JPG"));
//! assert_eq!(resolved.date_source, DateSource::Captured);
//! ```

use crate::error::{Error, ErrorKind, Result};
use darkroom_meta::{Format, Metadata};
use darkroom_storage::validate_path;
use exn::{OptionExt, ResultExt};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::instrument;
use upon::{Engine, Template};

pub const UNKNOWN: &str = "unknown";

/// Where the date used for a destination came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateSource {
    /// EXIF capture time.
    Captured,
    /// Filesystem modification time (no usable capture time).
    Modified,
    /// Neither; the file goes into the `unknown` bucket.
    Unknown,
}
impl DateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Captured => "captured",
            Self::Modified => "modified",
            Self::Unknown => UNKNOWN,
        }
    }
}
impl Display for DateSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// A destination relative to the library root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    pub date_source: DateSource,
}

/// A compiled naming scheme.
///
/// Constructed via [`FromStr`], which compiles the template eagerly so that
/// syntax errors surface at creation time rather than at render time. The
/// compiled template is reusable across many [`resolve`](Self::resolve) calls.
pub struct Scheme {
    source: String,
    engine: Engine<'static>,
    template: Template<'static>,
}
impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        // Compile the template early so we can fail-fast in construction.
        let template = engine.compile(expand_compact_tokens(s)).or_raise(|| ErrorKind::Scheme)?;
        Ok(Self { source: s.to_string(), engine, template })
    }
}
impl std::fmt::Debug for Scheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_tuple("Scheme").field(&self.source).finish()
    }
}
impl Scheme {
    /// The scheme as written by the user.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Decide where `source` belongs, relative to the library root.
    ///
    /// Date priority is the capture time from `metadata`, then `modified`,
    /// then the `unknown` bucket. Pure: the same inputs always produce the
    /// same path.
    #[instrument(skip_all, fields(path = %source.display()))]
    pub fn resolve(
        &self,
        source: &Path,
        metadata: Option<&Metadata>,
        modified: Option<OffsetDateTime>,
    ) -> Result<Resolved> {
        let file_name = source.file_name().ok_or_raise(|| ErrorKind::Scheme)?.to_string_lossy();
        let file_name = sanitize(&file_name);
        let captured = metadata.and_then(|m| m.captured_at);
        let (date, date_source) = match (captured, modified) {
            (Some(captured), _) => (captured, DateSource::Captured),
            (None, Some(modified)) => {
                let utc = modified.to_offset(UtcOffset::UTC);
                (PrimitiveDateTime::new(utc.date(), utc.time()), DateSource::Modified)
            },
            (None, None) => {
                return Ok(Resolved {
                    path: Path::new(UNKNOWN).join(file_name),
                    date_source: DateSource::Unknown,
                });
            },
        };
        let rendered = self
            .template
            .render(&self.engine, Self::parameters(source, metadata, date, date_source))
            .to_string()
            .or_raise(|| ErrorKind::Scheme)?;
        let directory = Self::normalize(rendered)?;
        Ok(Resolved { path: directory.join(file_name), date_source })
    }

    /// Trims each path segment, drops empty ones, then validates via
    /// [`darkroom_storage::validate_path`].
    fn normalize(s: impl Into<String>) -> Result<PathBuf> {
        let path = s.into().split('/').map(str::trim).filter(|s| !s.is_empty()).collect::<Vec<_>>().join("/");
        validate_path(&path).or_raise(|| ErrorKind::Scheme)
    }

    /// Builds the [`upon::Value`] map exposed to the template engine.
    fn parameters(
        source: &Path,
        metadata: Option<&Metadata>,
        date: PrimitiveDateTime,
        date_source: DateSource,
    ) -> upon::Value {
        let field = |value: Option<String>| value.as_deref().map(sanitize).unwrap_or_else(|| UNKNOWN.to_string());
        let format = metadata.map(|m| m.format).or_else(|| Format::from_path(source));
        let stem = source.file_stem().map(|s| sanitize(&s.to_string_lossy())).unwrap_or_default();
        let ext = source.extension().map(|s| sanitize(&s.to_string_lossy().to_lowercase())).unwrap_or_default();
        let gps = metadata.and_then(|m| m.gps);
        let lat = gps.map(|g| coordinate(g.latitude));
        let lon = gps.map(|g| coordinate(g.longitude));
        let location = lat.as_ref().zip(lon.as_ref()).map(|(lat, lon)| format!("{lat},{lon}"));
        upon::value! {
            year: format!("{:04}", date.year()),
            month: format!("{:02}", u8::from(date.month())),
            day: format!("{:02}", date.day()),
            hour: format!("{:02}", date.hour()),
            minute: format!("{:02}", date.minute()),
            second: format!("{:02}", date.second()),
            make: field(metadata.and_then(|m| m.make.clone())),
            model: field(metadata.and_then(|m| m.model.clone())),
            camera: field(metadata.and_then(Metadata::camera)),
            lens: field(metadata.and_then(|m| m.lens.clone())),
            format: format.map(|f| f.as_str()).unwrap_or(UNKNOWN),
            stem: stem,
            ext: ext,
            date_source: date_source.as_str(),
            lat: lat.unwrap_or_else(|| UNKNOWN.to_string()),
            lon: lon.unwrap_or_else(|| UNKNOWN.to_string()),
            location: location.unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }
}

/// Rounded to one decimal place, without a `-0.0`.
fn coordinate(degrees: f64) -> String {
    let rounded = (degrees * 10.0).round() / 10.0;
    format!("{:.1}", rounded + 0.0)
}

/// `YYYY/MM/DD` style shorthand, only when the scheme isn't already a template.
fn expand_compact_tokens(scheme: &str) -> String {
    if scheme.contains("{{") {
        return scheme.to_string();
    }
    let mut expanded = String::with_capacity(scheme.len());
    let mut rest = scheme;
    while !rest.is_empty() {
        // Alternate between runs of alphanumeric and other characters.
        let word = rest.starts_with(char::is_alphanumeric);
        let end = rest.find(|c: char| c.is_alphanumeric() != word).unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        match expand_word(run) {
            Some(variables) => expanded.push_str(&variables),
            None => expanded.push_str(run),
        }
        rest = tail;
    }
    expanded
}

/// A word made only of `YYYY`, `MM` and `DD` tokens as template variables.
fn expand_word(word: &str) -> Option<String> {
    const TOKENS: [(&str, &str); 3] = [("YYYY", "year"), ("MM", "month"), ("DD", "day")];
    let mut expanded = String::new();
    let mut rest = word;
    while !rest.is_empty() {
        let (token, variable) = TOKENS.into_iter().find(|(token, _)| rest.starts_with(token))?;
        expanded.push_str(&format!("{{{{ {variable} }}}}"));
        rest = &rest[token.len()..];
    }
    Some(expanded)
}

/// Make an arbitrary string safe to use as a single path segment.
///
/// Path separators, characters Windows forbids in file names and control
/// characters are replaced by `_`; leading and trailing dots and spaces are
/// trimmed (so `..` can't survive). An empty result becomes `unknown`.
pub fn sanitize(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim_matches(|c: char| c == '.' || c.is_whitespace());
    match trimmed.is_empty() {
        true => UNKNOWN.to_string(),
        false => trimmed.to_string(),
    }
}

/// Custom [`upon`] extensions for path-safe string manipulation.
mod addons {
    use rslug::slugify;
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    /// Custom formatter that converts strings to URL-safe slugs.
    ///
    /// Strips quotation marks before slugifying to avoid awkward slug output
    /// like `"hello"` becoming `-hello-`.
    fn slug_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => {
                let marks = [
                    '\u{0027}', '\u{0022}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{201E}', '\u{201B}',
                    '\u{0060}', '\u{00AB}', '\u{00BB}', '\u{2039}', '\u{203A}',
                ];
                let stripped: String = s.chars().filter(|c| !marks.contains(c)).collect();
                write!(f, "{}", slugify!(&stripped))?
            },
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    /// Truncates a string to a maximum byte length at a character boundary.
    fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> String {
        s[..s.floor_char_boundary(max_bytes)].to_string()
    }

    /// Registers the `slug` formatter and `truncate` function on the given engine.
    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_formatter("slug", slug_formatter);
        engine.add_function("truncate", truncate_to_char_boundary);
    }
}
