use time::PrimitiveDateTime;

use super::{Format, Gps};

/// Everything the organiser knows about a photo besides its bytes.
///
/// Every field other than `format` is optional; cameras, phones and editing
/// software all drop different tags. The capture time is a *local* wall-clock
/// time, EXIF doesn't reliably record a timezone.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub captured_at: Option<PrimitiveDateTime>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub lens: Option<String>,
    pub gps: Option<Gps>,
    pub format: Format,
}
impl Metadata {
    /// Metadata for a file nothing could be read from.
    pub fn empty(format: Format) -> Self {
        Self {
            captured_at: None,
            make: None,
            model: None,
            lens: None,
            gps: None,
            format,
        }
    }

    /// Make and model joined into a single camera name.
    ///
    /// Many manufacturers repeat the make in the model string (`Canon` +
    /// `Canon EOS R5`), in which case only the model is used.
    pub fn camera(&self) -> Option<String> {
        match (self.make.as_deref(), self.model.as_deref()) {
            (Some(make), Some(model)) if model.to_lowercase().starts_with(&make.to_lowercase()) => {
                Some(model.to_string())
            },
            (Some(make), Some(model)) => Some(format!("{make} {model}")),
            (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
            (None, None) => None,
        }
    }
}
