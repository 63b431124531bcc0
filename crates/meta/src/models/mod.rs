mod format;
mod gps;
mod metadata;

pub use self::format::Format;
pub use self::gps::Gps;
pub use self::metadata::Metadata;
