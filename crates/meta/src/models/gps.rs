/// Signed decimal coordinates. Southern latitudes and western longitudes are
/// negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gps {
    pub latitude: f64,
    pub longitude: f64,
}
impl Gps {
    /// Convert degrees/minutes/seconds plus a hemisphere reference (`N`, `S`,
    /// `E` or `W`) into a signed decimal value.
    pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64, reference: &str) -> f64 {
        let value = degrees + minutes / 60.0 + seconds / 3600.0;
        match reference.trim().to_ascii_uppercase().as_str() {
            "S" | "W" => -value,
            _ => value,
        }
    }

    /// Coordinates outside of the valid ranges are discarded.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self { latitude, longitude })
    }
}
