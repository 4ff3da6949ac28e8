//! Qibla direction: the bearing from any point to the Kaaba.

use crate::bearing;
use crate::Coordinate;

/// Coordinates of the Kaaba in Makkah.
pub const KAABA: Coordinate = Coordinate {
    latitude: 21.4225,
    longitude: 39.8262,
};

/// Initial bearing from `(latitude, longitude)` to the Kaaba, in `[0, 360)`.
///
/// This is [`bearing::bearing_deg`] with a fixed target. At the Kaaba itself
/// the direction is undefined and 0.0 is returned.
///
/// # Example
/// ```
/// use prayer_clock_lib::qibla::calculate_qibla_direction;
///
/// // From New York the Qibla points north-east
/// let bearing = calculate_qibla_direction(40.7128, -74.0060);
/// assert!((bearing - 58.5).abs() < 0.5);
/// ```
pub fn calculate_qibla_direction(latitude: f64, longitude: f64) -> f64 {
    bearing::bearing_deg(Coordinate::new(latitude, longitude), KAABA)
}

/// Great-circle distance to the Kaaba in kilometers.
pub fn distance_to_kaaba_km(latitude: f64, longitude: f64) -> f64 {
    bearing::distance_km(Coordinate::new(latitude, longitude), KAABA)
}
