//! Great-circle distance and initial bearing on a spherical Earth.
//!
//! Stateless; every other geometric computation in the crate goes through here.

use crate::Coordinate;

/// Mean Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distance between two coordinates using the Haversine formula.
/// Read more here: https://en.wikipedia.org/wiki/Haversine_formula
/// Returns the distance in kilometers.
pub fn distance_km(from: Coordinate, to: Coordinate) -> f64 {
    let lat_from = from.latitude.to_radians();
    let lat_to = to.latitude.to_radians();
    let delta_lat = (to.latitude - from.latitude).to_radians();
    let delta_lon = (to.longitude - from.longitude).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat_from.cos() * lat_to.cos() * (delta_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Initial bearing from one coordinate to another.
/// Returns degrees in `[0, 360)`, where 0 is North and 90 is East.
///
/// When both points coincide the bearing is undefined; the formula then
/// yields `atan2(0, 0) = 0`, so 0.0 is returned.
pub fn bearing_deg(from: Coordinate, to: Coordinate) -> f64 {
    let lat_from = from.latitude.to_radians();
    let lat_to = to.latitude.to_radians();
    let delta_lon = (to.longitude - from.longitude).to_radians();

    let y = delta_lon.sin() * lat_to.cos();
    let x = lat_from.cos() * lat_to.sin() - lat_from.sin() * lat_to.cos() * delta_lon.cos();

    let bearing = y.atan2(x).to_degrees();

    // atan2 lands in (-180, 180]; shifting first keeps tiny negatives from becoming 360
    (bearing + 360.0) % 360.0
}
