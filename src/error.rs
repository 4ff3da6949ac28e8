//! Errors raised by the location, schedule and storage layers.

use std::io;
use thiserror::Error;

/// Errors that can occur while resolving location or obtaining prayer tables.
///
/// Geocoding failures are absorbed inside the location provider and only
/// surface here when a caller asks the geocoder directly.
#[derive(Error, Debug)]
pub enum PrayerError {
    /// The user refused location (or notification) access
    #[error("permission denied")]
    PermissionDenied,

    /// Device location services are switched off
    #[error("location services are disabled")]
    ServicesDisabled,

    /// Transport failure, timeout or non-success HTTP status
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The schedule service answered with a payload we cannot use
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("geocoding failed: {0}")]
    Geocoding(String),

    /// The platform could not produce a position fix
    #[error("location unavailable: {0}")]
    Location(String),

    #[error("invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("unknown calculation method {0}")]
    UnknownMethod(u8),

    #[error("storage IO: {0}")]
    Storage(#[from] io::Error),

    #[error("storage encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PrayerError>;
