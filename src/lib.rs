//! # Prayer Tracker Core Library
//!
//! This library provides the location-aware prayer-time pipeline for the prayer
//! tracker application: it resolves where the user is, obtains the day's prayer
//! table from a remote schedule service, and derives the "next prayer" countdown
//! and the Qibla bearing from that data.
//!
//! ## Data Flow
//!
//! 1. **Location**: [`location::GeoPositionProvider`] resolves coordinates (5-minute cache,
//!    permission checks, reverse geocoding for a display name)
//! 2. **Schedule**: [`prayer_times::TimeTableProvider`] fetches the day's table for those
//!    coordinates (1-hour same-day cache, stale-cache fallback when offline)
//! 3. **Derivation**: [`next_prayer`] computes the upcoming prayer, time remaining and the
//!    elapsed share of the current interval; [`qibla`] computes the bearing to the Kaaba
//! 4. **Session**: [`session::PrayerSession`] ties the above together with a 60-second
//!    tick, app-resume refresh and location-change refetch
//!
//! ## Core Types
//!
//! - [`Coordinate`] / [`ResolvedLocation`]: where the user is
//! - [`PrayerTable`] / [`CachedPrayerTable`]: one day's schedule, and its persisted envelope
//! - [`NextPrayerInfo`]: derived countdown, never persisted

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod alerts;
pub mod bearing;
pub mod config;
pub mod error;
pub mod location;
pub mod methods;
pub mod next_prayer;
pub mod prayer_times;
pub mod qibla;
pub mod renderer;
pub mod session;
pub mod storage;

pub use error::{PrayerError, Result};

/// A point on the Earth's surface in decimal degrees.
///
/// Valid coordinates satisfy `latitude ∈ [-90, 90]` and `longitude ∈ [-180, 180]`;
/// see [`Coordinate::is_valid`].
///
/// # Example
/// ```
/// use prayer_clock_lib::Coordinate;
///
/// let mecca = Coordinate::new(21.4225, 39.8262);
/// assert!(mecca.is_valid());
/// assert!(!Coordinate::new(91.0, 0.0).is_valid());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Build a coordinate, rejecting values outside the valid ranges.
    pub fn checked(latitude: f64, longitude: f64) -> Result<Self> {
        let coord = Self::new(latitude, longitude);
        if coord.is_valid() {
            Ok(coord)
        } else {
            Err(PrayerError::InvalidCoordinate {
                latitude,
                longitude,
            })
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}°, {:.4}°)", self.latitude, self.longitude)
    }
}

/// A coordinate plus the human-readable place it resolved to.
///
/// Owned by the location provider. The persisted copy survives restarts and is
/// only replaced by a successful resolution. `timestamp` is the acquisition
/// instant in Unix milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl ResolvedLocation {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// The six daily marks, in the order they occur.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Prayer {
    Fajr,
    Sunrise,
    Dhuhr,
    Asr,
    Maghrib,
    Isha,
}

impl Prayer {
    /// All marks in chronological order.
    pub const ALL: [Prayer; 6] = [
        Prayer::Fajr,
        Prayer::Sunrise,
        Prayer::Dhuhr,
        Prayer::Asr,
        Prayer::Maghrib,
        Prayer::Isha,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Prayer::Fajr => "Fajr",
            Prayer::Sunrise => "Sunrise",
            Prayer::Dhuhr => "Dhuhr",
            Prayer::Asr => "Asr",
            Prayer::Maghrib => "Maghrib",
            Prayer::Isha => "Isha",
        }
    }

    pub fn arabic_label(self) -> &'static str {
        match self {
            Prayer::Fajr => "الفجر",
            Prayer::Sunrise => "الشروق",
            Prayer::Dhuhr => "الظهر",
            Prayer::Asr => "العصر",
            Prayer::Maghrib => "المغرب",
            Prayer::Isha => "العشاء",
        }
    }
}

impl fmt::Display for Prayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Daily marks as `"HH:MM"` strings, exactly as the schedule service sends them.
///
/// The service returns extra keys (Imsak, Sunset, Midnight, ...); they are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    #[serde(rename = "Fajr")]
    pub fajr: String,
    #[serde(rename = "Sunrise")]
    pub sunrise: String,
    #[serde(rename = "Dhuhr")]
    pub dhuhr: String,
    #[serde(rename = "Asr")]
    pub asr: String,
    #[serde(rename = "Maghrib")]
    pub maghrib: String,
    #[serde(rename = "Isha")]
    pub isha: String,
}

impl Timings {
    pub fn get(&self, prayer: Prayer) -> &str {
        match prayer {
            Prayer::Fajr => &self.fajr,
            Prayer::Sunrise => &self.sunrise,
            Prayer::Dhuhr => &self.dhuhr,
            Prayer::Asr => &self.asr,
            Prayer::Maghrib => &self.maghrib,
            Prayer::Isha => &self.isha,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HijriMonth {
    pub en: String,
    pub ar: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HijriDate {
    pub date: String,
    pub month: HijriMonth,
    pub year: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateInfo {
    pub readable: String,
    pub hijri: HijriDate,
}

/// One day's prayer schedule for one place.
///
/// Immutable once fetched; the next successful fetch supersedes it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrayerTable {
    pub timings: Timings,
    pub date: DateInfo,
    #[serde(default)]
    pub meta: Option<Coordinate>,
}

/// The persisted envelope around a [`PrayerTable`], used to judge freshness.
///
/// `timestamp` is the fetch instant in Unix milliseconds and `iso_date` the
/// local calendar day (`YYYY-MM-DD`) the table was fetched for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedPrayerTable {
    #[serde(flatten)]
    pub table: PrayerTable,
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "isoDate")]
    pub iso_date: String,
    #[serde(default)]
    pub method: Option<u8>,
    /// The `tune` parameter sent with the request, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tune: Option<String>,
}

/// The upcoming mark and how far along the current interval is.
///
/// Derived on demand from a [`Timings`] and the clock; never persisted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NextPrayerInfo {
    pub prayer: Prayer,
    pub name: &'static str,
    /// `"HH:MM"` as given in the table
    pub time: String,
    pub arabic_label: &'static str,
    /// `"{h}h {m}m"`
    pub time_until: String,
    /// Elapsed share of the current inter-prayer interval, 0–100
    pub percentage: f64,
    /// Start of the current interval (the previous mark)
    pub interval_start: chrono::NaiveDateTime,
    /// When the upcoming mark occurs
    pub at: chrono::NaiveDateTime,
}
