//! # Prayer Table Fetching and Caching
//!
//! This module handles all network operations for fetching daily prayer tables
//! from the remote schedule service. It includes a same-day cache to minimize
//! network requests and falls back to the last known table when offline.
//!
//! ## Data Source
//!
//! - `GET {base}/v1/timings/{DD-MM-YYYY}?latitude&longitude&method[&tune]`
//! - `GET {base}/v1/timingsByCity/{DD-MM-YYYY}?city&country&method`
//! - Response body: `{ "data": { "timings": {..}, "date": {..}, "meta": {..} } }`
//!
//! Coordinates are rounded to 4 decimal places (about 11 m) before they are sent.
//! The service does not need more, and rounding keeps cache keys stable.
//!
//! ## Caching Strategy
//!
//! A cached table is reused without a network call when all three hold:
//! - **Proximity**: `|Δlat| < 0.01°` and `|Δlon| < 0.01°` from the cached position
//! - **Same day**: the cached ISO date equals today's local date
//! - **Age**: fetched less than 1 hour ago
//!
//! The envelope also records the calculation method, and a cache hit requires
//! the same method, so changing the method always reaches the network.
//!
//! ## Error Handling
//!
//! - **Transport failures** (connect, timeout, non-2xx): return the last cached
//!   table for this position regardless of age or method, else the error
//! - **Malformed payloads**: [`PrayerError::InvalidResponse`], no fallback
//! - **Cache write failures**: logged and ignored

use crate::config::Config;
use crate::next_prayer::parse_clock;
use crate::storage::{self, Store, PRAYER_TABLE_KEY};
use crate::{CachedPrayerTable, Coordinate, Prayer, PrayerError, PrayerTable, Result};
use chrono::{DateTime, Duration, Local, NaiveDate};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-prayer minute offsets applied by the service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingAdjustments {
    #[serde(default)]
    pub fajr: i32,
    #[serde(default)]
    pub sunrise: i32,
    #[serde(default)]
    pub dhuhr: i32,
    #[serde(default)]
    pub asr: i32,
    #[serde(default)]
    pub maghrib: i32,
    #[serde(default)]
    pub isha: i32,
}

impl TimingAdjustments {
    /// The service's `tune` value: Imsak,Fajr,Sunrise,Dhuhr,Asr,Maghrib,Sunset,Isha,Midnight.
    pub fn tune_param(&self) -> String {
        format!(
            "0,{},{},{},{},{},0,{},0",
            self.fajr, self.sunrise, self.dhuhr, self.asr, self.maghrib, self.isha
        )
    }
}

/// When a cached table may be reused.
#[derive(Clone, Copy, Debug)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub proximity_degrees: f64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(1),
            proximity_degrees: 0.01,
        }
    }
}

impl CachedPrayerTable {
    /// Roughly the same place: within `proximity` degrees on both axes.
    pub fn is_near(&self, coord: Coordinate, proximity: f64) -> bool {
        (self.latitude - coord.latitude).abs() < proximity
            && (self.longitude - coord.longitude).abs() < proximity
    }

    /// Whether this entry can stand in for a fresh fetch at `now`.
    pub fn is_fresh(
        &self,
        coord: Coordinate,
        method: u8,
        now: DateTime<Local>,
        policy: &CachePolicy,
    ) -> bool {
        let same_day = self.iso_date == iso_date(now.date_naive());
        let age_ms = now.timestamp_millis() - self.timestamp;
        let same_method = self.method.map_or(true, |m| m == method);

        self.is_near(coord, policy.proximity_degrees)
            && same_day
            && (0..policy.ttl.num_milliseconds()).contains(&age_ms)
            && same_method
    }

    /// Whether this entry was fetched with the same `tune` offsets.
    pub fn is_tuned_with(&self, tune: Option<&str>) -> bool {
        self.tune.as_deref() == tune
    }
}

fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn path_date(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

/// Round to 4 decimal places before transmission.
pub fn round_coordinate(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[derive(Deserialize)]
struct Envelope {
    data: Option<PrayerTable>,
}

/// Decode a service response body, rejecting anything without six usable marks.
pub fn parse_response(body: &str) -> Result<PrayerTable> {
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| PrayerError::InvalidResponse(e.to_string()))?;
    let table = envelope
        .data
        .ok_or_else(|| PrayerError::InvalidResponse("missing data".to_string()))?;

    if let Some(prayer) = Prayer::ALL
        .iter()
        .find(|&&p| parse_clock(table.timings.get(p)).is_none())
    {
        return Err(PrayerError::InvalidResponse(format!(
            "unreadable {} time {:?}",
            prayer,
            table.timings.get(*prayer)
        )));
    }

    Ok(table)
}

/// Client for the remote schedule service, with a persisted same-day cache.
pub struct TimeTableProvider {
    client: Client,
    base_url: String,
    store: Arc<dyn Store>,
    policy: CachePolicy,
}

impl TimeTableProvider {
    pub fn new(
        base_url: impl Into<String>,
        store: Arc<dyn Store>,
        policy: CachePolicy,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            store,
            policy,
        })
    }

    pub fn from_config(config: &Config, store: Arc<dyn Store>) -> Result<Self> {
        let policy = CachePolicy {
            ttl: Duration::minutes(config.schedule.cache_ttl_minutes),
            proximity_degrees: config.schedule.proximity_degrees,
        };
        Self::new(
            config.api.base_url.clone(),
            store,
            policy,
            std::time::Duration::from_secs(config.api.timeout_secs),
        )
    }

    /// Today's table for a position, served from cache when possible.
    pub async fn get_prayer_times_by_coordinates(
        &self,
        latitude: f64,
        longitude: f64,
        method: u8,
        adjustments: Option<&TimingAdjustments>,
    ) -> Result<PrayerTable> {
        self.by_coordinates_at(latitude, longitude, method, adjustments, Local::now())
            .await
    }

    /// [`Self::get_prayer_times_by_coordinates`] with an explicit clock.
    pub async fn by_coordinates_at(
        &self,
        latitude: f64,
        longitude: f64,
        method: u8,
        adjustments: Option<&TimingAdjustments>,
        now: DateTime<Local>,
    ) -> Result<PrayerTable> {
        let coord = Coordinate::checked(latitude, longitude)?;
        let cached = self.cached_table();
        let tune = adjustments.map(TimingAdjustments::tune_param);

        if let Some(entry) = &cached {
            if entry.is_fresh(coord, method, now, &self.policy)
                && entry.is_tuned_with(tune.as_deref())
            {
                debug!("Prayer table cache hit for {}", coord);
                return Ok(entry.table.clone());
            }
        }

        let rounded = Coordinate::new(round_coordinate(latitude), round_coordinate(longitude));
        let mut query = vec![
            ("latitude", rounded.latitude.to_string()),
            ("longitude", rounded.longitude.to_string()),
            ("method", method.to_string()),
        ];
        if let Some(tune) = &tune {
            query.push(("tune", tune.clone()));
        }

        let path = format!("timings/{}", path_date(now.date_naive()));
        match self.request(&path, &query).await {
            Ok(mut table) => {
                table.meta.get_or_insert(rounded);
                info!("Fetched prayer table for {} ({})", rounded, table.date.readable);

                let entry = CachedPrayerTable {
                    table: table.clone(),
                    timestamp: now.timestamp_millis(),
                    latitude: rounded.latitude,
                    longitude: rounded.longitude,
                    iso_date: iso_date(now.date_naive()),
                    method: Some(method),
                    tune,
                };
                if let Err(e) = storage::save_json(self.store.as_ref(), PRAYER_TABLE_KEY, &entry) {
                    warn!("Could not cache prayer table: {}", e);
                }
                Ok(table)
            }
            Err(PrayerError::Network(e)) => match cached {
                Some(entry) if entry.is_near(coord, self.policy.proximity_degrees) => {
                    warn!(
                        "Prayer table fetch failed ({}), using cached table from {}",
                        e, entry.iso_date
                    );
                    Ok(entry.table)
                }
                _ => Err(PrayerError::Network(e)),
            },
            Err(e) => Err(e),
        }
    }

    /// Table for a named city. Not cached.
    pub async fn get_prayer_times_by_city(
        &self,
        city: &str,
        country: &str,
        method: u8,
    ) -> Result<PrayerTable> {
        let path = format!("timingsByCity/{}", path_date(Local::now().date_naive()));
        let query = [
            ("city", city.to_string()),
            ("country", country.to_string()),
            ("method", method.to_string()),
        ];
        self.request(&path, &query).await
    }

    /// Table for a position on an explicit date. Not cached.
    pub async fn get_prayer_times_for_date(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
        method: u8,
    ) -> Result<PrayerTable> {
        let coord = Coordinate::checked(latitude, longitude)?;
        let rounded = Coordinate::new(
            round_coordinate(coord.latitude),
            round_coordinate(coord.longitude),
        );
        let path = format!("timings/{}", path_date(date));
        let query = [
            ("latitude", rounded.latitude.to_string()),
            ("longitude", rounded.longitude.to_string()),
            ("method", method.to_string()),
        ];
        let mut table = self.request(&path, &query).await?;
        table.meta.get_or_insert(rounded);
        Ok(table)
    }

    /// The persisted envelope, if any.
    pub fn cached_table(&self) -> Option<CachedPrayerTable> {
        storage::load_json(self.store.as_ref(), PRAYER_TABLE_KEY)
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.store.remove(PRAYER_TABLE_KEY)
    }

    async fn request(&self, path: &str, query: &[(&str, String)]) -> Result<PrayerTable> {
        let url = format!("{}/v1/{}", self.base_url, path);
        debug!("GET {}", url);
        let body = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_response(&body)
    }
}
