//! # Location Resolution
//!
//! [`GeoPositionProvider`] turns the platform's raw position fixes into
//! [`ResolvedLocation`]s: it asks for permission, takes a high-accuracy fix,
//! names the place through reverse geocoding, and persists the result.
//!
//! ## Caching
//! - A persisted location younger than 5 minutes is returned without touching
//!   the platform at all
//! - When permission is refused, or the fix or persistence fails, any cached
//!   location is returned regardless of age before the error surfaces
//!
//! ## Geocoding
//! Naming is cosmetic. A failed lookup yields the placeholder city
//! [`PLACEHOLDER_CITY`] and never fails the resolution.
//!
//! ## Watching
//! [`GeoPositionProvider::watch_location`] forwards every platform movement
//! report (after geocoding and caching it) to a callback. Whether the platform
//! can watch at all is a [`LocationCapabilities`] flag chosen at construction;
//! without it the watch degrades to one resolution delivered the same way.

use crate::config::Config;
use crate::storage::{self, Store, LOCATION_KEY};
use crate::{Coordinate, PrayerError, ResolvedLocation, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// City shown when reverse geocoding gives us nothing.
pub const PLACEHOLDER_CITY: &str = "Your Location";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Granularity of platform movement reports.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WatchOptions {
    pub distance_interval_meters: f64,
    pub time_interval: std::time::Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            distance_interval_meters: 10.0,
            time_interval: std::time::Duration::from_secs(5),
        }
    }
}

/// What the host platform can do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocationCapabilities {
    pub continuous_watch: bool,
}

/// The device's positioning capability.
#[async_trait]
pub trait LocationPlatform: Send + Sync {
    async fn request_permission(&self) -> Result<Permission>;

    async fn services_enabled(&self) -> bool;

    /// A single fix at the highest accuracy available.
    async fn current_position(&self) -> Result<Coordinate>;

    /// Stream of fixes at the requested granularity. Only called when the
    /// provider was built with `continuous_watch`.
    async fn watch_positions(&self, options: WatchOptions) -> Result<mpsc::Receiver<Coordinate>>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Place {
    pub city: Option<String>,
    pub country: Option<String>,
}

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, coord: Coordinate) -> Result<Place>;
}

/// A platform pinned to one position: manual coordinates, no watch support.
#[derive(Clone, Copy, Debug)]
pub struct FixedPosition {
    coord: Coordinate,
}

impl FixedPosition {
    pub fn new(coord: Coordinate) -> Self {
        Self { coord }
    }
}

#[async_trait]
impl LocationPlatform for FixedPosition {
    async fn request_permission(&self) -> Result<Permission> {
        Ok(Permission::Granted)
    }

    async fn services_enabled(&self) -> bool {
        true
    }

    async fn current_position(&self) -> Result<Coordinate> {
        Ok(self.coord)
    }

    async fn watch_positions(&self, _options: WatchOptions) -> Result<mpsc::Receiver<Coordinate>> {
        Err(PrayerError::Location(
            "continuous watch is not supported for a fixed position".to_string(),
        ))
    }
}

#[derive(Deserialize)]
struct NominatimReply {
    address: Option<NominatimAddress>,
}

#[derive(Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    suburb: Option<String>,
    country: Option<String>,
}

/// Reverse geocoding against a Nominatim-compatible service.
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

impl NominatimGeocoder {
    /// `user_agent` identifies this application; the service rejects requests without one.
    pub fn new(
        base_url: impl Into<String>,
        user_agent: &str,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.api.geocoder_url.clone(),
            &config.api.user_agent,
            std::time::Duration::from_secs(config.api.timeout_secs),
        )
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn reverse(&self, coord: Coordinate) -> Result<Place> {
        let url = format!("{}/reverse", self.base_url);
        let reply: NominatimReply = self
            .client
            .get(&url)
            .query(&[
                ("lat", coord.latitude.to_string()),
                ("lon", coord.longitude.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PrayerError::Geocoding(e.to_string()))?
            .json()
            .await
            .map_err(|e| PrayerError::Geocoding(e.to_string()))?;

        let address = reply
            .address
            .ok_or_else(|| PrayerError::Geocoding(format!("no address for {}", coord)))?;
        let city = address
            .city
            .or(address.town)
            .or(address.village)
            .or(address.municipality)
            .or(address.suburb);

        Ok(Place {
            city,
            country: address.country,
        })
    }
}

struct ProviderInner {
    platform: Arc<dyn LocationPlatform>,
    geocoder: Arc<dyn ReverseGeocoder>,
    store: Arc<dyn Store>,
    capabilities: LocationCapabilities,
    cache_ttl: Duration,
    watch: Mutex<Option<JoinHandle<()>>>,
}

/// Resolves and caches the user's position. Cheap to clone; clones share the
/// cache and the single active watch.
#[derive(Clone)]
pub struct GeoPositionProvider {
    inner: Arc<ProviderInner>,
}

impl GeoPositionProvider {
    pub fn new(
        platform: Arc<dyn LocationPlatform>,
        geocoder: Arc<dyn ReverseGeocoder>,
        store: Arc<dyn Store>,
        capabilities: LocationCapabilities,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                platform,
                geocoder,
                store,
                capabilities,
                cache_ttl,
                watch: Mutex::new(None),
            }),
        }
    }

    /// A provider for manually given coordinates. The cache is never used in
    /// place of `coord`, only written for the next unpinned run.
    pub fn pinned(
        coord: Coordinate,
        geocoder: Arc<dyn ReverseGeocoder>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self::new(
            Arc::new(FixedPosition::new(coord)),
            geocoder,
            store,
            LocationCapabilities {
                continuous_watch: false,
            },
            Duration::zero(),
        )
    }

    /// Current location, from cache when younger than the TTL.
    pub async fn get_current_location(&self) -> Result<ResolvedLocation> {
        self.current_location_at(Utc::now()).await
    }

    /// [`Self::get_current_location`] with an explicit clock.
    pub async fn current_location_at(&self, now: DateTime<Utc>) -> Result<ResolvedLocation> {
        let cached = self.cached_location();

        if let Some(location) = &cached {
            if let Some(ts) = location.timestamp {
                let age_ms = now.timestamp_millis() - ts;
                if (0..self.inner.cache_ttl.num_milliseconds()).contains(&age_ms) {
                    debug!("Location cache hit {}", location.coordinate());
                    return Ok(location.clone());
                }
            }
        }

        let permission = match self.inner.platform.request_permission().await {
            Ok(permission) => permission,
            Err(e) => {
                warn!("Location permission request failed: {}", e);
                Permission::Denied
            }
        };
        if permission == Permission::Denied {
            return match cached {
                Some(location) => {
                    warn!("Location permission denied, using cached location");
                    Ok(location)
                }
                None => Err(PrayerError::PermissionDenied),
            };
        }

        match self.resolve_fresh(now).await {
            Ok(location) => Ok(location),
            Err(e) => match cached {
                Some(location) => {
                    warn!("Location lookup failed ({}), using cached location", e);
                    Ok(location)
                }
                None => Err(e),
            },
        }
    }

    async fn resolve_fresh(&self, now: DateTime<Utc>) -> Result<ResolvedLocation> {
        if !self.inner.platform.services_enabled().await {
            return Err(PrayerError::ServicesDisabled);
        }
        let coord = self.inner.platform.current_position().await?;
        let location = self.describe(coord, now).await;
        if let Err(e) = storage::save_json(self.inner.store.as_ref(), LOCATION_KEY, &location) {
            warn!("Could not cache location: {}", e);
        }
        info!(
            "Resolved location {} ({})",
            coord,
            location.city.as_deref().unwrap_or(PLACEHOLDER_CITY)
        );
        Ok(location)
    }

    /// Attach a place name to a fix. Never fails.
    async fn describe(&self, coord: Coordinate, now: DateTime<Utc>) -> ResolvedLocation {
        let place = match self.inner.geocoder.reverse(coord).await {
            Ok(place) => place,
            Err(e) => {
                warn!("Reverse geocoding failed: {}", e);
                Place::default()
            }
        };

        ResolvedLocation {
            latitude: coord.latitude,
            longitude: coord.longitude,
            city: Some(place.city.unwrap_or_else(|| PLACEHOLDER_CITY.to_string())),
            country: place.country,
            timestamp: Some(now.timestamp_millis()),
        }
    }

    /// Report movements to `callback` until stopped. Replaces any active watch.
    ///
    /// Without continuous-watch capability a single resolution is delivered
    /// through `callback` and no subscription remains.
    pub async fn watch_location<F>(&self, options: WatchOptions, callback: F) -> Result<()>
    where
        F: Fn(ResolvedLocation) + Send + Sync + 'static,
    {
        self.stop_watching_location();

        if !self.inner.capabilities.continuous_watch {
            debug!("Continuous watch unsupported, delivering a single fix");
            let location = self.get_current_location().await?;
            callback(location);
            return Ok(());
        }

        if self.inner.platform.request_permission().await? == Permission::Denied {
            return Err(PrayerError::PermissionDenied);
        }
        let mut fixes = self.inner.platform.watch_positions(options).await?;

        let provider = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(coord) = fixes.recv().await {
                let location = provider.describe(coord, Utc::now()).await;
                if let Err(e) =
                    storage::save_json(provider.inner.store.as_ref(), LOCATION_KEY, &location)
                {
                    warn!("Could not cache watched location: {}", e);
                }
                callback(location);
            }
            debug!("Location watch stream ended");
        });

        let previous = self
            .inner
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        // a concurrent watch_location may have slipped in between
        if let Some(previous) = previous {
            previous.abort();
        }
        info!(
            "Watching location every {} m / {:?}",
            options.distance_interval_meters, options.time_interval
        );
        Ok(())
    }

    /// Release the active watch, if any. Safe to call repeatedly.
    pub fn stop_watching_location(&self) {
        let handle = self
            .inner
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Stopped location watch");
        }
    }

    pub fn is_watching(&self) -> bool {
        self.inner
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn cached_location(&self) -> Option<ResolvedLocation> {
        storage::load_json(self.inner.store.as_ref(), LOCATION_KEY)
    }

    pub fn clear_cache(&self) -> Result<()> {
        self.inner.store.remove(LOCATION_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use mockito::{Matcher, Server};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    struct FakePlatform {
        permission: Permission,
        services: bool,
        position: Option<Coordinate>,
        fixes_taken: AtomicUsize,
        watch_tx: Mutex<Option<mpsc::Sender<Coordinate>>>,
    }

    impl FakePlatform {
        fn at(coord: Coordinate) -> Self {
            Self {
                permission: Permission::Granted,
                services: true,
                position: Some(coord),
                fixes_taken: AtomicUsize::new(0),
                watch_tx: Mutex::new(None),
            }
        }

        fn sender(&self) -> mpsc::Sender<Coordinate> {
            self.watch_tx.lock().unwrap().clone().unwrap()
        }
    }

    #[async_trait]
    impl LocationPlatform for FakePlatform {
        async fn request_permission(&self) -> Result<Permission> {
            Ok(self.permission)
        }

        async fn services_enabled(&self) -> bool {
            self.services
        }

        async fn current_position(&self) -> Result<Coordinate> {
            self.fixes_taken.fetch_add(1, Ordering::SeqCst);
            self.position
                .ok_or_else(|| PrayerError::Location("no fix".to_string()))
        }

        async fn watch_positions(
            &self,
            _options: WatchOptions,
        ) -> Result<mpsc::Receiver<Coordinate>> {
            let (tx, rx) = mpsc::channel(8);
            *self.watch_tx.lock().unwrap() = Some(tx);
            Ok(rx)
        }
    }

    struct FakeGeocoder {
        place: Option<Place>,
    }

    #[async_trait]
    impl ReverseGeocoder for FakeGeocoder {
        async fn reverse(&self, _coord: Coordinate) -> Result<Place> {
            self.place
                .clone()
                .ok_or_else(|| PrayerError::Geocoding("offline".to_string()))
        }
    }

    fn makkah() -> Place {
        Place {
            city: Some("Makkah".into()),
            country: Some("Saudi Arabia".into()),
        }
    }

    fn provider_with(
        platform: Arc<FakePlatform>,
        place: Option<Place>,
        store: Arc<dyn Store>,
        continuous_watch: bool,
    ) -> GeoPositionProvider {
        GeoPositionProvider::new(
            platform,
            Arc::new(FakeGeocoder { place }),
            store,
            LocationCapabilities { continuous_watch },
            Duration::minutes(5),
        )
    }

    fn cached(store: &dyn Store, at: DateTime<Utc>) -> ResolvedLocation {
        let location = ResolvedLocation {
            latitude: 48.8566,
            longitude: 2.3522,
            city: Some("Paris".into()),
            country: Some("France".into()),
            timestamp: Some(at.timestamp_millis()),
        };
        storage::save_json(store, LOCATION_KEY, &location).unwrap();
        location
    }

    #[tokio::test]
    async fn test_recent_cache_skips_platform() {
        let now = Utc::now();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let saved = cached(store.as_ref(), now - Duration::minutes(4));
        let platform = Arc::new(FakePlatform::at(Coordinate::new(21.4225, 39.8262)));
        let provider = provider_with(platform.clone(), Some(makkah()), store, false);

        let location = provider.current_location_at(now).await.unwrap();
        assert_eq!(location, saved);
        assert_eq!(platform.fixes_taken.load(Ordering::SeqCst), 0);

        // past the TTL the platform is asked again
        let location = provider
            .current_location_at(now + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(location.city.as_deref(), Some("Makkah"));
        assert_eq!(platform.fixes_taken.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_stamped_in_the_future_is_stale() {
        let now = Utc::now();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        cached(store.as_ref(), now + Duration::hours(2));
        let platform = Arc::new(FakePlatform::at(Coordinate::new(21.4225, 39.8262)));
        let provider = provider_with(platform.clone(), Some(makkah()), store, false);

        let location = provider.current_location_at(now).await.unwrap();
        assert_eq!(location.city.as_deref(), Some("Makkah"));
        assert_eq!(platform.fixes_taken.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pinned_position_ignores_recent_cache() {
        let now = Utc::now();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        cached(store.as_ref(), now - Duration::minutes(1));
        let provider = GeoPositionProvider::pinned(
            Coordinate::new(21.4225, 39.8262),
            Arc::new(FakeGeocoder { place: None }),
            store,
        );

        let location = provider.current_location_at(now).await.unwrap();
        assert_eq!(location.coordinate(), Coordinate::new(21.4225, 39.8262));
        assert_eq!(provider.cached_location(), Some(location));
    }

    #[tokio::test]
    async fn test_fresh_resolution_is_persisted() {
        let now = Utc::now();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::at(Coordinate::new(21.4225, 39.8262)));
        let provider = provider_with(platform, Some(makkah()), store, false);

        let location = provider.current_location_at(now).await.unwrap();
        assert_eq!(location.country.as_deref(), Some("Saudi Arabia"));
        assert_eq!(location.timestamp, Some(now.timestamp_millis()));
        assert_eq!(provider.cached_location(), Some(location));
    }

    #[tokio::test]
    async fn test_geocoding_failure_uses_placeholder() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::at(Coordinate::new(0.0, -30.0)));
        let provider = provider_with(platform, None, store, false);

        let location = provider.get_current_location().await.unwrap();
        assert_eq!(location.city.as_deref(), Some(PLACEHOLDER_CITY));
        assert_eq!(location.country, None);
    }

    #[tokio::test]
    async fn test_permission_denied_falls_back_to_stale_cache() {
        let now = Utc::now();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut platform = FakePlatform::at(Coordinate::new(0.0, 0.0));
        platform.permission = Permission::Denied;
        let platform = Arc::new(platform);

        let provider = provider_with(platform.clone(), Some(makkah()), store.clone(), false);
        let err = provider.current_location_at(now).await.unwrap_err();
        assert!(matches!(err, PrayerError::PermissionDenied));

        let saved = cached(store.as_ref(), now - Duration::days(3));
        let location = provider.current_location_at(now).await.unwrap();
        assert_eq!(location, saved);
        assert_eq!(platform.fixes_taken.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_platform_failures_fall_back_to_cache() {
        let now = Utc::now();
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

        let mut disabled = FakePlatform::at(Coordinate::new(0.0, 0.0));
        disabled.services = false;
        let provider = provider_with(Arc::new(disabled), None, store.clone(), false);
        let err = provider.current_location_at(now).await.unwrap_err();
        assert!(matches!(err, PrayerError::ServicesDisabled));

        let mut no_fix = FakePlatform::at(Coordinate::new(0.0, 0.0));
        no_fix.position = None;
        let provider = provider_with(Arc::new(no_fix), None, store.clone(), false);
        assert!(matches!(
            provider.current_location_at(now).await,
            Err(PrayerError::Location(_))
        ));

        let saved = cached(store.as_ref(), now - Duration::hours(1));
        assert_eq!(provider.current_location_at(now).await.unwrap(), saved);
    }

    #[tokio::test]
    async fn test_watch_reports_and_replaces_previous() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::at(Coordinate::new(0.0, 0.0)));
        let provider = provider_with(platform.clone(), Some(makkah()), store, true);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let first_tx = tx.clone();
        provider
            .watch_location(WatchOptions::default(), move |loc| {
                let _ = first_tx.send(("first", loc));
            })
            .await
            .unwrap();
        let first_feed = platform.sender();
        assert!(provider.is_watching());

        first_feed.send(Coordinate::new(21.4, 39.8)).await.unwrap();
        let (tag, loc) = timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tag, "first");
        assert_eq!(loc.city.as_deref(), Some("Makkah"));
        assert_eq!(provider.cached_location().unwrap().latitude, 21.4);

        provider
            .watch_location(WatchOptions::default(), move |loc| {
                let _ = tx.send(("second", loc));
            })
            .await
            .unwrap();
        let second_feed = platform.sender();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(first_feed.is_closed(), "previous subscription was not released");

        second_feed.send(Coordinate::new(21.5, 39.9)).await.unwrap();
        let (tag, _) = timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tag, "second");

        provider.stop_watching_location();
        provider.stop_watching_location();
        assert!(!provider.is_watching());
    }

    #[tokio::test]
    async fn test_watch_without_capability_is_one_shot() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let platform = Arc::new(FakePlatform::at(Coordinate::new(21.4225, 39.8262)));
        let provider = provider_with(platform.clone(), Some(makkah()), store, false);

        let (tx, mut rx) = mpsc::unbounded_channel();
        provider
            .watch_location(WatchOptions::default(), move |loc| {
                let _ = tx.send(loc);
            })
            .await
            .unwrap();

        let loc = rx.recv().await.unwrap();
        assert_eq!(loc.city.as_deref(), Some("Makkah"));
        assert!(!provider.is_watching());
        assert!(platform.watch_tx.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nominatim_address_fallbacks() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("lat".into(), "50.1".into()),
                Matcher::UrlEncoded("lon".into(), "8.7".into()),
                Matcher::UrlEncoded("format".into(), "json".into()),
            ]))
            .match_header("user-agent", "prayer-tracker-test/1.0")
            .with_body(r#"{"address":{"town":"Bad Vilbel","country":"Deutschland"}}"#)
            .create_async()
            .await;

        let geocoder = NominatimGeocoder::new(
            server.url(),
            "prayer-tracker-test/1.0",
            std::time::Duration::from_secs(5),
        )
        .unwrap();
        let place = geocoder.reverse(Coordinate::new(50.1, 8.7)).await.unwrap();
        assert_eq!(place.city.as_deref(), Some("Bad Vilbel"));
        assert_eq!(place.country.as_deref(), Some("Deutschland"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_nominatim_errors_are_geocoding_errors() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/reverse")
            .match_query(Matcher::Any)
            .with_body(r#"{"error":"Unable to geocode"}"#)
            .create_async()
            .await;

        let geocoder =
            NominatimGeocoder::new(server.url(), "t", std::time::Duration::from_secs(5)).unwrap();
        let err = geocoder.reverse(Coordinate::new(0.0, -30.0)).await.unwrap_err();
        assert!(matches!(err, PrayerError::Geocoding(_)));
    }
}
