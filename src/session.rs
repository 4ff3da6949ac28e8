//! # Prayer Session
//!
//! [`PrayerSession`] is the stateful consumer of the location and schedule
//! providers. It owns what the presentation layer shows and keeps it current:
//!
//! - **Mount**: load the method preference, then resolve location → fetch
//!   table → derive next prayer, with the loading flag raised
//! - **Tick** (every 60 s): recompute the next prayer from the held table, no I/O
//! - **App resume**: the full sequence again, silently (data stays on screen)
//! - **Location watch**: a silent refetch only when the user moved more than
//!   1 km from where the held table was computed
//! - **Method change**: persist the preference, then a full visible refresh
//!
//! ## Overlapping Refreshes
//! Refresh triggers are not coalesced. A refresh already in flight is never
//! cancelled; every one that completes writes its result, so the last to
//! finish wins. State lives behind a mutex that is never held across an
//! `.await`.
//!
//! ## Lifecycle
//! [`PrayerSession::start`] spawns the ticker, the app-event listener and the
//! location watch. [`PrayerSession::teardown`] releases each of them on its
//! own; failing to release one does not keep the others alive. Spawned tasks
//! hold only weak references, so dropping every session handle also ends them.

use crate::bearing;
use crate::config::Config;
use crate::location::{GeoPositionProvider, WatchOptions};
use crate::next_prayer::next_prayer_at;
use crate::prayer_times::{TimeTableProvider, TimingAdjustments};
use crate::storage::{self, Store, METHOD_KEY};
use crate::{Coordinate, NextPrayerInfo, PrayerTable, ResolvedLocation, Result};
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Host application lifecycle notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppEvent {
    Foreground,
    Background,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
    Error,
}

/// Everything the presentation layer reads.
#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
    pub phase: Phase,
    pub prayer_times: Option<PrayerTable>,
    pub loading: bool,
    /// A silent refresh is in flight
    pub refreshing: bool,
    pub error: Option<String>,
    pub next_prayer: Option<NextPrayerInfo>,
    pub location: Option<ResolvedLocation>,
    pub calculation_method: u8,
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub tick: std::time::Duration,
    pub refetch_threshold_km: f64,
    pub watch: WatchOptions,
    pub adjustments: Option<TimingAdjustments>,
    pub default_method: u8,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            tick: std::time::Duration::from_secs(60),
            refetch_threshold_km: 1.0,
            watch: WatchOptions::default(),
            adjustments: None,
            default_method: crate::methods::DEFAULT_METHOD,
        }
    }
}

impl SessionSettings {
    /// A zero `tick_secs` falls back to the default tick.
    pub fn from_config(config: &Config) -> Self {
        let tick = match config.session.tick_secs {
            0 => {
                let tick = Self::default().tick;
                warn!("session.tick_secs must be positive, using {}s", tick.as_secs());
                tick
            }
            secs => std::time::Duration::from_secs(secs),
        };
        Self {
            tick,
            refetch_threshold_km: config.location.refetch_threshold_km,
            watch: WatchOptions {
                distance_interval_meters: config.location.watch_distance_meters,
                time_interval: std::time::Duration::from_secs(config.location.watch_interval_secs),
            },
            adjustments: config.schedule.adjustments,
            default_method: config.schedule.default_method,
        }
    }
}

/// Whether a move to `new` warrants refetching a table computed at `reference`.
pub fn should_refetch(reference: Option<Coordinate>, new: Coordinate, threshold_km: f64) -> bool {
    match reference {
        Some(reference) => bearing::distance_km(reference, new) > threshold_km,
        None => true,
    }
}

struct SessionState {
    phase: Phase,
    loading: usize,
    refreshing: usize,
    prayer_times: Option<PrayerTable>,
    next_prayer: Option<NextPrayerInfo>,
    location: Option<ResolvedLocation>,
    error: Option<String>,
    method: u8,
}

#[derive(Default)]
struct SessionTasks {
    ticker: Option<JoinHandle<()>>,
    app_events: Option<JoinHandle<()>>,
}

struct SessionInner {
    location: GeoPositionProvider,
    schedule: TimeTableProvider,
    store: Arc<dyn Store>,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    tasks: Mutex<SessionTasks>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to one running prayer session. Clones share state.
#[derive(Clone)]
pub struct PrayerSession {
    inner: Arc<SessionInner>,
}

impl PrayerSession {
    pub fn new(
        location: GeoPositionProvider,
        schedule: TimeTableProvider,
        store: Arc<dyn Store>,
        settings: SessionSettings,
    ) -> Self {
        let method = settings.default_method;
        Self {
            inner: Arc::new(SessionInner {
                location,
                schedule,
                store,
                settings,
                state: Mutex::new(SessionState {
                    phase: Phase::Idle,
                    loading: 0,
                    refreshing: 0,
                    prayer_times: None,
                    next_prayer: None,
                    location: None,
                    error: None,
                    method,
                }),
                tasks: Mutex::new(SessionTasks::default()),
            }),
        }
    }

    fn from_weak(weak: &Weak<SessionInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn view(&self) -> SessionView {
        let state = lock(&self.inner.state);
        SessionView {
            phase: state.phase,
            prayer_times: state.prayer_times.clone(),
            loading: state.loading > 0,
            refreshing: state.refreshing > 0,
            error: state.error.clone(),
            next_prayer: state.next_prayer.clone(),
            location: state.location.clone(),
            calculation_method: state.method,
        }
    }

    /// Load the stored method preference, then run a visible refresh.
    pub async fn mount(&self) {
        let store = self.inner.store.as_ref();
        let method = match store.get(METHOD_KEY) {
            Ok(Some(_)) => storage::load_calculation_method(store),
            _ => self.inner.settings.default_method,
        };
        lock(&self.inner.state).method = method;
        self.load(false, None).await;
    }

    /// User-triggered refresh; raises the loading flag.
    pub async fn refresh(&self) {
        self.load(false, None).await;
    }

    pub async fn on_app_resume(&self) {
        debug!("App resumed, refreshing silently");
        self.load(true, None).await;
    }

    /// React to a watched position. Returns whether a refetch ran.
    pub async fn on_location_update(&self, location: ResolvedLocation) -> bool {
        let reference = {
            let state = lock(&self.inner.state);
            state
                .prayer_times
                .as_ref()
                .and_then(|t| t.meta)
                .or_else(|| state.location.as_ref().map(ResolvedLocation::coordinate))
        };

        if !should_refetch(
            reference,
            location.coordinate(),
            self.inner.settings.refetch_threshold_km,
        ) {
            debug!("Ignoring small move to {}", location.coordinate());
            return false;
        }

        info!("Moved to {}, refetching prayer table", location.coordinate());
        self.load(true, Some(location)).await;
        true
    }

    /// Persist a new method and refresh visibly.
    pub async fn set_calculation_method(&self, id: u8) -> Result<()> {
        storage::save_calculation_method(self.inner.store.as_ref(), id)?;
        lock(&self.inner.state).method = id;
        self.load(false, None).await;
        Ok(())
    }

    /// Recompute the next prayer from the held table.
    pub fn tick(&self) {
        self.tick_at(Local::now().naive_local());
    }

    pub fn tick_at(&self, now: NaiveDateTime) {
        let mut state = lock(&self.inner.state);
        let next = state
            .prayer_times
            .as_ref()
            .and_then(|t| next_prayer_at(&t.timings, now));
        state.next_prayer = next;
    }

    /// `location` skips resolution and fetches for that position directly.
    async fn load(&self, silent: bool, location: Option<ResolvedLocation>) {
        let method = {
            let mut state = lock(&self.inner.state);
            if silent {
                state.refreshing += 1;
            } else {
                state.loading += 1;
                state.phase = Phase::Loading;
                state.error = None;
            }
            state.method
        };

        let outcome = self.fetch(method, location).await;

        let mut state = lock(&self.inner.state);
        if silent {
            state.refreshing = state.refreshing.saturating_sub(1);
        } else {
            state.loading = state.loading.saturating_sub(1);
        }
        // a visible load still in flight keeps the phase at Loading
        let settled = state.loading == 0;
        match outcome {
            Ok((location, table)) => {
                state.next_prayer = next_prayer_at(&table.timings, Local::now().naive_local());
                state.location = Some(location);
                state.prayer_times = Some(table);
                state.error = None;
                if settled {
                    state.phase = Phase::Ready;
                }
            }
            Err(e) => {
                warn!("Prayer refresh failed: {}", e);
                state.error = Some(e.to_string());
                if settled {
                    state.phase = Phase::Error;
                }
            }
        }
    }

    async fn fetch(
        &self,
        method: u8,
        location: Option<ResolvedLocation>,
    ) -> Result<(ResolvedLocation, PrayerTable)> {
        let location = match location {
            Some(location) => location,
            None => self.inner.location.get_current_location().await?,
        };
        let table = self
            .inner
            .schedule
            .get_prayer_times_by_coordinates(
                location.latitude,
                location.longitude,
                method,
                self.inner.settings.adjustments.as_ref(),
            )
            .await?;
        Ok((location, table))
    }

    /// Spawn the ticker and app-event listener and begin watching location.
    ///
    /// A watch that cannot start is logged; the session keeps ticking.
    pub async fn start(&self, mut app_events: mpsc::Receiver<AppEvent>) {
        let tick = self.inner.settings.tick;
        let weak = Arc::downgrade(&self.inner);
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match PrayerSession::from_weak(&weak) {
                    Some(session) => session.tick(),
                    None => break,
                }
            }
        });

        let weak = Arc::downgrade(&self.inner);
        let listener = tokio::spawn(async move {
            while let Some(event) = app_events.recv().await {
                if event != AppEvent::Foreground {
                    continue;
                }
                match PrayerSession::from_weak(&weak) {
                    Some(session) => session.on_app_resume().await,
                    None => break,
                }
            }
        });

        let previous = {
            let mut tasks = lock(&self.inner.tasks);
            (
                tasks.ticker.replace(ticker),
                tasks.app_events.replace(listener),
            )
        };
        if let Some(old) = previous.0 {
            old.abort();
        }
        if let Some(old) = previous.1 {
            old.abort();
        }

        let weak = Arc::downgrade(&self.inner);
        let watch = self
            .inner
            .location
            .watch_location(self.inner.settings.watch, move |location| {
                if let Some(session) = PrayerSession::from_weak(&weak) {
                    tokio::spawn(async move {
                        session.on_location_update(location).await;
                    });
                }
            })
            .await;
        if let Err(e) = watch {
            warn!("Location watch unavailable: {}", e);
        }
    }

    /// Whether the ticker or app-event listener is still running.
    pub fn is_started(&self) -> bool {
        let tasks = lock(&self.inner.tasks);
        let running = |h: &Option<JoinHandle<()>>| h.as_ref().is_some_and(|h| !h.is_finished());
        running(&tasks.ticker) || running(&tasks.app_events)
    }

    /// Stop the ticker, the app-event listener and the location watch.
    pub fn teardown(&self) {
        let (ticker, listener) = {
            let mut tasks = lock(&self.inner.tasks);
            (tasks.ticker.take(), tasks.app_events.take())
        };

        if let Some(ticker) = ticker {
            ticker.abort();
            debug!("Stopped next-prayer ticker");
        }
        if let Some(listener) = listener {
            listener.abort();
            debug!("Stopped app-event listener");
        }
        self.inner.location.stop_watching_location();
    }
}
