//! Planning of per-prayer local alerts.
//!
//! Delivering alerts belongs to the host (desktop notifier, mobile OS, ...),
//! reached through [`AlertScheduler`]. This module decides *what* to schedule:
//! everything is cancelled, then one alert is scheduled for each enabled mark
//! that is still ahead of the clock.
//!
//! Scheduled ids live in an [`AlertBook`] owned by the caller.

use crate::next_prayer::parse_clock;
use crate::{Prayer, PrayerTable, Result};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use tracing::{debug, info};

/// One alert to hand to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrayerAlert {
    pub prayer: Prayer,
    pub at: NaiveDateTime,
    pub title: String,
    pub body: String,
}

/// Host-side alert delivery.
pub trait AlertScheduler {
    fn cancel_all(&mut self) -> Result<()>;

    /// Schedule one alert and return the host's id for it.
    fn schedule(&mut self, alert: &PrayerAlert) -> Result<String>;
}

/// Which alert id belongs to which prayer, as of the last reschedule.
#[derive(Clone, Debug, Default)]
pub struct AlertBook {
    ids: HashMap<Prayer, String>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_for(&self, prayer: Prayer) -> Option<&str> {
        self.ids.get(&prayer).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// The alerts `table` calls for at `now`. Prayers missing from `enabled`
/// count as disabled.
pub fn plan_alerts(
    table: &PrayerTable,
    enabled: &HashMap<Prayer, bool>,
    now: NaiveDateTime,
) -> Vec<PrayerAlert> {
    Prayer::ALL
        .iter()
        .filter(|p| enabled.get(*p).copied().unwrap_or(false))
        .filter_map(|&prayer| {
            let time = parse_clock(table.timings.get(prayer))?;
            let at = now.date().and_time(time);
            (at > now).then(|| PrayerAlert {
                prayer,
                at,
                title: format!("{} · {}", prayer.name(), prayer.arabic_label()),
                body: format!("It is time for {} ({})", prayer.name(), table.timings.get(prayer)),
            })
        })
        .collect()
}

/// Cancel every alert, then schedule the ones `table` calls for.
/// Returns how many were scheduled.
pub fn reschedule_alerts(
    book: &mut AlertBook,
    scheduler: &mut dyn AlertScheduler,
    table: &PrayerTable,
    enabled: &HashMap<Prayer, bool>,
    now: NaiveDateTime,
) -> Result<usize> {
    scheduler.cancel_all()?;
    book.ids.clear();

    for alert in plan_alerts(table, enabled, now) {
        let id = scheduler.schedule(&alert)?;
        debug!("Scheduled {} alert {} at {}", alert.prayer, id, alert.at);
        book.ids.insert(alert.prayer, id);
    }

    info!("Scheduled {} prayer alerts", book.len());
    Ok(book.len())
}
