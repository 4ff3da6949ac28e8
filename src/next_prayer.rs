//! # Next-Prayer Derivation
//!
//! Pure functions over a day's [`Timings`] and a wall-clock instant. Nothing here
//! touches the network or storage, so the countdown keeps working offline from
//! whatever table the session already holds.
//!
//! ## Interval Model
//! The six marks split the day into intervals. "Now" always sits in exactly one:
//! - before Fajr: the interval runs from yesterday's Isha to today's Fajr
//! - between two marks: from the earlier mark to the later one
//! - after Isha: from today's Isha to tomorrow's Fajr
//!
//! The percentage is how much of that interval has elapsed and drives the
//! progress indicator.

use crate::{NextPrayerInfo, Prayer, Timings};
use chrono::{Duration, Local, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tracing::debug;

/// One row of the day's table, ready for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PrayerMark {
    pub prayer: Prayer,
    pub name: &'static str,
    pub time: String,
    pub arabic_label: &'static str,
}

/// Parse a `"HH:MM"` mark. The service may append a zone, e.g. `"05:12 (BST)"`;
/// anything after the first token is ignored.
pub fn parse_clock(raw: &str) -> Option<NaiveTime> {
    let token = raw.split_whitespace().next()?;
    NaiveTime::parse_from_str(token, "%H:%M").ok()
}

/// True when every mark parses and the six are strictly increasing.
pub fn marks_ascending(timings: &Timings) -> bool {
    let parsed: Option<Vec<NaiveTime>> =
        Prayer::ALL.iter().map(|&p| parse_clock(timings.get(p))).collect();
    match parsed {
        Some(times) => times.windows(2).all(|w| w[0] < w[1]),
        None => false,
    }
}

/// Next prayer relative to the local clock. `None` when there is no table.
pub fn get_next_prayer(timings: Option<&Timings>) -> Option<NextPrayerInfo> {
    next_prayer_at(timings?, Local::now().naive_local())
}

/// Next prayer relative to `now`.
///
/// Returns `None` if any mark fails to parse as `"HH:MM"`.
pub fn next_prayer_at(timings: &Timings, now: NaiveDateTime) -> Option<NextPrayerInfo> {
    let today = now.date();
    let marks = Prayer::ALL
        .iter()
        .map(|&p| parse_clock(timings.get(p)).map(|t| (p, today.and_time(t))))
        .collect::<Option<Vec<(Prayer, NaiveDateTime)>>>()?;

    if !marks.windows(2).all(|w| w[0].1 < w[1].1) {
        debug!("Prayer marks are not in ascending order: {:?}", timings);
    }

    let (fajr_at, isha_at) = (marks[0].1, marks[5].1);

    let (prayer, at, interval_start) = match marks.iter().position(|(_, at)| *at > now) {
        Some(0) => (Prayer::Fajr, fajr_at, isha_at - Duration::days(1)),
        Some(i) => (marks[i].0, marks[i].1, marks[i - 1].1),
        None => (Prayer::Fajr, fajr_at + Duration::days(1), isha_at),
    };

    let remaining_minutes = (at - now).num_minutes().max(0);
    let time_until = format!("{}h {}m", remaining_minutes / 60, remaining_minutes % 60);

    let span = (at - interval_start).num_milliseconds() as f64;
    let elapsed = (now - interval_start).num_milliseconds() as f64;
    let percentage = if span > 0.0 {
        (elapsed / span * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    Some(NextPrayerInfo {
        prayer,
        name: prayer.name(),
        time: timings.get(prayer).to_string(),
        arabic_label: prayer.arabic_label(),
        time_until,
        percentage,
        interval_start,
        at,
    })
}

/// The six marks with their display labels, in order.
pub fn get_all_prayer_times(timings: &Timings) -> Vec<PrayerMark> {
    Prayer::ALL
        .iter()
        .map(|&prayer| PrayerMark {
            prayer,
            name: prayer.name(),
            time: timings.get(prayer).to_string(),
            arabic_label: prayer.arabic_label(),
        })
        .collect()
}
