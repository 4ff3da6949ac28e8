//! # Terminal Rendering
//!
//! Renders a session snapshot as plain text for the CLI: the day's table with
//! the upcoming mark highlighted, a progress bar for the current interval, and
//! the Qibla bearing. Rendering builds a `String`; printing is the caller's job.

use crate::methods::{get_calculation_methods, IshaRule};
use crate::next_prayer::get_all_prayer_times;
use crate::qibla;
use crate::session::SessionView;
use std::fmt::Write;

const BAR_WIDTH: usize = 30;

/// `[#########.....................]` for a 0–100 percentage.
pub fn progress_bar(percentage: f64, width: usize) -> String {
    let filled = ((percentage.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

/// Eight-point compass name for a bearing in degrees.
pub fn compass_point(bearing: f64) -> &'static str {
    const POINTS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let index = ((bearing.rem_euclid(360.0) + 22.5) / 45.0) as usize % 8;
    POINTS[index]
}

pub fn render_view(view: &SessionView) -> String {
    let mut out = String::new();

    if let Some(location) = &view.location {
        let place = match (&location.city, &location.country) {
            (Some(city), Some(country)) => format!("{city}, {country}"),
            (Some(city), None) => city.clone(),
            _ => location.coordinate().to_string(),
        };
        let _ = writeln!(out, "📍 {}", place);
    }

    if let Some(error) = &view.error {
        let _ = writeln!(out, "⚠ {}", error);
    }

    let Some(table) = &view.prayer_times else {
        let _ = writeln!(out, "No prayer times available");
        return out;
    };

    let hijri = &table.date.hijri;
    let _ = writeln!(
        out,
        "{}  ·  {} {} {}\n",
        table.date.readable, hijri.date, hijri.month.en, hijri.year
    );

    let upcoming = view.next_prayer.as_ref().map(|n| n.prayer);
    for mark in get_all_prayer_times(&table.timings) {
        let marker = if Some(mark.prayer) == upcoming { "▶" } else { " " };
        let _ = writeln!(
            out,
            "{} {:<8} {:>5}  {}",
            marker, mark.name, mark.time, mark.arabic_label
        );
    }

    if let Some(next) = &view.next_prayer {
        let _ = writeln!(
            out,
            "\nNext: {} at {} (in {})\n{} {:.0}%",
            next.name,
            next.time,
            next.time_until,
            progress_bar(next.percentage, BAR_WIDTH),
            next.percentage
        );
    }

    if let Some(location) = &view.location {
        let bearing = qibla::calculate_qibla_direction(location.latitude, location.longitude);
        let _ = writeln!(
            out,
            "\nQibla: {:.1}° {}  ({:.0} km to Makkah)",
            bearing,
            compass_point(bearing),
            qibla::distance_to_kaaba_km(location.latitude, location.longitude)
        );
    }

    out
}

pub fn render_methods(selected: u8) -> String {
    let mut out = String::new();
    for method in get_calculation_methods() {
        let isha = match method.isha {
            IshaRule::Angle(angle) => format!("{angle}°"),
            IshaRule::MinutesAfterMaghrib(minutes) => format!("{minutes} min"),
        };
        let marker = if method.id == selected { "*" } else { " " };
        let _ = writeln!(
            out,
            "{}{:>3}  Fajr {:>4}°  Isha {:>6}  {} ({})",
            marker, method.id, method.fajr_angle, isha, method.name, method.region
        );
    }
    out
}

/// Print a session snapshot to stdout for development and headless use.
pub fn draw_ascii(view: &SessionView) {
    print!("{}", render_view(view));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::next_prayer::next_prayer_at;
    use crate::prayer_times::parse_response;
    use crate::session::Phase;
    use crate::ResolvedLocation;
    use chrono::NaiveDate;

    fn view() -> SessionView {
        let table = parse_response(
            r#"{"data":{
                "timings":{"Fajr":"05:00","Sunrise":"06:15","Dhuhr":"12:10",
                           "Asr":"15:30","Maghrib":"18:05","Isha":"19:30"},
                "date":{"readable":"10 Mar 2026","hijri":{"date":"21-09-1447",
                        "month":{"en":"Ramaḍān","ar":"رَمَضان"},"year":"1447"}}}}"#,
        )
        .unwrap();
        let now = NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(13, 0, 0)
            .unwrap();
        SessionView {
            phase: Phase::Ready,
            next_prayer: next_prayer_at(&table.timings, now),
            prayer_times: Some(table),
            loading: false,
            refreshing: false,
            error: None,
            location: Some(ResolvedLocation {
                latitude: 51.5074,
                longitude: -0.1278,
                city: Some("London".into()),
                country: Some("United Kingdom".into()),
                timestamp: None,
            }),
            calculation_method: 2,
        }
    }

    #[test]
    fn test_progress_bar_bounds() {
        assert_eq!(progress_bar(0.0, 4), "[....]");
        assert_eq!(progress_bar(50.0, 4), "[##..]");
        assert_eq!(progress_bar(150.0, 4), "[####]");
    }

    #[test]
    fn test_compass_points() {
        assert_eq!(compass_point(0.0), "N");
        assert_eq!(compass_point(58.5), "NE");
        assert_eq!(compass_point(119.0), "SE");
        assert_eq!(compass_point(350.0), "N");
    }

    #[test]
    fn test_render_highlights_next_prayer() {
        let text = render_view(&view());
        assert!(text.contains("London, United Kingdom"));
        assert!(text.contains("▶ Asr"));
        assert!(text.contains("Next: Asr at 15:30 (in 2h 30m)"));
        assert!(text.contains("Qibla: 119.0° SE"));
    }

    #[test]
    fn test_render_without_table() {
        let mut empty = view();
        empty.prayer_times = None;
        empty.error = Some("permission denied".into());
        let text = render_view(&empty);
        assert!(text.contains("⚠ permission denied"));
        assert!(text.contains("No prayer times available"));
    }

    #[test]
    fn test_render_methods_marks_selection() {
        let text = render_methods(4);
        assert!(text.lines().any(|l| l.starts_with("*  4")));
        assert!(text.contains("90 min"));
    }
}
