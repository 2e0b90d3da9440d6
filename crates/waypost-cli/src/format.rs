//! Output formatting for samples, events and preferences.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde::Serialize;
use time::OffsetDateTime;
use time::macros::format_description;

use waypost_core::TrackingEvent;
use waypost_types::{FailedLocationRecord, LocationPreferences, LocationSample, SampleSource};

/// Serialize `value` as pretty JSON with a trailing newline.
pub fn as_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    Ok(json + "\n")
}

/// Serialize `value` as a single JSON line.
pub fn as_json_line<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value).context("Failed to serialize JSON")?;
    Ok(json + "\n")
}

/// `YYYY-MM-DD HH:MM:SS` in the timestamp's own offset.
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| ts.to_string())
}

fn source_label(source: SampleSource) -> &'static str {
    match source {
        SampleSource::Watch => "watch",
        SampleSource::Poll => "poll",
        SampleSource::Background => "background",
        SampleSource::Manual => "manual",
        _ => "other",
    }
}

/// Meters below 1 km, kilometers above.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{:.1} m", meters)
    } else {
        format!("{:.2} km", meters / 1000.0)
    }
}

/// One line per sample.
pub fn format_sample_line(sample: &LocationSample) -> String {
    let battery = sample
        .battery_level
        .map(|b| format!("  {}%", b))
        .unwrap_or_default();
    format!(
        "{}  {:>10.6}, {:>11.6}  ±{:.0}m  {}  {}{}",
        format_timestamp(sample.metadata.timestamp),
        sample.latitude,
        sample.longitude,
        sample.accuracy,
        sample.network_type,
        source_label(sample.metadata.source),
        battery
    )
}

/// Human-readable rendering of a tracking event.
pub fn format_event_line(event: &TrackingEvent) -> String {
    match event {
        TrackingEvent::TrackingStarted { session_id } => {
            format!("{} session {}", "started".green(), session_id)
        }
        TrackingEvent::TrackingStopped { session_id } => {
            format!("{} session {}", "stopped".yellow(), session_id)
        }
        TrackingEvent::LocationUpdated { sample } => {
            format!("{} {}", "sample ".cyan(), format_sample_line(sample))
        }
        TrackingEvent::Error { context, error } => {
            format!("{} [{}] {}", "error  ".red(), context, error)
        }
        TrackingEvent::PermissionChanged { state } => {
            format!("permission {}", state)
        }
        TrackingEvent::PreferencesUpdated { .. } => "preferences updated".to_string(),
        other => format!("{:?}", other.kind()),
    }
}

/// Queued samples, oldest first.
pub fn format_queue(records: &[FailedLocationRecord], capacity: usize) -> String {
    if records.is_empty() {
        return "Failure queue is empty.\n".to_string();
    }

    let mut out = format!(
        "{} queued sample(s) (capacity {}):\n",
        records.len(),
        capacity
    );
    for record in records {
        out.push_str(&format!(
            "  failed {}  session {}  {}\n",
            format_timestamp(record.failed_at),
            record.session_id,
            format_sample_line(&record.sample)
        ));
    }
    out
}

pub fn format_preferences(prefs: &LocationPreferences) -> String {
    let flag = |on: bool| if on { "on" } else { "off" };
    format!(
        "Tracking:            {}\n\
         Interval:            {}s\n\
         Background:          {}\n\
         High accuracy:       {}\n\
         Max duration:        {}s\n",
        flag(prefs.tracking_enabled),
        prefs.tracking_interval,
        flag(prefs.background_tracking_enabled),
        flag(prefs.high_accuracy_mode),
        prefs.max_tracking_duration
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use waypost_types::{NetworkType, Position};

    fn sample() -> LocationSample {
        let mut position = Position::now(51.5, -0.12, 8.0);
        position.timestamp = datetime!(2026-03-01 08:30:00 UTC);
        LocationSample::from_position(
            &position,
            "device-1",
            NetworkType::Wifi,
            Some(80),
            SampleSource::Poll,
        )
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(9.94), "9.9 m");
        assert_eq!(format_distance(343_556.0), "343.56 km");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(
            format_timestamp(datetime!(2026-03-01 08:30:05 UTC)),
            "2026-03-01 08:30:05"
        );
    }

    #[test]
    fn test_format_sample_line() {
        let line = format_sample_line(&sample());
        assert!(line.starts_with("2026-03-01 08:30:00"));
        assert!(line.contains("51.500000"));
        assert!(line.contains("-0.120000"));
        assert!(line.contains("±8m"));
        assert!(line.contains("poll"));
        assert!(line.ends_with("80%"));
    }

    #[test]
    fn test_format_queue() {
        assert_eq!(format_queue(&[], 100), "Failure queue is empty.\n");

        let record = FailedLocationRecord {
            sample: sample(),
            failed_at: datetime!(2026-03-01 08:31:00 UTC),
            session_id: "session-9".into(),
        };
        let out = format_queue(&[record], 100);
        assert!(out.starts_with("1 queued sample(s) (capacity 100)"));
        assert!(out.contains("session-9"));
    }

    #[test]
    fn test_format_preferences() {
        let out = format_preferences(&LocationPreferences::default());
        assert!(out.contains("Tracking:            off"));
        assert!(out.contains("Interval:            60s"));
        assert!(out.contains("Max duration:        28800s"));
    }

    #[test]
    fn test_json_line_is_single_line() {
        let line = as_json_line(&sample()).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains("\"deviceId\":\"device-1\""));
    }
}
