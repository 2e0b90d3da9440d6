//! Raw position fixes as reported by a positioning platform.

use core::fmt;
use core::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Coordinates of a single fix.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Coordinates {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub altitude: Option<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub altitude_accuracy: Option<f64>,
    /// Degrees clockwise from true north.
    #[cfg_attr(feature = "serde", serde(default))]
    pub heading: Option<f64>,
    /// Meters per second.
    #[cfg_attr(feature = "serde", serde(default))]
    pub speed: Option<f64>,
}

impl Coordinates {
    /// Coordinates with only latitude, longitude and accuracy set.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            altitude: None,
            altitude_accuracy: None,
            heading: None,
            speed: None,
        }
    }
}

/// A position fix with the time it was acquired.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position {
    pub coords: Coordinates,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
}

impl Position {
    /// A fix at the given coordinates, stamped now.
    #[must_use]
    pub fn now(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            coords: Coordinates::new(latitude, longitude, accuracy),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Options passed to a position request or watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    /// Ask the platform for its most accurate (and most expensive) fix.
    pub enable_high_accuracy: bool,
    /// How long the platform may take to produce a fix.
    pub timeout: Duration,
    /// Oldest cached fix the platform may return instead of a fresh one.
    pub maximum_age: Duration,
}

impl PositionOptions {
    /// Options used for live tracking: no cached fixes.
    #[must_use]
    pub fn tracking(high_accuracy: bool, timeout: Duration) -> Self {
        Self {
            enable_high_accuracy: high_accuracy,
            timeout,
            maximum_age: Duration::ZERO,
        }
    }
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self::tracking(false, Duration::from_secs(30))
    }
}

/// Why the platform failed to produce a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum PositionErrorCode {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
}

/// Failure reported by a position request or watch.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PositionError {
    pub code: PositionErrorCode,
    pub message: String,
}

impl PositionError {
    /// Create a position error.
    pub fn new(code: PositionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for PositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for PositionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracking_options_never_use_cache() {
        let opts = PositionOptions::tracking(true, Duration::from_secs(30));
        assert!(opts.enable_high_accuracy);
        assert_eq!(opts.maximum_age, Duration::ZERO);
        assert_eq!(opts.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_position_error_display() {
        let err = PositionError::new(PositionErrorCode::Timeout, "no fix in 30s");
        assert_eq!(err.to_string(), "Timeout: no fix in 30s");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_position_from_json() {
        let json = r#"{
            "coords": {"latitude": 51.5, "longitude": -0.12, "accuracy": 5.0},
            "timestamp": "2024-05-01T10:00:00Z"
        }"#;
        let position: Position = serde_json::from_str(json).unwrap();
        assert_eq!(position.coords.latitude, 51.5);
        assert_eq!(position.coords.altitude, None);
    }
}
