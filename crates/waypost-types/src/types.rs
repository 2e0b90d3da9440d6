//! Core data model for location tracking.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ValidationError;
use crate::position::Position;

/// Kind of network the device is currently attached to.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new network kinds
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum NetworkType {
    #[cfg_attr(feature = "serde", serde(rename = "wifi"))]
    Wifi,
    #[cfg_attr(feature = "serde", serde(rename = "cellular"))]
    Cellular,
    #[cfg_attr(feature = "serde", serde(rename = "4g"))]
    FourG,
    #[cfg_attr(feature = "serde", serde(rename = "5g"))]
    FiveG,
    #[cfg_attr(feature = "serde", serde(rename = "ethernet"))]
    Ethernet,
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "unknown"))]
    Unknown,
}

impl NetworkType {
    /// Interpret a raw connection type reported by the platform.
    ///
    /// Accepts both connection kinds (`wifi`, `ethernet`, ...) and effective
    /// types (`slow-2g`, `3g`, `4g`, ...). Anything unrecognised maps to
    /// [`NetworkType::Unknown`].
    ///
    /// # Examples
    ///
    /// ```
    /// use waypost_types::NetworkType;
    ///
    /// assert_eq!(NetworkType::from_platform("wifi"), NetworkType::Wifi);
    /// assert_eq!(NetworkType::from_platform("4G"), NetworkType::FourG);
    /// assert_eq!(NetworkType::from_platform("3g"), NetworkType::Cellular);
    /// assert_eq!(NetworkType::from_platform("bluetooth"), NetworkType::Unknown);
    /// ```
    #[must_use]
    pub fn from_platform(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "wifi" | "wi-fi" => NetworkType::Wifi,
            "ethernet" => NetworkType::Ethernet,
            "4g" => NetworkType::FourG,
            "5g" => NetworkType::FiveG,
            "cellular" | "slow-2g" | "2g" | "3g" => NetworkType::Cellular,
            _ => NetworkType::Unknown,
        }
    }

    /// Wire name of the network type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Wifi => "wifi",
            NetworkType::Cellular => "cellular",
            NetworkType::FourG => "4g",
            NetworkType::FiveG => "5g",
            NetworkType::Ethernet => "ethernet",
            NetworkType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the device running the tracker.
///
/// The `device_id` is generated once and persisted so it stays stable across
/// sessions and reloads.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct DeviceInfo {
    pub user_agent: String,
    pub platform: String,
    pub language: String,
    /// Screen size formatted as `WIDTHxHEIGHT`.
    pub screen_resolution: String,
    /// IANA timezone name, e.g. `Europe/Riga`.
    pub timezone: String,
    pub device_id: String,
}

/// Tracking preferences owned by the backend.
///
/// The client only caches the last value it fetched; every change round-trips
/// through the API.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct LocationPreferences {
    pub tracking_enabled: bool,
    /// Seconds between active position requests.
    pub tracking_interval: u32,
    pub background_tracking_enabled: bool,
    pub high_accuracy_mode: bool,
    /// Seconds after which a session stops on its own.
    pub max_tracking_duration: u32,
}

impl LocationPreferences {
    /// Smallest accepted tracking interval in seconds.
    pub const MIN_TRACKING_INTERVAL: u32 = 10;
    /// Largest accepted tracking interval in seconds.
    pub const MAX_TRACKING_INTERVAL: u32 = 3600;
    /// Smallest accepted maximum tracking duration in seconds.
    pub const MIN_TRACKING_DURATION: u32 = 300;
    /// Largest accepted maximum tracking duration in seconds.
    pub const MAX_TRACKING_DURATION: u32 = 86_400;

    /// Check that every bounded field is within range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range(
            "trackingInterval",
            self.tracking_interval,
            Self::MIN_TRACKING_INTERVAL,
            Self::MAX_TRACKING_INTERVAL,
        )?;
        check_range(
            "maxTrackingDuration",
            self.max_tracking_duration,
            Self::MIN_TRACKING_DURATION,
            Self::MAX_TRACKING_DURATION,
        )
    }

    /// Return a copy with the fields of `update` applied.
    #[must_use]
    pub fn merged(&self, update: &PreferencesUpdate) -> Self {
        Self {
            tracking_enabled: update.tracking_enabled.unwrap_or(self.tracking_enabled),
            tracking_interval: update.tracking_interval.unwrap_or(self.tracking_interval),
            background_tracking_enabled: update
                .background_tracking_enabled
                .unwrap_or(self.background_tracking_enabled),
            high_accuracy_mode: update.high_accuracy_mode.unwrap_or(self.high_accuracy_mode),
            max_tracking_duration: update
                .max_tracking_duration
                .unwrap_or(self.max_tracking_duration),
        }
    }
}

impl Default for LocationPreferences {
    fn default() -> Self {
        Self {
            tracking_enabled: false,
            tracking_interval: 60,
            background_tracking_enabled: false,
            high_accuracy_mode: false,
            max_tracking_duration: 28_800,
        }
    }
}

fn check_range(field: &'static str, actual: u32, min: u32, max: u32) -> Result<(), ValidationError> {
    if (min..=max).contains(&actual) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            min,
            max,
            actual,
        })
    }
}

/// Partial preference change; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct PreferencesUpdate {
    pub tracking_enabled: Option<bool>,
    pub tracking_interval: Option<u32>,
    pub background_tracking_enabled: Option<bool>,
    pub high_accuracy_mode: Option<bool>,
    pub max_tracking_duration: Option<u32>,
}

impl PreferencesUpdate {
    /// True when no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Where a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[non_exhaustive]
pub enum SampleSource {
    /// Continuous position watch.
    Watch,
    /// Periodic active position request.
    Poll,
    /// Sampled by the background worker.
    Background,
    /// Submitted directly by the application.
    Manual,
}

/// Free-form context attached to every sample.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SampleMetadata {
    /// When the platform produced the fix.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    pub source: SampleSource,
    /// Whether the sample was produced by the background worker.
    pub service_worker: bool,
}

/// A single location sample as delivered to the backend.
///
/// Samples are value objects: they are never mutated after creation, only
/// superseded by the next one.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub altitude: Option<f64>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub altitude_accuracy: Option<f64>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub heading: Option<f64>,
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub speed: Option<f64>,
    pub device_id: String,
    pub network_type: NetworkType,
    /// Battery charge 0-100, when the platform exposes it.
    #[cfg_attr(feature = "serde", serde(default, skip_serializing_if = "Option::is_none"))]
    pub battery_level: Option<u8>,
    pub is_background: bool,
    pub metadata: SampleMetadata,
}

impl LocationSample {
    /// Build a sample from a platform position fix.
    #[must_use]
    pub fn from_position(
        position: &Position,
        device_id: impl Into<String>,
        network_type: NetworkType,
        battery_level: Option<u8>,
        source: SampleSource,
    ) -> Self {
        let coords = &position.coords;
        Self {
            latitude: coords.latitude,
            longitude: coords.longitude,
            accuracy: coords.accuracy,
            altitude: coords.altitude,
            altitude_accuracy: coords.altitude_accuracy,
            heading: coords.heading,
            speed: coords.speed,
            device_id: device_id.into(),
            network_type,
            battery_level,
            is_background: matches!(source, SampleSource::Background),
            metadata: SampleMetadata {
                timestamp: position.timestamp,
                source,
                service_worker: matches!(source, SampleSource::Background),
            },
        }
    }
}

/// A server-tracked tracking interval.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct TrackingSession {
    /// Opaque identifier issued by the backend.
    pub session_id: String,
    pub device_info: DeviceInfo,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub started_at: OffsetDateTime,
}

/// A sample that could not be delivered, awaiting retry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct FailedLocationRecord {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub sample: LocationSample,
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub failed_at: OffsetDateTime,
    /// Session the sample belonged to when it failed.
    pub session_id: String,
}

/// Platform features detected once at initialisation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ConnectionCapabilities {
    pub geolocation: bool,
    pub service_worker: bool,
    pub background_sync: bool,
    pub battery: bool,
    pub network_info: bool,
}

/// Location permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not yet decided; the platform will prompt on the next request.
    #[default]
    Prompt,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
            PermissionState::Prompt => write!(f, "prompt"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::Coordinates;

    fn position() -> Position {
        Position {
            coords: Coordinates {
                latitude: 56.9496,
                longitude: 24.1052,
                accuracy: 12.0,
                altitude: Some(8.0),
                altitude_accuracy: None,
                heading: None,
                speed: Some(1.2),
            },
            timestamp: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_network_type_from_platform() {
        assert_eq!(NetworkType::from_platform("ethernet"), NetworkType::Ethernet);
        assert_eq!(NetworkType::from_platform(" 5g "), NetworkType::FiveG);
        assert_eq!(NetworkType::from_platform("slow-2g"), NetworkType::Cellular);
        assert_eq!(NetworkType::from_platform(""), NetworkType::Unknown);
    }

    #[test]
    fn test_preferences_validate_bounds() {
        let mut prefs = LocationPreferences::default();
        assert!(prefs.validate().is_ok());

        prefs.tracking_interval = 9;
        assert!(prefs.validate().is_err());
        prefs.tracking_interval = 3600;
        assert!(prefs.validate().is_ok());

        prefs.max_tracking_duration = 86_401;
        assert_eq!(
            prefs.validate(),
            Err(ValidationError::OutOfRange {
                field: "maxTrackingDuration",
                min: 300,
                max: 86_400,
                actual: 86_401,
            })
        );
    }

    #[test]
    fn test_preferences_merged_keeps_unset_fields() {
        let prefs = LocationPreferences::default();
        let update = PreferencesUpdate {
            tracking_interval: Some(30),
            high_accuracy_mode: Some(true),
            ..Default::default()
        };
        let merged = prefs.merged(&update);
        assert_eq!(merged.tracking_interval, 30);
        assert!(merged.high_accuracy_mode);
        assert_eq!(merged.tracking_enabled, prefs.tracking_enabled);
        assert_eq!(merged.max_tracking_duration, prefs.max_tracking_duration);
        assert!(PreferencesUpdate::default().is_empty());
        assert!(!update.is_empty());
    }

    #[test]
    fn test_sample_from_position() {
        let sample = LocationSample::from_position(
            &position(),
            "device_abc",
            NetworkType::Wifi,
            Some(80),
            SampleSource::Watch,
        );
        assert_eq!(sample.latitude, 56.9496);
        assert_eq!(sample.altitude, Some(8.0));
        assert_eq!(sample.device_id, "device_abc");
        assert!(!sample.is_background);
        assert!(!sample.metadata.service_worker);

        let background = LocationSample::from_position(
            &position(),
            "device_abc",
            NetworkType::Unknown,
            None,
            SampleSource::Background,
        );
        assert!(background.is_background);
        assert!(background.metadata.service_worker);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_sample_wire_format() {
        let sample = LocationSample::from_position(
            &position(),
            "device_abc",
            NetworkType::FourG,
            None,
            SampleSource::Poll,
        );
        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["deviceId"], "device_abc");
        assert_eq!(json["networkType"], "4g");
        assert_eq!(json["isBackground"], false);
        assert_eq!(json["metadata"]["source"], "poll");
        assert_eq!(json["metadata"]["serviceWorker"], false);
        assert!(json.get("batteryLevel").is_none());
        assert!(json.get("heading").is_none());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_failed_record_is_flat() {
        let record = FailedLocationRecord {
            sample: LocationSample::from_position(
                &position(),
                "device_abc",
                NetworkType::Wifi,
                Some(50),
                SampleSource::Watch,
            ),
            failed_at: OffsetDateTime::UNIX_EPOCH,
            session_id: "sess-1".to_string(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sessionId"], "sess-1");
        assert_eq!(json["latitude"], 56.9496);
        assert_eq!(json["failedAt"], "1970-01-01T00:00:00Z");

        let back: FailedLocationRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_preferences_wire_format() {
        let json = r#"{
            "trackingEnabled": true,
            "trackingInterval": 30,
            "backgroundTrackingEnabled": false,
            "highAccuracyMode": true,
            "maxTrackingDuration": 3600
        }"#;
        let prefs: LocationPreferences = serde_json::from_str(json).unwrap();
        assert!(prefs.tracking_enabled);
        assert_eq!(prefs.tracking_interval, 30);
        assert!(prefs.high_accuracy_mode);
    }
}
