//! Tracker configuration.
//!
//! Every constant the tracking pipeline depends on lives in [`TrackerConfig`]
//! so it can be tuned per deployment. Defaults: 10 m significance
//! threshold, 1 s debounce, 30 s position timeout, 3 delivery attempts with
//! 1 s/2 s backoff, and a 100-entry failure queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::retry::RetryConfig;

/// Storage key holding the persisted device id.
pub const DEVICE_ID_KEY: &str = "waypost.device_id";

/// Storage key holding the persisted failure queue.
pub const FAILED_LOCATIONS_KEY: &str = "waypost.failed_locations";

/// Well-known URL of the background worker script.
pub const WORKER_SCRIPT_URL: &str = "/location-worker.js";

/// Configuration for [`LocationTracker`](crate::LocationTracker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Minimum movement in meters for a sample to be delivered.
    pub distance_threshold_m: f64,
    /// Raw position updates within this window collapse to the last one.
    #[serde(with = "duration_ms")]
    pub debounce: Duration,
    /// How long the platform may take to produce a fix while tracking.
    #[serde(with = "duration_ms")]
    pub position_timeout: Duration,
    /// Timeout of the low-accuracy request used to trigger the permission prompt.
    #[serde(with = "duration_ms")]
    pub permission_probe_timeout: Duration,
    /// Cached fix age accepted by the permission-prompt request.
    #[serde(with = "duration_ms")]
    pub permission_probe_max_age: Duration,
    /// Retry policy for session start and sample delivery.
    pub retry: RetryConfig,
    /// Maximum number of records kept in the failure queue.
    pub failure_queue_capacity: usize,
    /// Storage key of the device id.
    pub device_id_key: String,
    /// Storage key of the failure queue.
    pub failure_queue_key: String,
    /// Background worker script URL.
    pub worker_script_url: String,
    /// Background worker scope.
    pub worker_scope: String,
    /// How long a registered worker may take to become ready.
    #[serde(with = "duration_ms")]
    pub worker_ready_timeout: Duration,
    /// Drain the failure queue whenever connectivity comes back.
    pub retry_on_reconnect: bool,
    /// Capacity of the broadcast channel behind the event bus.
    pub event_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            distance_threshold_m: waypost_types::geo::SIGNIFICANT_DISTANCE_M,
            debounce: Duration::from_millis(1000),
            position_timeout: Duration::from_secs(30),
            permission_probe_timeout: Duration::from_secs(10),
            permission_probe_max_age: Duration::from_secs(24 * 60 * 60),
            retry: RetryConfig::default(),
            failure_queue_capacity: 100,
            device_id_key: DEVICE_ID_KEY.to_string(),
            failure_queue_key: FAILED_LOCATIONS_KEY.to_string(),
            worker_script_url: WORKER_SCRIPT_URL.to_string(),
            worker_scope: "/".to_string(),
            worker_ready_timeout: Duration::from_secs(10),
            retry_on_reconnect: true,
            event_capacity: 100,
        }
    }
}

impl TrackerConfig {
    /// Validate the configuration and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if !self.distance_threshold_m.is_finite() || self.distance_threshold_m < 0.0 {
            return Err(Error::invalid_config(
                "distance_threshold_m must be a non-negative number",
            ));
        }
        if self.debounce.is_zero() {
            return Err(Error::invalid_config("debounce must be > 0"));
        }
        if self.position_timeout.is_zero() {
            return Err(Error::invalid_config("position_timeout must be > 0"));
        }
        if self.worker_ready_timeout.is_zero() {
            return Err(Error::invalid_config("worker_ready_timeout must be > 0"));
        }
        if self.failure_queue_capacity == 0 {
            return Err(Error::invalid_config("failure_queue_capacity must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        if self.device_id_key.is_empty() || self.failure_queue_key.is_empty() {
            return Err(Error::invalid_config("storage keys cannot be empty"));
        }
        if self.device_id_key == self.failure_queue_key {
            return Err(Error::invalid_config(
                "device_id_key and failure_queue_key must differ",
            ));
        }
        self.retry.validate()
    }
}

/// Serialise a [`Duration`] as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Serialise an optional [`Duration`] as whole milliseconds.
pub(crate) mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.distance_threshold_m, 10.0);
        assert_eq!(config.debounce, Duration::from_millis(1000));
        assert_eq!(config.failure_queue_capacity, 100);
        assert_eq!(config.worker_scope, "/");
        assert_eq!(config.worker_ready_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = TrackerConfig {
            failure_queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = TrackerConfig {
            distance_threshold_m: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TrackerConfig {
            worker_ready_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = TrackerConfig {
            failure_queue_key: DEVICE_ID_KEY.to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let json = serde_json::to_value(TrackerConfig::default()).unwrap();
        assert_eq!(json["debounce"], 1000);
        assert_eq!(json["position_timeout"], 30_000);
        assert_eq!(json["worker_ready_timeout"], 10_000);
        assert_eq!(json["retry"]["base_delay"], 1000);
        assert!(json["retry"].get("max_delay").is_none());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TrackerConfig =
            serde_json::from_str(r#"{"debounce": 250, "retry": {"max_attempts": 5}}"#).unwrap();
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(1000));
        assert_eq!(config.failure_queue_capacity, 100);
    }
}
