//! WebAssembly bindings for waypost.
//!
//! Exposes the distance filter and preference validation to JavaScript, and
//! a [`LocalStorage`] store so the shared data model can be persisted in the
//! browser.

mod storage;

use wasm_bindgen::prelude::*;

use waypost_types::geo::{self, SIGNIFICANT_DISTANCE_M};
use waypost_types::{FailedLocationRecord, KeyValueStore, LocationPreferences};

pub use storage::LocalStorage;

/// Initialize the WASM module (called automatically)
#[wasm_bindgen(start)]
pub fn init() {
    log("waypost WASM module initialized");
}

/// Great-circle distance in meters between two points.
#[wasm_bindgen(js_name = distanceMeters)]
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    geo::distance_m(&(lat1, lon1), &(lat2, lon2))
}

/// Whether a candidate point is far enough from the previous one to be
/// reported. With no previous point (either coordinate missing) this is
/// always `true`.
#[wasm_bindgen(js_name = hasChangedSignificantly)]
pub fn has_changed_significantly(
    prev_lat: Option<f64>,
    prev_lon: Option<f64>,
    lat: f64,
    lon: f64,
) -> bool {
    let previous = prev_lat.zip(prev_lon);
    geo::has_changed_significantly(previous.as_ref(), &(lat, lon))
}

/// The significance threshold in meters.
#[wasm_bindgen(js_name = significantDistanceMeters)]
pub fn significant_distance_meters() -> f64 {
    SIGNIFICANT_DISTANCE_M
}

/// Check a preferences object (as JSON) against the accepted bounds.
#[wasm_bindgen(js_name = validatePreferences)]
pub fn validate_preferences(json: &str) -> Result<(), JsValue> {
    check_preferences(json).map_err(|e| JsValue::from_str(&e))
}

/// Number of samples waiting in the failure queue persisted under `key`.
#[wasm_bindgen(js_name = queuedSampleCount)]
pub fn queued_sample_count(key: &str) -> Result<u32, JsValue> {
    let raw = LocalStorage::new()
        .get(key)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;
    Ok(count_records(raw.as_deref()) as u32)
}

/// Log a message to the browser console
#[wasm_bindgen]
pub fn log(message: &str) {
    web_sys::console::log_1(&message.into());
}

fn check_preferences(json: &str) -> Result<(), String> {
    let prefs: LocationPreferences =
        serde_json::from_str(json).map_err(|e| format!("invalid preferences: {}", e))?;
    prefs.validate().map_err(|e| e.to_string())
}

/// A missing or unreadable list counts as empty.
fn count_records(raw: Option<&str>) -> usize {
    raw.and_then(|raw| serde_json::from_str::<Vec<FailedLocationRecord>>(raw).ok())
        .map_or(0, |records| records.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_meters() {
        let d = distance_meters(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((d - 343_556.0).abs() < 1_000.0);
        assert_eq!(distance_meters(10.0, 20.0, 10.0, 20.0), 0.0);
    }

    #[test]
    fn test_has_changed_significantly() {
        assert!(has_changed_significantly(None, None, 1.0, 1.0));
        assert!(has_changed_significantly(Some(1.0), None, 1.0, 1.0));
        assert!(!has_changed_significantly(Some(51.5), Some(-0.12), 51.50005, -0.12));
        assert!(has_changed_significantly(Some(51.5), Some(-0.12), 51.5002, -0.12));
    }

    #[test]
    fn test_check_preferences() {
        let ok = r#"{"trackingEnabled":true,"trackingInterval":60,
            "backgroundTrackingEnabled":false,"highAccuracyMode":true,
            "maxTrackingDuration":3600}"#;
        assert!(check_preferences(ok).is_ok());

        let too_fast = ok.replace("\"trackingInterval\":60", "\"trackingInterval\":5");
        let err = check_preferences(&too_fast).unwrap_err();
        assert!(err.contains("between 10 and 3600"));

        assert!(check_preferences("not json").is_err());
    }

    #[test]
    fn test_count_records() {
        assert_eq!(count_records(None), 0);
        assert_eq!(count_records(Some("garbage")), 0);
        assert_eq!(count_records(Some("[]")), 0);
    }
}
