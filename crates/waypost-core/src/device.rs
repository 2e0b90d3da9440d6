//! Device telemetry collector.
//!
//! Reads are side-effect free apart from persisting the device id the first
//! time it is needed. Nothing here fails: unreadable values degrade to
//! `None`/[`NetworkType::Unknown`] and are logged at debug level.

use std::sync::{Arc, Mutex, PoisonError};

use rand::Rng;
use tracing::{debug, warn};

use waypost_types::{DeviceInfo, KeyValueStore, NetworkType};

use crate::traits::Environment;

const DEVICE_ID_PREFIX: &str = "device_";
const DEVICE_ID_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a new correlation id such as `device_k3v9x0q2a`.
///
/// Not cryptographically strong; the id only correlates samples.
pub fn generate_device_id() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..DEVICE_ID_SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect();
    format!("{DEVICE_ID_PREFIX}{suffix}")
}

/// Collects [`DeviceInfo`], network type and battery level on demand.
pub struct DeviceTelemetry {
    environment: Arc<dyn Environment>,
    store: Arc<dyn KeyValueStore>,
    device_id_key: String,
    info: Mutex<Option<DeviceInfo>>,
}

impl std::fmt::Debug for DeviceTelemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTelemetry")
            .field("device_id_key", &self.device_id_key)
            .finish_non_exhaustive()
    }
}

impl DeviceTelemetry {
    pub fn new(
        environment: Arc<dyn Environment>,
        store: Arc<dyn KeyValueStore>,
        device_id_key: impl Into<String>,
    ) -> Self {
        Self {
            environment,
            store,
            device_id_key: device_id_key.into(),
            info: Mutex::new(None),
        }
    }

    /// Snapshot of the device, created on first call and reused afterwards.
    pub fn device_info(&self) -> DeviceInfo {
        let mut cached = self.info.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(info) = cached.as_ref() {
            return info.clone();
        }

        let info = DeviceInfo {
            user_agent: self.environment.user_agent(),
            platform: self.environment.platform(),
            language: self.environment.language(),
            screen_resolution: self.environment.screen_resolution(),
            timezone: self.environment.timezone(),
            device_id: self.load_or_create_device_id(),
        };
        *cached = Some(info.clone());
        info
    }

    /// The stable device id.
    pub fn device_id(&self) -> String {
        self.device_info().device_id
    }

    /// Connection type, `Unknown` when the platform does not report one.
    pub fn network_type(&self) -> NetworkType {
        self.environment
            .connection_type()
            .map(|raw| NetworkType::from_platform(&raw))
            .unwrap_or_default()
    }

    /// Battery charge 0-100, `None` when unavailable.
    pub async fn battery_level(&self) -> Option<u8> {
        match self.environment.battery_level().await {
            Ok(Some(fraction)) if fraction.is_finite() => {
                Some((fraction.clamp(0.0, 1.0) * 100.0).round() as u8)
            }
            Ok(_) => None,
            Err(e) => {
                debug!("Battery level unavailable: {}", e);
                None
            }
        }
    }

    fn load_or_create_device_id(&self) -> String {
        match self.store.get(&self.device_id_key) {
            Ok(Some(id)) if !id.is_empty() => return id,
            Ok(_) => {}
            Err(e) => warn!("Could not read device id: {}", e),
        }

        let id = generate_device_id();
        if let Err(e) = self.store.set(&self.device_id_key, &id) {
            // Still usable for this process lifetime
            warn!("Could not persist device id: {}", e);
        } else {
            debug!("Generated device id {}", id);
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEnvironment;
    use waypost_types::MemoryStore;

    fn telemetry(env: Arc<MockEnvironment>, store: Arc<MemoryStore>) -> DeviceTelemetry {
        DeviceTelemetry::new(env, store, "device_id")
    }

    #[test]
    fn test_generate_device_id_format() {
        let id = generate_device_id();
        assert!(id.starts_with("device_"));
        assert_eq!(id.len(), "device_".len() + 9);
        assert!(
            id["device_".len()..]
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
        );
        assert_ne!(generate_device_id(), generate_device_id());
    }

    #[test]
    fn test_device_id_is_persisted_and_stable() {
        let store = Arc::new(MemoryStore::new());
        let env = Arc::new(MockEnvironment::new());

        let first = telemetry(Arc::clone(&env), Arc::clone(&store)).device_id();
        let second = telemetry(env, Arc::clone(&store)).device_id();

        assert_eq!(first, second);
        assert_eq!(store.get("device_id").unwrap(), Some(first));
    }

    #[test]
    fn test_device_info_reads_environment() {
        let telemetry = telemetry(Arc::new(MockEnvironment::new()), Arc::new(MemoryStore::new()));
        let info = telemetry.device_info();
        assert_eq!(info.platform, "test");
        assert_eq!(info.screen_resolution, "1920x1080");
        assert_eq!(info, telemetry.device_info());
    }

    #[test]
    fn test_network_type_fallback() {
        let env = Arc::new(MockEnvironment::new());
        let telemetry = telemetry(Arc::clone(&env), Arc::new(MemoryStore::new()));
        assert_eq!(telemetry.network_type(), NetworkType::Unknown);

        env.set_connection_type(Some("4g"));
        assert_eq!(telemetry.network_type(), NetworkType::FourG);
    }

    #[tokio::test]
    async fn test_battery_level_degrades_to_none() {
        let env = Arc::new(MockEnvironment::new());
        let telemetry = telemetry(Arc::clone(&env), Arc::new(MemoryStore::new()));
        assert_eq!(telemetry.battery_level().await, None);

        env.set_battery(Some(0.876));
        assert_eq!(telemetry.battery_level().await, Some(88));

        env.set_battery_fails(true);
        assert_eq!(telemetry.battery_level().await, None);
    }
}
