//! Host platform adapters for running the tracker from a terminal.

use async_trait::async_trait;

use waypost_core::{Environment, PermissionSource};
use waypost_types::{ConnectionCapabilities, PermissionState};

/// Environment facts of the machine the CLI runs on.
///
/// There is no screen, battery or worker runtime to speak of; only position
/// replay is available.
#[derive(Debug, Clone, Default)]
pub struct HostEnvironment;

impl HostEnvironment {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Environment for HostEnvironment {
    fn capabilities(&self) -> ConnectionCapabilities {
        ConnectionCapabilities {
            geolocation: true,
            ..ConnectionCapabilities::default()
        }
    }

    fn user_agent(&self) -> String {
        format!("waypost-cli/{}", env!("CARGO_PKG_VERSION"))
    }

    fn platform(&self) -> String {
        std::env::consts::OS.to_string()
    }

    fn language(&self) -> String {
        language_from_locale(std::env::var("LANG").ok().as_deref())
    }

    fn screen_resolution(&self) -> String {
        "0x0".to_string()
    }

    fn timezone(&self) -> String {
        std::env::var("TZ")
            .ok()
            .filter(|tz| !tz.is_empty())
            .unwrap_or_else(|| "UTC".to_string())
    }
}

/// `en_US.UTF-8` -> `en-US`; falls back to `en-US`.
fn language_from_locale(locale: Option<&str>) -> String {
    let Some(locale) = locale else {
        return "en-US".to_string();
    };
    let tag = locale.split(['.', '@']).next().unwrap_or_default();
    if tag.is_empty() || tag == "C" || tag == "POSIX" {
        return "en-US".to_string();
    }
    tag.replace('_', "-")
}

/// Replayed fixes need no consent.
#[derive(Debug, Clone, Default)]
pub struct HostPermissions;

#[async_trait]
impl PermissionSource for HostPermissions {
    async fn query(&self) -> PermissionState {
        PermissionState::Granted
    }
}
