//! Capability and permission probe.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use waypost_types::{ConnectionCapabilities, PermissionState, PositionErrorCode, PositionOptions};

use crate::error::{Error, Result};
use crate::events::{EventBus, TrackingEvent};
use crate::traits::{Environment, PermissionSource, PositionSource};

/// Detects platform features and negotiates location permission.
pub struct PermissionProbe {
    environment: Arc<dyn Environment>,
    positions: Arc<dyn PositionSource>,
    permissions: Arc<dyn PermissionSource>,
    prompt_options: PositionOptions,
    capabilities: OnceLock<ConnectionCapabilities>,
}

impl std::fmt::Debug for PermissionProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionProbe")
            .field("prompt_options", &self.prompt_options)
            .field("capabilities", &self.capabilities.get())
            .finish_non_exhaustive()
    }
}

impl PermissionProbe {
    /// `prompt_timeout` and `prompt_max_age` shape the low-accuracy request
    /// used to trigger the platform's permission prompt.
    pub fn new(
        environment: Arc<dyn Environment>,
        positions: Arc<dyn PositionSource>,
        permissions: Arc<dyn PermissionSource>,
        prompt_timeout: Duration,
        prompt_max_age: Duration,
    ) -> Self {
        Self {
            environment,
            positions,
            permissions,
            prompt_options: PositionOptions {
                enable_high_accuracy: false,
                timeout: prompt_timeout,
                maximum_age: prompt_max_age,
            },
            capabilities: OnceLock::new(),
        }
    }

    /// Platform features. Detected on first call, fixed afterwards.
    pub fn capabilities(&self) -> ConnectionCapabilities {
        *self
            .capabilities
            .get_or_init(|| self.environment.capabilities())
    }

    /// Capabilities, or [`Error::GeolocationUnsupported`] without a
    /// positioning API.
    pub fn ensure_supported(&self) -> Result<ConnectionCapabilities> {
        let capabilities = self.capabilities();
        if !capabilities.geolocation {
            return Err(Error::GeolocationUnsupported);
        }
        Ok(capabilities)
    }

    /// Query permission and, unless already granted, trigger the prompt.
    ///
    /// The prompt is triggered by a cheap position request whose result is
    /// discarded; the state is then queried again. A denial during the
    /// request is reported as [`PermissionState::Denied`], never as an error.
    pub async fn request_permission(&self) -> PermissionState {
        let state = self.permissions.query().await;
        if state == PermissionState::Granted {
            return state;
        }

        debug!("Permission is {}, requesting a position to prompt", state);
        match self.positions.current_position(self.prompt_options).await {
            Ok(_) => {}
            Err(e) if e.code == PositionErrorCode::PermissionDenied => {
                info!("Location permission denied by the user");
                return PermissionState::Denied;
            }
            // Any other failure still means the prompt was shown
            Err(e) => debug!("Permission probe position request failed: {}", e),
        }

        self.permissions.query().await
    }

    /// Forward permission changes as `permission-changed` events until
    /// `cancel` fires. `None` when the platform reports no changes.
    pub fn monitor(&self, events: Arc<EventBus>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let mut changes = self.permissions.changes()?;
        // Only report transitions that happen from now on
        changes.mark_unchanged();
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            debug!("Permission source closed");
                            break;
                        }
                        let state = *changes.borrow_and_update();
                        info!("Location permission changed to {}", state);
                        events.emit(TrackingEvent::PermissionChanged { state });
                    }
                }
            }
        }))
    }
}
