//! Platform abstractions the tracker is generic over.
//!
//! Each trait stands in for one browser-style platform API so the engine runs
//! unchanged against a real host, a replay file, or the mocks in
//! [`crate::mock`].

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use waypost_types::{ConnectionCapabilities, PermissionState, Position, PositionError, PositionOptions};

use crate::error::Result;

/// Identifier of an armed position watch.
pub type WatchId = u64;

/// A single callback from a position watch.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionUpdate {
    /// A new fix.
    Fix(Position),
    /// The platform failed to produce a fix.
    Failed(PositionError),
}

/// Source of position fixes.
///
/// A watch pushes every update into `sink` until it is cleared with
/// [`clear_watch`](Self::clear_watch). Clearing an unknown id is a no-op.
#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Arm a continuous watch.
    fn watch_position(
        &self,
        options: PositionOptions,
        sink: mpsc::UnboundedSender<PositionUpdate>,
    ) -> Result<WatchId>;

    /// Disarm a watch. After this returns no further updates are sent for `id`.
    fn clear_watch(&self, id: WatchId);

    /// Request a single fix.
    async fn current_position(
        &self,
        options: PositionOptions,
    ) -> std::result::Result<Position, PositionError>;
}

/// Location permission state and its change notifications.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Current permission state.
    async fn query(&self) -> PermissionState;

    /// Receiver notified whenever the state changes, if the platform reports
    /// changes at all.
    fn changes(&self) -> Option<watch::Receiver<PermissionState>> {
        None
    }
}

/// Device and platform facts read by the telemetry collector.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Platform features, read once at initialisation.
    fn capabilities(&self) -> ConnectionCapabilities;

    fn user_agent(&self) -> String;

    fn platform(&self) -> String;

    fn language(&self) -> String;

    /// Screen size as `WIDTHxHEIGHT`.
    fn screen_resolution(&self) -> String;

    /// IANA timezone name.
    fn timezone(&self) -> String;

    /// Raw connection type reported by the platform (`wifi`, `4g`, ...).
    fn connection_type(&self) -> Option<String> {
        None
    }

    /// Battery charge as a fraction in `[0, 1]`, `None` without a battery API.
    async fn battery_level(&self) -> Result<Option<f64>> {
        Ok(None)
    }

    /// Receiver toggled between offline (`false`) and online (`true`).
    fn connectivity(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

/// Supplies the bearer token for backend calls and the background worker.
///
/// Token refresh is the provider's concern; the engine only reads.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A fixed token, or none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// A provider that never has a token.
    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}
