//! Offline-resilient location tracking engine.
//!
//! This crate turns a stream of raw position fixes into an ordered, filtered
//! and durably delivered series of location samples attached to a
//! server-side tracking session.
//!
//! # Features
//!
//! - **Session lifecycle**: `Idle → Starting → Tracking → Stopping → Idle`,
//!   with re-entrant start/stop calls ignored
//! - **Sampling**: continuous watch plus a periodic poll, collapsed by a
//!   1 s debounce window and filtered by distance (10 m)
//! - **Delivery**: three attempts with exponential backoff, then a bounded
//!   persisted failure queue redelivered on demand or on reconnect
//! - **Background worker**: optional hand-off to a worker that samples on
//!   its own, degrading to foreground-only tracking
//! - **Events**: typed callbacks and a broadcast stream for every lifecycle
//!   change, sample and error
//!
//! # Platform Abstraction
//!
//! The engine never touches a platform API directly. It is generic over the
//! traits in [`traits`] ([`PositionSource`], [`PermissionSource`],
//! [`Environment`], [`TokenProvider`]), over [`LocationApi`] for the backend
//! and over [`KeyValueStore`](waypost_types::KeyValueStore) for persistence.
//! The [`mock`] module implements all of them in memory.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use waypost_core::mock::{MockApi, MockEnvironment, MockPermissions, MockPositionSource};
//! use waypost_core::{FileStore, LocationTracker};
//! use waypost_types::PermissionState;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tracker = LocationTracker::builder()
//!         .api(Arc::new(MockApi::new()))
//!         .store(Arc::new(FileStore::open_default()?))
//!         .positions(Arc::new(MockPositionSource::new()))
//!         .permissions(Arc::new(MockPermissions::new(PermissionState::Granted)))
//!         .environment(Arc::new(MockEnvironment::new()))
//!         .build()?;
//!
//!     let mut events = tracker.subscribe();
//!     tracker.initialize().await?;
//!     tracker.start_tracking().await?;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("{}", event.kind());
//!     }
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod background;
pub mod capabilities;
pub mod config;
pub mod delivery;
pub mod device;
pub mod error;
pub mod events;
#[cfg(feature = "http-client")]
pub mod http;
pub mod mock;
pub mod queue;
pub mod retry;
pub mod store;
pub mod tracker;
pub mod traits;

// Re-export the shared data model
pub use waypost_types::{geo, types};

// Core exports
pub use error::{Error, ErrorCode, Result, TrackingError};
pub use tracker::{LocationTracker, TrackerBuilder, TrackingPhase};
pub use traits::{
    Environment, PermissionSource, PositionSource, PositionUpdate, StaticToken, TokenProvider,
    WatchId,
};

pub use api::{HistoryPage, HistoryQuery, LocationApi};
pub use background::{
    BackgroundCoordinator, PageMessage, PageReply, WorkerChannel, WorkerEnvelope, WorkerHost,
    WorkerMessage,
};
pub use capabilities::PermissionProbe;
pub use config::TrackerConfig;
pub use delivery::{DeliveryOutcome, DeliveryPipeline};
pub use device::{DeviceTelemetry, generate_device_id};
pub use events::{ErrorContext, EventBus, EventKind, EventReceiver, HandlerId, TrackingEvent};
#[cfg(feature = "http-client")]
pub use http::HttpLocationApi;
pub use mock::{MockApi, MockEnvironment, MockPermissions, MockPositionSource, MockWorkerHost};
pub use queue::{FailureQueue, RetryReport};
pub use retry::{RetryConfig, with_retry};
pub use store::{FileStore, default_store_path};

// Re-export from waypost-types
pub use waypost_types::{
    ConnectionCapabilities, DeviceInfo, FailedLocationRecord, KeyValueStore, LocationPreferences,
    LocationSample, MemoryStore, NetworkType, PermissionState, Position, PositionError,
    PositionOptions, PreferencesUpdate, SampleSource, TrackingSession,
};
