//! Platform-agnostic types for the waypost location tracking client.
//!
//! This crate provides the data model shared by the native engine
//! (waypost-core) and the WebAssembly adapter (waypost-wasm).
//!
//! # Features
//!
//! - Location samples, preferences, sessions and device snapshots
//! - Raw position fixes and position request options
//! - The significant-motion distance filter ([`geo`])
//! - The [`KeyValueStore`] persistence abstraction
//!
//! # Example
//!
//! ```
//! use waypost_types::geo::has_changed_significantly;
//!
//! let last = (56.9496, 24.1052);
//! assert!(!has_changed_significantly(Some(&last), &(56.94961, 24.1052)));
//! ```

pub mod error;
pub mod geo;
pub mod position;
pub mod storage;
pub mod types;

pub use error::{StorageError, StorageResult, ValidationError};
pub use position::{Coordinates, Position, PositionError, PositionErrorCode, PositionOptions};
pub use storage::{KeyValueStore, MemoryStore};
pub use types::{
    ConnectionCapabilities, DeviceInfo, FailedLocationRecord, LocationPreferences,
    LocationSample, NetworkType, PermissionState, PreferencesUpdate, SampleMetadata,
    SampleSource, TrackingSession,
};
