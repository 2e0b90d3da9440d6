//! Error types for waypost-core.
//!
//! # Propagation
//!
//! | Phase | Policy |
//! |-------|--------|
//! | [`LocationTracker::initialize`](crate::LocationTracker::initialize) | Capability and permission failures are returned to the caller |
//! | [`LocationTracker::start_tracking`](crate::LocationTracker::start_tracking) | Returned to the caller *and* emitted as an `error` event |
//! | Active session (delivery, geolocation, background worker) | Never returned; emitted on the [`EventBus`](crate::EventBus) with a context tag |
//! | [`LocationTracker::stop_tracking`](crate::LocationTracker::stop_tracking) | Logged; local state is always cleaned up |
//!
//! Events do not carry [`Error`] itself. They carry a serialisable
//! [`TrackingError`] built from [`Error::code`] and the display message.

use core::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use waypost_types::{PositionError, PositionErrorCode, StorageError, ValidationError};

/// Errors produced by the tracking engine.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The platform has no positioning API.
    #[error("Geolocation is not supported on this platform")]
    GeolocationUnsupported,

    /// The user or platform refused location access.
    #[error("Location permission denied")]
    PermissionDenied,

    /// A tracking session could not be started or used.
    #[error("Tracking failed: {0}")]
    TrackingFailed(String),

    /// The platform could not determine a position.
    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),

    /// An operation did not complete in time.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// The backend answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the response body, or the status text.
        message: String,
    },

    /// The backend could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// Persistent storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A persisted or received payload could not be (de)serialised.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Preferences outside their accepted bounds.
    #[error("Invalid preferences: {0}")]
    InvalidPreferences(#[from] ValidationError),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Anything the taxonomy above does not classify.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Error {
    /// Create a tracking failure.
    pub fn tracking_failed(message: impl Into<String>) -> Self {
        Self::TrackingFailed(message.into())
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Stable code identifying the failure class.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::GeolocationUnsupported => ErrorCode::GeolocationUnsupported,
            Error::PermissionDenied => ErrorCode::PermissionDenied,
            Error::TrackingFailed(_) => ErrorCode::TrackingFailed,
            Error::PositionUnavailable(_) => ErrorCode::PositionUnavailable,
            Error::Timeout { .. } => ErrorCode::Timeout,
            Error::Api { .. } | Error::Network(_) => ErrorCode::NetworkError,
            Error::Storage(_)
            | Error::Serialization(_)
            | Error::InvalidPreferences(_)
            | Error::InvalidConfig(_)
            | Error::Cancelled
            | Error::Unknown(_) => ErrorCode::UnknownError,
        }
    }
}

impl From<PositionError> for Error {
    fn from(err: PositionError) -> Self {
        match err.code {
            PositionErrorCode::PermissionDenied => Error::PermissionDenied,
            PositionErrorCode::PositionUnavailable => Error::PositionUnavailable(err.message),
            PositionErrorCode::Timeout => Error::Timeout {
                operation: format!("position request ({})", err.message),
                duration: Duration::ZERO,
            },
        }
    }
}

/// Result type alias using waypost-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Wire codes for failures surfaced on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    GeolocationUnsupported,
    PermissionDenied,
    TrackingFailed,
    PositionUnavailable,
    Timeout,
    UnknownError,
    /// Unclassified delivery or network failure.
    NetworkError,
}

impl ErrorCode {
    /// The code as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::GeolocationUnsupported => "GEOLOCATION_UNSUPPORTED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::TrackingFailed => "TRACKING_FAILED",
            ErrorCode::PositionUnavailable => "POSITION_UNAVAILABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialisable error payload carried by `error` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingError {
    pub code: ErrorCode,
    pub message: String,
}

impl TrackingError {
    /// Create an error payload.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&Error> for TrackingError {
    fn from(err: &Error) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl fmt::Display for TrackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
