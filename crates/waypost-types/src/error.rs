//! Error types shared by every waypost platform.

use thiserror::Error;

/// A location preference that falls outside its accepted range.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// A numeric field is outside its inclusive bounds.
    #[error("{field} must be between {min} and {max}, got {actual}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Smallest accepted value.
        min: u32,
        /// Largest accepted value.
        max: u32,
        /// The rejected value.
        actual: u32,
    },
}

/// Errors raised by a [`KeyValueStore`](crate::storage::KeyValueStore) backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The backing store is not available on this platform.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the write (quota, permissions, ...).
    #[error("Storage write failed for key '{key}': {reason}")]
    WriteFailed {
        /// Key being written.
        key: String,
        /// Backend-provided reason.
        reason: String,
    },

    /// I/O error from a file-backed store.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Any other backend failure.
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::OutOfRange {
            field: "trackingInterval",
            min: 10,
            max: 3600,
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("trackingInterval"));
        assert!(msg.contains("10"));
        assert!(msg.contains("3600"));
        assert!(msg.contains("got 5"));
    }

    #[test]
    fn test_storage_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err: StorageError = io_err.into();
        assert!(matches!(err, StorageError::Io(_)));
        assert!(err.to_string().contains("read-only"));
    }
}
