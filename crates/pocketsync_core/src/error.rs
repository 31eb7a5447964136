//! Error types for PocketSync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity or message (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// The store executor has shut down and can no longer accept work.
    #[error("store executor is closed")]
    StoreClosed,

    /// A value could not be interpreted as a geo point.
    #[error("invalid geo point: {message}")]
    InvalidGeoPoint {
        /// Description of the malformed value.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid-operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid-geo-point error.
    pub fn invalid_geo_point(message: impl Into<String>) -> Self {
        Self::InvalidGeoPoint {
            message: message.into(),
        }
    }
}
