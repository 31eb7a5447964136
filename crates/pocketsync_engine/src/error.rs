//! Error types for the cache engine and sync coordinator.

use crate::remote::RemoteResponse;
use pocketsync_core::CoreError;
use pocketsync_protocol::{error_codes, ErrorBody};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in cache and sync operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Network or transport failure. Durable state is unmodified; retrying
    /// is the caller's responsibility.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The request timed out. Durable state is unmodified.
    #[error("operation timed out")]
    Timeout,

    /// The request was cancelled through its handle.
    #[error("request cancelled")]
    Cancelled,

    /// The response could not be interpreted.
    #[error("invalid response: {message}")]
    InvalidResponse {
        /// Description of the problem.
        message: String,
    },

    /// The backend rejected the request method.
    #[error("method not allowed: {description}")]
    MethodNotAllowed {
        /// Debugging detail from the error body.
        debug: String,
        /// Description from the error body.
        description: String,
    },

    /// The entity does not exist in the collection.
    #[error("entity not found: {description}")]
    EntityNotFound {
        /// Debugging detail from the error body.
        debug: String,
        /// Description from the error body.
        description: String,
    },

    /// The query result set exceeds the backend's limit.
    #[error("result set size exceeded: {description}")]
    ResultSetSizeExceeded {
        /// Debugging detail from the error body.
        debug: String,
        /// Description from the error body.
        description: String,
    },

    /// The credentials do not permit the request.
    #[error("forbidden: {description}")]
    Forbidden {
        /// Description from the error body.
        description: String,
    },

    /// Any other server-reported error, surfaced verbatim.
    #[error("server error {status}: {description}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error identifier from the body, if any.
        error: Option<String>,
        /// Debugging detail from the body, if any.
        debug: Option<String>,
        /// Description from the body, or a placeholder.
        description: String,
    },

    /// A sync phase transition that the state machine does not allow.
    #[error("invalid sync phase transition from {from} to {to}")]
    InvalidPhase {
        /// Current phase.
        from: String,
        /// Attempted phase.
        to: String,
    },

    /// Local store failure.
    #[error("store error: {0}")]
    Core(#[from] CoreError),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an invalid-response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Transport { retryable, .. } => *retryable,
            EngineError::Timeout => true,
            EngineError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Decodes a non-success response into a typed error.
    ///
    /// The structured error body fields are carried through verbatim;
    /// unknown error identifiers fall back to [`EngineError::Server`] with
    /// the full body attached, never to an anonymous failure.
    #[must_use]
    pub fn from_response(response: &RemoteResponse) -> Self {
        let body: ErrorBody = response
            .body
            .as_ref()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        let debug = body.debug.clone().unwrap_or_default();
        let description = body.description.clone().unwrap_or_default();

        match body.error.as_deref() {
            Some(error_codes::ENTITY_NOT_FOUND) => EngineError::EntityNotFound {
                debug,
                description,
            },
            Some(error_codes::METHOD_NOT_ALLOWED) => EngineError::MethodNotAllowed {
                debug,
                description,
            },
            Some(error_codes::RESULT_SET_SIZE_EXCEEDED) => EngineError::ResultSetSizeExceeded {
                debug,
                description,
            },
            Some(error_codes::FORBIDDEN) => EngineError::Forbidden { description },
            _ => EngineError::Server {
                status: response.status,
                error: body.error,
                debug: body.debug,
                description: body.description.unwrap_or_else(|| "request failed".into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retryable_errors() {
        assert!(EngineError::transport_retryable("connection lost").is_retryable());
        assert!(!EngineError::transport_fatal("invalid certificate").is_retryable());
        assert!(EngineError::Timeout.is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
        assert!(EngineError::Server {
            status: 500,
            error: None,
            debug: None,
            description: "oops".into(),
        }
        .is_retryable());
        assert!(!EngineError::Forbidden {
            description: "no".into()
        }
        .is_retryable());
    }

    #[test]
    fn typed_server_errors_from_body() {
        let response = RemoteResponse::json(
            404,
            json!({
                "error": "EntityNotFound",
                "debug": "",
                "description": "This entity not found in the collection"
            }),
        );
        let err = EngineError::from_response(&response);
        match err {
            EngineError::EntityNotFound { description, .. } => {
                assert_eq!(description, "This entity not found in the collection");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_error_code_keeps_body_verbatim() {
        let response = RemoteResponse::json(
            400,
            json!({
                "error": "ParameterValueOutOfRange",
                "description": "The value specified for one of the request parameters is out of range"
            }),
        );
        match EngineError::from_response(&response) {
            EngineError::Server {
                status,
                error,
                description,
                ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(error.as_deref(), Some("ParameterValueOutOfRange"));
                assert!(description.contains("out of range"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_body_still_produces_server_error() {
        let response = RemoteResponse::with_status(502, None);
        match EngineError::from_response(&response) {
            EngineError::Server { status, .. } => assert_eq!(status, 502),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn error_display() {
        let err = EngineError::Timeout;
        assert_eq!(err.to_string(), "operation timed out");

        let err = EngineError::InvalidPhase {
            from: "Pushing".into(),
            to: "Pushing".into(),
        };
        assert!(err.to_string().contains("Pushing"));
    }
}
