//! Wire messages exchanged with the backend.

use pocketsync_core::Entity;
use serde::{Deserialize, Serialize};

/// Well-known backend error identifiers carried in [`ErrorBody::error`].
pub mod error_codes {
    /// The entity does not exist in the collection.
    pub const ENTITY_NOT_FOUND: &str = "EntityNotFound";
    /// The request method is not allowed on this endpoint.
    pub const METHOD_NOT_ALLOWED: &str = "MethodNotAllowed";
    /// The query would return more entities than the backend allows.
    pub const RESULT_SET_SIZE_EXCEEDED: &str = "ResultSetSizeExceeded";
    /// The credentials do not permit this request.
    pub const FORBIDDEN: &str = "Forbidden";
}

/// Incremental pull response: entities changed since the checkpoint and
/// ids deleted since it. Both lists empty means nothing changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaSetResponse {
    /// Entities created or updated since the checkpoint.
    #[serde(default)]
    pub changed: Vec<Entity>,
    /// Ids of entities deleted since the checkpoint.
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl DeltaSetResponse {
    /// Creates a delta response.
    #[must_use]
    pub fn new(changed: Vec<Entity>, deleted: Vec<String>) -> Self {
        Self { changed, deleted }
    }

    /// Returns true when nothing changed since the checkpoint.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Structured error body returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error identifier (see [`error_codes`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Debugging detail for developers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Response body of a count request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    /// Number of entities matching the query.
    pub count: u64,
}
