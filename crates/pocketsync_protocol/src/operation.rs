//! Pending operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// The HTTP-style verb a pending operation replays with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationMethod {
    /// Create a new entity.
    Post,
    /// Update an existing entity.
    Put,
    /// Delete an entity.
    Delete,
}

impl OperationMethod {
    /// Returns the HTTP method string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMethod::Post => "POST",
            OperationMethod::Put => "PUT",
            OperationMethod::Delete => "DELETE",
        }
    }

    /// Returns true for create/update operations.
    #[must_use]
    pub fn is_save(&self) -> bool {
        matches!(self, OperationMethod::Post | OperationMethod::Put)
    }

    /// Returns true for delete operations.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self, OperationMethod::Delete)
    }
}

impl std::fmt::Display for OperationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local mutation not yet acknowledged by the backend.
///
/// # Fields
///
/// - `request_id`: stable unique identity of the operation
/// - `date`: creation timestamp, the replay ordering key
/// - `collection`: the collection the operation targets
/// - `object_id`: the affected entity id; `None` when the target id is not
///   yet known
/// - `method`: the verb the operation replays with
/// - `url`, `headers`, `body`: the serialized request to replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Stable unique id; the operation's primary key.
    pub request_id: String,
    /// Creation timestamp; replay order is ascending by this date.
    pub date: DateTime<Utc>,
    /// Target collection.
    pub collection: String,
    /// Affected entity id, if known.
    pub object_id: Option<String>,
    /// Verb to replay with.
    pub method: OperationMethod,
    /// Serialized target URL.
    pub url: String,
    /// Serialized request headers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Request body, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl PendingOperation {
    /// Creates a pending operation with a fresh request id, dated now.
    pub fn new(
        method: OperationMethod,
        collection: impl Into<String>,
        object_id: Option<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().simple().to_string(),
            date: Utc::now(),
            collection: collection.into(),
            object_id,
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Creates a create operation.
    pub fn create(
        collection: impl Into<String>,
        object_id: Option<String>,
        url: impl Into<String>,
    ) -> Self {
        Self::new(OperationMethod::Post, collection, object_id, url)
    }

    /// Creates an update operation.
    pub fn update(
        collection: impl Into<String>,
        object_id: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self::new(OperationMethod::Put, collection, Some(object_id.into()), url)
    }

    /// Creates a delete operation.
    pub fn delete(
        collection: impl Into<String>,
        object_id: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self::new(
            OperationMethod::Delete,
            collection,
            Some(object_id.into()),
            url,
        )
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Overrides the creation date. Intended for restoring persisted
    /// operations and for tests.
    #[must_use]
    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }
}
