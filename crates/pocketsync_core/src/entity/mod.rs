//! Entity document model.

mod id;

pub use id::{is_temporary_id, temporary_id, TEMP_ID_PREFIX};

use crate::error::CoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Access control list attached to an entity.
///
/// The backend fills in `creator` on the first authenticated write; the
/// optional reader/writer lists grant access beyond the creator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Acl {
    /// User id of the entity's creator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    /// User ids granted read access.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readers: Option<Vec<String>>,
    /// User ids granted write access.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writers: Option<Vec<String>>,
}

impl Acl {
    /// Creates an ACL owned by the given creator.
    pub fn for_creator(creator: impl Into<String>) -> Self {
        Self {
            creator: Some(creator.into()),
            readers: None,
            writers: None,
        }
    }
}

/// Server-managed entity metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Last-modified time.
    #[serde(rename = "lmt", skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity-creation time.
    #[serde(rename = "ect", skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// Opaque token returned by the backend after an authenticated request.
    #[serde(rename = "authtoken", skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// A document in a backend collection.
///
/// Entities carry a required string id, an optional ACL, optional
/// server-managed metadata, and an open set of caller-defined fields. The
/// wire form maps the reserved parts to `_id`, `_acl` and `_meta`; all other
/// keys are free-form fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique entity id within its collection.
    #[serde(rename = "_id")]
    pub id: String,
    /// Access control list.
    #[serde(rename = "_acl", skip_serializing_if = "Option::is_none")]
    pub acl: Option<Acl>,
    /// Server-managed metadata.
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    /// Caller-defined fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// Creates an entity with the given id and no fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            acl: None,
            metadata: None,
            fields: Map::new(),
        }
    }

    /// Creates an entity with a freshly generated temporary id.
    ///
    /// Used for local creates that have not been confirmed by the backend.
    #[must_use]
    pub fn with_temporary_id() -> Self {
        Self::new(temporary_id())
    }

    /// Returns true if this entity's id is a temporary, locally assigned one.
    #[must_use]
    pub fn has_temporary_id(&self) -> bool {
        is_temporary_id(&self.id)
    }

    /// Returns a caller-defined field, if present.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a caller-defined field, returning `self` for chaining.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Sets a caller-defined field in place.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Returns the last-modified time from the metadata, if any.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.metadata.as_ref().and_then(|m| m.last_modified)
    }

    /// Stamps the last-modified time, setting the creation time as well if
    /// it was never set.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let metadata = self.metadata.get_or_insert_with(Metadata::default);
        metadata.last_modified = Some(now);
        if metadata.created.is_none() {
            metadata.created = Some(now);
        }
    }

    /// Serializes the entity to its JSON wire form.
    pub fn to_json(&self) -> CoreResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserializes an entity from its JSON wire form.
    pub fn from_json(value: Value) -> CoreResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_form_roundtrip() {
        let json = json!({
            "_id": "58450d87f29e22207c83a236",
            "name": "Victor Barros",
            "_acl": {
                "creator": "58450d87c077970e38a388ba"
            },
            "_meta": {
                "lmt": "2016-12-05T06:47:35.711Z",
                "ect": "2016-12-05T06:47:35.711Z"
            }
        });

        let entity = Entity::from_json(json.clone()).unwrap();
        assert_eq!(entity.id, "58450d87f29e22207c83a236");
        assert_eq!(entity.field("name"), Some(&json!("Victor Barros")));
        assert_eq!(
            entity.acl.as_ref().unwrap().creator.as_deref(),
            Some("58450d87c077970e38a388ba")
        );
        assert!(entity.last_modified().is_some());

        let back = entity.to_json().unwrap();
        assert_eq!(back["_id"], json["_id"]);
        assert_eq!(back["name"], json["name"]);
        assert_eq!(back["_acl"], json["_acl"]);
    }

    #[test]
    fn temporary_entity() {
        let entity = Entity::with_temporary_id();
        assert!(entity.has_temporary_id());

        let confirmed = Entity::new("58450d87f29e22207c83a236");
        assert!(!confirmed.has_temporary_id());
    }

    #[test]
    fn touch_sets_both_timestamps_once() {
        let mut entity = Entity::new("a");
        assert!(entity.metadata.is_none());

        let first = Utc::now();
        entity.touch(first);
        let meta = entity.metadata.clone().unwrap();
        assert_eq!(meta.last_modified, Some(first));
        assert_eq!(meta.created, Some(first));

        let later = first + chrono::Duration::seconds(10);
        entity.touch(later);
        let meta = entity.metadata.clone().unwrap();
        assert_eq!(meta.last_modified, Some(later));
        assert_eq!(meta.created, Some(first));
    }

    #[test]
    fn fields_do_not_shadow_reserved_keys() {
        let entity = Entity::new("a").with_field("score", json!(42));
        let json = entity.to_json().unwrap();
        assert_eq!(json["_id"], json!("a"));
        assert_eq!(json["score"], json!(42));
        assert!(json.get("_meta").is_none());
    }
}
