//! In-memory entity store.
//!
//! Entities are persisted in their normalized document form (primitive
//! array elements wrapped as `{"value": v}`, see `translate`). All queries
//! are translated before evaluation; geo predicates are applied as
//! in-memory post-filters on the candidates the translated predicate
//! produced.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};
use crate::query::{map_value, value_ordering, Query, SortField};
use crate::store::ownership::OwnershipGraph;
use crate::store::translate::{
    denormalize_value, normalize_value, translate, TranslatedQuery,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

const RESERVED_KEYS: [&str; 3] = ["_id", "_acl", "_meta"];

fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

fn to_stored(entity: &Entity) -> CoreResult<Map<String, Value>> {
    match entity.to_json()? {
        Value::Object(mut document) => {
            for (key, value) in document.iter_mut() {
                if !is_reserved(key) {
                    *value = normalize_value(value);
                }
            }
            Ok(document)
        }
        _ => Err(CoreError::invalid_operation(
            "entity did not serialize to an object",
        )),
    }
}

fn from_stored(document: &Map<String, Value>) -> CoreResult<Entity> {
    let mut restored = Map::with_capacity(document.len());
    for (key, value) in document {
        let value = if is_reserved(key) {
            value.clone()
        } else {
            denormalize_value(value)
        };
        restored.insert(key.clone(), value);
    }
    Entity::from_json(Value::Object(restored))
}

fn document_lmt(document: &Map<String, Value>) -> Option<DateTime<Utc>> {
    map_value(document, "_meta.lmt")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Extracts the id (or ids) an ownership field points at. The field holds
/// either a single id string or an array of id strings (wrapped in the
/// stored form).
fn owned_ids(document: &Map<String, Value>, field: &str) -> Vec<String> {
    let Some(value) = map_value(document, field) else {
        return Vec::new();
    };
    match denormalize_value(value) {
        Value::String(id) => vec![id],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(id) => Some(id),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn compare_documents(
    a: &Map<String, Value>,
    b: &Map<String, Value>,
    sort: &[SortField],
) -> Ordering {
    for directive in sort {
        let left = map_value(a, &directive.field);
        let right = map_value(b, &directive.field);
        let ordering = match (left, right) {
            (Some(x), Some(y)) => value_ordering(x, y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = if directive.ascending {
            ordering
        } else {
            ordering.reverse()
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Generic persistent entity store, keyed by collection and entity id.
///
/// Within a collection, documents are kept in insertion-independent id
/// order so query results are deterministic. Declared ownership edges make
/// id- and query-addressed removals cascade into owned entities; the walk
/// carries a visited set, so cyclic ownership terminates.
#[derive(Debug, Default)]
pub struct EntityStore {
    collections: HashMap<String, BTreeMap<String, Map<String, Value>>>,
    ownership: OwnershipGraph,
}

impl EntityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that `owner_collection.field` holds the id (or array of
    /// ids) of entities owned in `owned_collection`. Removing an owner
    /// then removes the owned rows as well.
    pub fn declare_ownership(
        &mut self,
        owner_collection: impl Into<String>,
        field: impl Into<String>,
        owned_collection: impl Into<String>,
    ) {
        self.ownership
            .declare(owner_collection, field, owned_collection);
    }

    /// Saves an entity, overwriting any previous document with the same id.
    pub fn save(&mut self, collection: &str, entity: &Entity) -> CoreResult<()> {
        let document = to_stored(entity)?;
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(entity.id.clone(), document);
        Ok(())
    }

    /// Saves a batch of entities.
    pub fn save_all(&mut self, collection: &str, entities: &[Entity]) -> CoreResult<()> {
        for entity in entities {
            self.save(collection, entity)?;
        }
        Ok(())
    }

    /// Finds an entity by id.
    pub fn find_by_id(&self, collection: &str, id: &str) -> CoreResult<Option<Entity>> {
        match self
            .collections
            .get(collection)
            .and_then(|documents| documents.get(id))
        {
            Some(document) => Ok(Some(from_stored(document)?)),
            None => Ok(None),
        }
    }

    fn matching_documents<'a>(
        &'a self,
        collection: &str,
        translated: Option<&'a TranslatedQuery>,
    ) -> impl Iterator<Item = &'a Map<String, Value>> + 'a {
        self.collections
            .get(collection)
            .into_iter()
            .flat_map(|documents| documents.values())
            .filter(move |document| translated.map_or(true, |t| t.matches(document)))
    }

    /// Finds entities matching a query, applying sort, skip and limit.
    pub fn find(&self, collection: &str, query: &Query) -> CoreResult<Vec<Entity>> {
        let translated = query.predicate.as_ref().map(translate);
        let mut documents: Vec<&Map<String, Value>> = self
            .matching_documents(collection, translated.as_ref())
            .collect();

        if let Some(sort) = query.sort.as_deref() {
            documents.sort_by(|a, b| compare_documents(a, b, sort));
        }

        let skip = query.skip.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        documents
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(from_stored)
            .collect()
    }

    /// Returns the ids of entities matching a query, ignoring skip/limit.
    pub fn matching_ids(&self, collection: &str, query: &Query) -> CoreResult<Vec<String>> {
        let translated = query.predicate.as_ref().map(translate);
        Ok(self
            .matching_documents(collection, translated.as_ref())
            .filter_map(|document| document.get("_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    /// Returns a map of entity id to last-modified time for entities
    /// matching a query. Entities without a last-modified time are omitted.
    pub fn ids_lmts(
        &self,
        collection: &str,
        query: &Query,
    ) -> CoreResult<HashMap<String, DateTime<Utc>>> {
        let translated = query.predicate.as_ref().map(translate);
        Ok(self
            .matching_documents(collection, translated.as_ref())
            .filter_map(|document| {
                let id = document.get("_id").and_then(Value::as_str)?;
                let lmt = document_lmt(document)?;
                Some((id.to_string(), lmt))
            })
            .collect())
    }

    /// Counts entities matching an optional query.
    pub fn count(&self, collection: &str, query: Option<&Query>) -> CoreResult<usize> {
        match query {
            None => Ok(self
                .collections
                .get(collection)
                .map_or(0, BTreeMap::len)),
            Some(query) => {
                let translated = query.predicate.as_ref().map(translate);
                Ok(self
                    .matching_documents(collection, translated.as_ref())
                    .count())
            }
        }
    }

    /// Returns true if the collection holds no entities.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.collections
            .get(collection)
            .map_or(true, BTreeMap::is_empty)
    }

    /// Removes an entity by id, cascading into owned entities. Returns
    /// true if it existed.
    pub fn remove_by_id(&mut self, collection: &str, id: &str) -> bool {
        self.remove_ids(collection, std::slice::from_ref(&id.to_string())) == 1
    }

    /// Removes a batch of entities by id, cascading into owned entities.
    /// Returns the number of addressed entities removed (cascaded rows do
    /// not count).
    pub fn remove_ids(&mut self, collection: &str, ids: &[String]) -> usize {
        let mut queue = VecDeque::new();
        let mut visited = HashSet::new();
        let mut removed = 0;

        for id in ids {
            if self.remove_one(collection, id, &mut queue, &mut visited) {
                removed += 1;
            }
        }
        while let Some((owned_collection, owned_id)) = queue.pop_front() {
            self.remove_one(&owned_collection, &owned_id, &mut queue, &mut visited);
        }

        removed
    }

    fn remove_one(
        &mut self,
        collection: &str,
        id: &str,
        queue: &mut VecDeque<(String, String)>,
        visited: &mut HashSet<(String, String)>,
    ) -> bool {
        if !visited.insert((collection.to_string(), id.to_string())) {
            return false;
        }
        let Some(document) = self
            .collections
            .get(collection)
            .and_then(|documents| documents.get(id))
        else {
            return false;
        };
        for link in self.ownership.owned_by(collection) {
            for owned_id in owned_ids(document, &link.field) {
                queue.push_back((link.collection.clone(), owned_id));
            }
        }
        self.collections
            .get_mut(collection)
            .and_then(|documents| documents.remove(id))
            .is_some()
    }

    /// Removes entities matching a query. Returns the number removed.
    pub fn remove(&mut self, collection: &str, query: &Query) -> CoreResult<usize> {
        let ids = self.matching_ids(collection, query)?;
        Ok(self.remove_ids(collection, &ids))
    }

    /// Removes every entity in the collection. Returns the number removed.
    pub fn remove_all(&mut self, collection: &str) -> usize {
        self.collections
            .remove(collection)
            .map_or(0, |documents| documents.len())
    }
}
