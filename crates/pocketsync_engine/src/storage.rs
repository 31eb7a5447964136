//! Local storage and the per-collection cache adapter.
//!
//! Entity data, the pending operation log and the query-sync ledger share
//! one durable home, owned by a single [`StoreExecutor`]. Every logical
//! operation runs as one executor job, including compound ones like
//! "dequeue the replayed operation and write through its confirmation",
//! so it is atomic with respect to every other storage access.

use crate::error::EngineResult;
use chrono::{DateTime, Utc};
use pocketsync_core::{CoreError, Entity, EntityStore, Query, StoreExecutor};
use pocketsync_protocol::{PendingOperation, PendingOperationLog, QuerySyncLedger};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Durable state shared by every cache engine and sync coordinator bound
/// to the same backend: entity collections, the pending operation log and
/// the query-sync ledger.
#[derive(Debug, Default)]
pub struct LocalStorage {
    /// Cached entities, by collection.
    pub entities: EntityStore,
    /// Outstanding local mutations.
    pub oplog: PendingOperationLog,
    /// Pull checkpoints.
    pub ledger: QuerySyncLedger,
}

impl LocalStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps fresh storage in its single-writer executor.
    #[must_use]
    pub fn spawn() -> Arc<StoreExecutor<LocalStorage>> {
        Arc::new(StoreExecutor::new(Self::new()))
    }
}

/// Per-collection view over [`LocalStorage`].
///
/// Applies TTL filtering to reads and packages compound mutations as
/// single executor jobs.
#[derive(Debug, Clone)]
pub struct CollectionCache {
    storage: Arc<StoreExecutor<LocalStorage>>,
    collection: String,
    ttl: Option<Duration>,
}

impl CollectionCache {
    /// Creates a cache view over a collection.
    pub fn new(
        storage: Arc<StoreExecutor<LocalStorage>>,
        collection: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            storage,
            collection: collection.into(),
            ttl,
        }
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the configured TTL, if any.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Entities whose last-modified time is at or before this instant are
    /// hidden from reads. `None` when no TTL is configured or the TTL does
    /// not fit a chrono duration.
    fn expiry_floor(&self) -> Option<DateTime<Utc>> {
        self.ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() - ttl)
    }

    fn is_fresh(entity: &Entity, floor: Option<DateTime<Utc>>) -> bool {
        match (floor, entity.last_modified()) {
            (Some(floor), Some(lmt)) => lmt > floor,
            // Entities without a last-modified time cannot age out.
            _ => true,
        }
    }

    fn filter_expired(&self, entities: Vec<Entity>) -> Vec<Entity> {
        let floor = self.expiry_floor();
        if floor.is_none() {
            return entities;
        }
        entities
            .into_iter()
            .filter(|entity| Self::is_fresh(entity, floor))
            .collect()
    }

    // Reads ------------------------------------------------------------

    /// Finds an entity by id, treating TTL-expired entities as misses.
    pub fn find_by_id(&self, id: &str) -> EngineResult<Option<Entity>> {
        let collection = self.collection.clone();
        let id = id.to_string();
        let found = self
            .storage
            .run(move |s| s.entities.find_by_id(&collection, &id))??;
        let floor = self.expiry_floor();
        Ok(found.filter(|entity| Self::is_fresh(entity, floor)))
    }

    /// Finds entities matching a query, excluding TTL-expired ones.
    pub fn find(&self, query: &Query) -> EngineResult<Vec<Entity>> {
        let collection = self.collection.clone();
        let query = query.clone();
        let entities = self
            .storage
            .run(move |s| s.entities.find(&collection, &query))??;
        Ok(self.filter_expired(entities))
    }

    /// Counts entities matching an optional query, excluding TTL-expired
    /// ones. Skip and limit do not participate.
    pub fn count(&self, query: Option<&Query>) -> EngineResult<usize> {
        if self.ttl.is_some() {
            let mut unshaped = query.cloned().unwrap_or_default();
            unshaped.skip = None;
            unshaped.limit = None;
            unshaped.sort = None;
            return Ok(self.find(&unshaped)?.len());
        }
        let collection = self.collection.clone();
        let query = query.cloned();
        Ok(self
            .storage
            .run(move |s| s.entities.count(&collection, query.as_ref()))??)
    }

    /// Returns true if the collection holds no cached entities.
    pub fn is_empty(&self) -> EngineResult<bool> {
        Ok(self.count(None)? == 0)
    }

    /// Returns ids of cached entities matching a query, ignoring TTL.
    pub fn matching_ids(&self, query: &Query) -> EngineResult<Vec<String>> {
        let collection = self.collection.clone();
        let query = query.clone();
        Ok(self
            .storage
            .run(move |s| s.entities.matching_ids(&collection, &query))??)
    }

    /// Returns id → last-modified-time bookkeeping for a query.
    pub fn ids_lmts(&self, query: &Query) -> EngineResult<HashMap<String, DateTime<Utc>>> {
        let collection = self.collection.clone();
        let query = query.clone();
        Ok(self
            .storage
            .run(move |s| s.entities.ids_lmts(&collection, &query))??)
    }

    // Plain writes ------------------------------------------------------

    /// Saves an entity without touching the pending operation log.
    pub fn save(&self, entity: Entity) -> EngineResult<()> {
        let collection = self.collection.clone();
        Ok(self
            .storage
            .run(move |s| s.entities.save(&collection, &entity))??)
    }

    /// Saves a batch of entities without touching the pending operation
    /// log.
    pub fn save_all(&self, entities: Vec<Entity>) -> EngineResult<()> {
        let collection = self.collection.clone();
        Ok(self
            .storage
            .run(move |s| s.entities.save_all(&collection, &entities))??)
    }

    /// Removes entities by id together with every pending operation
    /// addressed to them, in one job. Used to mirror a server-side delete
    /// that has settled those operations. Returns the number of entities
    /// removed.
    pub fn scrub_removed(&self, ids: Vec<String>) -> EngineResult<usize> {
        let collection = self.collection.clone();
        Ok(self.storage.run(move |s| {
            let removed = s.entities.remove_ids(&collection, &ids);
            s.oplog.remove_for_objects(&collection, &ids);
            removed
        })?)
    }

    // Compound mutations ------------------------------------------------

    /// Saves an entity and enqueues its pending operation in one job.
    pub fn save_with_pending(
        &self,
        entity: Entity,
        operation: PendingOperation,
    ) -> EngineResult<()> {
        let collection = self.collection.clone();
        self.storage.run(move |s| {
            s.entities.save(&collection, &entity)?;
            s.oplog.enqueue(operation);
            Ok::<_, CoreError>(())
        })??;
        Ok(())
    }

    /// Removes entities by id and enqueues their delete operations in one
    /// job. Returns the number of entities removed.
    pub fn remove_ids_with_pending(
        &self,
        ids: Vec<String>,
        operations: Vec<PendingOperation>,
    ) -> EngineResult<usize> {
        let collection = self.collection.clone();
        Ok(self.storage.run(move |s| {
            let removed = s.entities.remove_ids(&collection, &ids);
            for operation in operations {
                s.oplog.enqueue(operation);
            }
            removed
        })?)
    }

    /// Applies a server-confirmed entity after a network write or replay.
    ///
    /// The pending operation is deleted before the confirmation is written:
    /// a crash between the two must never leave a confirmed operation in
    /// the log to be replayed again. When the backend assigned a new id,
    /// the previous (temporary) record is removed and outstanding
    /// operations for it are rewritten to the permanent id.
    pub fn apply_confirmed(
        &self,
        dequeue_request: Option<String>,
        previous_id: Option<String>,
        entity: Entity,
    ) -> EngineResult<()> {
        let collection = self.collection.clone();
        self.storage.run(move |s| {
            if let Some(request_id) = &dequeue_request {
                s.oplog.dequeue(request_id);
            }
            if let Some(previous) = &previous_id {
                if *previous != entity.id {
                    s.entities.remove_by_id(&collection, previous);
                    s.oplog.reassign_object_id(&collection, previous, &entity.id);
                }
            }
            s.entities.save(&collection, &entity)
        })??;
        Ok(())
    }

    /// Confirms a replayed delete: removes its pending operation.
    pub fn confirm_removed(&self, request_id: String) -> EngineResult<()> {
        self.storage.run(move |s| {
            s.oplog.dequeue(&request_id);
        })?;
        Ok(())
    }

    /// Replaces the locally cached subset matching a query with a freshly
    /// fetched result set. When `record` carries a checkpoint, the
    /// query-sync record is advanced in the same job.
    pub fn replace_query_results(
        &self,
        query: Query,
        entities: Vec<Entity>,
        record: Option<(Option<String>, DateTime<Utc>)>,
    ) -> EngineResult<()> {
        let collection = self.collection.clone();
        self.storage.run(move |s| {
            s.entities.remove(&collection, &query)?;
            s.entities.save_all(&collection, &entities)?;
            if let Some((signature, last_sync)) = record {
                s.ledger.record(collection.clone(), signature, last_sync);
            }
            Ok::<_, CoreError>(())
        })??;
        Ok(())
    }

    /// Applies an incremental delta: upserts, deletions and the checkpoint
    /// advance happen in one job. Returns (applied, removed) counts.
    pub fn apply_delta(
        &self,
        changed: Vec<Entity>,
        deleted: Vec<String>,
        signature: Option<String>,
        last_sync: DateTime<Utc>,
    ) -> EngineResult<(usize, usize)> {
        let collection = self.collection.clone();
        Ok(self.storage.run(move |s| {
            s.entities.save_all(&collection, &changed)?;
            let removed = s.entities.remove_ids(&collection, &deleted);
            s.ledger.record(collection.clone(), signature, last_sync);
            Ok::<_, CoreError>((changed.len(), removed))
        })??)
    }

    // Sync bookkeeping --------------------------------------------------

    /// Returns the pull checkpoint for a query signature.
    pub fn checkpoint(&self, signature: Option<String>) -> EngineResult<Option<DateTime<Utc>>> {
        let collection = self.collection.clone();
        Ok(self
            .storage
            .run(move |s| s.ledger.checkpoint(&collection, signature.as_deref()))?)
    }

    /// Drops the pull checkpoint for a query signature, forcing the next
    /// pull to be a full fetch. Returns the dropped timestamp.
    pub fn invalidate_checkpoint(
        &self,
        signature: Option<String>,
    ) -> EngineResult<Option<DateTime<Utc>>> {
        let collection = self.collection.clone();
        Ok(self
            .storage
            .run(move |s| s.ledger.invalidate(&collection, signature.as_deref()))?)
    }

    /// Lists outstanding operations in replay order, optionally restricted
    /// to the given object ids.
    pub fn pending_operations(
        &self,
        object_ids: Option<Vec<String>>,
    ) -> EngineResult<Vec<PendingOperation>> {
        let collection = self.collection.clone();
        Ok(self
            .storage
            .run(move |s| s.oplog.list(&collection, object_ids.as_deref()))?)
    }

    /// Returns the number of outstanding operations for this collection.
    pub fn pending_count(&self) -> EngineResult<usize> {
        let collection = self.collection.clone();
        Ok(self.storage.run(move |s| s.oplog.pending_count(&collection))?)
    }

    /// Discards every outstanding operation for this collection. Returns
    /// the number discarded.
    pub fn discard_pending(&self) -> EngineResult<usize> {
        let collection = self.collection.clone();
        Ok(self
            .storage
            .run(move |s| s.oplog.remove_collection(&collection))?)
    }

    /// Clears the cache: matching entities, their pending operations and
    /// the collection's sync checkpoints go in one job. With no query the
    /// whole collection is wiped. Returns the number of entities removed.
    pub fn clear(&self, query: Option<Query>) -> EngineResult<usize> {
        let collection = self.collection.clone();
        Ok(self.storage.run(move |s| {
            let removed = match &query {
                Some(query) => {
                    let ids = s.entities.matching_ids(&collection, query)?;
                    let removed = s.entities.remove_ids(&collection, &ids);
                    s.oplog.remove_for_objects(&collection, &ids);
                    removed
                }
                None => {
                    let removed = s.entities.remove_all(&collection);
                    s.oplog.remove_collection(&collection);
                    removed
                }
            };
            s.ledger.invalidate_collection(&collection);
            Ok::<_, CoreError>(removed)
        })??)
    }
}
