//! Cache engine: read/write policy resolution.
//!
//! Given a query (or id) and a policy, the engine decides the source of
//! truth and produces one or two result deliveries. Under
//! [`ReadPolicy::Both`] the local snapshot is always delivered strictly
//! before the network result (or its error) for the same invocation; the
//! two deliveries are independent snapshots.

use crate::context::ClientContext;
use crate::error::{EngineError, EngineResult};
use crate::policy::{ReadPolicy, WritePolicy};
use crate::remote::{Endpoints, HttpMethod, RemoteRequest, RemoteService};
use crate::request::RequestHandle;
use crate::storage::{CollectionCache, LocalStorage};
use chrono::Utc;
use pocketsync_core::{Entity, Predicate, Query, StoreExecutor};
use pocketsync_protocol::{CountResponse, PendingOperation};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Which source produced a read delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// Served from the local entity store.
    Local,
    /// Served from the backend.
    Network,
}

/// Which step of a write produced a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    /// The local write completed.
    Local,
    /// The network write completed (or failed).
    Network,
}

/// Resolves reads and writes against a collection according to a policy
/// pair, keeping the local entity store, the pending operation log and the
/// query-sync ledger consistent along the way.
pub struct CacheEngine {
    context: Arc<ClientContext>,
    remote: Arc<dyn RemoteService>,
    cache: CollectionCache,
    endpoints: Endpoints,
    collection: String,
}

impl CacheEngine {
    /// Creates an engine bound to a collection.
    pub fn new(
        context: Arc<ClientContext>,
        remote: Arc<dyn RemoteService>,
        storage: Arc<StoreExecutor<LocalStorage>>,
        collection: impl Into<String>,
    ) -> Self {
        let collection = collection.into();
        let cache = CollectionCache::new(storage, collection.clone(), context.config().ttl);
        let endpoints = context.endpoints();
        Self {
            context,
            remote,
            cache,
            endpoints,
            collection,
        }
    }

    /// Returns the collection this engine serves.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the local cache adapter.
    pub fn cache(&self) -> &CollectionCache {
        &self.cache
    }

    fn authorized(&self, request: RemoteRequest) -> RemoteRequest {
        request
            .with_headers(self.context.auth_headers())
            .with_timeout(self.context.config().timeout)
    }

    // Reads -------------------------------------------------------------

    /// Finds entities matching a query.
    ///
    /// Delivers once for `ForceLocal`/`ForceNetwork` and twice
    /// (local first) for `Both`. A network failure under `Both` is still
    /// reported as the second delivery.
    pub fn find(
        &self,
        query: &Query,
        policy: ReadPolicy,
        handle: &RequestHandle,
        on_result: &mut dyn FnMut(ReadSource, EngineResult<Vec<Entity>>),
    ) {
        if policy.reads_local() {
            on_result(ReadSource::Local, self.cache.find(query));
        }
        if policy.reads_network() {
            on_result(ReadSource::Network, self.network_find(query, handle));
        }
    }

    /// Finds an entity by id under the same policy matrix as [`find`].
    ///
    /// A local miss (or TTL-expired hit) delivers `Ok(None)`; a network
    /// miss surfaces the backend's entity-not-found error.
    ///
    /// [`find`]: CacheEngine::find
    pub fn find_by_id(
        &self,
        id: &str,
        policy: ReadPolicy,
        handle: &RequestHandle,
        on_result: &mut dyn FnMut(ReadSource, EngineResult<Option<Entity>>),
    ) {
        if policy.reads_local() {
            on_result(ReadSource::Local, self.cache.find_by_id(id));
        }
        if policy.reads_network() {
            on_result(
                ReadSource::Network,
                self.network_find_by_id(id, handle).map(Some),
            );
        }
    }

    /// Counts entities matching an optional query under the read policy
    /// matrix. Counts are not written through.
    pub fn count(
        &self,
        query: Option<&Query>,
        policy: ReadPolicy,
        handle: &RequestHandle,
        on_result: &mut dyn FnMut(ReadSource, EngineResult<usize>),
    ) {
        if policy.reads_local() {
            on_result(ReadSource::Local, self.cache.count(query));
        }
        if policy.reads_network() {
            on_result(ReadSource::Network, self.network_count(query, handle));
        }
    }

    fn network_find(&self, query: &Query, handle: &RequestHandle) -> EngineResult<Vec<Entity>> {
        if handle.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let url = self.endpoints.collection_query(&self.collection, query)?;
        let request = self.authorized(RemoteRequest::new(HttpMethod::Get, url));
        let response = self.remote.execute(&request)?;
        if !response.is_ok() {
            return Err(EngineError::from_response(&response));
        }

        let entities: Vec<Entity> = response.decode()?;
        let record = response
            .request_start()
            .map(|last_sync| Ok::<_, EngineError>((query.signature()?, last_sync)))
            .transpose()?;
        self.cache
            .replace_query_results(query.clone(), entities.clone(), record)?;
        handle.set_progress(1.0);
        debug!(
            collection = %self.collection,
            fetched = entities.len(),
            "network find written through"
        );
        Ok(entities)
    }

    fn network_find_by_id(&self, id: &str, handle: &RequestHandle) -> EngineResult<Entity> {
        if handle.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let url = self.endpoints.entity(&self.collection, id);
        let request = self.authorized(RemoteRequest::new(HttpMethod::Get, url));
        let response = self.remote.execute(&request)?;
        if !response.is_ok() {
            return Err(EngineError::from_response(&response));
        }

        let entity: Entity = response.decode()?;
        self.cache.apply_confirmed(None, None, entity.clone())?;
        handle.set_progress(1.0);
        Ok(entity)
    }

    fn network_count(&self, query: Option<&Query>, handle: &RequestHandle) -> EngineResult<usize> {
        if handle.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let url = self.endpoints.count(&self.collection, query)?;
        let request = self.authorized(RemoteRequest::new(HttpMethod::Get, url));
        let response = self.remote.execute(&request)?;
        if !response.is_ok() {
            return Err(EngineError::from_response(&response));
        }
        let count: CountResponse = response.decode()?;
        handle.set_progress(1.0);
        Ok(count.count as usize)
    }

    // Writes ------------------------------------------------------------

    /// Saves an entity.
    ///
    /// `ForceLocal` delivers once with the locally persisted entity (a
    /// create gets a temporary id); `ForceNetwork` delivers once with the
    /// server-confirmed entity; `LocalThenNetwork` delivers the local
    /// entity first and the server confirmation (or failure) second. On a
    /// network failure the pending operation stays queued for the next
    /// push.
    pub fn save(
        &self,
        entity: Entity,
        policy: WritePolicy,
        handle: &RequestHandle,
        on_result: &mut dyn FnMut(WriteStep, EngineResult<Entity>),
    ) {
        match policy {
            WritePolicy::ForceLocal => {
                let result = self.local_save(entity).map(|(saved, _)| saved);
                on_result(WriteStep::Local, result);
            }
            WritePolicy::ForceNetwork => {
                on_result(WriteStep::Network, self.network_save(entity, None, handle));
            }
            WritePolicy::LocalThenNetwork => match self.local_save(entity) {
                Ok((saved, request_id)) => {
                    on_result(WriteStep::Local, Ok(saved.clone()));
                    on_result(
                        WriteStep::Network,
                        self.network_save(saved, Some(request_id), handle),
                    );
                }
                Err(error) => on_result(WriteStep::Local, Err(error)),
            },
        }
    }

    fn local_save(&self, mut entity: Entity) -> EngineResult<(Entity, String)> {
        let is_create = entity.id.is_empty() || entity.has_temporary_id();
        if entity.id.is_empty() {
            entity.id = pocketsync_core::temporary_id();
        }
        entity.touch(Utc::now());

        let operation = if is_create {
            PendingOperation::create(
                &self.collection,
                Some(entity.id.clone()),
                self.endpoints.collection(&self.collection),
            )
            .with_body(request_body(&entity, true)?)
        } else {
            PendingOperation::update(
                &self.collection,
                entity.id.clone(),
                self.endpoints.entity(&self.collection, &entity.id),
            )
            .with_body(request_body(&entity, false)?)
        };

        let request_id = operation.request_id.clone();
        self.cache.save_with_pending(entity.clone(), operation)?;
        Ok((entity, request_id))
    }

    fn network_save(
        &self,
        entity: Entity,
        dequeue_request: Option<String>,
        handle: &RequestHandle,
    ) -> EngineResult<Entity> {
        if handle.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let is_create = entity.id.is_empty() || entity.has_temporary_id();
        let request = if is_create {
            RemoteRequest::new(
                HttpMethod::Post,
                self.endpoints.collection(&self.collection),
            )
            .with_body(request_body(&entity, true)?)
        } else {
            RemoteRequest::new(
                HttpMethod::Put,
                self.endpoints.entity(&self.collection, &entity.id),
            )
            .with_body(request_body(&entity, false)?)
        };

        let response = self.remote.execute(&self.authorized(request))?;
        if !response.is_ok() {
            return Err(EngineError::from_response(&response));
        }

        let confirmed: Entity = response.decode()?;
        let previous = (!entity.id.is_empty()).then(|| entity.id.clone());
        self.cache
            .apply_confirmed(dequeue_request, previous, confirmed.clone())?;
        handle.set_progress(1.0);
        debug!(
            collection = %self.collection,
            entity_id = %confirmed.id,
            "network save written through"
        );
        Ok(confirmed)
    }

    // Removals ----------------------------------------------------------

    /// Removes entities matching a query, delivering the removed/affected
    /// count per policy step.
    pub fn remove(
        &self,
        query: &Query,
        policy: WritePolicy,
        handle: &RequestHandle,
        on_result: &mut dyn FnMut(WriteStep, EngineResult<usize>),
    ) {
        match policy {
            WritePolicy::ForceLocal => {
                on_result(WriteStep::Local, self.local_remove(query).map(|(n, _)| n));
            }
            WritePolicy::ForceNetwork => {
                on_result(WriteStep::Network, self.network_remove(query, &[], handle));
            }
            WritePolicy::LocalThenNetwork => {
                let local = self.local_remove(query);
                let queued_ids = match &local {
                    Ok((_, ids)) => ids.clone(),
                    Err(_) => Vec::new(),
                };
                on_result(WriteStep::Local, local.map(|(n, _)| n));
                on_result(
                    WriteStep::Network,
                    self.network_remove(query, &queued_ids, handle),
                );
            }
        }
    }

    /// Removes a single entity by id under the policy matrix.
    ///
    /// # Panics
    ///
    /// Panics if `id` is empty; that is caller misuse, not a runtime
    /// condition.
    pub fn remove_by_id(
        &self,
        id: &str,
        policy: WritePolicy,
        handle: &RequestHandle,
        on_result: &mut dyn FnMut(WriteStep, EngineResult<usize>),
    ) {
        assert!(!id.is_empty(), "remove_by_id requires a non-empty id");
        let query = Query::filtered(Predicate::eq("_id", id));
        self.remove(&query, policy, handle, on_result);
    }

    /// Removes a batch of entities by id under the policy matrix.
    ///
    /// # Panics
    ///
    /// Panics if `ids` is empty; that is caller misuse, not a runtime
    /// condition.
    pub fn remove_ids(
        &self,
        ids: &[String],
        policy: WritePolicy,
        handle: &RequestHandle,
        on_result: &mut dyn FnMut(WriteStep, EngineResult<usize>),
    ) {
        assert!(!ids.is_empty(), "remove_ids requires at least one id");
        let query = Query::filtered(Predicate::or(
            ids.iter().map(|id| Predicate::eq("_id", id.clone())).collect(),
        ));
        self.remove(&query, policy, handle, on_result);
    }

    fn local_remove(&self, query: &Query) -> EngineResult<(usize, Vec<String>)> {
        let ids = self.cache.matching_ids(query)?;
        let operations = ids
            .iter()
            .map(|id| {
                PendingOperation::delete(
                    &self.collection,
                    id.clone(),
                    self.endpoints.entity(&self.collection, id),
                )
            })
            .collect();
        let removed = self
            .cache
            .remove_ids_with_pending(ids.clone(), operations)?;
        Ok((removed, ids))
    }

    fn network_remove(
        &self,
        query: &Query,
        locally_queued: &[String],
        handle: &RequestHandle,
    ) -> EngineResult<usize> {
        if handle.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let url = self.endpoints.collection_query(&self.collection, query)?;
        let request = self.authorized(RemoteRequest::new(HttpMethod::Delete, url));
        let response = self.remote.execute(&request)?;
        if !response.is_ok() {
            return Err(EngineError::from_response(&response));
        }
        let count: CountResponse = response.decode()?;

        // Mirror the deletion locally and settle any operations the
        // server-side delete made moot, including delete operations a
        // preceding local step queued for these same entities.
        let mut ids = self.cache.matching_ids(query)?;
        ids.extend(locally_queued.iter().cloned());
        if !ids.is_empty() {
            self.cache.scrub_removed(ids)?;
        }
        handle.set_progress(1.0);
        Ok(count.count as usize)
    }

    // Maintenance -------------------------------------------------------

    /// Clears the cache for this collection: matching entities, their
    /// pending operations and the collection's sync checkpoints. With no
    /// query the whole collection is wiped. Purely local.
    pub fn clear(&self, query: Option<&Query>) -> EngineResult<usize> {
        let removed = self.cache.clear(query.cloned())?;
        debug!(collection = %self.collection, removed, "cache cleared");
        Ok(removed)
    }

    /// Returns the number of outstanding pending operations.
    pub fn pending_count(&self) -> EngineResult<usize> {
        self.cache.pending_count()
    }

    /// Returns true if the collection's cache is empty.
    pub fn is_empty(&self) -> EngineResult<bool> {
        self.cache.is_empty()
    }
}

/// Builds the request body for a save: server-managed metadata never
/// travels, and a create omits the (temporary) id so the backend assigns
/// the permanent one.
fn request_body(entity: &Entity, is_create: bool) -> EngineResult<Value> {
    let mut json = entity.to_json().map_err(EngineError::from)?;
    if let Some(object) = json.as_object_mut() {
        object.remove("_meta");
        if is_create {
            object.remove("_id");
        }
    }
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::remote::{MockRemote, RemoteResponse};
    use serde_json::json;

    fn harness() -> (Arc<MockRemote>, CacheEngine) {
        let context = Arc::new(ClientContext::new(StoreConfig::new(
            "https://api.example.com",
            "kid_123",
        )));
        let remote = Arc::new(MockRemote::new());
        let engine = CacheEngine::new(
            Arc::clone(&context),
            Arc::clone(&remote) as Arc<dyn RemoteService>,
            LocalStorage::spawn(),
            "person",
        );
        (remote, engine)
    }

    fn server_person(id: &str, name: &str) -> Value {
        json!({
            "_id": id,
            "name": name,
            "_acl": {"creator": "58450d87c077970e38a388ba"},
            "_meta": {
                "lmt": Utc::now().to_rfc3339(),
                "ect": Utc::now().to_rfc3339()
            }
        })
    }

    #[test]
    fn force_local_save_enqueues_pending_operation() {
        let (remote, engine) = harness();
        let handle = RequestHandle::new();

        let mut deliveries = Vec::new();
        engine.save(
            Entity::new("").with_field("name", json!("Victor Barros")),
            WritePolicy::ForceLocal,
            &handle,
            &mut |step, result| deliveries.push((step, result.unwrap())),
        );

        assert_eq!(deliveries.len(), 1);
        let (step, saved) = &deliveries[0];
        assert_eq!(*step, WriteStep::Local);
        assert!(saved.has_temporary_id());
        assert!(saved.last_modified().is_some());
        assert_eq!(engine.pending_count().unwrap(), 1);
        assert_eq!(remote.request_count(), 0);
    }

    #[test]
    fn force_network_save_writes_through_without_pending() {
        let (remote, engine) = harness();
        let handle = RequestHandle::new();
        remote.push_response(RemoteResponse::ok(server_person(
            "58450d87f29e22207c83a236",
            "Victor Barros",
        )));

        let mut deliveries = Vec::new();
        engine.save(
            Entity::new("").with_field("name", json!("Victor Barros")),
            WritePolicy::ForceNetwork,
            &handle,
            &mut |step, result| deliveries.push((step, result.unwrap())),
        );

        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0, WriteStep::Network);
        assert_eq!(deliveries[0].1.id, "58450d87f29e22207c83a236");
        assert_eq!(engine.pending_count().unwrap(), 0);

        // The body sent to the backend has no id; the server assigns it.
        let request = &remote.requests()[0];
        assert_eq!(request.method, HttpMethod::Post);
        assert!(request.body.as_ref().unwrap().get("_id").is_none());

        // Write-through: a local read by the server id now succeeds.
        let found = engine.cache().find_by_id("58450d87f29e22207c83a236").unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn both_policy_delivers_local_before_network() {
        let (remote, engine) = harness();
        let handle = RequestHandle::new();
        remote.push_response(
            RemoteResponse::ok(json!([server_person("a", "Victor Barros")]))
                .with_request_start(Utc::now()),
        );

        let mut order = Vec::new();
        engine.find(
            &Query::new(),
            ReadPolicy::Both,
            &handle,
            &mut |source, result| {
                assert!(result.is_ok());
                order.push(source);
            },
        );

        assert_eq!(order, vec![ReadSource::Local, ReadSource::Network]);
    }

    #[test]
    fn both_policy_reports_network_failure_as_second_delivery() {
        let (remote, engine) = harness();
        let handle = RequestHandle::new();
        remote.push_error(EngineError::transport_retryable("connection lost"));

        let mut deliveries = Vec::new();
        engine.find(
            &Query::new(),
            ReadPolicy::Both,
            &handle,
            &mut |source, result| deliveries.push((source, result.is_ok())),
        );

        assert_eq!(
            deliveries,
            vec![(ReadSource::Local, true), (ReadSource::Network, false)]
        );
    }

    #[test]
    fn cancelled_network_read_still_delivers_local_snapshot() {
        let (remote, engine) = harness();
        let handle = RequestHandle::new();
        handle.cancel();

        let mut deliveries = Vec::new();
        engine.find(
            &Query::new(),
            ReadPolicy::Both,
            &handle,
            &mut |source, result| deliveries.push((source, result)),
        );

        assert_eq!(deliveries.len(), 2);
        assert!(deliveries[0].1.is_ok());
        assert!(matches!(deliveries[1].1, Err(EngineError::Cancelled)));
        assert_eq!(remote.request_count(), 0);
    }

    #[test]
    fn local_remove_enqueues_delete_operations() {
        let (_, engine) = harness();
        let handle = RequestHandle::new();
        engine
            .cache()
            .save(Entity::new("a").with_field("name", json!("Victor")))
            .unwrap();

        let mut removed = 0;
        engine.remove_by_id("a", WritePolicy::ForceLocal, &handle, &mut |_, result| {
            removed = result.unwrap();
        });

        assert_eq!(removed, 1);
        assert!(engine.cache().find_by_id("a").unwrap().is_none());
        assert_eq!(engine.pending_count().unwrap(), 1);
    }

    #[test]
    fn network_remove_mirrors_locally() {
        let (remote, engine) = harness();
        let handle = RequestHandle::new();
        engine
            .cache()
            .save(Entity::new("a").with_field("name", json!("Victor")))
            .unwrap();
        remote.push_response(RemoteResponse::ok(json!({"count": 1})));

        let query = Query::filtered(Predicate::eq("name", "Victor"));
        let mut removed = 0;
        engine.remove(&query, WritePolicy::ForceNetwork, &handle, &mut |_, result| {
            removed = result.unwrap();
        });

        assert_eq!(removed, 1);
        assert!(engine.cache().find_by_id("a").unwrap().is_none());
        assert_eq!(engine.pending_count().unwrap(), 0);
    }

    #[test]
    fn local_then_network_remove_settles_queued_deletes() {
        let (remote, engine) = harness();
        let handle = RequestHandle::new();
        engine
            .cache()
            .save(Entity::new("a").with_field("name", json!("Victor")))
            .unwrap();
        remote.push_response(RemoteResponse::ok(json!({"count": 1})));

        let mut steps = Vec::new();
        engine.remove_by_id(
            "a",
            WritePolicy::LocalThenNetwork,
            &handle,
            &mut |step, result| steps.push((step, result.unwrap())),
        );

        assert_eq!(steps, vec![(WriteStep::Local, 1), (WriteStep::Network, 1)]);
        // The server delete settled the queued delete operation.
        assert_eq!(engine.pending_count().unwrap(), 0);
    }

    #[test]
    #[should_panic(expected = "non-empty id")]
    fn remove_by_empty_id_is_caller_misuse() {
        let (_, engine) = harness();
        let handle = RequestHandle::new();
        engine.remove_by_id("", WritePolicy::ForceLocal, &handle, &mut |_, _| {});
    }

    #[test]
    #[should_panic(expected = "at least one id")]
    fn remove_with_empty_id_list_is_caller_misuse() {
        let (_, engine) = harness();
        let handle = RequestHandle::new();
        engine.remove_ids(&[], WritePolicy::ForceLocal, &handle, &mut |_, _| {});
    }

    #[test]
    fn count_policies() {
        let (remote, engine) = harness();
        let handle = RequestHandle::new();
        engine.cache().save(Entity::new("a")).unwrap();
        remote.push_response(RemoteResponse::ok(json!({"count": 42})));

        let mut counts = Vec::new();
        engine.count(None, ReadPolicy::Both, &handle, &mut |source, result| {
            counts.push((source, result.unwrap()));
        });

        assert_eq!(
            counts,
            vec![(ReadSource::Local, 1), (ReadSource::Network, 42)]
        );
    }

    #[test]
    fn session_token_travels_on_requests() {
        let (remote, engine) = harness();
        let handle = RequestHandle::new();
        engine
            .context
            .login(crate::context::Session::new("user-1", "token-abc"));
        remote.push_response(RemoteResponse::ok(json!([])));

        engine.find(&Query::new(), ReadPolicy::ForceNetwork, &handle, &mut |_, _| {});

        let request = &remote.requests()[0];
        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer token-abc")
        );
    }
}
