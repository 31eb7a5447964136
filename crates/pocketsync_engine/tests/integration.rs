//! Integration tests for the cache engine and sync coordinator.

use chrono::Utc;
use pocketsync_core::{Entity, GeoPoint, Predicate, Query};
use pocketsync_engine::{
    CacheEngine, ClientContext, EngineError, LocalStorage, MockRemote, ReadPolicy, ReadSource,
    RemoteResponse, RemoteService, RequestHandle, StoreConfig, SyncCoordinator, WritePolicy,
    WriteStep,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    remote: Arc<MockRemote>,
    storage: Arc<pocketsync_core::StoreExecutor<LocalStorage>>,
    engine: CacheEngine,
    coordinator: SyncCoordinator,
}

fn harness(config: StoreConfig) -> Harness {
    let context = Arc::new(ClientContext::new(config));
    let remote = Arc::new(MockRemote::new());
    let storage = LocalStorage::spawn();
    let engine = CacheEngine::new(
        Arc::clone(&context),
        Arc::clone(&remote) as Arc<dyn RemoteService>,
        Arc::clone(&storage),
        "person",
    );
    let coordinator = SyncCoordinator::new(
        context,
        Arc::clone(&remote) as Arc<dyn RemoteService>,
        Arc::clone(&storage),
        "person",
    );
    Harness {
        remote,
        storage,
        engine,
        coordinator,
    }
}

fn default_harness() -> Harness {
    harness(StoreConfig::new("https://api.example.com", "kid_123"))
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

fn collect_saves(
    engine: &CacheEngine,
    entity: Entity,
    policy: WritePolicy,
) -> Vec<(WriteStep, Result<Entity, EngineError>)> {
    let handle = RequestHandle::new();
    let mut deliveries = Vec::new();
    engine.save(entity, policy, &handle, &mut |step, result| {
        deliveries.push((step, result));
    });
    deliveries
}

/// Scenario: a local-then-network save first delivers a locally flagged
/// entity with a temporary id, then the server-confirmed entity; the
/// temporary id stops resolving once the backend assigns the permanent one.
#[test]
fn local_then_network_save_swaps_temporary_id() {
    let h = default_harness();
    h.remote.push_response(RemoteResponse::ok(server_person(
        "58450d87f29e22207c83a236",
        "Victor Barros",
    )));

    let person = Entity::new("").with_field("name", json!("Victor Barros"));
    let deliveries = collect_saves(&h.engine, person, WritePolicy::LocalThenNetwork);

    assert_eq!(deliveries.len(), 2);

    let (first_step, first) = &deliveries[0];
    assert_eq!(*first_step, WriteStep::Local);
    let local = first.as_ref().unwrap();
    assert!(local.has_temporary_id());
    assert_eq!(local.field("name"), Some(&json!("Victor Barros")));

    let (second_step, second) = &deliveries[1];
    assert_eq!(*second_step, WriteStep::Network);
    let confirmed = second.as_ref().unwrap();
    assert_eq!(confirmed.id, "58450d87f29e22207c83a236");

    // The temporary id is no longer resolvable locally.
    assert!(h.engine.cache().find_by_id(&local.id).unwrap().is_none());
    assert!(h
        .engine
        .cache()
        .find_by_id("58450d87f29e22207c83a236")
        .unwrap()
        .is_some());
    assert_eq!(h.engine.pending_count().unwrap(), 0);
}

/// A failed network step after the local save leaves the pending operation
/// queued; the next push replays it.
#[test]
fn failed_network_step_defers_to_next_push() {
    let h = default_harness();
    h.remote
        .push_error(EngineError::transport_retryable("connection lost"));

    let person = Entity::new("").with_field("name", json!("Victor Barros"));
    let deliveries = collect_saves(&h.engine, person, WritePolicy::LocalThenNetwork);

    assert_eq!(deliveries.len(), 2);
    assert!(deliveries[1].1.is_err());
    assert_eq!(h.engine.pending_count().unwrap(), 1);

    // The queued create replays on push and confirms.
    h.remote.push_response(RemoteResponse::ok(server_person(
        "58450d87f29e22207c83a236",
        "Victor Barros",
    )));
    let summary = h.coordinator.push(None).unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(h.engine.pending_count().unwrap(), 0);
    assert!(h
        .engine
        .cache()
        .find_by_id("58450d87f29e22207c83a236")
        .unwrap()
        .is_some());
}

/// Scenario: a delta pull applies `changed` upserts and `deleted`
/// removals against a pre-populated cache.
#[test]
fn delta_pull_updates_and_removes() {
    let h = harness(
        StoreConfig::new("https://api.example.com", "kid_123").with_delta_set(true),
    );

    // Seed the cache and the checkpoint with a full pull.
    h.remote.push_response(
        RemoteResponse::ok(json!([
            server_person("X", "Victor Barros"),
            server_person("Y", "Victor Hugo")
        ]))
        .with_request_start(Utc::now()),
    );
    h.coordinator.pull(None).unwrap();
    assert_eq!(h.engine.cache().count(None).unwrap(), 2);

    h.remote.push_response(
        RemoteResponse::ok(json!({
            "changed": [server_person("X", "Victor C Barros")],
            "deleted": ["Y"]
        }))
        .with_request_start(Utc::now()),
    );

    let summary = h.coordinator.pull(None).unwrap();
    assert!(summary.delta);

    let x = h.engine.cache().find_by_id("X").unwrap().unwrap();
    assert_eq!(x.field("name"), Some(&json!("Victor C Barros")));
    assert!(h.engine.cache().find_by_id("Y").unwrap().is_none());
    assert_eq!(h.engine.cache().count(None).unwrap(), 1);
}

/// Repeating a pull with no intervening remote change is a no-op for the
/// cache: contents and count are identical after the second call.
#[test]
fn delta_pull_is_idempotent() {
    let h = harness(
        StoreConfig::new("https://api.example.com", "kid_123").with_delta_set(true),
    );

    h.remote.push_response(
        RemoteResponse::ok(json!([server_person("X", "Victor Barros")]))
            .with_request_start(Utc::now()),
    );
    h.coordinator.pull(None).unwrap();

    let before = h.engine.cache().find(&Query::new()).unwrap();

    h.remote.push_response(
        RemoteResponse::ok(json!({"changed": [], "deleted": []}))
            .with_request_start(Utc::now()),
    );
    let summary = h.coordinator.pull(None).unwrap();
    assert!(summary.delta);
    assert_eq!(summary.fetched, 0);
    assert_eq!(summary.removed, 0);

    let after = h.engine.cache().find(&Query::new()).unwrap();
    assert_eq!(before, after);
    assert_eq!(h.engine.cache().count(None).unwrap(), 1);
}

/// Scenario: a geo-circle query behaves identically under `ForceNetwork`
/// (server-side filter, client trusts the response) and `ForceLocal`
/// (client-side geodesic filter).
#[test]
fn geo_circle_query_local_and_network() {
    let h = default_harness();
    let handle = RequestHandle::new();

    // Center of the circle; "outside" sits well past the radius.
    let center = GeoPoint::new(-122.4194, 37.7749);
    let inside = json!([-122.41, 37.78]);
    let outside = json!([-122.3, 38.2]);

    let within = Entity::from_json(server_person("inside", "Near"))
        .unwrap()
        .with_field("geolocation", inside.clone());
    let beyond = Entity::from_json(server_person("outside", "Far"))
        .unwrap()
        .with_field("geolocation", outside);
    h.engine
        .cache()
        .save_all(vec![within.clone(), beyond])
        .unwrap();

    let query = Query::filtered(Predicate::within_circle("geolocation", center, 5_000.0));

    // Local: the client applies the geodesic filter itself.
    let mut local_results = Vec::new();
    h.engine
        .find(&query, ReadPolicy::ForceLocal, &handle, &mut |_, result| {
            local_results = result.unwrap();
        });
    assert_eq!(local_results.len(), 1);
    assert_eq!(local_results[0].id, "inside");

    // Network: the server filtered; the client trusts the result set.
    let mut response_person = server_person("inside", "Near");
    response_person["geolocation"] = inside;
    h.remote.push_response(
        RemoteResponse::ok(json!([response_person])).with_request_start(Utc::now()),
    );
    let mut network_results = Vec::new();
    h.engine
        .find(&query, ReadPolicy::ForceNetwork, &handle, &mut |_, result| {
            network_results = result.unwrap();
        });
    assert_eq!(network_results.len(), 1);
    assert_eq!(network_results[0].id, "inside");
}

/// TTL hides expired entities from local reads without deleting them; a
/// cache without TTL over the same storage still sees them, unchanged.
#[test]
fn ttl_filters_without_deleting() {
    let storage = LocalStorage::spawn();
    let context = Arc::new(ClientContext::new(
        StoreConfig::new("https://api.example.com", "kid_123")
            .with_ttl(Duration::from_secs(3600)),
    ));
    let remote = Arc::new(MockRemote::new());
    let limited = CacheEngine::new(
        Arc::clone(&context),
        Arc::clone(&remote) as Arc<dyn RemoteService>,
        Arc::clone(&storage),
        "person",
    );

    let mut stale = Entity::new("stale").with_field("name", json!("Victor Barros"));
    stale.touch(Utc::now() - chrono::Duration::seconds(7200));
    let mut fresh = Entity::new("fresh").with_field("name", json!("Victor Hugo"));
    fresh.touch(Utc::now() - chrono::Duration::seconds(60));
    limited
        .cache()
        .save_all(vec![stale.clone(), fresh])
        .unwrap();

    let handle = RequestHandle::new();
    let mut results = Vec::new();
    limited.find(
        &Query::new(),
        ReadPolicy::ForceLocal,
        &handle,
        &mut |_, result| results = result.unwrap(),
    );
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "fresh");

    // Removing the TTL makes the entity visible again, field values intact.
    let unlimited_context = Arc::new(ClientContext::new(StoreConfig::new(
        "https://api.example.com",
        "kid_123",
    )));
    let unlimited = CacheEngine::new(
        unlimited_context,
        remote as Arc<dyn RemoteService>,
        storage,
        "person",
    );
    let revealed = unlimited.cache().find_by_id("stale").unwrap().unwrap();
    assert_eq!(revealed, stale);
}

/// A force-network save writes the server-confirmed payload through: a
/// subsequent force-local find by the server id returns the confirmed
/// entity, not the client-submitted one.
#[test]
fn write_through_prefers_server_payload() {
    let h = default_harness();

    // The server normalizes the name and assigns the id.
    h.remote.push_response(RemoteResponse::ok(server_person(
        "58450d87f29e22207c83a236",
        "Victor C Barros",
    )));

    let submitted = Entity::new("").with_field("name", json!("victor barros"));
    let deliveries = collect_saves(&h.engine, submitted, WritePolicy::ForceNetwork);
    assert_eq!(deliveries.len(), 1);

    let handle = RequestHandle::new();
    let mut found = None;
    h.engine.find_by_id(
        "58450d87f29e22207c83a236",
        ReadPolicy::ForceLocal,
        &handle,
        &mut |_, result| found = result.unwrap(),
    );
    let found = found.unwrap();
    assert_eq!(found.field("name"), Some(&json!("Victor C Barros")));
    assert_eq!(
        found.acl.as_ref().unwrap().creator.as_deref(),
        Some("58450d87c077970e38a388ba")
    );
}

/// Repeated local saves of the same entity coalesce into one pending
/// operation carrying the latest state; pushing replays it exactly once.
#[test]
fn repeated_local_saves_replay_once() {
    let h = default_harness();

    let deliveries = collect_saves(
        &h.engine,
        Entity::new("").with_field("name", json!("Draft")),
        WritePolicy::ForceLocal,
    );
    let local = deliveries[0].1.as_ref().unwrap().clone();

    let mut edited = local.clone();
    edited.set_field("name", json!("Final"));
    collect_saves(&h.engine, edited, WritePolicy::ForceLocal);

    assert_eq!(h.engine.pending_count().unwrap(), 1);

    h.remote.push_response(RemoteResponse::ok(server_person(
        "58450d87f29e22207c83a236",
        "Final",
    )));
    let summary = h.coordinator.push(None).unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.succeeded, 1);

    // Exactly one replay reached the network, carrying the latest body.
    assert_eq!(h.remote.request_count(), 1);
    let body = h.remote.requests()[0].body.clone().unwrap();
    assert_eq!(body["name"], json!("Final"));

    // Exactly one final record, under the permanent id.
    assert_eq!(h.engine.cache().count(None).unwrap(), 1);
    assert!(h.engine.cache().find_by_id(&local.id).unwrap().is_none());
}

/// Deleting a locally created, never-synced entity settles both the create
/// and the delete without touching the network.
#[test]
fn deleting_unsynced_create_needs_no_network() {
    let h = default_harness();

    let deliveries = collect_saves(
        &h.engine,
        Entity::new("").with_field("name", json!("Ephemeral")),
        WritePolicy::ForceLocal,
    );
    let local = deliveries[0].1.as_ref().unwrap().clone();
    assert_eq!(h.engine.pending_count().unwrap(), 1);

    let handle = RequestHandle::new();
    let mut removed = 0;
    h.engine.remove_by_id(
        &local.id,
        WritePolicy::ForceLocal,
        &handle,
        &mut |_, result| removed = result.unwrap(),
    );
    assert_eq!(removed, 1);
    assert_eq!(h.engine.pending_count().unwrap(), 0);

    let summary = h.coordinator.push(None).unwrap();
    assert_eq!(summary.attempted, 0);
    assert_eq!(h.remote.request_count(), 0);
}

/// A `Both`-policy read always delivers local-then-network, including when
/// the network fails.
#[test]
fn both_policy_double_delivery() {
    let h = default_harness();
    h.engine
        .cache()
        .save(Entity::new("cached").with_field("name", json!("Cached")))
        .unwrap();
    h.remote.push_response(
        RemoteResponse::ok(json!([server_person("cached", "Refreshed")]))
            .with_request_start(Utc::now()),
    );

    let handle = RequestHandle::new();
    let mut deliveries = Vec::new();
    h.engine.find(
        &Query::new(),
        ReadPolicy::Both,
        &handle,
        &mut |source, result| deliveries.push((source, result.unwrap())),
    );

    assert_eq!(deliveries.len(), 2);
    assert_eq!(deliveries[0].0, ReadSource::Local);
    assert_eq!(deliveries[0].1[0].field("name"), Some(&json!("Cached")));
    assert_eq!(deliveries[1].0, ReadSource::Network);
    assert_eq!(deliveries[1].1[0].field("name"), Some(&json!("Refreshed")));

    // The network refresh was written through.
    let refreshed = h.engine.cache().find_by_id("cached").unwrap().unwrap();
    assert_eq!(refreshed.field("name"), Some(&json!("Refreshed")));
}

/// Clearing a cache scrubs entities, their pending operations and the
/// collection's checkpoints; the pending operation log of other
/// collections is untouched.
#[test]
fn clear_scrubs_collection_state() {
    let h = default_harness();

    // A pending local create, a server row and a recorded checkpoint.
    collect_saves(
        &h.engine,
        Entity::new("").with_field("name", json!("Victor")),
        WritePolicy::ForceLocal,
    );
    h.remote.push_response(
        RemoteResponse::ok(json!([server_person("srv", "From Server")]))
            .with_request_start(Utc::now()),
    );
    h.coordinator.pull(None).unwrap();
    assert_eq!(h.engine.pending_count().unwrap(), 1);
    assert!(h.engine.cache().checkpoint(None).unwrap().is_some());

    let removed = h.engine.clear(None).unwrap();
    assert_eq!(removed, 1);
    assert!(h.engine.is_empty().unwrap());
    assert_eq!(h.engine.pending_count().unwrap(), 0);
    assert!(h.engine.cache().checkpoint(None).unwrap().is_none());
}

/// A sync after offline edits pushes the queued operations first and then
/// pulls the merged state, all through the same durable storage.
#[test]
fn offline_edit_then_sync_roundtrip() {
    let h = default_harness();

    // Offline: create locally.
    let deliveries = collect_saves(
        &h.engine,
        Entity::new("").with_field("name", json!("Victor Barros")),
        WritePolicy::ForceLocal,
    );
    let local = deliveries[0].1.as_ref().unwrap().clone();
    assert!(local.has_temporary_id());

    // Back online: push confirms the create, pull refreshes the cache.
    h.remote.push_response(RemoteResponse::ok(server_person(
        "58450d87f29e22207c83a236",
        "Victor Barros",
    )));
    h.remote.push_response(
        RemoteResponse::ok(json!([server_person(
            "58450d87f29e22207c83a236",
            "Victor Barros"
        )]))
        .with_request_start(Utc::now()),
    );

    let summary = h.coordinator.sync(None).unwrap();
    assert!(summary.push.is_success());
    assert_eq!(summary.push.succeeded, 1);
    assert_eq!(summary.pull.unwrap().fetched, 1);

    assert_eq!(h.engine.cache().count(None).unwrap(), 1);
    assert!(h.engine.cache().find_by_id(&local.id).unwrap().is_none());
    assert_eq!(h.storage.run(|s| s.oplog.len()).unwrap(), 0);
}
