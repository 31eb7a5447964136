//! Sync coordinator: push, pull and composite sync.

use crate::context::ClientContext;
use crate::error::{EngineError, EngineResult};
use crate::remote::{Endpoints, HttpMethod, RemoteRequest, RemoteService};
use crate::storage::{CollectionCache, LocalStorage};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pocketsync_core::{Entity, Query, StoreExecutor};
use pocketsync_protocol::DeltaSetResponse;
use std::sync::Arc;
use tracing::{debug, warn};

/// The coordinator's position in a sync cycle.
///
/// A full cycle walks
/// `Idle → Pushing → (PushDone|PushFailed) → Pulling → (PullDone|PullFailed) → Idle`;
/// standalone push/pull invocations short-circuit the unused states. No
/// coordinator state survives a restart beyond the pending operation log
/// and the query-sync ledger; recovery resumes from those.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Not syncing.
    Idle,
    /// Replaying pending operations.
    Pushing,
    /// Push finished with every operation confirmed.
    PushDone,
    /// Push finished with at least one operation still queued.
    PushFailed,
    /// Fetching remote state.
    Pulling,
    /// Pull finished and the checkpoint advanced.
    PullDone,
    /// Pull failed; the checkpoint stands.
    PullFailed,
}

impl SyncPhase {
    /// Returns true while a push or pull is in flight.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, SyncPhase::Pushing | SyncPhase::Pulling)
    }

    /// Returns true if a new push/pull/sync may start.
    #[must_use]
    pub fn can_start(&self) -> bool {
        !self.is_active()
    }
}

/// Cumulative sync statistics.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Push invocations completed.
    pub pushes: u64,
    /// Pull invocations completed.
    pub pulls: u64,
    /// Operations replayed successfully.
    pub operations_pushed: u64,
    /// Operation replays that failed.
    pub operations_failed: u64,
    /// Entities fetched or upserted by pulls.
    pub entities_pulled: u64,
    /// Entities removed by delta deletions.
    pub entities_removed: u64,
    /// Checkpoint of the last successful pull.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Last error message, if any.
    pub last_error: Option<String>,
}

/// Outcome of one operation replay that failed.
#[derive(Debug)]
pub struct PushFailure {
    /// Id of the affected entity (temporary or permanent), if known.
    pub entity_id: Option<String>,
    /// Request id of the still-queued operation.
    pub request_id: String,
    /// The failure.
    pub error: EngineError,
}

/// Aggregate outcome of a push.
#[derive(Debug, Default)]
pub struct PushSummary {
    /// Operations attempted.
    pub attempted: usize,
    /// Operations confirmed and removed from the log.
    pub succeeded: usize,
    /// Operations that failed and stayed queued.
    pub failures: Vec<PushFailure>,
}

impl PushSummary {
    /// Returns true when every attempted operation was confirmed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of failed operations.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Aggregate outcome of a pull.
#[derive(Debug, Clone, PartialEq)]
pub struct PullSummary {
    /// Entities fetched (full pull) or upserted (delta pull).
    pub fetched: usize,
    /// Entities removed by delta deletions.
    pub removed: usize,
    /// Whether the pull used the incremental delta-set protocol.
    pub delta: bool,
    /// The checkpoint recorded, sourced from the server's request-start.
    pub last_sync: DateTime<Utc>,
}

/// Outcome of a composite sync: the push outcome plus the pull outcome,
/// surfaced together even when the push reported failures.
#[derive(Debug)]
pub struct SyncSummary {
    /// Push outcome.
    pub push: PushSummary,
    /// Pull outcome; pull proceeds best-effort after a failed push.
    pub pull: EngineResult<PullSummary>,
}

/// Flushes pending local mutations to the backend and merges remote state
/// into the local entity store.
pub struct SyncCoordinator {
    context: Arc<ClientContext>,
    remote: Arc<dyn RemoteService>,
    cache: CollectionCache,
    endpoints: Endpoints,
    collection: String,
    phase: RwLock<SyncPhase>,
    stats: RwLock<SyncStats>,
}

impl SyncCoordinator {
    /// Creates a coordinator bound to a collection.
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
            phase: RwLock::new(SyncPhase::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.read()
    }

    /// Returns a copy of the cumulative stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the local cache adapter.
    pub fn cache(&self) -> &CollectionCache {
        &self.cache
    }

    fn begin(&self, target: SyncPhase) -> EngineResult<()> {
        let mut phase = self.phase.write();
        if !phase.can_start() {
            return Err(EngineError::InvalidPhase {
                from: format!("{:?}", *phase),
                to: format!("{target:?}"),
            });
        }
        *phase = target;
        Ok(())
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.write() = phase;
    }

    /// Replays pending operations for this collection against the backend
    /// in ascending creation-date order.
    ///
    /// With a query, the replay is restricted to operations whose entity
    /// currently matches the query in the local cache. One operation's
    /// failure never aborts the batch; every outcome is accounted in the
    /// summary and failed operations stay queued.
    pub fn push(&self, query: Option<&Query>) -> EngineResult<PushSummary> {
        self.begin(SyncPhase::Pushing)?;
        let result = self.run_push(query);
        match &result {
            Ok(summary) if summary.is_success() => self.set_phase(SyncPhase::PushDone),
            _ => self.set_phase(SyncPhase::PushFailed),
        }
        self.set_phase(SyncPhase::Idle);
        result
    }

    fn run_push(&self, query: Option<&Query>) -> EngineResult<PushSummary> {
        let restriction = match query {
            Some(query) => Some(self.cache.matching_ids(query)?),
            None => None,
        };
        let operations = self.cache.pending_operations(restriction)?;

        let mut summary = PushSummary {
            attempted: operations.len(),
            ..PushSummary::default()
        };

        for operation in operations {
            debug!(
                collection = %self.collection,
                request_id = %operation.request_id,
                method = %operation.method,
                "replaying pending operation"
            );

            let request = RemoteRequest::new(operation.method.into(), operation.url.clone())
                .with_headers(operation.headers.clone())
                .with_headers(self.context.auth_headers())
                .with_timeout(self.context.config().timeout);
            let request = match &operation.body {
                Some(body) => request.with_body(body.clone()),
                None => request,
            };

            let outcome = self.remote.execute(&request).and_then(|response| {
                if !response.is_ok() {
                    return Err(EngineError::from_response(&response));
                }
                if operation.method.is_delete() {
                    self.cache.confirm_removed(operation.request_id.clone())
                } else {
                    let confirmed: Entity = response.decode()?;
                    self.cache.apply_confirmed(
                        Some(operation.request_id.clone()),
                        operation.object_id.clone(),
                        confirmed,
                    )
                }
            });

            match outcome {
                Ok(()) => summary.succeeded += 1,
                Err(error) => {
                    warn!(
                        collection = %self.collection,
                        request_id = %operation.request_id,
                        %error,
                        "pending operation replay failed"
                    );
                    summary.failures.push(PushFailure {
                        entity_id: operation.object_id.clone(),
                        request_id: operation.request_id.clone(),
                        error,
                    });
                }
            }
        }

        let mut stats = self.stats.write();
        stats.pushes += 1;
        stats.operations_pushed += summary.succeeded as u64;
        stats.operations_failed += summary.failed() as u64;
        if let Some(failure) = summary.failures.first() {
            stats.last_error = Some(failure.error.to_string());
        }
        drop(stats);

        Ok(summary)
    }

    /// Fetches remote state for the query and merges it into the local
    /// entity store.
    ///
    /// With delta-set enabled and a prior checkpoint, an incremental
    /// request carries the checkpoint and the response's `changed`/
    /// `deleted` partitions are applied; otherwise a full fetch replaces
    /// the locally cached subset matching the query. Either way the
    /// query-sync record advances only on success, to the server's
    /// request-start time.
    pub fn pull(&self, query: Option<&Query>) -> EngineResult<PullSummary> {
        self.begin(SyncPhase::Pulling)?;
        let result = self.run_pull(query);
        match &result {
            Ok(_) => self.set_phase(SyncPhase::PullDone),
            Err(_) => self.set_phase(SyncPhase::PullFailed),
        }
        self.set_phase(SyncPhase::Idle);
        result
    }

    fn run_pull(&self, query: Option<&Query>) -> EngineResult<PullSummary> {
        let query = query.cloned().unwrap_or_default();
        let signature = query.signature()?;
        let checkpoint = match self.context.config().delta_set {
            true => self.cache.checkpoint(signature.clone())?,
            false => None,
        };

        let result = match checkpoint {
            Some(since) => self.pull_delta(&query, signature, since),
            None => self.pull_full(&query, signature),
        };

        let mut stats = self.stats.write();
        stats.pulls += 1;
        match &result {
            Ok(summary) => {
                stats.entities_pulled += summary.fetched as u64;
                stats.entities_removed += summary.removed as u64;
                stats.last_sync_time = Some(summary.last_sync);
                stats.last_error = None;
            }
            Err(error) => stats.last_error = Some(error.to_string()),
        }
        drop(stats);

        result
    }

    fn pull_full(&self, query: &Query, signature: Option<String>) -> EngineResult<PullSummary> {
        let url = self.endpoints.collection_query(&self.collection, query)?;
        let response = self
            .remote
            .execute(&self.authorized(RemoteRequest::new(HttpMethod::Get, url)))?;
        if !response.is_ok() {
            return Err(EngineError::from_response(&response));
        }

        let last_sync = response.request_start().ok_or_else(|| {
            EngineError::invalid_response("missing request-start header on pull response")
        })?;
        let entities: Vec<Entity> = response.decode()?;
        let fetched = entities.len();

        self.cache
            .replace_query_results(query.clone(), entities, Some((signature, last_sync)))?;
        debug!(collection = %self.collection, fetched, "full pull applied");

        Ok(PullSummary {
            fetched,
            removed: 0,
            delta: false,
            last_sync,
        })
    }

    fn pull_delta(
        &self,
        query: &Query,
        signature: Option<String>,
        since: DateTime<Utc>,
    ) -> EngineResult<PullSummary> {
        let url = self.endpoints.delta_set(&self.collection, since, query)?;
        let response = self
            .remote
            .execute(&self.authorized(RemoteRequest::new(HttpMethod::Get, url)))?;
        if !response.is_ok() {
            return Err(EngineError::from_response(&response));
        }

        let last_sync = response.request_start().ok_or_else(|| {
            EngineError::invalid_response("missing request-start header on pull response")
        })?;
        let delta: DeltaSetResponse = response.decode()?;

        let (fetched, removed) =
            self.cache
                .apply_delta(delta.changed, delta.deleted, signature, last_sync)?;
        debug!(
            collection = %self.collection,
            fetched,
            removed,
            "delta pull applied"
        );

        Ok(PullSummary {
            fetched,
            removed,
            delta: true,
            last_sync,
        })
    }

    /// Push strictly followed by pull. The pull proceeds best-effort even
    /// when the push reported failures; both outcomes are surfaced.
    pub fn sync(&self, query: Option<&Query>) -> EngineResult<SyncSummary> {
        self.begin(SyncPhase::Pushing)?;
        let push = match self.run_push(query) {
            Ok(summary) => summary,
            Err(error) => {
                self.set_phase(SyncPhase::PushFailed);
                self.set_phase(SyncPhase::Idle);
                return Err(error);
            }
        };
        self.set_phase(if push.is_success() {
            SyncPhase::PushDone
        } else {
            SyncPhase::PushFailed
        });

        self.set_phase(SyncPhase::Pulling);
        let pull = self.run_pull(query);
        self.set_phase(match &pull {
            Ok(_) => SyncPhase::PullDone,
            Err(_) => SyncPhase::PullFailed,
        });
        self.set_phase(SyncPhase::Idle);

        Ok(SyncSummary { push, pull })
    }

    /// Discards every pending local mutation for this collection, then
    /// pulls to restore the backend's state. Returns the number of
    /// operations discarded.
    pub fn purge(&self, query: Option<&Query>) -> EngineResult<usize> {
        let discarded = self.cache.discard_pending()?;
        debug!(collection = %self.collection, discarded, "pending operations purged");
        self.pull(query)?;
        Ok(discarded)
    }

    fn authorized(&self, request: RemoteRequest) -> RemoteRequest {
        request
            .with_headers(self.context.auth_headers())
            .with_timeout(self.context.config().timeout)
    }
}
