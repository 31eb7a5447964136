//! # PocketSync Engine
//!
//! Cache engine and sync coordinator for PocketSync.
//!
//! This crate provides:
//! - Read/write policy resolution (local, network, or both)
//! - TTL filtering of local reads
//! - Pending-operation bookkeeping for deferred writes
//! - Push/pull/sync with incremental delta-set support
//! - Request cancellation and progress handles
//!
//! ## Architecture
//!
//! All durable state (cached entities, the pending operation log and the
//! query-sync ledger) lives behind one single-writer store executor, so
//! every logical mutation is one atomic job. The backend is reached only
//! through the [`RemoteService`] trait; nothing here depends on a concrete
//! HTTP client.
//!
//! ## Key Invariants
//!
//! - Under [`ReadPolicy::Both`] the local delivery strictly precedes the
//!   network delivery.
//! - Pending operations replay oldest-first; a replayed operation is
//!   deleted before its confirmation is written.
//! - Pull checkpoints come from the server's request-start time and only
//!   advance on success.
//! - A failed network step never modifies durable state.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod engine;
mod error;
mod policy;
mod remote;
mod request;
mod storage;
mod sync;

pub use config::StoreConfig;
pub use context::{ClientContext, Session};
pub use engine::{CacheEngine, ReadSource, WriteStep};
pub use error::{EngineError, EngineResult};
pub use policy::{ReadPolicy, WritePolicy};
pub use remote::{
    Endpoints, HttpMethod, MockRemote, RemoteRequest, RemoteResponse, RemoteService,
    REQUEST_START_HEADER,
};
pub use request::RequestHandle;
pub use storage::{CollectionCache, LocalStorage};
pub use sync::{
    PullSummary, PushFailure, PushSummary, SyncCoordinator, SyncPhase, SyncStats, SyncSummary,
};
