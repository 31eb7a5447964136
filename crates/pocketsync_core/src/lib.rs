//! # PocketSync Core
//!
//! Entity model, query language and local entity store for PocketSync.
//!
//! This crate provides:
//! - `Entity` documents with id, ACL and server-managed metadata
//! - A predicate/query language with geo containment support
//! - Predicate translation into the store's normalized document form
//! - An in-memory entity store with `ids`/`lmt` bookkeeping
//! - A single-writer executor serializing all access to a store handle

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod geo;
mod query;
mod store;

pub use entity::{is_temporary_id, temporary_id, Acl, Entity, Metadata, TEMP_ID_PREFIX};
pub use error::{CoreError, CoreResult};
pub use geo::{haversine_distance, point_in_polygon, GeoPoint, EARTH_RADIUS_METERS};
pub use query::{Comparison, Predicate, Query, SortField};
pub use store::{
    denormalize_fields, normalize_fields, translate, EntityStore, GeoFilter, OwnedLink,
    OwnershipGraph, StoreExecutor, StorePredicate, TranslatedQuery,
};
