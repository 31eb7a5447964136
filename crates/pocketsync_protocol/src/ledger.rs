//! Query-sync ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The last successful synchronization checkpoint for a
/// (collection, query-signature) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySyncRecord {
    /// Collection the checkpoint belongs to.
    pub collection: String,
    /// Canonical query signature; `None` means unfiltered.
    pub query: Option<String>,
    /// Timestamp of the last successful full or incremental pull, sourced
    /// from the server's response rather than the client clock.
    pub last_sync: DateTime<Utc>,
}

/// Durable table of sync checkpoints.
///
/// # Invariants
///
/// - At most one record per (collection, query-signature).
/// - Records are written only after a successful pull and removed when the
///   collection's cache is cleared or invalidated.
#[derive(Debug, Default)]
pub struct QuerySyncLedger {
    records: HashMap<(String, Option<String>), QuerySyncRecord>,
}

impl QuerySyncLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the checkpoint for a (collection, signature) pair.
    pub fn checkpoint(&self, collection: &str, signature: Option<&str>) -> Option<DateTime<Utc>> {
        let key = (collection.to_string(), signature.map(str::to_string));
        self.records.get(&key).map(|record| record.last_sync)
    }

    /// Records a successful sync, replacing any previous checkpoint for the
    /// same (collection, signature) pair.
    pub fn record(
        &mut self,
        collection: impl Into<String>,
        signature: Option<String>,
        last_sync: DateTime<Utc>,
    ) {
        let collection = collection.into();
        let key = (collection.clone(), signature.clone());
        self.records.insert(
            key,
            QuerySyncRecord {
                collection,
                query: signature,
                last_sync,
            },
        );
    }

    /// Removes the checkpoint for a (collection, signature) pair, returning
    /// the removed timestamp.
    pub fn invalidate(
        &mut self,
        collection: &str,
        signature: Option<&str>,
    ) -> Option<DateTime<Utc>> {
        let key = (collection.to_string(), signature.map(str::to_string));
        self.records.remove(&key).map(|record| record.last_sync)
    }

    /// Removes every checkpoint for a collection. Returns the number
    /// removed.
    pub fn invalidate_collection(&mut self, collection: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|(c, _), _| c != collection);
        before - self.records.len()
    }

    /// Returns all records for a collection.
    pub fn records(&self, collection: &str) -> Vec<&QuerySyncRecord> {
        self.records
            .values()
            .filter(|record| record.collection == collection)
            .collect()
    }

    /// Returns the total number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the ledger holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clears the ledger.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
