//! Pending operation log.

use crate::operation::{OperationMethod, PendingOperation};
use pocketsync_core::is_temporary_id;

/// An ordered log of local mutations awaiting remote confirmation.
///
/// # Invariants
///
/// - At most one outstanding operation per (collection, object id): a later
///   operation on the same entity supersedes the earlier, uncommitted one.
/// - Replay order is ascending by creation date (ties broken by request id
///   for determinism).
/// - A delete superseding an unconfirmed create annihilates both; the
///   backend never saw the entity, so there is nothing to replay.
#[derive(Debug, Default)]
pub struct PendingOperationLog {
    operations: Vec<PendingOperation>,
}

impl PendingOperationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues an operation, superseding any outstanding operation for the
    /// same (collection, object id). Returns the superseded operation.
    pub fn enqueue(&mut self, operation: PendingOperation) -> Option<PendingOperation> {
        let replaced = match operation.object_id.as_deref() {
            Some(object_id) => self.take_for_target(&operation.collection, object_id),
            None => None,
        };

        if let Some(prior) = &replaced {
            let annihilates = operation.method.is_delete()
                && prior.method == OperationMethod::Post
                && operation.object_id.as_deref().is_some_and(is_temporary_id);
            if annihilates {
                return replaced;
            }
        }

        self.operations.push(operation);
        replaced
    }

    /// Removes and returns the operation with the given request id.
    pub fn dequeue(&mut self, request_id: &str) -> Option<PendingOperation> {
        let index = self
            .operations
            .iter()
            .position(|op| op.request_id == request_id)?;
        Some(self.operations.remove(index))
    }

    /// Returns the operation with the given request id.
    pub fn get(&self, request_id: &str) -> Option<&PendingOperation> {
        self.operations
            .iter()
            .find(|op| op.request_id == request_id)
    }

    /// Lists operations for a collection in replay order, optionally
    /// restricted to the given object ids.
    pub fn list(&self, collection: &str, object_ids: Option<&[String]>) -> Vec<PendingOperation> {
        let mut selected: Vec<PendingOperation> = self
            .operations
            .iter()
            .filter(|op| op.collection == collection)
            .filter(|op| match object_ids {
                Some(ids) => op
                    .object_id
                    .as_ref()
                    .is_some_and(|id| ids.iter().any(|candidate| candidate == id)),
                None => true,
            })
            .cloned()
            .collect();
        selected.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        selected
    }

    /// Returns the number of outstanding operations for a collection.
    #[must_use]
    pub fn pending_count(&self, collection: &str) -> usize {
        self.operations
            .iter()
            .filter(|op| op.collection == collection)
            .count()
    }

    /// Removes operations addressed to any of the given object ids within a
    /// collection. Returns the number removed.
    pub fn remove_for_objects(&mut self, collection: &str, object_ids: &[String]) -> usize {
        let before = self.operations.len();
        self.operations.retain(|op| {
            op.collection != collection
                || !op
                    .object_id
                    .as_ref()
                    .is_some_and(|id| object_ids.iter().any(|candidate| candidate == id))
        });
        before - self.operations.len()
    }

    /// Removes every operation for a collection. Returns the number removed.
    pub fn remove_collection(&mut self, collection: &str) -> usize {
        let before = self.operations.len();
        self.operations.retain(|op| op.collection != collection);
        before - self.operations.len()
    }

    /// Rewrites the object id of outstanding operations after the backend
    /// assigns a permanent id. Returns the number of operations rewritten.
    pub fn reassign_object_id(&mut self, collection: &str, old_id: &str, new_id: &str) -> usize {
        let mut rewritten = 0;
        for op in &mut self.operations {
            if op.collection == collection && op.object_id.as_deref() == Some(old_id) {
                op.object_id = Some(new_id.to_string());
                rewritten += 1;
            }
        }
        rewritten
    }

    /// Returns the total number of outstanding operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if there are no outstanding operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Clears the log.
    pub fn clear(&mut self) {
        self.operations.clear();
    }

    fn take_for_target(&mut self, collection: &str, object_id: &str) -> Option<PendingOperation> {
        let index = self.operations.iter().position(|op| {
            op.collection == collection && op.object_id.as_deref() == Some(object_id)
        })?;
        Some(self.operations.remove(index))
    }
}
