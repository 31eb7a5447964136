//! Read and write policies.

/// Where a read is resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Read only from the local entity store; never touches the network.
    /// TTL-expired entities are treated as cache misses.
    ForceLocal,
    /// Read only from the backend; the result is written through to the
    /// local entity store.
    ForceNetwork,
    /// Deliver the local result first, then the refreshed network result.
    /// The two deliveries are independent snapshots.
    Both,
}

impl ReadPolicy {
    /// Returns true if the policy reads from the local store.
    #[must_use]
    pub fn reads_local(&self) -> bool {
        matches!(self, ReadPolicy::ForceLocal | ReadPolicy::Both)
    }

    /// Returns true if the policy reads from the network.
    #[must_use]
    pub fn reads_network(&self) -> bool {
        matches!(self, ReadPolicy::ForceNetwork | ReadPolicy::Both)
    }
}

/// Where a write is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Write to the local entity store and enqueue a pending operation for
    /// a later push.
    ForceLocal,
    /// Write to the backend, then write the server-confirmed result through
    /// to the local store. No pending operation is enqueued.
    ForceNetwork,
    /// Write locally first (delivering a locally flagged entity), then
    /// perform the network write. If the network step fails, the pending
    /// operation stays queued for the next push.
    LocalThenNetwork,
}

impl WritePolicy {
    /// Returns true if the policy writes to the local store first.
    #[must_use]
    pub fn writes_local_first(&self) -> bool {
        matches!(self, WritePolicy::ForceLocal | WritePolicy::LocalThenNetwork)
    }

    /// Returns true if the policy reaches the network.
    #[must_use]
    pub fn writes_network(&self) -> bool {
        matches!(
            self,
            WritePolicy::ForceNetwork | WritePolicy::LocalThenNetwork
        )
    }
}
