//! Cascade-delete ownership graph.
//!
//! An owner collection can declare that one of its fields holds the id (or
//! ids) of entities it owns in another collection. Removing an owner then
//! cascades into the owned rows. The graph is declared explicitly at
//! registration time and walked iteratively with a visited set, so cyclic
//! or self-referential ownership never recurses forever.

use std::collections::HashMap;

/// One ownership edge: a field of the owner holds ids in the owned
/// collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedLink {
    /// Field of the owner entity carrying the owned id(s).
    pub field: String,
    /// Collection the owned entities live in.
    pub collection: String,
}

/// Explicit ownership declarations, keyed by owner collection.
#[derive(Debug, Default)]
pub struct OwnershipGraph {
    links: HashMap<String, Vec<OwnedLink>>,
}

impl OwnershipGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares that `owner_collection.field` holds ids owned in
    /// `owned_collection`.
    pub fn declare(
        &mut self,
        owner_collection: impl Into<String>,
        field: impl Into<String>,
        owned_collection: impl Into<String>,
    ) {
        self.links
            .entry(owner_collection.into())
            .or_default()
            .push(OwnedLink {
                field: field.into(),
                collection: owned_collection.into(),
            });
    }

    /// Returns the ownership edges declared for a collection.
    pub fn owned_by(&self, owner_collection: &str) -> &[OwnedLink] {
        self.links
            .get(owner_collection)
            .map_or(&[], Vec::as_slice)
    }

    /// Returns true if no ownership was declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_and_lookup() {
        let mut graph = OwnershipGraph::new();
        assert!(graph.is_empty());
        assert!(graph.owned_by("book").is_empty());

        graph.declare("book", "edition_ids", "edition");
        graph.declare("book", "author_id", "author");

        let links = graph.owned_by("book");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].field, "edition_ids");
        assert_eq!(links[0].collection, "edition");
    }
}
