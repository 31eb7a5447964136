//! Entity identifier helpers.
//!
//! Entity ids are opaque strings assigned by the backend. Entities created
//! locally before the backend has confirmed them carry a temporary id with a
//! recognizable prefix, so callers can tell an unconfirmed record apart from
//! a server-assigned one.

use uuid::Uuid;

/// Prefix marking an entity id as locally assigned and not yet confirmed
/// by the backend.
pub const TEMP_ID_PREFIX: &str = "tmp_";

/// Generates a new temporary entity id.
#[must_use]
pub fn temporary_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4().simple())
}

/// Returns true if the id carries the temporary-id prefix.
#[must_use]
pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_ids_are_recognizable() {
        let id = temporary_id();
        assert!(is_temporary_id(&id));
        assert!(id.len() > TEMP_ID_PREFIX.len());
    }

    #[test]
    fn temporary_ids_are_unique() {
        assert_ne!(temporary_id(), temporary_id());
    }

    #[test]
    fn server_ids_are_not_temporary() {
        assert!(!is_temporary_id("58450d87f29e22207c83a236"));
        assert!(!is_temporary_id(""));
    }
}
