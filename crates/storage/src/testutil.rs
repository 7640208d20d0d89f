//! Shared test utilities for store testing.
//!
//! Helpers for seeding resource tables, generating rate-limit keys, and
//! asserting on [`StorageResult`] values. Feature-gated behind `testutil` to
//! prevent leaking into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! estate-gate-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use estate_gate_storage::testutil::{make_rate_key, seeded_properties};
//! ```

use chrono::{DateTime, Utc};

use crate::{
    error::{StorageError, StorageResult},
    resource::MemoryResourceStore,
};

/// Fixed reference instant (2023-11-14T22:13:20Z) for deterministic window tests.
#[must_use]
pub fn reference_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

/// Create a deterministic rate-limit key for a subject index and endpoint.
///
/// Produces keys like `"sub:user-000042|create_property"`.
#[must_use]
pub fn make_rate_key(idx: usize, endpoint: &str) -> String {
    format!("sub:user-{idx:06}|{endpoint}")
}

/// Create a [`MemoryResourceStore`] whose `properties` table holds one row
/// per `(property_id, seller_id)` pair.
#[must_use]
pub fn seeded_properties(rows: &[(&str, &str)]) -> MemoryResourceStore {
    let store = MemoryResourceStore::new();
    for (property_id, seller_id) in rows {
        store.insert_row("properties", *property_id, [("seller_id", *seller_id)]);
    }
    store
}

/// Assert that a [`StorageResult`] is `Ok`, returning the inner value.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use estate_gate_storage::assert_storage_ok;
/// use estate_gate_storage::error::StorageResult;
///
/// let result: StorageResult<i32> = Ok(42);
/// let value = assert_storage_ok!(result);
/// assert_eq!(value, 42);
/// ```
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Assert that a [`StorageResult`] contains a [`StorageError::Connection`].
#[macro_export]
macro_rules! assert_unavailable {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Connection { .. })),
            "expected StorageError::Connection, got: {:?}",
            $result,
        );
    };
}

/// Helper to verify that a result is a `Connection` error.
pub fn is_unavailable<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::Connection { .. }))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        IdentityId, ResourceId,
        resource::{OwnershipQuery, ResourceStore},
    };

    #[test]
    fn test_make_rate_key_format() {
        assert_eq!(make_rate_key(42, "create_property"), "sub:user-000042|create_property");
    }

    #[tokio::test]
    async fn test_seeded_properties() {
        let store = seeded_properties(&[("p1", "alice"), ("p2", "bob")]);
        let rid = ResourceId::from("p2");
        let bob = IdentityId::from("bob");
        let query = OwnershipQuery {
            table: "properties",
            owner_column: "seller_id",
            resource_id: &rid,
            owner_id: &bob,
        };
        assert!(store.exists_owned(&query).await.unwrap());
    }

    #[test]
    fn test_assert_macros() {
        let ok: StorageResult<i32> = Ok(7);
        assert_eq!(assert_storage_ok!(ok), 7);

        let down: StorageResult<()> = Err(StorageError::connection("down"));
        assert!(is_unavailable(&down));
        assert_unavailable!(down);
    }
}
