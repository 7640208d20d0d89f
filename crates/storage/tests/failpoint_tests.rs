#![allow(clippy::expect_used, clippy::panic)]
//! Fail-point injection for the in-memory stores.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p estate-gate-storage --features failpoints --test failpoint_tests
//! ```
#![cfg(feature = "failpoints")]

use estate_gate_storage::{
    AuditLogEntry, AuditOutcome, AuditStore, IdentityId, MemoryAuditStore, OwnershipQuery,
    ResourceId, ResourceStore, testutil::seeded_properties,
};

fn entry() -> AuditLogEntry {
    AuditLogEntry::builder()
        .actor_id("admin-1")
        .action("approve_property")
        .resource_type("property")
        .outcome(AuditOutcome::Completed)
        .build()
}

#[tokio::test]
async fn audit_append_failpoint_returns_error_and_writes_nothing() {
    let scenario = fail::FailScenario::setup();
    let store = MemoryAuditStore::new();

    fail::cfg("audit-store-append", "return").expect("failed to configure fail point");
    assert!(store.append(entry()).await.is_err());
    assert!(store.is_empty());

    fail::remove("audit-store-append");
    assert!(store.append(entry()).await.is_ok());
    assert_eq!(store.len(), 1);

    scenario.teardown();
}

#[tokio::test]
async fn resource_lookup_failpoint_returns_error() {
    let scenario = fail::FailScenario::setup();
    let store = seeded_properties(&[("p1", "alice")]);
    let rid = ResourceId::from("p1");
    let alice = IdentityId::from("alice");
    let query = OwnershipQuery {
        table: "properties",
        owner_column: "seller_id",
        resource_id: &rid,
        owner_id: &alice,
    };

    fail::cfg("resource-store-lookup", "return").expect("failed to configure fail point");
    assert!(store.exists_owned(&query).await.is_err());

    scenario.teardown();
}
