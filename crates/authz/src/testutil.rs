//! Shared test fixtures for the authorization pipeline.
//!
//! Feature-gated behind `testutil`.
//!
//! ```toml
//! [dev-dependencies]
//! estate-gate-authz = { path = "../authz", features = ["testutil"] }
//! ```

#![allow(clippy::expect_used)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use estate_gate_authn::{
    IdentityClaims, Role, VerificationKey,
    testutil::{TEST_SECRET, claims_for, create_hs256_jwt, test_policy},
    validate_at,
};
use estate_gate_storage::{
    MemoryAuditStore, MemoryResourceStore, MemoryWindowStore, StorageError, StorageResult,
    WindowSnapshot, WindowStore, testutil::reference_time,
};
use parking_lot::Mutex;

use crate::{
    alert::{AlertSink, OperationalAlert},
    config::PipelineConfig,
    pipeline::{Gatekeeper, Stores},
    stage::AccessRequest,
};

/// Validated claims for `sub` with `role`, issued at [`reference_time`].
///
/// # Panics
///
/// Panics if the fixture claims do not validate.
#[must_use]
pub fn claims_with_role(sub: &str, role: Role) -> IdentityClaims {
    let now = reference_time();
    validate_at(&claims_for(sub, role, now.timestamp()), &test_policy(), now)
        .into_claims()
        .expect("fixture claims validate")
}

/// A signed `Authorization` header for `sub` with `role`, issued at `now`.
#[must_use]
pub fn bearer_for(sub: &str, role: Role, now: DateTime<Utc>) -> String {
    format!("Bearer {}", create_hs256_jwt(&claims_for(sub, role, now.timestamp()), TEST_SECRET))
}

/// Alert sink that keeps every alert in memory.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<OperationalAlert>>,
}

impl RecordingAlertSink {
    /// Alerts raised so far, in order.
    #[must_use]
    pub fn alerts(&self) -> Vec<OperationalAlert> {
        self.alerts.lock().clone()
    }
}

impl AlertSink for RecordingAlertSink {
    fn raise(&self, alert: &OperationalAlert) {
        self.alerts.lock().push(alert.clone());
    }
}

/// Window store whose every call fails with a connection error.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingWindowStore;

#[async_trait]
impl WindowStore for FailingWindowStore {
    async fn hit(
        &self,
        _key: &str,
        _window: Duration,
        _now: DateTime<Utc>,
    ) -> StorageResult<WindowSnapshot> {
        Err(StorageError::connection("window store unreachable"))
    }
}

/// A [`Gatekeeper`] over in-memory stores that verifies tokens signed with
/// [`TEST_SECRET`], with handles on every store.
#[derive(Debug)]
pub struct TestHarness {
    /// The gatekeeper under test.
    pub gatekeeper: Gatekeeper,
    /// Ownership rows.
    pub resources: MemoryResourceStore,
    /// Audit log.
    pub audit: MemoryAuditStore,
    /// Raised alerts.
    pub alerts: Arc<RecordingAlertSink>,
    /// Decision time used by [`request`](Self::request) tokens.
    pub now: DateTime<Utc>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Harness with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if the gatekeeper cannot be built.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(PipelineConfig::builder().audit_timeout(Duration::from_millis(200)).build())
    }

    /// Harness with `config`.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    #[must_use]
    pub fn with_config(config: PipelineConfig) -> Self {
        let resources = MemoryResourceStore::new();
        let audit = MemoryAuditStore::new();
        let alerts = Arc::new(RecordingAlertSink::default());
        let gatekeeper = Gatekeeper::builder()
            .stores(Stores {
                windows: Arc::new(MemoryWindowStore::default()),
                resources: Arc::new(resources.clone()),
                audit: Arc::new(audit.clone()),
            })
            .alerts(alerts.clone())
            .verification_key(VerificationKey::Secret(TEST_SECRET.to_vec()))
            .config(config)
            .build()
            .expect("harness gatekeeper builds");
        Self { gatekeeper, resources, audit, alerts, now: reference_time() }
    }

    /// A request bearing a valid token for `sub` with `role`.
    #[must_use]
    pub fn request(&self, sub: &str, role: Role) -> AccessRequest {
        AccessRequest::builder().authorization(bearer_for(sub, role, self.now)).build()
    }

    /// Adds a `properties` row owned by `seller_id`.
    pub fn seed_property(&self, property_id: &str, seller_id: &str) {
        self.resources.insert_row("properties", property_id, [("seller_id", seller_id)]);
    }
}
