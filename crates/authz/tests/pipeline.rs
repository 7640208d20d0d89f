#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end pipeline scenarios over in-memory stores.

use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use estate_gate_authn::{
    Role, ValidationPolicy,
    testutil::{TEST_SECRET, claims_for, craft_raw_jwt, create_hs256_jwt},
};
use estate_gate_authz::{
    AccessRequest, AuditStatus, AuthzError, Completed, Decision, ErrorKind, Gatekeeper, Pipeline,
    PipelineConfig, RateLimitRule, ResourceType, RouteBinding, SelfTargetingAction, Stores, perm,
    testutil::{FailingWindowStore, TestHarness},
};
use estate_gate_storage::{AuditOutcome, MemoryAuditStore, MemoryResourceStore, MemoryWindowStore};
use serde_json::json;

async fn run(pipeline: &Pipeline, harness: &TestHarness, request: &AccessRequest) -> Decision {
    pipeline
        .execute_at(request, harness.now, |claims| async move {
            Ok::<_, String>(Completed::new(claims.sub))
        })
        .await
        .decision
}

fn create_property(harness: &TestHarness) -> Pipeline {
    harness
        .gatekeeper
        .bind(
            RouteBinding::builder()
                .endpoint("create_property")
                .required_permissions(vec![perm::CREATE_PROPERTIES])
                .rate_limit(RateLimitRule::new(5, Duration::from_secs(60)))
                .audit_action("create_property")
                .build(),
        )
        .unwrap()
}

fn delete_user(harness: &TestHarness) -> Pipeline {
    harness
        .gatekeeper
        .bind(
            RouteBinding::builder()
                .endpoint("delete_user")
                .required_permissions(vec![perm::DELETE_USERS])
                .policy(ValidationPolicy::admin())
                .self_targeting(SelfTargetingAction::DeleteUser)
                .audit_action("delete_user")
                .build(),
        )
        .unwrap()
}

fn update_property(harness: &TestHarness) -> Pipeline {
    harness
        .gatekeeper
        .bind(
            RouteBinding::builder()
                .endpoint("update_property")
                .required_permissions(vec![perm::UPDATE_PROPERTIES])
                .resource_type(ResourceType::Property)
                .audit_action("update_property")
                .build(),
        )
        .unwrap()
}

// ===========================================================================
// 1. Permissions
// ===========================================================================

#[tokio::test]
async fn agent_may_create_properties() {
    let harness = TestHarness::new();
    let pipeline = create_property(&harness);

    let outcome = pipeline
        .execute_at(&harness.request("agent-1", Role::Agent), harness.now, |claims| async move {
            Ok::<_, String>(
                Completed::new(claims.sub)
                    .with_changes(json!({ "after": { "id": "prop-7", "price": 450_000 } })),
            )
        })
        .await;

    assert!(outcome.decision.is_allowed());
    assert_eq!(outcome.decision.status(), 200);
    assert_eq!(outcome.result, Some(Ok("agent-1".to_owned())));
    assert!(matches!(outcome.audit, AuditStatus::Recorded(_)));

    let entries = harness.audit.entries_for_actor("agent-1");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "create_property");
    assert_eq!(entries[0].outcome, AuditOutcome::Completed);
    assert_eq!(entries[0].timestamp, harness.now);
    assert_eq!(entries[0].metadata["details"]["after"]["price"], 450_000);
}

#[tokio::test]
async fn agent_may_not_delete_users() {
    let harness = TestHarness::new();
    let pipeline = harness
        .gatekeeper
        .bind(
            RouteBinding::builder()
                .endpoint("delete_user")
                .required_permissions(vec![perm::DELETE_USERS])
                .audit_action("delete_user")
                .build(),
        )
        .unwrap();

    let mut ran = false;
    let outcome = pipeline
        .execute_at(&harness.request("agent-1", Role::Agent), harness.now, |_| {
            ran = true;
            async { Ok::<_, String>(Completed::new(())) }
        })
        .await;

    assert!(!ran);
    assert_eq!(outcome.decision, Decision::denied(ErrorKind::PermissionDenied));
    assert_eq!(outcome.decision.status(), 403);
    assert_eq!(outcome.decision.public_message(), "Forbidden");
    assert!(outcome.result.is_none());

    let entries = harness.audit.entries_for_actor("agent-1");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, AuditOutcome::Denied);
}

#[tokio::test]
async fn admin_route_rejects_lower_roles() {
    let harness = TestHarness::new();
    let pipeline = delete_user(&harness);
    let mut request = harness.request("seller-1", Role::Seller);
    request.target_identity = Some("someone".into());

    let decision = run(&pipeline, &harness, &request).await;
    assert_eq!(decision, Decision::denied(ErrorKind::RoleNotPermitted));
    assert_eq!(decision.status(), 403);
}

// ===========================================================================
// 2. Self-protection
// ===========================================================================

#[tokio::test]
async fn admin_cannot_delete_own_account() {
    let harness = TestHarness::new();
    let pipeline = delete_user(&harness);

    let mut own = harness.request("admin-1", Role::Admin);
    own.target_identity = Some("admin-1".into());
    assert_eq!(run(&pipeline, &harness, &own).await, Decision::denied(ErrorKind::PermissionDenied));

    let mut other = harness.request("admin-1", Role::Admin);
    other.target_identity = Some("user-42".into());
    assert!(run(&pipeline, &harness, &other).await.is_allowed());

    let entries = harness.audit.entries_for_actor("admin-1");
    let outcomes: Vec<_> = entries.iter().map(|e| e.outcome).collect();
    assert_eq!(outcomes, [AuditOutcome::Denied, AuditOutcome::Completed]);
}

// ===========================================================================
// 3. Rate limiting
// ===========================================================================

#[tokio::test]
async fn sixth_request_in_window_is_rate_limited() {
    let harness = TestHarness::new();
    let pipeline = create_property(&harness);
    let request = harness.request("agent-1", Role::Agent);

    for i in 0..5 {
        assert!(run(&pipeline, &harness, &request).await.is_allowed(), "request {i}");
    }

    let outcome = pipeline
        .execute_at(&request, harness.now, |_| async { Ok::<_, String>(Completed::new(())) })
        .await;
    assert_eq!(outcome.decision, Decision::denied(ErrorKind::RateLimitExceeded));
    assert_eq!(outcome.decision.status(), 429);
    let retry = outcome.retry_after.unwrap();
    assert!(retry <= Duration::from_secs(60));

    let denied: Vec<_> = harness
        .audit
        .entries_for_actor("sub:agent-1|create_property")
        .into_iter()
        .filter(|e| e.outcome == AuditOutcome::Denied)
        .collect();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].action, "rate_limited");
    assert_eq!(denied[0].metadata["reason"]["kind"], "rate_limit_exceeded");
}

#[tokio::test]
async fn fresh_window_allows_again() {
    let harness = TestHarness::new();
    let pipeline = create_property(&harness);
    let request = harness.request("agent-1", Role::Agent);

    for _ in 0..6 {
        run(&pipeline, &harness, &request).await;
    }
    let later = harness.now + TimeDelta::seconds(60);
    let decision = pipeline
        .execute_at(&request, later, |_| async { Ok::<_, String>(Completed::new(())) })
        .await
        .decision;
    assert!(decision.is_allowed());
}

#[tokio::test]
async fn limits_are_per_caller_and_endpoint() {
    let harness = TestHarness::new();
    let create = create_property(&harness);
    let a = harness.request("agent-1", Role::Agent);
    let b = harness.request("agent-2", Role::Agent);

    for _ in 0..5 {
        run(&create, &harness, &a).await;
    }
    assert!(!run(&create, &harness, &a).await.is_allowed());
    assert!(run(&create, &harness, &b).await.is_allowed());

    harness.seed_property("prop-1", "agent-1");
    let mut update = harness.request("agent-1", Role::Agent);
    update.resource_id = Some("prop-1".into());
    assert!(run(&update_property(&harness), &harness, &update).await.is_allowed());
}

#[tokio::test]
async fn rate_limit_runs_before_claims() {
    let harness = TestHarness::with_config(
        PipelineConfig::builder()
            .default_rate_limit(RateLimitRule::new(1, Duration::from_secs(60)))
            .build(),
    );
    let pipeline = harness
        .gatekeeper
        .bind(RouteBinding::builder().endpoint("login").build())
        .unwrap();
    let anonymous = AccessRequest::builder().client_ip("198.51.100.4".parse().unwrap()).build();

    assert_eq!(
        run(&pipeline, &harness, &anonymous).await,
        Decision::denied(ErrorKind::MalformedClaims)
    );
    assert_eq!(
        run(&pipeline, &harness, &anonymous).await,
        Decision::denied(ErrorKind::RateLimitExceeded)
    );
    let entries = harness.audit.entries_for_actor("ip:198.51.100.4|login");
    assert_eq!(entries.len(), 2);
}

fn forged_request(sub: &str, role: Role, harness: &TestHarness, ip: &str) -> AccessRequest {
    let claims = claims_for(sub, role, harness.now.timestamp());
    AccessRequest::builder()
        .authorization(format!("Bearer {}", create_hs256_jwt(&claims, b"attacker-key")))
        .client_ip(ip.parse().unwrap())
        .build()
}

#[tokio::test]
async fn forged_subject_cannot_fill_a_victims_window() {
    let harness = TestHarness::new();
    let pipeline = create_property(&harness);

    for _ in 0..5 {
        let spoofed = forged_request("agent-1", Role::Agent, &harness, "203.0.113.9");
        assert_eq!(
            run(&pipeline, &harness, &spoofed).await,
            Decision::denied(ErrorKind::MalformedClaims)
        );
    }

    let genuine = harness.request("agent-1", Role::Agent);
    assert!(run(&pipeline, &harness, &genuine).await.is_allowed());
    assert!(harness.audit.entries_for_actor("sub:agent-1|create_property").is_empty());
    assert_eq!(harness.audit.entries_for_actor("ip:203.0.113.9|create_property").len(), 5);
}

#[tokio::test]
async fn rotating_forged_subjects_share_the_address_window() {
    let harness = TestHarness::with_config(
        PipelineConfig::builder()
            .default_rate_limit(RateLimitRule::new(1, Duration::from_secs(60)))
            .build(),
    );
    let pipeline = harness
        .gatekeeper
        .bind(
            RouteBinding::builder()
                .endpoint("create_inquiry")
                .required_permissions(vec![perm::CREATE_INQUIRIES])
                .build(),
        )
        .unwrap();

    let mut limited = 0;
    for i in 0..20 {
        let spoofed = forged_request(&format!("ghost-{i}"), Role::Buyer, &harness, "203.0.113.9");
        if run(&pipeline, &harness, &spoofed).await == Decision::denied(ErrorKind::RateLimitExceeded)
        {
            limited += 1;
        }
    }
    assert_eq!(limited, 19);
}

#[tokio::test]
async fn window_store_outage_denies_with_503() {
    let harness = TestHarness::new();
    let gatekeeper = Gatekeeper::builder()
        .stores(Stores {
            windows: Arc::new(FailingWindowStore),
            resources: Arc::new(MemoryResourceStore::new()),
            audit: Arc::new(harness.audit.clone()),
        })
        .alerts(harness.alerts.clone())
        .verification_key(estate_gate_authn::VerificationKey::Secret(TEST_SECRET.to_vec()))
        .build()
        .unwrap();
    let pipeline = gatekeeper
        .bind(
            RouteBinding::builder()
                .endpoint("create_property")
                .required_permissions(vec![perm::CREATE_PROPERTIES])
                .build(),
        )
        .unwrap();

    let mut ran = false;
    let outcome = pipeline
        .execute_at(&harness.request("agent-1", Role::Agent), harness.now, |_| {
            ran = true;
            async { Ok::<_, String>(Completed::new(())) }
        })
        .await;
    assert!(!ran);
    assert_eq!(outcome.decision, Decision::denied(ErrorKind::StoreUnavailable));
    assert_eq!(outcome.decision.status(), 503);
    assert_eq!(harness.alerts.alerts()[0].component, "rate_limit");
    assert_eq!(harness.audit.entries()[0].1.outcome, AuditOutcome::Denied);
}

// ===========================================================================
// 4. Claims
// ===========================================================================

#[test]
fn gatekeeper_without_key_is_refused() {
    let build = |config: PipelineConfig| {
        Gatekeeper::builder()
            .config(config)
            .stores(Stores {
                windows: Arc::new(MemoryWindowStore::default()),
                resources: Arc::new(MemoryResourceStore::new()),
                audit: Arc::new(MemoryAuditStore::new()),
            })
            .build()
    };
    assert!(matches!(build(PipelineConfig::default()), Err(AuthzError::InvalidConfig { .. })));
    assert!(build(PipelineConfig::builder().insecure_skip_signature(true).build()).is_ok());
}

#[tokio::test]
async fn self_minted_super_admin_token_is_refused() {
    let harness = TestHarness::new();
    let pipeline = delete_user(&harness);
    let mut spoofed = forged_request("intruder", Role::SuperAdmin, &harness, "203.0.113.9");
    spoofed.target_identity = Some("admin-2".into());

    let outcome = pipeline
        .execute_at(&spoofed, harness.now, |_| async { Ok::<_, String>(Completed::new(())) })
        .await;
    assert_eq!(outcome.decision, Decision::denied(ErrorKind::MalformedClaims));
    assert!(outcome.result.is_none());
}

#[tokio::test]
async fn expired_token_is_rejected_with_401() {
    let harness = TestHarness::new();
    let pipeline = create_property(&harness);
    let request = harness.request("agent-1", Role::Agent);

    let later = harness.now + TimeDelta::hours(2);
    let decision = pipeline
        .execute_at(&request, later, |_| async { Ok::<_, String>(Completed::new(())) })
        .await
        .decision;
    assert_eq!(decision, Decision::denied(ErrorKind::ExpiredClaims));
    assert_eq!(decision.status(), 401);
    assert_eq!(decision.public_message(), "Authentication required");
}

#[tokio::test]
async fn unsigned_and_forged_tokens_are_malformed() {
    let harness = TestHarness::new();
    let pipeline = create_property(&harness);
    let claims = claims_for("agent-1", Role::Agent, harness.now.timestamp());

    let none = craft_raw_jwt(&json!({ "alg": "none", "typ": "JWT" }), &claims);
    let forged = create_hs256_jwt(&claims, b"not-the-project-secret");
    for token in [none, forged] {
        let request = AccessRequest::builder().authorization(format!("Bearer {token}")).build();
        assert_eq!(
            run(&pipeline, &harness, &request).await,
            Decision::denied(ErrorKind::MalformedClaims)
        );
    }

    let genuine = create_hs256_jwt(&claims, TEST_SECRET);
    let request = AccessRequest::builder().authorization(format!("bearer {genuine}")).build();
    assert!(run(&pipeline, &harness, &request).await.is_allowed());
}

// ===========================================================================
// 5. Ownership
// ===========================================================================

#[tokio::test]
async fn only_the_seller_may_update_a_property() {
    let harness = TestHarness::new();
    harness.seed_property("prop-1", "seller-1");
    let pipeline = update_property(&harness);

    let mut owner = harness.request("seller-1", Role::Seller);
    owner.resource_id = Some("prop-1".into());
    assert!(run(&pipeline, &harness, &owner).await.is_allowed());

    let mut other = harness.request("seller-2", Role::Seller);
    other.resource_id = Some("prop-1".into());
    let denied = run(&pipeline, &harness, &other).await;

    let mut missing = harness.request("seller-1", Role::Seller);
    missing.resource_id = Some("prop-404".into());
    let not_found = run(&pipeline, &harness, &missing).await;

    assert_eq!(denied, Decision::denied(ErrorKind::OwnershipDenied));
    assert_eq!(denied, not_found);
    assert_eq!(denied.public_message(), not_found.public_message());
    assert!(harness.alerts.alerts().is_empty());
}

#[tokio::test]
async fn resource_store_outage_denies_and_alerts() {
    let harness = TestHarness::new();
    harness.seed_property("prop-1", "seller-1");
    harness.resources.set_unavailable(true);
    let pipeline = update_property(&harness);

    let mut owner = harness.request("seller-1", Role::Seller);
    owner.resource_id = Some("prop-1".into());
    assert_eq!(
        run(&pipeline, &harness, &owner).await,
        Decision::denied(ErrorKind::OwnershipDenied)
    );

    let alerts = harness.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, ErrorKind::StoreUnavailable);
    assert_eq!(alerts[0].component, "ownership");
}

// ===========================================================================
// 6. Audit
// ===========================================================================

#[tokio::test]
async fn exactly_one_entry_per_allowed_mutation() {
    let harness = TestHarness::new();
    harness.seed_property("prop-1", "seller-1");
    let pipeline = update_property(&harness);

    let mut request = harness.request("seller-1", Role::Seller);
    request.resource_id = Some("prop-1".into());
    for price in [100, 110, 120] {
        let outcome = pipeline
            .execute_at(&request, harness.now, |_| async move {
                Ok::<_, String>(
                    Completed::new(())
                        .with_changes(json!({ "before": { "price": price - 10 }, "after": { "price": price } })),
                )
            })
            .await;
        assert!(outcome.decision.is_allowed());
    }

    let entries = harness.audit.entries_for_actor("seller-1");
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.outcome == AuditOutcome::Completed));
    assert!(entries.iter().all(|e| e.resource_type == "property"));
    assert!(entries.iter().all(|e| e.resource_id.as_ref().map(|r| r.as_str()) == Some("prop-1")));
    assert_eq!(entries[2].metadata["details"]["after"]["price"], 120);
}

#[tokio::test]
async fn audit_failure_keeps_the_handler_result() {
    let harness = TestHarness::new();
    harness.audit.set_unavailable(true);
    let pipeline = create_property(&harness);

    let outcome = pipeline
        .execute_at(&harness.request("agent-1", Role::Agent), harness.now, |_| async {
            Ok::<_, String>(Completed::new("prop-9"))
        })
        .await;

    assert!(outcome.decision.is_allowed());
    assert_eq!(outcome.result, Some(Ok("prop-9")));
    assert_eq!(outcome.audit, AuditStatus::Failed);

    let alerts = harness.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, ErrorKind::AuditWriteFailed);
    assert_eq!(alerts[0].actor_id.as_deref(), Some("agent-1"));

    let metrics = harness.gatekeeper.metrics_snapshot();
    assert_eq!(metrics.audit.failed, 1);
    assert_eq!(metrics.decisions.allowed, 1);
}

#[tokio::test]
async fn slow_audit_store_is_bounded_by_timeout() {
    let harness = TestHarness::new();
    harness.audit.set_latency(Some(Duration::from_secs(10)));
    let pipeline = create_property(&harness);

    let started = std::time::Instant::now();
    let outcome = pipeline
        .execute_at(&harness.request("agent-1", Role::Agent), harness.now, |_| async {
            Ok::<_, String>(Completed::new(()))
        })
        .await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.result, Some(Ok(())));
    assert_eq!(outcome.audit, AuditStatus::Failed);
}

// ===========================================================================
// 7. Metrics
// ===========================================================================

#[tokio::test]
async fn metrics_count_every_decision() {
    let harness = TestHarness::new();
    let pipeline = create_property(&harness);

    run(&pipeline, &harness, &harness.request("agent-1", Role::Agent)).await;
    run(&pipeline, &harness, &harness.request("buyer-1", Role::Buyer)).await;
    run(&pipeline, &harness, &AccessRequest::default()).await;

    let metrics = harness.gatekeeper.metrics_snapshot();
    assert_eq!(metrics.decisions.allowed, 1);
    assert_eq!(metrics.decisions.denied, 2);
    assert_eq!(metrics.decisions.errors, 0);
    assert_eq!(metrics.rate_limit.allowed, 3);
    assert_eq!(metrics.audit.written, 3);
}
