//! Request authorization and audit pipeline for marketplace API routes.
//!
//! Every privileged route runs the same ordered checks before its handler:
//!
//! 1. **Rate limit**: fixed window per caller and endpoint ([`RateLimiter`])
//! 2. **Claims**: token decoding and claims validation against the route's
//!    [`ValidationPolicy`](estate_gate_authn::ValidationPolicy)
//! 3. **Permissions**: the caller's role must hold every required
//!    [`Permission`] ([`PermissionAuthorizer`])
//! 4. **Ownership**: for resource-scoped routes, the caller must own the row
//!    ([`OwnershipVerifier`])
//!
//! Denials and mutations are recorded by the [`AuditRecorder`].
//!
//! Token signatures are always verified against the configured key; a
//! [`Gatekeeper`] without one refuses to build unless
//! [`PipelineConfig::insecure_skip_signature`] is set.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use estate_gate_authn::VerificationKey;
//! use estate_gate_authz::{
//!     AccessRequest, Completed, Gatekeeper, PipelineConfig, ResourceType, RouteBinding, Stores,
//!     perm,
//! };
//! use estate_gate_storage::{MemoryAuditStore, MemoryResourceStore, MemoryWindowStore};
//!
//! # async fn example(jwt_secret: Vec<u8>) -> estate_gate_authz::Result<()> {
//! let gatekeeper = Gatekeeper::builder()
//!     .config(PipelineConfig::default())
//!     .stores(Stores {
//!         windows: Arc::new(MemoryWindowStore::default()),
//!         resources: Arc::new(MemoryResourceStore::new()),
//!         audit: Arc::new(MemoryAuditStore::new()),
//!     })
//!     .verification_key(VerificationKey::Secret(jwt_secret))
//!     .build()?;
//!
//! let update_property = gatekeeper.bind(
//!     RouteBinding::builder()
//!         .endpoint("update_property")
//!         .required_permissions(vec![perm::UPDATE_PROPERTIES])
//!         .resource_type(ResourceType::Property)
//!         .audit_action("update_property")
//!         .build(),
//! )?;
//!
//! let request = AccessRequest::builder()
//!     .authorization("Bearer eyJ...")
//!     .resource_id("prop-1")
//!     .build();
//! let outcome = update_property
//!     .execute(&request, |claims| async move {
//!         Ok::<_, std::io::Error>(Completed::new(claims.sub))
//!     })
//!     .await;
//! println!("{} {}", outcome.decision.status(), outcome.decision.public_message());
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a ready-made harness.
//! - **`failpoints`**: Activates `fail` injection points in the in-memory stores.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Operational alerts.
pub mod alert;
/// Audit recording.
pub mod audit;
/// Permission checks.
pub mod authorizer;
/// Pipeline configuration.
pub mod config;
/// Terminal decisions.
pub mod decision;
/// Error taxonomy.
pub mod error;
/// Decision counters.
pub mod metrics;
/// Ownership verification.
pub mod ownership;
/// Permissions and role mappings.
pub mod permissions;
/// Route binding and execution.
pub mod pipeline;
/// Fixed-window rate limiting.
pub mod rate_limit;
/// The ordered stage chain.
pub mod stage;
/// Test utilities.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use alert::{AlertSink, OperationalAlert, TracingAlertSink};
pub use audit::{AuditMetricsSnapshot, AuditRecorder, RATE_LIMITED_ACTION};
pub use authorizer::{
    AuthorizationDecision, DenialReason, PermissionAuthorizer, SelfTargetingAction,
};
pub use config::{PipelineConfig, RateLimitRule};
pub use decision::Decision;
pub use error::{AuthzError, ErrorKind, Result};
pub use metrics::{DecisionCounts, PipelineMetricsSnapshot};
pub use ownership::{OwnershipVerifier, ResourceType};
pub use permissions::{Permission, RolePermissionSet, perm};
pub use pipeline::{
    AuditStatus, Completed, Gatekeeper, Pipeline, PipelineOutcome, RouteBinding, Stores,
};
pub use rate_limit::{RateLimitDecision, RateLimitMetricsSnapshot, RateLimiter, rate_limit_key};
pub use stage::{AccessRequest, RequestContext, Stage, StageChain, StageOutcome};
