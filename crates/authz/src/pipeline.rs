//! Route binding and request execution.
//!
//! A [`Gatekeeper`] owns the shared components (limiter, decoder, authorizer,
//! ownership verifier, audit recorder). Each route is declared once as a
//! [`RouteBinding`] and bound into a [`Pipeline`] holding its stage chain.
//!
//! ```text
//! request ─► rate limit ─► claims ─► permission ─► [ownership] ─► handler ─► audit
//!               │            │           │              │
//!               └────────────┴───────────┴──────────────┴──► denial audit
//! ```
//!
//! Every denial is audited with outcome `denied` (action `rate_limited` for
//! rate-limit rejections). Allowed calls on mutating routes are audited once,
//! after the handler, with outcome `completed` or `error`. An audit failure
//! never changes the decision or the handler's result; it is alerted and
//! reported through [`AuditStatus::Failed`].

use std::{fmt, future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use estate_gate_authn::{IdentityClaims, TokenDecoder, ValidationPolicy, VerificationKey};
use estate_gate_storage::{
    AuditLogEntry, AuditOutcome, AuditStore, LogId, ResourceStore, WindowStore,
};
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, warn};

use crate::{
    alert::{AlertSink, TracingAlertSink},
    audit::{AuditRecorder, RATE_LIMITED_ACTION},
    authorizer::{PermissionAuthorizer, SelfTargetingAction},
    config::{PipelineConfig, RateLimitRule},
    decision::Decision,
    error::{AuthzError, ErrorKind, Result},
    metrics::{PipelineMetrics, PipelineMetricsSnapshot},
    ownership::{OwnershipVerifier, ResourceType},
    permissions::Permission,
    rate_limit::RateLimiter,
    stage::{
        AccessRequest, ClaimsStage, OwnershipStage, PermissionStage, RateLimitStage,
        RequestContext, Stage, StageChain,
    },
};

/// Declaration of one route's access rules.
#[derive(Debug, Clone, bon::Builder)]
pub struct RouteBinding {
    /// Endpoint name, part of the rate-limit key.
    #[builder(into)]
    pub endpoint: String,
    /// Permissions the caller's role must all hold.
    #[builder(default)]
    pub required_permissions: Vec<Permission>,
    /// Claims policy for this call site.
    #[builder(default)]
    pub policy: ValidationPolicy,
    /// Route-specific limit; the configured default otherwise.
    pub rate_limit: Option<RateLimitRule>,
    /// Resource type whose ownership is verified before the handler.
    pub resource_type: Option<ResourceType>,
    /// Destructive action that must not target the caller's own account.
    pub self_targeting: Option<SelfTargetingAction>,
    /// Audit action for completed calls. Routes without one are not mutating
    /// and are audited only when denied.
    #[builder(into)]
    pub audit_action: Option<String>,
}

impl RouteBinding {
    /// Returns `true` if allowed calls are audited.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        self.audit_action.is_some()
    }

    fn resource_label(&self) -> &str {
        self.resource_type.map_or(self.endpoint.as_str(), |t| t.as_str())
    }
}

/// Whether the audit entry for a request was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    /// Written with this id.
    Recorded(LogId),
    /// The write failed; an alert has been raised.
    Failed,
    /// Nothing to audit (allowed call on a non-mutating route).
    NotRequired,
}

/// A successful handler result plus the audit context it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Completed<T> {
    /// Value returned to the route layer.
    pub value: T,
    /// Before/after values or other change details for the audit entry.
    pub changes: Value,
}

impl<T> Completed<T> {
    /// A result with no change details.
    pub fn new(value: T) -> Self {
        Self { value, changes: Value::Null }
    }

    /// Attaches change details.
    #[must_use]
    pub fn with_changes(mut self, changes: Value) -> Self {
        self.changes = changes;
        self
    }
}

/// The result of [`Pipeline::execute`].
#[derive(Debug)]
pub struct PipelineOutcome<T, E> {
    /// The authorization decision.
    pub decision: Decision,
    /// The handler's result; `None` when the request was not allowed.
    pub result: Option<std::result::Result<T, E>>,
    /// Audit write status.
    pub audit: AuditStatus,
    /// Time until the caller may retry, when rate limited.
    pub retry_after: Option<Duration>,
}

struct Decided {
    decision: Decision,
    audit: AuditStatus,
    retry_after: Option<Duration>,
}

/// Backing stores for a [`Gatekeeper`].
#[derive(Clone)]
pub struct Stores {
    /// Rate-limit windows.
    pub windows: Arc<dyn WindowStore>,
    /// Resource rows for ownership checks.
    pub resources: Arc<dyn ResourceStore>,
    /// Audit log.
    pub audit: Arc<dyn AuditStore>,
}

impl fmt::Debug for Stores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Shared components every bound route uses.
#[derive(Debug, Clone)]
pub struct Gatekeeper {
    decoder: Arc<TokenDecoder>,
    limiter: RateLimiter,
    authorizer: PermissionAuthorizer,
    ownership: OwnershipVerifier,
    audit: AuditRecorder,
    default_rule: RateLimitRule,
    metrics: Arc<PipelineMetrics>,
}

#[bon::bon]
impl Gatekeeper {
    /// Creates a gatekeeper, validating `config`.
    ///
    /// Token signatures are checked with `verification_key`. Omitting the key
    /// is refused unless [`PipelineConfig::insecure_skip_signature`] is set.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidConfig`] if the configuration is invalid,
    /// the permission mapping does not parse, the key is unusable, or no key
    /// was given without the insecure opt-in.
    #[builder]
    pub fn new(
        #[builder(default)] config: PipelineConfig,
        stores: Stores,
        alerts: Option<Arc<dyn AlertSink>>,
        verification_key: Option<VerificationKey>,
    ) -> Result<Self> {
        config.validate()?;
        let alerts: Arc<dyn AlertSink> = match alerts {
            Some(alerts) => alerts,
            None => Arc::new(TracingAlertSink),
        };

        let decoder = match verification_key {
            Some(key) => config
                .token_decoder()
                .with_key(key)
                .map_err(|e| AuthzError::invalid_config(e.to_string()))?,
            None if config.insecure_skip_signature => {
                warn!("token signatures are NOT verified; any caller can claim any role");
                config.token_decoder()
            },
            None => {
                return Err(AuthzError::invalid_config(
                    "a verification key is required unless insecure_skip_signature is set",
                ));
            },
        };

        Ok(Self {
            decoder: Arc::new(decoder),
            limiter: RateLimiter::new(stores.windows)
                .with_timeout(config.rate_limit_timeout)
                .with_alerts(Arc::clone(&alerts)),
            authorizer: PermissionAuthorizer::new(config.permission_set()?),
            ownership: OwnershipVerifier::new(stores.resources)
                .with_timeout(config.ownership_timeout)
                .with_alerts(Arc::clone(&alerts)),
            audit: AuditRecorder::new(stores.audit)
                .with_timeout(config.audit_timeout)
                .with_alerts(alerts),
            default_rule: config.default_rate_limit,
            metrics: Arc::default(),
        })
    }

    /// Composes the stage chain for `route`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidConfig`] for an unusable rate limit or an
    /// empty endpoint name.
    pub fn bind(&self, route: RouteBinding) -> Result<Pipeline> {
        if route.endpoint.is_empty() {
            return Err(AuthzError::invalid_config("route endpoint must not be empty"));
        }
        let rule = route.rate_limit.unwrap_or(self.default_rule);
        rule.validate()?;

        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(RateLimitStage::new(self.limiter.clone(), rule)),
            Box::new(ClaimsStage::new(route.policy.clone())),
            Box::new(PermissionStage::new(
                self.authorizer.clone(),
                route.required_permissions.clone(),
                route.self_targeting,
            )),
        ];
        if let Some(resource_type) = route.resource_type {
            stages.push(Box::new(OwnershipStage::new(self.ownership.clone(), resource_type)));
        }

        debug!(endpoint = %route.endpoint, stages = stages.len(), "route bound");
        Ok(Pipeline {
            route,
            decoder: Arc::clone(&self.decoder),
            chain: StageChain::new(stages),
            audit: self.audit.clone(),
            metrics: Arc::clone(&self.metrics),
        })
    }

    /// Returns a snapshot of metrics across every bound route.
    #[must_use]
    pub fn metrics_snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            decisions: self.metrics.snapshot(),
            rate_limit: self.limiter.metrics_snapshot(),
            audit: self.audit.metrics_snapshot(),
        }
    }
}

/// A bound route: its declaration and compiled stage chain.
#[derive(Debug)]
pub struct Pipeline {
    route: RouteBinding,
    decoder: Arc<TokenDecoder>,
    chain: StageChain,
    audit: AuditRecorder,
    metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// The route this pipeline serves.
    #[must_use]
    pub fn route(&self) -> &RouteBinding {
        &self.route
    }

    /// Stage names, in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    /// Decides `request` without running a handler. Denials are audited.
    pub async fn authorize(&self, request: &AccessRequest) -> Decision {
        self.authorize_at(request, Utc::now()).await
    }

    /// [`authorize`](Self::authorize) at an explicit time.
    pub async fn authorize_at(&self, request: &AccessRequest, now: DateTime<Utc>) -> Decision {
        self.decide(request, now).await.decision
    }

    /// Decides `request`, runs `handler` if allowed, and audits the result.
    pub async fn execute<F, Fut, T, E>(
        &self,
        request: &AccessRequest,
        handler: F,
    ) -> PipelineOutcome<T, E>
    where
        F: FnOnce(IdentityClaims) -> Fut + Send,
        Fut: Future<Output = std::result::Result<Completed<T>, E>> + Send,
        E: fmt::Display,
    {
        self.execute_at(request, Utc::now(), handler).await
    }

    /// [`execute`](Self::execute) at an explicit time.
    #[instrument(skip_all, fields(endpoint = %self.route.endpoint))]
    pub async fn execute_at<F, Fut, T, E>(
        &self,
        request: &AccessRequest,
        now: DateTime<Utc>,
        handler: F,
    ) -> PipelineOutcome<T, E>
    where
        F: FnOnce(IdentityClaims) -> Fut + Send,
        Fut: Future<Output = std::result::Result<Completed<T>, E>> + Send,
        E: fmt::Display,
    {
        let Decided { decision, audit, retry_after } = self.decide(request, now).await;
        let Some(claims) = decision.claims().cloned() else {
            return PipelineOutcome { decision, result: None, audit, retry_after };
        };

        let actor_id = claims.sub.clone();
        let handled = handler(claims).await;
        let Some(action) = self.route.audit_action.as_deref() else {
            return PipelineOutcome {
                decision,
                result: Some(handled.map(|c| c.value)),
                audit: AuditStatus::NotRequired,
                retry_after: None,
            };
        };

        let (outcome, details) = match &handled {
            Ok(completed) => (AuditOutcome::Completed, completed.changes.clone()),
            Err(err) => (AuditOutcome::Error, json!({ "error": err.to_string() })),
        };
        let entry = AuditLogEntry::builder()
            .timestamp(now)
            .actor_id(actor_id)
            .action(action)
            .resource_type(self.route.resource_label())
            .maybe_resource_id(request.resource_id.clone())
            .metadata(self.audit_metadata(request, "details", details))
            .outcome(outcome)
            .build();
        let audit = self.write_audit(entry).await;

        PipelineOutcome {
            decision,
            result: Some(handled.map(|c| c.value)),
            audit,
            retry_after: None,
        }
    }

    /// Runs the chain, counts the decision, and audits it if denied.
    async fn decide(&self, request: &AccessRequest, now: DateTime<Utc>) -> Decided {
        let mut cx = RequestContext::new(&self.route.endpoint, request, now, &self.decoder);
        let decision = self.chain.run(&mut cx).await;
        self.metrics.record(&decision);

        let Some(kind) = decision.kind() else {
            return Decided { decision, audit: AuditStatus::NotRequired, retry_after: None };
        };
        debug!(endpoint = %self.route.endpoint, %kind, status = decision.status(), "request refused");

        let action = if kind == ErrorKind::RateLimitExceeded {
            RATE_LIMITED_ACTION
        } else {
            self.route.audit_action.as_deref().unwrap_or(&self.route.endpoint)
        };
        let outcome = match &decision {
            Decision::Error(_) => AuditOutcome::Error,
            _ => AuditOutcome::Denied,
        };
        let mut reason = json!({ "kind": kind, "status": decision.status() });
        if let Some(retry_after) = cx.retry_after {
            reason["retry_after_secs"] = json!(retry_after.as_secs());
        }
        let entry = AuditLogEntry::builder()
            .timestamp(now)
            .actor_id(cx.actor_id())
            .action(action)
            .resource_type(self.route.resource_label())
            .maybe_resource_id(request.resource_id.clone())
            .metadata(self.audit_metadata(request, "reason", reason))
            .outcome(outcome)
            .build();
        let audit = self.write_audit(entry).await;
        Decided { decision, audit, retry_after: cx.retry_after }
    }

    fn audit_metadata(&self, request: &AccessRequest, key: &str, value: Value) -> Value {
        let mut metadata = Map::new();
        metadata.insert("endpoint".to_owned(), Value::String(self.route.endpoint.clone()));
        metadata.insert("request".to_owned(), request.metadata.clone());
        if !value.is_null() {
            metadata.insert(key.to_owned(), value);
        }
        Value::Object(metadata)
    }

    async fn write_audit(&self, entry: AuditLogEntry) -> AuditStatus {
        match self.audit.record(entry).await {
            Ok(id) => AuditStatus::Recorded(id),
            // Already alerted and counted by the recorder.
            Err(_) => AuditStatus::Failed,
        }
    }
}
