//! The ordered stage chain.
//!
//! A route's checks are composed once, when the route is bound, into a
//! [`StageChain`]:
//!
//! ```text
//! RateLimitStage → ClaimsStage → PermissionStage → [OwnershipStage]
//! ```
//!
//! Each [`Stage`] either lets the request continue or short-circuits with a
//! terminal [`Decision`]. A stage error becomes [`Decision::Error`]. Only a
//! request that passes every stage is allowed, carrying the claims the claims
//! stage validated.
//!
//! The bearer token is decoded once, when the [`RequestContext`] is created.
//! The rate-limit stage keys on its subject only if the decoder checked the
//! signature; the claims stage validates the same decoded token.

use std::{net::IpAddr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use estate_gate_authn::{
    AuthError, DecodedToken, IdentityClaims, TokenDecoder, ValidationPolicy, validate_at,
};
use estate_gate_storage::{IdentityId, ResourceId};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    authorizer::{PermissionAuthorizer, SelfTargetingAction},
    config::RateLimitRule,
    decision::Decision,
    error::{ErrorKind, Result},
    ownership::{OwnershipVerifier, ResourceType},
    permissions::Permission,
    rate_limit::{RateLimiter, rate_limit_key},
};

/// An inbound request as the pipeline sees it.
#[derive(Debug, Clone, PartialEq, bon::Builder)]
pub struct AccessRequest {
    /// Raw `Authorization` header value (or bare token).
    #[builder(into)]
    pub authorization: Option<String>,
    /// Client address, used to key rate limits for callers without a subject.
    pub client_ip: Option<IpAddr>,
    /// Resource row the request acts on, for ownership-checked routes.
    #[builder(into)]
    pub resource_id: Option<ResourceId>,
    /// Account the request acts on, for self-targeting checks.
    #[builder(into)]
    pub target_identity: Option<IdentityId>,
    /// Request parameters recorded in audit metadata.
    #[builder(default = Value::Object(serde_json::Map::new()))]
    pub metadata: Value,
}

impl Default for AccessRequest {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Mutable state threaded through the stages of one request.
#[derive(Debug)]
pub struct RequestContext<'r> {
    /// Endpoint being served.
    pub endpoint: &'r str,
    /// The inbound request.
    pub request: &'r AccessRequest,
    /// Decision time, shared by every stage.
    pub now: DateTime<Utc>,
    /// Rate-limit key (also the audit actor before claims are known).
    pub rate_key: String,
    /// The decoded bearer token, or why it could not be decoded.
    pub token: std::result::Result<DecodedToken, AuthError>,
    /// Validated claims, once the claims stage has run.
    pub claims: Option<IdentityClaims>,
    /// Time until the caller may retry, set when rate limited.
    pub retry_after: Option<Duration>,
}

impl<'r> RequestContext<'r> {
    /// Creates the context for `request` at `now`, decoding its token with
    /// `decoder`.
    #[must_use]
    pub fn new(
        endpoint: &'r str,
        request: &'r AccessRequest,
        now: DateTime<Utc>,
        decoder: &TokenDecoder,
    ) -> Self {
        let token = decoder.decode(request.authorization.as_deref().unwrap_or_default());
        // An unverified subject must never select a window.
        let subject = match &token {
            Ok(token) if decoder.verifies_signature() => token.subject(),
            _ => None,
        };
        let rate_key = rate_limit_key(subject, request.client_ip, endpoint);
        Self { endpoint, request, now, rate_key, token, claims: None, retry_after: None }
    }

    /// Identity to attribute audit entries to.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        self.claims.as_ref().map_or(self.rate_key.as_str(), |c| c.sub.as_str())
    }
}

/// What a stage decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Run the next stage.
    Continue,
    /// Stop with this decision.
    ShortCircuit(Decision),
}

/// One check in the chain.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Runs the check.
    ///
    /// # Errors
    ///
    /// Returns an error when the check cannot be performed at all.
    async fn handle(&self, cx: &mut RequestContext<'_>) -> Result<StageOutcome>;
}

/// An ordered list of stages.
pub struct StageChain {
    stages: Vec<Box<dyn Stage>>,
}

impl std::fmt::Debug for StageChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stages.iter().map(|s| s.name())).finish()
    }
}

impl StageChain {
    /// Creates a chain running `stages` in order.
    #[must_use]
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Stage names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs every stage until one short-circuits.
    pub async fn run(&self, cx: &mut RequestContext<'_>) -> Decision {
        for stage in &self.stages {
            match stage.handle(cx).await {
                Ok(StageOutcome::Continue) => {
                    debug!(stage = stage.name(), "stage passed");
                },
                Ok(StageOutcome::ShortCircuit(decision)) => {
                    debug!(stage = stage.name(), kind = ?decision.kind(), "stage short-circuited");
                    return decision;
                },
                Err(err) => {
                    warn!(stage = stage.name(), error = %err, "stage failed");
                    // Configuration errors are rejected at bind time.
                    return Decision::Error(err.kind().unwrap_or(ErrorKind::StoreUnavailable));
                },
            }
        }

        match cx.claims.clone() {
            Some(claims) => Decision::Allowed(claims),
            None => Decision::denied(ErrorKind::MalformedClaims),
        }
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

fn short_circuit(kind: ErrorKind) -> StageOutcome {
    StageOutcome::ShortCircuit(Decision::denied(kind))
}

/// Counts the request against the route's window.
#[derive(Debug, Clone)]
pub struct RateLimitStage {
    limiter: RateLimiter,
    rule: RateLimitRule,
}

impl RateLimitStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(limiter: RateLimiter, rule: RateLimitRule) -> Self {
        Self { limiter, rule }
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, cx: &mut RequestContext<'_>) -> Result<StageOutcome> {
        let decision = match self.limiter.check_at(&cx.rate_key, &self.rule, cx.now).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(endpoint = cx.endpoint, error = %err, "rate limit unavailable, denying");
                return Ok(short_circuit(ErrorKind::StoreUnavailable));
            },
        };
        if decision.allowed {
            Ok(StageOutcome::Continue)
        } else {
            cx.retry_after = decision.retry_after;
            Ok(short_circuit(ErrorKind::RateLimitExceeded))
        }
    }
}

/// Validates the decoded token's claims against a policy.
#[derive(Debug, Clone)]
pub struct ClaimsStage {
    policy: ValidationPolicy,
}

impl ClaimsStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Stage for ClaimsStage {
    fn name(&self) -> &'static str {
        "claims"
    }

    async fn handle(&self, cx: &mut RequestContext<'_>) -> Result<StageOutcome> {
        let token = match &cx.token {
            Ok(token) => token,
            Err(err) => {
                warn!(endpoint = cx.endpoint, error = %err, "token rejected");
                return Ok(short_circuit(ErrorKind::MalformedClaims));
            },
        };

        let result = validate_at(&token.claims, &self.policy, cx.now);
        if !result.warnings.is_empty() {
            let warnings: Vec<String> = result.warnings.iter().map(ToString::to_string).collect();
            warn!(endpoint = cx.endpoint, ?warnings, "claims accepted with warnings");
        }
        let category = result.category();
        match result.into_claims() {
            Ok(claims) => {
                cx.claims = Some(claims);
                Ok(StageOutcome::Continue)
            },
            Err(errors) => {
                let kind = category.map_or(ErrorKind::MalformedClaims, ErrorKind::from);
                let errors: Vec<String> = errors.iter().map(ToString::to_string).collect();
                warn!(endpoint = cx.endpoint, %kind, ?errors, "claims validation failed");
                Ok(short_circuit(kind))
            },
        }
    }
}

/// Checks the caller's role holds the route's permissions.
#[derive(Debug, Clone)]
pub struct PermissionStage {
    authorizer: PermissionAuthorizer,
    required: Vec<Permission>,
    self_targeting: Option<SelfTargetingAction>,
}

impl PermissionStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        authorizer: PermissionAuthorizer,
        required: Vec<Permission>,
        self_targeting: Option<SelfTargetingAction>,
    ) -> Self {
        Self { authorizer, required, self_targeting }
    }
}

#[async_trait]
impl Stage for PermissionStage {
    fn name(&self) -> &'static str {
        "permission"
    }

    async fn handle(&self, cx: &mut RequestContext<'_>) -> Result<StageOutcome> {
        let Some(claims) = cx.claims.as_ref() else {
            return Ok(short_circuit(ErrorKind::MalformedClaims));
        };

        let decision = self.authorizer.authorize(claims, &self.required);
        if let Some(reason) = decision.reason {
            debug!(endpoint = cx.endpoint, sub = %claims.sub, %reason, "permission denied");
            return Ok(short_circuit(ErrorKind::PermissionDenied));
        }

        if let Some(action) = self.self_targeting {
            let Some(target) = cx.request.target_identity.as_ref() else {
                debug!(endpoint = cx.endpoint, %action, "self-targeting route without a target");
                return Ok(short_circuit(ErrorKind::PermissionDenied));
            };
            let check = self.authorizer.check_self_targeting(claims, action, target.as_str());
            if let Some(reason) = check.reason {
                debug!(endpoint = cx.endpoint, sub = %claims.sub, %reason, "permission denied");
                return Ok(short_circuit(ErrorKind::PermissionDenied));
            }
        }
        Ok(StageOutcome::Continue)
    }
}

/// Confirms the caller owns the targeted row.
#[derive(Debug, Clone)]
pub struct OwnershipStage {
    verifier: OwnershipVerifier,
    resource_type: ResourceType,
}

impl OwnershipStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(verifier: OwnershipVerifier, resource_type: ResourceType) -> Self {
        Self { verifier, resource_type }
    }
}

#[async_trait]
impl Stage for OwnershipStage {
    fn name(&self) -> &'static str {
        "ownership"
    }

    async fn handle(&self, cx: &mut RequestContext<'_>) -> Result<StageOutcome> {
        let (Some(claims), Some(resource_id)) = (cx.claims.as_ref(), cx.request.resource_id.as_ref())
        else {
            return Ok(short_circuit(ErrorKind::OwnershipDenied));
        };

        let identity = IdentityId::new(claims.sub.as_str());
        if self.verifier.verify_ownership(&identity, self.resource_type, resource_id).await {
            Ok(StageOutcome::Continue)
        } else {
            Ok(short_circuit(ErrorKind::OwnershipDenied))
        }
    }
}
