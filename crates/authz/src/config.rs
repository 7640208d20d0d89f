//! Pipeline configuration.
//!
//! Every field has a default, so an empty document is a valid configuration.
//! Durations use humantime strings (`"500ms"`, `"10m"`):
//!
//! ```
//! use estate_gate_authz::PipelineConfig;
//!
//! let config: PipelineConfig = serde_json::from_str(
//!     r#"{
//!         "audit_timeout": "1s",
//!         "default_rate_limit": { "max_requests": 5, "window": "60s" }
//!     }"#,
//! )?;
//! assert_eq!(config.default_rate_limit.max_requests, 5);
//! # Ok::<(), serde_json::Error>(())
//! ```

use std::{collections::HashMap, time::Duration};

use estate_gate_authn::{TokenDecoder, validate_algorithm, validation::parse_algorithm};
use estate_gate_storage::{
    MemoryWindowStore,
    rate_limiter::{DEFAULT_IDLE_EVICTION, DEFAULT_MAX_KEYS},
};
use serde::{Deserialize, Serialize};

use crate::{
    audit::DEFAULT_AUDIT_TIMEOUT,
    error::{AuthzError, Result},
    ownership::DEFAULT_OWNERSHIP_TIMEOUT,
    permissions::RolePermissionSet,
    rate_limit::DEFAULT_RATE_LIMIT_TIMEOUT,
};

/// Default requests allowed per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 100;

/// Default rate-limit window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Longest accepted rate-limit window.
pub const MAX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// A fixed-window limit: at most `max_requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitRule {
    /// Requests allowed per window.
    #[serde(default = "default_max_requests")]
    #[builder(default = DEFAULT_MAX_REQUESTS)]
    pub max_requests: u64,

    /// Window length.
    #[serde(with = "humantime_serde", default = "default_window")]
    #[builder(default = DEFAULT_WINDOW)]
    pub window: Duration,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RateLimitRule {
    /// Shorthand for `max_requests` per `window`.
    #[must_use]
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self { max_requests, window }
    }

    /// Checks the rule is usable.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidConfig`] for a zero limit, or a window that
    /// is zero or longer than [`MAX_WINDOW`].
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(AuthzError::invalid_config("max_requests must be at least 1"));
        }
        if self.window.is_zero() {
            return Err(AuthzError::invalid_config("rate limit window must be non-zero"));
        }
        if self.window > MAX_WINDOW {
            return Err(AuthzError::invalid_config(format!(
                "rate limit window must not exceed {}s",
                MAX_WINDOW.as_secs()
            )));
        }
        Ok(())
    }
}

fn default_max_requests() -> u64 {
    DEFAULT_MAX_REQUESTS
}

fn default_window() -> Duration {
    DEFAULT_WINDOW
}

fn default_rate_limit_timeout() -> Duration {
    DEFAULT_RATE_LIMIT_TIMEOUT
}

fn default_ownership_timeout() -> Duration {
    DEFAULT_OWNERSHIP_TIMEOUT
}

fn default_audit_timeout() -> Duration {
    DEFAULT_AUDIT_TIMEOUT
}

fn default_idle_eviction() -> Duration {
    DEFAULT_IDLE_EVICTION
}

fn default_max_tracked_keys() -> u64 {
    DEFAULT_MAX_KEYS
}

fn default_algorithms() -> Vec<String> {
    estate_gate_authn::validation::default_accepted_algorithms()
}

/// Process-wide settings for the authorization pipeline.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Bound on one window-store call.
    #[serde(with = "humantime_serde", default = "default_rate_limit_timeout")]
    #[builder(default = DEFAULT_RATE_LIMIT_TIMEOUT)]
    pub rate_limit_timeout: Duration,

    /// Bound on one ownership lookup.
    #[serde(with = "humantime_serde", default = "default_ownership_timeout")]
    #[builder(default = DEFAULT_OWNERSHIP_TIMEOUT)]
    pub ownership_timeout: Duration,

    /// Bound on one audit append.
    #[serde(with = "humantime_serde", default = "default_audit_timeout")]
    #[builder(default = DEFAULT_AUDIT_TIMEOUT)]
    pub audit_timeout: Duration,

    /// Idle period after which an in-memory rate-limit window is evicted.
    #[serde(with = "humantime_serde", default = "default_idle_eviction")]
    #[builder(default = DEFAULT_IDLE_EVICTION)]
    pub idle_eviction: Duration,

    /// Maximum number of rate-limit keys tracked in memory.
    #[serde(default = "default_max_tracked_keys")]
    #[builder(default = DEFAULT_MAX_KEYS)]
    pub max_tracked_keys: u64,

    /// Limit for routes that do not declare their own.
    #[serde(default)]
    #[builder(default)]
    pub default_rate_limit: RateLimitRule,

    /// Token header algorithms accepted by the decoder.
    #[serde(default = "default_algorithms")]
    #[builder(default = default_algorithms())]
    pub accepted_algorithms: Vec<String>,

    /// Role → permission overrides. `None` uses the marketplace defaults.
    #[serde(default)]
    pub role_permissions: Option<HashMap<String, Vec<String>>>,

    /// Accept tokens without checking their signature when no verification
    /// key is supplied. Any caller can then mint claims for any role; only for
    /// local development against a stubbed identity provider.
    #[serde(default)]
    #[builder(default)]
    pub insecure_skip_signature: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PipelineConfig {
    /// Checks every value is in range.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidConfig`] naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        for (name, timeout) in [
            ("rate_limit_timeout", self.rate_limit_timeout),
            ("ownership_timeout", self.ownership_timeout),
            ("audit_timeout", self.audit_timeout),
            ("idle_eviction", self.idle_eviction),
        ] {
            if timeout.is_zero() {
                return Err(AuthzError::invalid_config(format!("{name} must be non-zero")));
            }
        }
        if self.max_tracked_keys == 0 {
            return Err(AuthzError::invalid_config("max_tracked_keys must be at least 1"));
        }
        self.default_rate_limit.validate()?;

        if self.accepted_algorithms.is_empty() {
            return Err(AuthzError::invalid_config("accepted_algorithms must not be empty"));
        }
        for alg in &self.accepted_algorithms {
            validate_algorithm(alg, &self.accepted_algorithms)
                .and_then(|()| parse_algorithm(alg).map(|_| ()))
                .map_err(|e| AuthzError::invalid_config(e.to_string()))?;
        }

        if let Some(mapping) = &self.role_permissions {
            RolePermissionSet::from_config(mapping)?;
        }
        Ok(())
    }

    /// The configured role → permission mapping.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidConfig`] for an unknown role or a
    /// malformed permission tag.
    pub fn permission_set(&self) -> Result<RolePermissionSet> {
        match &self.role_permissions {
            Some(mapping) => RolePermissionSet::from_config(mapping),
            None => Ok(RolePermissionSet::marketplace_defaults()),
        }
    }

    /// An in-memory window store sized by this configuration.
    #[must_use]
    pub fn window_store(&self) -> MemoryWindowStore {
        MemoryWindowStore::new(self.idle_eviction, self.max_tracked_keys)
    }

    /// A token decoder accepting the configured algorithms, without a key.
    #[must_use]
    pub fn token_decoder(&self) -> TokenDecoder {
        TokenDecoder::new().with_accepted_algorithms(self.accepted_algorithms.iter().cloned())
    }
}
