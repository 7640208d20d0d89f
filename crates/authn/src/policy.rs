//! Per-call-site claims validation policy.
//!
//! A [`ValidationPolicy`] is chosen when a route is registered. The two
//! presets cover the marketplace's call sites:
//!
//! | preset | max token age | roles | trusted context |
//! |--------|---------------|-------|-----------------|
//! | [`general`](ValidationPolicy::general) | 1 hour | any | no |
//! | [`admin`](ValidationPolicy::admin) | 15 minutes | `admin`, `super_admin` | yes |
//!
//! Policies deserialize from configuration with humantime durations:
//!
//! ```
//! use estate_gate_authn::ValidationPolicy;
//!
//! let policy: ValidationPolicy = serde_json::from_str(
//!     r#"{ "max_age": "15m", "allowed_roles": ["admin", "super_admin"] }"#,
//! )?;
//! assert_eq!(policy.max_age.as_secs(), 900);
//! # Ok::<(), serde_json::Error>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::claims::Role;

/// Default maximum token age for general routes (1 hour).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Maximum token age for admin routes (15 minutes).
pub const ADMIN_MAX_AGE: Duration = Duration::from_secs(15 * 60);

/// Default clock-skew leeway for `iat` and `nbf` checks.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(30);

/// Token lifetime above which a warning is raised (24 hours).
pub const DEFAULT_LONG_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Claims validation parameters for one call site.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidationPolicy {
    /// Maximum accepted `now - iat`.
    #[serde(with = "humantime_serde", default = "default_max_age")]
    #[builder(default = DEFAULT_MAX_AGE)]
    pub max_age: Duration,

    /// Trusted issuers. Empty means the issuer is not checked.
    #[serde(default)]
    #[builder(default)]
    pub allowed_issuers: Vec<String>,

    /// Accepted audiences. Empty means the audience is not checked.
    #[serde(default)]
    #[builder(default)]
    pub allowed_audiences: Vec<String>,

    /// Roles accepted at this call site. `None` accepts every known role.
    #[serde(default)]
    pub allowed_roles: Option<Vec<Role>>,

    /// Whether elevated roles are expected here (no warning when they appear).
    #[serde(default)]
    #[builder(default)]
    pub trusted_context: bool,

    /// Clock-skew allowance for the issued-at and not-before checks.
    #[serde(with = "humantime_serde", default = "default_leeway")]
    #[builder(default = DEFAULT_LEEWAY)]
    pub leeway: Duration,

    /// Lifetimes (`exp - iat`) above this raise a warning.
    #[serde(with = "humantime_serde", default = "default_long_lifetime")]
    #[builder(default = DEFAULT_LONG_LIFETIME)]
    pub long_lifetime_threshold: Duration,
}

fn default_max_age() -> Duration {
    DEFAULT_MAX_AGE
}

fn default_leeway() -> Duration {
    DEFAULT_LEEWAY
}

fn default_long_lifetime() -> Duration {
    DEFAULT_LONG_LIFETIME
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::general()
    }
}

impl ValidationPolicy {
    /// General routes: 1-hour max age, any role.
    #[must_use]
    pub fn general() -> Self {
        Self::builder().build()
    }

    /// Admin routes: 15-minute max age, `admin` and `super_admin` only.
    #[must_use]
    pub fn admin() -> Self {
        Self::builder()
            .max_age(ADMIN_MAX_AGE)
            .allowed_roles(vec![Role::Admin, Role::SuperAdmin])
            .trusted_context(true)
            .build()
    }

    /// Replaces the issuer allow-list.
    #[must_use]
    pub fn with_issuers<I, S>(mut self, issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_issuers = issuers.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the audience allow-list.
    #[must_use]
    pub fn with_audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    /// Returns `true` if `role` is accepted at this call site.
    #[must_use]
    pub fn permits_role(&self, role: Role) -> bool {
        self.allowed_roles.as_ref().is_none_or(|roles| roles.contains(&role))
    }
}
