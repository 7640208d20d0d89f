//! Error taxonomy for authorization decisions.
//!
//! Two kinds of failure live here:
//!
//! - [`ErrorKind`] is the closed set of outcomes a route can answer with. Each
//!   kind has a stable HTTP status and a generic public message that never
//!   explains *why* (an ownership denial looks the same whether the resource
//!   is missing or belongs to someone else).
//! - [`AuthzError`] is the operational error type returned by the components
//!   themselves (store failures, timeouts, invalid configuration).

use std::{fmt, time::Duration};

use estate_gate_authn::FailureCategory;
use estate_gate_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

/// The outcome taxonomy shared by every pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Token or claims structurally unusable.
    MalformedClaims,
    /// Token expired or older than the route allows.
    ExpiredClaims,
    /// Issuer or audience not trusted.
    UntrustedIssuerOrAudience,
    /// Role not accepted for this route.
    RoleNotPermitted,
    /// Role lacks a required permission.
    PermissionDenied,
    /// Caller does not own the resource (or it does not exist).
    OwnershipDenied,
    /// Too many requests in the current window.
    RateLimitExceeded,
    /// A backing store could not answer.
    StoreUnavailable,
    /// The audit entry could not be written.
    AuditWriteFailed,
}

impl ErrorKind {
    /// Stable HTTP status for this outcome.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::MalformedClaims | Self::ExpiredClaims | Self::UntrustedIssuerOrAudience => 401,
            Self::RoleNotPermitted | Self::PermissionDenied | Self::OwnershipDenied => 403,
            Self::RateLimitExceeded => 429,
            Self::StoreUnavailable => 503,
            Self::AuditWriteFailed => 500,
        }
    }

    /// Generic message safe to show the caller.
    #[must_use]
    pub fn public_message(self) -> &'static str {
        match self {
            Self::MalformedClaims | Self::ExpiredClaims | Self::UntrustedIssuerOrAudience => {
                "Authentication required"
            },
            Self::RoleNotPermitted | Self::PermissionDenied | Self::OwnershipDenied => "Forbidden",
            Self::RateLimitExceeded => "Too many requests",
            Self::StoreUnavailable => "Service temporarily unavailable",
            Self::AuditWriteFailed => "Internal error",
        }
    }

    /// Snake-case name used in logs and audit metadata.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedClaims => "malformed_claims",
            Self::ExpiredClaims => "expired_claims",
            Self::UntrustedIssuerOrAudience => "untrusted_issuer_or_audience",
            Self::RoleNotPermitted => "role_not_permitted",
            Self::PermissionDenied => "permission_denied",
            Self::OwnershipDenied => "ownership_denied",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::StoreUnavailable => "store_unavailable",
            Self::AuditWriteFailed => "audit_write_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<FailureCategory> for ErrorKind {
    fn from(category: FailureCategory) -> Self {
        match category {
            FailureCategory::Malformed => Self::MalformedClaims,
            FailureCategory::Expired => Self::ExpiredClaims,
            FailureCategory::UntrustedIssuerOrAudience => Self::UntrustedIssuerOrAudience,
            FailureCategory::RoleNotPermitted => Self::RoleNotPermitted,
        }
    }
}

/// Operational errors raised by authorization components.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// A configuration value is out of range or inconsistent.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong.
        message: String,
    },

    /// A backing store failed or did not answer in time.
    #[error("{store} store unavailable: {message}")]
    StoreUnavailable {
        /// Which store (`rate_limit`, `resource`, `audit`).
        store: &'static str,
        /// Description of the failure.
        message: String,
        /// The underlying store error, absent on timeout.
        #[source]
        source: Option<StorageError>,
    },

    /// The audit entry was not written.
    #[error("Audit write failed: {message}")]
    AuditWriteFailed {
        /// Description of the failure.
        message: String,
        /// The underlying store error, absent on timeout.
        #[source]
        source: Option<StorageError>,
    },
}

impl AuthzError {
    /// Creates an [`AuthzError::InvalidConfig`].
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    /// Wraps a store error.
    #[must_use]
    pub fn store(store: &'static str, source: StorageError) -> Self {
        Self::StoreUnavailable { store, message: source.to_string(), source: Some(source) }
    }

    /// A store call that exceeded its timeout.
    #[must_use]
    pub fn store_timeout(store: &'static str, after: Duration) -> Self {
        Self::StoreUnavailable { store, message: format!("timed out after {after:?}"), source: None }
    }

    /// Wraps an audit store error.
    #[must_use]
    pub fn audit(source: StorageError) -> Self {
        Self::AuditWriteFailed { message: source.to_string(), source: Some(source) }
    }

    /// An audit write that exceeded its timeout.
    #[must_use]
    pub fn audit_timeout(after: Duration) -> Self {
        Self::AuditWriteFailed { message: format!("timed out after {after:?}"), source: None }
    }

    /// The taxonomy kind reported for this error, if any.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::InvalidConfig { .. } => None,
            Self::StoreUnavailable { .. } => Some(ErrorKind::StoreUnavailable),
            Self::AuditWriteFailed { .. } => Some(ErrorKind::AuditWriteFailed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_http_statuses() {
        assert_eq!(ErrorKind::MalformedClaims.http_status(), 401);
        assert_eq!(ErrorKind::ExpiredClaims.http_status(), 401);
        assert_eq!(ErrorKind::UntrustedIssuerOrAudience.http_status(), 401);
        assert_eq!(ErrorKind::RoleNotPermitted.http_status(), 403);
        assert_eq!(ErrorKind::PermissionDenied.http_status(), 403);
        assert_eq!(ErrorKind::OwnershipDenied.http_status(), 403);
        assert_eq!(ErrorKind::RateLimitExceeded.http_status(), 429);
        assert_eq!(ErrorKind::StoreUnavailable.http_status(), 503);
        assert_eq!(ErrorKind::AuditWriteFailed.http_status(), 500);
    }

    #[test]
    fn test_public_messages_are_generic() {
        assert_eq!(ErrorKind::OwnershipDenied.public_message(), "Forbidden");
        assert_eq!(
            ErrorKind::OwnershipDenied.public_message(),
            ErrorKind::PermissionDenied.public_message()
        );
        assert_eq!(ErrorKind::ExpiredClaims.public_message(), "Authentication required");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"rate_limit_exceeded\"");
        assert_eq!(ErrorKind::RateLimitExceeded.to_string(), "rate_limit_exceeded");
    }

    #[test]
    fn test_from_failure_category() {
        assert_eq!(ErrorKind::from(FailureCategory::Expired), ErrorKind::ExpiredClaims);
        assert_eq!(ErrorKind::from(FailureCategory::Malformed), ErrorKind::MalformedClaims);
        assert_eq!(
            ErrorKind::from(FailureCategory::RoleNotPermitted),
            ErrorKind::RoleNotPermitted
        );
    }

    #[test]
    fn test_store_error_preserves_source() {
        let err = AuthzError::store("resource", StorageError::connection("refused"));
        assert_eq!(err.kind(), Some(ErrorKind::StoreUnavailable));
        assert!(err.to_string().contains("resource store unavailable"));
        assert!(err.source().is_some());

        let err = AuthzError::audit_timeout(Duration::from_millis(250));
        assert_eq!(err.kind(), Some(ErrorKind::AuditWriteFailed));
        assert!(err.to_string().contains("timed out"));
        assert!(err.source().is_none());
    }

    #[test]
    fn test_invalid_config() {
        let err = AuthzError::invalid_config("max_requests must be positive");
        assert_eq!(err.kind(), None);
        assert_eq!(err.to_string(), "Invalid configuration: max_requests must be positive");
    }
}
