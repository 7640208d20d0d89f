//! Claims validation.
//!
//! [`validate`] turns a raw JSON claims object into [`IdentityClaims`] or a
//! list of everything wrong with it. It is a pure function: no I/O, no shared
//! state, safe to call from any number of tasks.
//!
//! All checks run; errors are collected rather than returned on the first
//! failure, so a single log line explains every reason a token was refused.
//! [`ValidationResult::category`] reduces the list to one
//! [`FailureCategory`] for the response, with expiry taking precedence.
//!
//! | check | error | category |
//! |-------|-------|----------|
//! | required claim absent | [`MissingClaim`](ValidationError::MissingClaim) | malformed |
//! | claim has the wrong type | [`InvalidClaimType`](ValidationError::InvalidClaimType) | malformed |
//! | `exp <= iat` | [`InvalidLifetime`](ValidationError::InvalidLifetime) | malformed |
//! | `iat > now + leeway` | [`IssuedInFuture`](ValidationError::IssuedInFuture) | malformed |
//! | `nbf > now + leeway` | [`NotYetValid`](ValidationError::NotYetValid) | malformed |
//! | `exp <= now` | [`Expired`](ValidationError::Expired) | expired |
//! | `now - iat > max_age` | [`TooOld`](ValidationError::TooOld) | expired |
//! | issuer not allowed | [`UntrustedIssuer`](ValidationError::UntrustedIssuer) | untrusted |
//! | audience not allowed | [`AudienceMismatch`](ValidationError::AudienceMismatch) | untrusted |
//! | role string unknown | [`UnknownRole`](ValidationError::UnknownRole) | role |
//! | role not allowed here | [`RoleNotAllowed`](ValidationError::RoleNotAllowed) | role |

use std::{fmt, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    claims::{Audience, AuthMethod, IdentityClaims, Role},
    policy::ValidationPolicy,
};

/// Why a claims object was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ValidationError {
    /// A required claim is absent.
    #[error("missing claim: {claim}")]
    MissingClaim {
        /// Claim name.
        claim: &'static str,
    },

    /// A claim is present with the wrong type or an unusable value.
    #[error("claim '{claim}' must be {expected}")]
    InvalidClaimType {
        /// Claim name.
        claim: &'static str,
        /// Expected shape.
        expected: &'static str,
    },

    /// The role string is not a known role.
    #[error("unknown role: {role}")]
    UnknownRole {
        /// Role as sent.
        role: String,
    },

    /// `exp <= now`.
    #[error("token expired at {exp}")]
    Expired {
        /// Expiry instant.
        exp: DateTime<Utc>,
    },

    /// `iat` lies in the future beyond the leeway.
    #[error("token issued in the future ({iat})")]
    IssuedInFuture {
        /// Issued-at instant.
        iat: DateTime<Utc>,
    },

    /// `nbf` has not been reached.
    #[error("token not valid before {nbf}")]
    NotYetValid {
        /// Not-before instant.
        nbf: DateTime<Utc>,
    },

    /// The token is older than the policy allows.
    #[error("token age {age_secs}s exceeds maximum {max_secs}s")]
    TooOld {
        /// `now - iat` in seconds.
        age_secs: i64,
        /// Policy maximum in seconds.
        max_secs: u64,
    },

    /// `exp <= iat`.
    #[error("token expires before it was issued")]
    InvalidLifetime,

    /// Issuer not in the allow-list.
    #[error("untrusted issuer: {issuer}")]
    UntrustedIssuer {
        /// Issuer as sent.
        issuer: String,
    },

    /// No audience value is in the allow-list.
    #[error("audience not accepted")]
    AudienceMismatch,

    /// Known role, but not accepted at this call site.
    #[error("role '{role}' not permitted here")]
    RoleNotAllowed {
        /// Caller role.
        role: Role,
    },
}

/// Coarse classification of a [`ValidationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    /// Structure, types, or timing that can never become valid.
    Malformed,
    /// Expired or older than the policy maximum.
    Expired,
    /// Issuer or audience not trusted.
    UntrustedIssuerOrAudience,
    /// Role unknown or not accepted here.
    RoleNotPermitted,
}

impl ValidationError {
    /// The category this error falls into.
    #[must_use]
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Expired { .. } | Self::TooOld { .. } => FailureCategory::Expired,
            Self::UntrustedIssuer { .. } | Self::AudienceMismatch => {
                FailureCategory::UntrustedIssuerOrAudience
            },
            Self::UnknownRole { .. } | Self::RoleNotAllowed { .. } => {
                FailureCategory::RoleNotPermitted
            },
            Self::MissingClaim { .. }
            | Self::InvalidClaimType { .. }
            | Self::IssuedInFuture { .. }
            | Self::NotYetValid { .. }
            | Self::InvalidLifetime => FailureCategory::Malformed,
        }
    }
}

/// Non-blocking observations about otherwise acceptable claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ValidationWarning {
    /// `super_admin` or `service_role` outside a trusted context.
    ElevatedRoleOutsideTrustedContext {
        /// Caller role.
        role: Role,
    },
    /// `is_anonymous` is set.
    AnonymousIdentity,
    /// An `amr` entry is not `{method: string, timestamp: integer}`.
    MalformedAuthMethod {
        /// Position in the `amr` array.
        index: usize,
    },
    /// `sub == iss`.
    SubjectEqualsIssuer,
    /// Lifetime above the policy threshold.
    LongLifetime {
        /// `exp - iat` in seconds.
        lifetime_secs: i64,
    },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ElevatedRoleOutsideTrustedContext { role } => {
                write!(f, "elevated role '{role}' outside a trusted context")
            },
            Self::AnonymousIdentity => f.write_str("anonymous identity"),
            Self::MalformedAuthMethod { index } => write!(f, "malformed amr entry at {index}"),
            Self::SubjectEqualsIssuer => f.write_str("subject equals issuer"),
            Self::LongLifetime { lifetime_secs } => {
                write!(f, "unusually long token lifetime ({lifetime_secs}s)")
            },
        }
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// `true` iff `errors` is empty.
    pub valid: bool,
    /// Every reason the claims were rejected.
    pub errors: Vec<ValidationError>,
    /// Non-blocking observations.
    pub warnings: Vec<ValidationWarning>,
    /// Present iff `valid`.
    pub claims: Option<IdentityClaims>,
}

impl ValidationResult {
    /// The single category used to answer the caller, or `None` when valid.
    ///
    /// Precedence: expired, malformed, untrusted issuer/audience, role.
    #[must_use]
    pub fn category(&self) -> Option<FailureCategory> {
        const PRECEDENCE: [FailureCategory; 4] = [
            FailureCategory::Expired,
            FailureCategory::Malformed,
            FailureCategory::UntrustedIssuerOrAudience,
            FailureCategory::RoleNotPermitted,
        ];
        PRECEDENCE.into_iter().find(|c| self.errors.iter().any(|e| e.category() == *c))
    }

    /// Converts into the validated claims.
    ///
    /// # Errors
    ///
    /// Returns the collected errors when the claims are invalid.
    pub fn into_claims(self) -> Result<IdentityClaims, Vec<ValidationError>> {
        match self.claims {
            Some(claims) if self.valid => Ok(claims),
            _ => Err(self.errors),
        }
    }
}

/// Validate `raw` against `policy` at the current time.
#[must_use]
pub fn validate(raw: &Value, policy: &ValidationPolicy) -> ValidationResult {
    validate_at(raw, policy, Utc::now())
}

/// Validate `raw` against `policy` as of `now`.
#[must_use]
pub fn validate_at(raw: &Value, policy: &ValidationPolicy, now: DateTime<Utc>) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Some(obj) = raw.as_object() else {
        errors.push(ValidationError::InvalidClaimType { claim: "claims", expected: "an object" });
        return ValidationResult { valid: false, errors, warnings, claims: None };
    };

    let mut fields = Fields { obj, errors: &mut errors };
    let sub = fields.required_string("sub");
    let iss = fields.required_string("iss");
    let aud = fields.audience();
    let iat = fields.required_timestamp("iat");
    let exp = fields.required_timestamp("exp");
    let nbf = fields.optional_timestamp("nbf");
    let role_name = fields.required_string("role");
    let session_id = fields.optional_string("session_id");
    let email = fields.optional_string("email");
    let is_anonymous = fields.optional_bool("is_anonymous").unwrap_or(false);
    let amr = fields.auth_methods(&mut warnings);

    let role = role_name.and_then(|name| match name.parse::<Role>() {
        Ok(role) => Some(role),
        Err(_) => {
            errors.push(ValidationError::UnknownRole { role: name });
            None
        },
    });

    let skew_limit =
        now.checked_add_signed(delta(policy.leeway)).unwrap_or(DateTime::<Utc>::MAX_UTC);

    if let Some(exp) = exp
        && exp <= now
    {
        errors.push(ValidationError::Expired { exp });
    }

    if let Some(iat) = iat {
        if iat > skew_limit {
            errors.push(ValidationError::IssuedInFuture { iat });
        }
        let age = now - iat;
        if age > delta(policy.max_age) {
            errors.push(ValidationError::TooOld {
                age_secs: age.num_seconds(),
                max_secs: policy.max_age.as_secs(),
            });
        }
    }

    if let Some(nbf) = nbf
        && nbf > skew_limit
    {
        errors.push(ValidationError::NotYetValid { nbf });
    }

    if let (Some(iat), Some(exp)) = (iat, exp) {
        let lifetime = exp - iat;
        if lifetime <= TimeDelta::zero() {
            errors.push(ValidationError::InvalidLifetime);
        } else if lifetime > delta(policy.long_lifetime_threshold) {
            warnings.push(ValidationWarning::LongLifetime { lifetime_secs: lifetime.num_seconds() });
        }
    }

    if let Some(iss) = &iss
        && !policy.allowed_issuers.is_empty()
        && !policy.allowed_issuers.contains(iss)
    {
        errors.push(ValidationError::UntrustedIssuer { issuer: iss.clone() });
    }

    if let Some(aud) = &aud
        && !policy.allowed_audiences.is_empty()
        && !aud.intersects(&policy.allowed_audiences)
    {
        errors.push(ValidationError::AudienceMismatch);
    }

    if let Some(role) = role {
        if !policy.permits_role(role) {
            errors.push(ValidationError::RoleNotAllowed { role });
        }
        if role.is_elevated() && !policy.trusted_context {
            warnings.push(ValidationWarning::ElevatedRoleOutsideTrustedContext { role });
        }
    }

    if is_anonymous {
        warnings.push(ValidationWarning::AnonymousIdentity);
    }

    if let (Some(sub), Some(iss)) = (&sub, &iss)
        && sub == iss
    {
        warnings.push(ValidationWarning::SubjectEqualsIssuer);
    }

    let claims = match (errors.is_empty(), sub, role, iat, exp, iss, aud) {
        (true, Some(sub), Some(role), Some(iat), Some(exp), Some(iss), Some(aud)) => {
            Some(IdentityClaims {
                sub,
                role,
                iat,
                exp,
                nbf,
                iss,
                aud,
                session_id,
                amr,
                is_anonymous,
                email,
            })
        },
        _ => None,
    };

    ValidationResult { valid: claims.is_some(), errors, warnings, claims }
}

fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Typed field access that records an error for every missing or mistyped
/// claim.
struct Fields<'a> {
    obj: &'a Map<String, Value>,
    errors: &'a mut Vec<ValidationError>,
}

impl<'a> Fields<'a> {
    fn present(&self, claim: &'static str) -> Option<&'a Value> {
        self.obj.get(claim).filter(|v| !v.is_null())
    }

    fn invalid(&mut self, claim: &'static str, expected: &'static str) {
        self.errors.push(ValidationError::InvalidClaimType { claim, expected });
    }

    fn required_string(&mut self, claim: &'static str) -> Option<String> {
        let Some(value) = self.present(claim) else {
            self.errors.push(ValidationError::MissingClaim { claim });
            return None;
        };
        match value.as_str() {
            Some(s) if !s.is_empty() => Some(s.to_owned()),
            _ => {
                self.invalid(claim, "a non-empty string");
                None
            },
        }
    }

    fn optional_string(&mut self, claim: &'static str) -> Option<String> {
        let value = self.present(claim)?;
        match value.as_str() {
            Some(s) => Some(s.to_owned()),
            None => {
                self.invalid(claim, "a string");
                None
            },
        }
    }

    fn optional_bool(&mut self, claim: &'static str) -> Option<bool> {
        let value = self.present(claim)?;
        match value.as_bool() {
            Some(b) => Some(b),
            None => {
                self.invalid(claim, "a boolean");
                None
            },
        }
    }

    fn timestamp(&mut self, claim: &'static str, value: &Value) -> Option<DateTime<Utc>> {
        match value.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)) {
            Some(at) => Some(at),
            None => {
                self.invalid(claim, "an integer timestamp");
                None
            },
        }
    }

    fn required_timestamp(&mut self, claim: &'static str) -> Option<DateTime<Utc>> {
        let Some(value) = self.present(claim) else {
            self.errors.push(ValidationError::MissingClaim { claim });
            return None;
        };
        self.timestamp(claim, value)
    }

    fn optional_timestamp(&mut self, claim: &'static str) -> Option<DateTime<Utc>> {
        let value = self.present(claim)?;
        self.timestamp(claim, value)
    }

    fn audience(&mut self) -> Option<Audience> {
        const EXPECTED: &str = "a non-empty string or array of strings";
        let Some(value) = self.present("aud") else {
            self.errors.push(ValidationError::MissingClaim { claim: "aud" });
            return None;
        };
        match value {
            Value::String(s) if !s.is_empty() => Some(Audience::One(s.clone())),
            Value::Array(items) if !items.is_empty() => {
                let values: Option<Vec<String>> =
                    items.iter().map(|v| v.as_str().map(str::to_owned)).collect();
                if values.is_none() {
                    self.invalid("aud", EXPECTED);
                }
                values.map(Audience::Many)
            },
            _ => {
                self.invalid("aud", EXPECTED);
                None
            },
        }
    }

    fn auth_methods(&mut self, warnings: &mut Vec<ValidationWarning>) -> Vec<AuthMethod> {
        let Some(value) = self.present("amr") else {
            return Vec::new();
        };
        let Some(entries) = value.as_array() else {
            self.invalid("amr", "an array");
            return Vec::new();
        };
        entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let method = entry.get("method").and_then(Value::as_str);
                let timestamp = entry.get("timestamp").and_then(Value::as_i64);
                match (method, timestamp) {
                    (Some(method), Some(timestamp)) => {
                        Some(AuthMethod { method: method.to_owned(), timestamp })
                    },
                    _ => {
                        warnings.push(ValidationWarning::MalformedAuthMethod { index });
                        None
                    },
                }
            })
            .collect()
    }
}
