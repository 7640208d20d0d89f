//! Identity claims carried by a validated token.
//!
//! Tokens issued by the hosted backend look like this:
//!
//! ```json
//! {
//!   "iss": "https://project.auth.example.com/auth/v1",
//!   "sub": "8f14e45f-ceea-467a-9575-6d2f6b2c1e11",
//!   "aud": "authenticated",
//!   "exp": 1700003600,
//!   "iat": 1700000000,
//!   "role": "seller",
//!   "session_id": "2a8b5c1e-...",
//!   "amr": [{ "method": "password", "timestamp": 1700000000 }],
//!   "is_anonymous": false
//! }
//! ```
//!
//! [`IdentityClaims`] is only ever produced by the validator; it is never
//! persisted and lives for a single request.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of caller roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Unauthenticated visitor holding an anonymous session.
    #[serde(rename = "anon")]
    Anonymous,
    /// Signed-in buyer.
    #[serde(rename = "authenticated", alias = "buyer")]
    Buyer,
    /// Lists and manages their own properties.
    #[serde(rename = "seller")]
    Seller,
    /// Licensed agent acting for sellers.
    #[serde(rename = "agent")]
    Agent,
    /// Marketplace administrator.
    #[serde(rename = "admin")]
    Admin,
    /// Administrator allowed to manage other administrators.
    #[serde(rename = "super_admin")]
    SuperAdmin,
    /// Backend service account.
    #[serde(rename = "service_role", alias = "service")]
    Service,
}

impl Role {
    /// Every role, lowest privilege first.
    pub const ALL: [Role; 7] = [
        Role::Anonymous,
        Role::Buyer,
        Role::Seller,
        Role::Agent,
        Role::Admin,
        Role::SuperAdmin,
        Role::Service,
    ];

    /// Canonical wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anonymous => "anon",
            Self::Buyer => "authenticated",
            Self::Seller => "seller",
            Self::Agent => "agent",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
            Self::Service => "service_role",
        }
    }

    /// Roles that warrant a warning when used outside a trusted context.
    #[must_use]
    pub fn is_elevated(self) -> bool {
        matches!(self, Self::SuperAdmin | Self::Service)
    }

    /// Administrative roles protected against self-deletion and self-demotion.
    #[must_use]
    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role name is not part of the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anon" | "anonymous" => Ok(Self::Anonymous),
            "authenticated" | "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            "agent" => Ok(Self::Agent),
            "admin" => Ok(Self::Admin),
            "super_admin" => Ok(Self::SuperAdmin),
            "service_role" | "service" => Ok(Self::Service),
            other => Err(UnknownRole(other.to_owned())),
        }
    }
}

/// Token audience: a single value or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "authenticated"`
    One(String),
    /// `"aud": ["authenticated", "admin-console"]`
    Many(Vec<String>),
}

impl Audience {
    /// Iterates over every audience value.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values,
        };
        values.iter().map(String::as_str)
    }

    /// Returns `true` if any audience value is in `allowed`.
    #[must_use]
    pub fn intersects(&self, allowed: &[String]) -> bool {
        self.iter().any(|aud| allowed.iter().any(|a| a == aud))
    }
}

/// One entry of the `amr` (authentication methods reference) claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMethod {
    /// Method name (e.g. `password`, `otp`, `oauth`).
    pub method: String,
    /// When the method was used (seconds since epoch).
    pub timestamp: i64,
}

/// Decoded, validated claims for the current request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject - identity id of the caller.
    pub sub: String,
    /// Caller role.
    pub role: Role,
    /// Issued at.
    pub iat: DateTime<Utc>,
    /// Expiration time.
    pub exp: DateTime<Utc>,
    /// Not before (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<DateTime<Utc>>,
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: Audience,
    /// Session identifier (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Well-formed authentication method entries; malformed ones are dropped
    /// with a validator warning.
    #[serde(default)]
    pub amr: Vec<AuthMethod>,
    /// Anonymous-session flag.
    #[serde(default)]
    pub is_anonymous: bool,
    /// Email address (optional, audit metadata only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl IdentityClaims {
    /// Token lifetime (`exp - iat`).
    #[must_use]
    pub fn lifetime(&self) -> chrono::TimeDelta {
        self.exp - self.iat
    }

    /// Returns `true` if `identity_id` is this caller.
    #[must_use]
    pub fn is_subject(&self, identity_id: &str) -> bool {
        self.sub == identity_id
    }
}
