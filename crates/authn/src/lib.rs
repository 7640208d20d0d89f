//! # Estate Gate Authentication
//!
//! Identity token decoding and claims validation for the marketplace's
//! request authorization pipeline.
//!
//! This crate provides:
//! - **Token decoding**: bearer extraction, JWT header/payload decoding, optional signature
//!   verification
//! - **Algorithm policy**: `none` always rejected, configurable accepted list
//! - **Claims validation**: structure, timing, issuer/audience and role checks that collect every
//!   error and raise non-blocking warnings
//!
//! ## Example
//!
//! ```no_run
//! use estate_gate_authn::{TokenDecoder, ValidationPolicy, VerificationKey, validate};
//!
//! # fn example(authorization: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let decoder = TokenDecoder::new().with_key(VerificationKey::Secret(b"jwt-secret".to_vec()))?;
//! let token = decoder.decode(authorization)?;
//!
//! let policy = ValidationPolicy::admin()
//!     .with_issuers(["https://project.auth.example.com/auth/v1"])
//!     .with_audiences(["authenticated"]);
//! let result = validate(&token.claims, &policy);
//! if let Some(claims) = result.claims {
//!     println!("caller {} as {}", claims.sub, claims.role);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Identity claims model.
pub mod claims;
/// Token decoding error types.
pub mod error;
/// Bearer extraction and JWT decoding.
pub mod jwt;
/// Per-call-site validation policy.
pub mod policy;
/// Test utilities.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Algorithm validation.
pub mod validation;
/// Claims validation.
pub mod validator;

pub use claims::{Audience, AuthMethod, IdentityClaims, Role, UnknownRole};
pub use error::{AuthError, Result};
pub use jwt::{DecodedToken, TokenDecoder, TokenHeader, VerificationKey, extract_bearer};
pub use policy::ValidationPolicy;
pub use validation::{DEFAULT_ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
pub use validator::{
    FailureCategory, ValidationError, ValidationResult, ValidationWarning, validate, validate_at,
};
