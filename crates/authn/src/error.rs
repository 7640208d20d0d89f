//! Authentication error types.
//!
//! This module defines errors that can occur while extracting and decoding a
//! bearer token, before its claims reach the validator. Claim-level problems
//! (expiry, audience, role, ...) are not errors here: the validator reports
//! them as [`ValidationError`](crate::validator::ValidationError) values.

use thiserror::Error;

/// Token extraction and decoding errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    /// No token was presented.
    #[error("Missing bearer token")]
    MissingToken,

    /// Malformed JWT - cannot be decoded.
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Algorithm not in allowed list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Verification key material is unusable.
    #[error("Invalid verification key: {0}")]
    InvalidKey(String),
}

impl AuthError {
    /// Creates an [`AuthError::InvalidTokenFormat`].
    #[must_use]
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat(message.into())
    }

    /// Creates an [`AuthError::UnsupportedAlgorithm`].
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(message.into())
    }

    /// Creates an [`AuthError::InvalidKey`].
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey(message.into())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => AuthError::invalid_token_format("Invalid JWT structure"),
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidAlgorithm => {
                AuthError::unsupported_algorithm("Algorithm does not match verification key")
            },
            ErrorKind::InvalidKeyFormat | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidRsaKey(_) => {
                AuthError::invalid_key(format!("JWT key error: {err}"))
            },
            _ => AuthError::invalid_token_format(format!("JWT error: {err}")),
        }
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(AuthError::MissingToken.to_string(), "Missing bearer token");
        assert_eq!(
            AuthError::invalid_token_format("test").to_string(),
            "Invalid token format: test"
        );
        assert_eq!(AuthError::InvalidSignature.to_string(), "Invalid signature");
        assert_eq!(AuthError::invalid_key("short").to_string(), "Invalid verification key: short");
    }

    #[test]
    fn test_error_from_jsonwebtoken() {
        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidSignature);
        let auth_err: AuthError = jwt_err.into();
        assert_eq!(auth_err, AuthError::InvalidSignature);

        let jwt_err =
            jsonwebtoken::errors::Error::from(jsonwebtoken::errors::ErrorKind::InvalidToken);
        assert!(matches!(AuthError::from(jwt_err), AuthError::InvalidTokenFormat(_)));
    }
}
