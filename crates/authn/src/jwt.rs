//! Bearer token extraction and JWT decoding.
//!
//! Decoding stops at the payload: the result is the raw JSON claims object,
//! which the [`validator`](crate::validator) then checks field by field.
//! Timing, issuer and audience checks are deliberately switched off in
//! `jsonwebtoken` so that every claim problem is reported through the
//! validator's error list instead of an opaque decode failure.
//!
//! # Example
//!
//! ```no_run
//! use estate_gate_authn::jwt::{TokenDecoder, VerificationKey};
//!
//! # fn example(authorization: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let decoder = TokenDecoder::new()
//!     .with_key(VerificationKey::Secret(b"project-jwt-secret".to_vec()))?;
//! let token = decoder.decode(authorization)?;
//! println!("alg: {}", token.header.alg);
//! # Ok(())
//! # }
//! ```

use std::{collections::HashSet, fmt};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::AuthError,
    validation::{default_accepted_algorithms, validate_algorithm},
};

/// Strip the `Bearer` scheme from an `Authorization` value.
///
/// The scheme is matched case-insensitively. A bare token (no scheme) is
/// returned as is.
///
/// # Errors
///
/// Returns [`AuthError::MissingToken`] if the value is empty or holds only the
/// scheme.
pub fn extract_bearer(raw: &str) -> Result<&str, AuthError> {
    let raw = raw.trim();
    let token = match raw.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ if raw.eq_ignore_ascii_case("bearer") => "",
        _ => raw,
    };
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

/// The JOSE header fields this crate reads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Signing algorithm name, exactly as sent.
    pub alg: String,
    /// Token type (usually `JWT`).
    #[serde(default)]
    pub typ: Option<String>,
    /// Key identifier.
    #[serde(default)]
    pub kid: Option<String>,
}

/// A decoded (and, when a key is configured, signature-verified) token.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedToken {
    /// JOSE header.
    pub header: TokenHeader,
    /// Raw claims object; not yet validated.
    pub claims: Value,
}

impl DecodedToken {
    /// The non-empty `sub` claim, if present.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.claims.get("sub")?.as_str().filter(|s| !s.is_empty())
    }
}

fn split_segments(token: &str) -> Result<[&str; 3], AuthError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) => Ok([h, p, s]),
        _ => Err(AuthError::invalid_token_format("JWT must have 3 parts separated by dots")),
    }
}

fn decode_segment(segment: &str, what: &str) -> Result<Vec<u8>, AuthError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::invalid_token_format(format!("Failed to decode JWT {what}: {e}")))
}

/// Decode the JWT header without verification.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if the token is not three
/// segments or the header is not base64url JSON with an `alg` field.
pub fn decode_jwt_header(token: &str) -> Result<TokenHeader, AuthError> {
    let [header, _, _] = split_segments(token)?;
    let bytes = decode_segment(header, "header")?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::invalid_token_format(format!("Failed to parse JWT header: {e}")))
}

/// Decode JWT claims without verification.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if:
/// - The JWT does not have exactly 3 parts
/// - The payload cannot be base64url-decoded
/// - The payload is not a JSON object
pub fn decode_jwt_claims(token: &str) -> Result<Value, AuthError> {
    let [_, payload, _] = split_segments(token)?;
    let bytes = decode_segment(payload, "payload")?;
    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::invalid_token_format(format!("Failed to parse JWT claims: {e}")))?;
    if !claims.is_object() {
        return Err(AuthError::invalid_token_format("JWT claims must be a JSON object"));
    }
    Ok(claims)
}

/// Key material used to verify token signatures.
#[derive(Clone, PartialEq, Eq)]
pub enum VerificationKey {
    /// Shared project secret (`HS256`).
    Secret(Vec<u8>),
    /// Ed25519 public key, 32 bytes base64url-encoded without padding (`EdDSA`).
    Ed25519 {
        /// Base64url public key.
        public_key: String,
    },
}

impl VerificationKey {
    /// The single algorithm this key verifies.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Secret(_) => Algorithm::HS256,
            Self::Ed25519 { .. } => Algorithm::EdDSA,
        }
    }

    fn decoding_key(&self) -> Result<DecodingKey, AuthError> {
        match self {
            Self::Secret(secret) => {
                if secret.is_empty() {
                    return Err(AuthError::invalid_key("shared secret is empty"));
                }
                Ok(DecodingKey::from_secret(secret))
            },
            Self::Ed25519 { public_key } => {
                let bytes = URL_SAFE_NO_PAD
                    .decode(public_key)
                    .map_err(|e| AuthError::invalid_key(format!("Ed25519 key is not base64url: {e}")))?;
                if bytes.len() != 32 {
                    return Err(AuthError::invalid_key(format!(
                        "Ed25519 key must be 32 bytes, got {}",
                        bytes.len()
                    )));
                }
                Ok(DecodingKey::from_ed_components(public_key)?)
            },
        }
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret(_) => f.write_str("VerificationKey::Secret(<redacted>)"),
            Self::Ed25519 { public_key } => {
                f.debug_struct("VerificationKey::Ed25519").field("public_key", public_key).finish()
            },
        }
    }
}

/// Decodes bearer tokens into raw claims, enforcing the algorithm policy and,
/// when a key is configured, the signature.
#[derive(Clone)]
pub struct TokenDecoder {
    accepted_algorithms: Vec<String>,
    key: Option<(Algorithm, DecodingKey)>,
}

impl fmt::Debug for TokenDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenDecoder")
            .field("accepted_algorithms", &self.accepted_algorithms)
            .field("verifies_signature", &self.key.is_some())
            .finish()
    }
}

impl Default for TokenDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenDecoder {
    /// Decoder accepting the default algorithms, without signature verification.
    #[must_use]
    pub fn new() -> Self {
        Self { accepted_algorithms: default_accepted_algorithms(), key: None }
    }

    /// Replaces the accepted algorithm list.
    #[must_use]
    pub fn with_accepted_algorithms<I, S>(mut self, algorithms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted_algorithms = algorithms.into_iter().map(Into::into).collect();
        self
    }

    /// Enables signature verification with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKey`] if the key material is unusable.
    pub fn with_key(mut self, key: VerificationKey) -> Result<Self, AuthError> {
        let decoding_key = key.decoding_key()?;
        self.key = Some((key.algorithm(), decoding_key));
        Ok(self)
    }

    /// Algorithms this decoder accepts.
    #[must_use]
    pub fn accepted_algorithms(&self) -> &[String] {
        &self.accepted_algorithms
    }

    /// Returns `true` if a key is configured and [`decode`](Self::decode)
    /// checks signatures.
    #[must_use]
    pub fn verifies_signature(&self) -> bool {
        self.key.is_some()
    }

    /// Decode an `Authorization` value (or bare token).
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingToken`] for an empty value
    /// - [`AuthError::InvalidTokenFormat`] for undecodable segments
    /// - [`AuthError::UnsupportedAlgorithm`] for `none`, unlisted algorithms,
    ///   or an algorithm that does not match the configured key
    /// - [`AuthError::InvalidSignature`] if verification fails
    pub fn decode(&self, raw: &str) -> Result<DecodedToken, AuthError> {
        let token = extract_bearer(raw)?;
        let header = decode_jwt_header(token)?;
        validate_algorithm(&header.alg, &self.accepted_algorithms)?;

        let claims = match &self.key {
            Some((algorithm, key)) => verify_signature(token, key, *algorithm)?,
            None => decode_jwt_claims(token)?,
        };
        if !claims.is_object() {
            return Err(AuthError::invalid_token_format("JWT claims must be a JSON object"));
        }

        Ok(DecodedToken { header, claims })
    }
}

/// Verify a JWT signature and return its raw claims.
///
/// Only the signature and algorithm are checked here; no claim is required or
/// validated.
///
/// # Errors
///
/// Returns an error if signature verification fails or the header algorithm
/// differs from `algorithm`.
pub fn verify_signature(
    token: &str,
    key: &DecodingKey,
    algorithm: Algorithm,
) -> Result<Value, AuthError> {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    let token_data = decode::<Value>(token, key, &validation)?;
    Ok(token_data.claims)
}
