//! Shared test utilities for token and claims testing.
//!
//! Helpers for building claims payloads, signing tokens with the project
//! secret (`HS256`) or an Ed25519 key (`EdDSA`), and crafting raw unsigned
//! JWT strings for attack testing. Feature-gated behind `testutil` to
//! prevent leaking into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! estate-gate-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use estate_gate_authn::testutil::{claims_for, create_hs256_jwt, TEST_SECRET};
//! ```
#![allow(clippy::expect_used)]

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand_core::OsRng;
use serde_json::{Value, json};
use zeroize::Zeroizing;

use crate::{claims::Role, policy::ValidationPolicy};

/// Issuer used by test tokens.
pub const TEST_ISSUER: &str = "https://project.auth.example.com/auth/v1";

/// Audience used by test tokens.
pub const TEST_AUDIENCE: &str = "authenticated";

/// Shared secret used by test tokens.
pub const TEST_SECRET: &[u8] = b"test-project-jwt-secret-0123456789";

/// A well-formed seller claims payload issued at `now` (seconds since epoch)
/// and valid for one hour.
#[must_use]
pub fn valid_claims_json(now: i64) -> Value {
    claims_for("user-seller-1", Role::Seller, now)
}

/// A well-formed claims payload for `sub` with `role`, issued at `now` and
/// valid for one hour.
#[must_use]
pub fn claims_for(sub: &str, role: Role, now: i64) -> Value {
    json!({
        "iss": TEST_ISSUER,
        "sub": sub,
        "aud": TEST_AUDIENCE,
        "exp": now + 3600,
        "iat": now,
        "role": role.as_str(),
        "session_id": format!("session-{sub}"),
        "amr": [{ "method": "password", "timestamp": now }],
        "is_anonymous": false,
    })
}

/// A policy trusting [`TEST_ISSUER`] and [`TEST_AUDIENCE`] with general
/// defaults otherwise.
#[must_use]
pub fn test_policy() -> ValidationPolicy {
    ValidationPolicy::builder()
        .allowed_issuers(vec![TEST_ISSUER.to_owned()])
        .allowed_audiences(vec![TEST_AUDIENCE.to_owned()])
        .build()
}

/// Signs `claims` with `secret` using `HS256`.
///
/// # Panics
///
/// Panics if JWT encoding fails (should not happen with valid inputs).
#[must_use]
pub fn create_hs256_jwt(claims: &Value, secret: &[u8]) -> String {
    let header = Header::new(Algorithm::HS256);
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(secret))
        .expect("Failed to encode test JWT")
}

/// Generates a test Ed25519 key pair.
///
/// Returns `(pkcs8_der, public_key_base64url)`. The private key is wrapped in
/// [`Zeroizing`] so it is scrubbed from memory on drop.
#[must_use]
pub fn generate_test_keypair() -> (Zeroizing<Vec<u8>>, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let public_key_b64 = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());

    let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
    let mut pkcs8_der = Zeroizing::new(vec![
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER version 0
        0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
        0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
        0x04, 0x22, // OCTET STRING, 34 bytes
        0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
    ]);
    pkcs8_der.extend_from_slice(&*private_bytes);

    (pkcs8_der, public_key_b64)
}

/// Signs `claims` with an Ed25519 key in PKCS#8 DER format.
///
/// # Panics
///
/// Panics if JWT encoding fails (should not happen with valid inputs).
#[must_use]
pub fn create_eddsa_jwt(pkcs8_der: &[u8], claims: &Value) -> String {
    let header = Header::new(Algorithm::EdDSA);
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_ed_der(pkcs8_der))
        .expect("Failed to encode test JWT")
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.` with an
/// empty signature, for testing rejection of `alg: "none"` and similar.
///
/// # Panics
///
/// Panics if JSON serialization fails.
#[must_use]
pub fn craft_raw_jwt(header_json: &Value, payload_json: &Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}
