//! Security-focused token tests.
//!
//! These tests verify the decode-then-validate path's resistance to common
//! JWT attack vectors: `alg: "none"`, algorithm confusion, forged signatures,
//! expired and not-yet-valid tokens, untrusted issuers, and role escalation
//! on admin routes.
#![allow(clippy::expect_used, clippy::panic)]

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use estate_gate_authn::{
    FailureCategory, Role, TokenDecoder, ValidationError, ValidationPolicy, VerificationKey,
    error::AuthError,
    testutil::{
        TEST_AUDIENCE, TEST_ISSUER, TEST_SECRET, claims_for, craft_raw_jwt, create_eddsa_jwt,
        create_hs256_jwt, generate_test_keypair, test_policy,
    },
    validate_at,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const NOW: i64 = 1_700_000_000;

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(NOW, 0).expect("valid timestamp")
}

fn hs256_decoder() -> TokenDecoder {
    TokenDecoder::new()
        .with_key(VerificationKey::Secret(TEST_SECRET.to_vec()))
        .expect("valid secret")
}

// ===========================================================================
// 1. Algorithm substitution: `alg: "none"` must be rejected
// ===========================================================================

#[test]
fn test_algorithm_none_rejected_without_key() {
    let token = craft_raw_jwt(&json!({"alg": "none", "typ": "JWT"}), &claims_for("u1", Role::Admin, NOW));
    let result = TokenDecoder::new().decode(&format!("Bearer {token}"));
    assert!(
        matches!(&result, Err(AuthError::UnsupportedAlgorithm(msg)) if msg.contains("security")),
        "Security: alg 'none' must be rejected, got: {result:?}"
    );
}

#[test]
fn test_algorithm_none_rejected_with_key() {
    let token = craft_raw_jwt(&json!({"alg": "none"}), &claims_for("u1", Role::Admin, NOW));
    let result = hs256_decoder().decode(&token);
    assert!(matches!(result, Err(AuthError::UnsupportedAlgorithm(_))));
}

#[test]
fn test_algorithm_none_rejected_even_if_listed() {
    let token = craft_raw_jwt(&json!({"alg": "None"}), &claims_for("u1", Role::Admin, NOW));
    let decoder = TokenDecoder::new().with_accepted_algorithms(["none", "None", "HS256"]);
    assert!(matches!(decoder.decode(&token), Err(AuthError::UnsupportedAlgorithm(_))));
}

// ===========================================================================
// 2. Algorithm confusion: HS256 signed with the EdDSA public key
// ===========================================================================

#[test]
fn test_algorithm_confusion_hs256_with_public_key_rejected() {
    let (_pkcs8_der, public_key_b64) = generate_test_keypair();
    let decoder = TokenDecoder::new()
        .with_key(VerificationKey::Ed25519 { public_key: public_key_b64.clone() })
        .expect("valid ed25519 key");

    let public_key_bytes = URL_SAFE_NO_PAD.decode(&public_key_b64).expect("decode public key");
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims_for("attacker", Role::SuperAdmin, NOW),
        &EncodingKey::from_secret(&public_key_bytes),
    )
    .expect("encode HS256 JWT");

    let result = decoder.decode(&token);
    assert!(
        matches!(&result, Err(AuthError::UnsupportedAlgorithm(_))),
        "Security: HS256 token must not verify against an EdDSA key, got: {result:?}"
    );
}

#[test]
fn test_unlisted_algorithm_rejected() {
    let token = craft_raw_jwt(&json!({"alg": "RS256"}), &claims_for("u1", Role::Buyer, NOW));
    assert!(matches!(TokenDecoder::new().decode(&token), Err(AuthError::UnsupportedAlgorithm(_))));
}

// ===========================================================================
// 3. Signature forgery
// ===========================================================================

#[test]
fn test_wrong_secret_rejected() {
    let token = create_hs256_jwt(&claims_for("u1", Role::Admin, NOW), b"attacker-secret");
    assert_eq!(hs256_decoder().decode(&token).unwrap_err(), AuthError::InvalidSignature);
}

#[test]
fn test_tampered_payload_rejected() {
    let token = create_hs256_jwt(&claims_for("u1", Role::Buyer, NOW), TEST_SECRET);
    let mut parts: Vec<String> = token.split('.').map(str::to_owned).collect();
    parts[1] = URL_SAFE_NO_PAD
        .encode(serde_json::to_vec(&claims_for("u1", Role::SuperAdmin, NOW)).expect("json"));
    let forged = parts.join(".");

    assert_eq!(hs256_decoder().decode(&forged).unwrap_err(), AuthError::InvalidSignature);
}

#[test]
fn test_unsigned_token_rejected_when_key_configured() {
    let token = craft_raw_jwt(&json!({"alg": "HS256"}), &claims_for("u1", Role::Admin, NOW));
    assert!(hs256_decoder().decode(&token).is_err());
}

#[test]
fn test_eddsa_round_trip_and_foreign_key() {
    let (pkcs8_der, public_key_b64) = generate_test_keypair();
    let (_, other_public_key) = generate_test_keypair();
    let claims = claims_for("svc-1", Role::Service, NOW);
    let token = create_eddsa_jwt(&pkcs8_der, &claims);

    let good = TokenDecoder::new()
        .with_key(VerificationKey::Ed25519 { public_key: public_key_b64 })
        .expect("key");
    assert_eq!(good.decode(&token).expect("verifies").claims, claims);

    let foreign = TokenDecoder::new()
        .with_key(VerificationKey::Ed25519 { public_key: other_public_key })
        .expect("key");
    assert_eq!(foreign.decode(&token).unwrap_err(), AuthError::InvalidSignature);
}

// ===========================================================================
// 4. Expiry boundary with 1-second granularity
// ===========================================================================

#[test]
fn test_token_expired_one_second_ago() {
    let mut claims = claims_for("u1", Role::Buyer, NOW - 600);
    claims["exp"] = json!(NOW - 1);
    let token = hs256_decoder().decode(&create_hs256_jwt(&claims, TEST_SECRET)).expect("decodes");

    let result = validate_at(&token.claims, &test_policy(), now());
    assert!(!result.valid);
    assert_eq!(result.category(), Some(FailureCategory::Expired));
}

#[test]
fn test_token_valid_one_second_from_now() {
    let mut claims = claims_for("u1", Role::Buyer, NOW - 600);
    claims["exp"] = json!(NOW + 1);
    let result = validate_at(&claims, &test_policy(), now());
    assert!(result.valid, "Token expiring in 1 second must be accepted, got: {:?}", result.errors);
}

// ===========================================================================
// 5. Not-before and issued-at in the future
// ===========================================================================

#[test]
fn test_future_nbf_rejected() {
    let mut claims = claims_for("u1", Role::Buyer, NOW);
    claims["nbf"] = json!(NOW + 3600);
    claims["exp"] = json!(NOW + 7200);
    let result = validate_at(&claims, &test_policy(), now());
    assert!(matches!(result.errors.as_slice(), [ValidationError::NotYetValid { .. }]));
}

#[test]
fn test_future_iat_rejected() {
    let claims = claims_for("u1", Role::Buyer, NOW + 3600);
    let result = validate_at(&claims, &test_policy(), now());
    assert!(result.errors.iter().any(|e| matches!(e, ValidationError::IssuedInFuture { .. })));
}

// ===========================================================================
// 6. Issuer and audience trust
// ===========================================================================

#[test]
fn test_foreign_project_token_rejected() {
    let mut claims = claims_for("u1", Role::Admin, NOW);
    claims["iss"] = json!("https://other-project.auth.example.com/auth/v1");
    let result = validate_at(&claims, &test_policy(), now());
    assert_eq!(result.category(), Some(FailureCategory::UntrustedIssuerOrAudience));
}

#[test]
fn test_audience_mismatch_rejected() {
    let mut claims = claims_for("u1", Role::Admin, NOW);
    claims["aud"] = json!("storage");
    let result = validate_at(&claims, &test_policy(), now());
    assert_eq!(result.errors, vec![ValidationError::AudienceMismatch]);

    claims["aud"] = json!(["storage", TEST_AUDIENCE]);
    assert!(validate_at(&claims, &test_policy(), now()).valid);
}

// ===========================================================================
// 7. Role escalation on admin routes
// ===========================================================================

#[test]
fn test_admin_policy_rejects_non_admin_roles() {
    let policy = ValidationPolicy::admin().with_issuers([TEST_ISSUER]).with_audiences([TEST_AUDIENCE]);
    for role in [Role::Anonymous, Role::Buyer, Role::Seller, Role::Agent, Role::Service] {
        let result = validate_at(&claims_for("u1", role, NOW), &policy, now());
        assert_eq!(
            result.category(),
            Some(FailureCategory::RoleNotPermitted),
            "{role} must not pass the admin policy"
        );
    }
    for role in [Role::Admin, Role::SuperAdmin] {
        assert!(validate_at(&claims_for("u1", role, NOW), &policy, now()).valid);
    }
}

#[test]
fn test_admin_policy_rejects_stale_admin_token() {
    let policy = ValidationPolicy::admin();
    let claims = claims_for("admin-1", Role::Admin, NOW - 16 * 60);
    let result = validate_at(&claims, &policy, now());
    assert_eq!(result.category(), Some(FailureCategory::Expired));
}

#[test]
fn test_invented_role_rejected() {
    let mut claims = claims_for("u1", Role::Buyer, NOW);
    claims["role"] = json!("owner");
    let result = validate_at(&claims, &test_policy(), now());
    assert_eq!(result.category(), Some(FailureCategory::RoleNotPermitted));
    assert!(result.claims.is_none());
}

// ===========================================================================
// 8. Malformed structures
// ===========================================================================

#[test]
fn test_malformed_tokens_rejected() {
    let decoder = TokenDecoder::new();
    for raw in ["", "Bearer", "Bearer a.b", "Bearer a.b.c.d", "Bearer !!!.???.sig"] {
        let result = decoder.decode(raw);
        assert!(
            matches!(result, Err(AuthError::MissingToken | AuthError::InvalidTokenFormat(_))),
            "{raw:?} must be rejected, got: {result:?}"
        );
    }
}
