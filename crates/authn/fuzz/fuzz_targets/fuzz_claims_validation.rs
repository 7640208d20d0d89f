//! Structured fuzz target for claims validation.
//!
//! Generates plausible token payloads with arbitrary field values and feeds
//! them to the validator under both policy presets. Checks the result
//! invariants: `claims` is present iff `valid`, and `valid` iff no errors.

#![no_main]

use arbitrary::Arbitrary;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use estate_gate_authn::{ValidationPolicy, jwt::TokenDecoder, validate_at};
use libfuzzer_sys::fuzz_target;
use serde_json::{Map, Value, json};

#[derive(Debug, Arbitrary)]
enum FuzzedValue {
    Missing,
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<String>),
}

impl FuzzedValue {
    fn into_json(self) -> Option<Value> {
        match self {
            Self::Missing => None,
            Self::Null => Some(Value::Null),
            Self::Bool(b) => Some(json!(b)),
            Self::Int(n) => Some(json!(n)),
            Self::Text(s) => Some(json!(s)),
            Self::List(items) => Some(json!(items)),
        }
    }
}

#[derive(Debug, Arbitrary)]
struct FuzzedClaims {
    alg: String,
    sub: FuzzedValue,
    iss: FuzzedValue,
    aud: FuzzedValue,
    iat: FuzzedValue,
    exp: FuzzedValue,
    nbf: FuzzedValue,
    role: FuzzedValue,
    amr: FuzzedValue,
    is_anonymous: FuzzedValue,
    now: i64,
}

fuzz_target!(|input: FuzzedClaims| {
    let FuzzedClaims { alg, sub, iss, aud, iat, exp, nbf, role, amr, is_anonymous, now } = input;

    let mut payload = Map::new();
    for (name, value) in [
        ("sub", sub),
        ("iss", iss),
        ("aud", aud),
        ("iat", iat),
        ("exp", exp),
        ("nbf", nbf),
        ("role", role),
        ("amr", amr),
        ("is_anonymous", is_anonymous),
    ] {
        if let Some(value) = value.into_json() {
            payload.insert(name.to_owned(), value);
        }
    }
    let payload = Value::Object(payload);

    let Some(now) = DateTime::<Utc>::from_timestamp(now, 0) else {
        return;
    };
    for policy in [ValidationPolicy::general(), ValidationPolicy::admin()] {
        let result = validate_at(&payload, &policy, now);
        assert_eq!(result.valid, result.claims.is_some());
        assert_eq!(result.valid, result.errors.is_empty());
    }

    let header = URL_SAFE_NO_PAD.encode(json!({ "alg": alg }).to_string());
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    let _ = TokenDecoder::new().decode(&format!("Bearer {header}.{body}."));
});
