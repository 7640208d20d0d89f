//! Fuzz target for bearer token decoding.
//!
//! Feeds arbitrary strings as `Authorization` values through extraction,
//! header/payload decoding and claims validation. Every result must be
//! either `Ok(...)` or `Err(AuthError)`; a panic is a bug.

#![no_main]

use estate_gate_authn::{
    ValidationPolicy,
    jwt::{TokenDecoder, decode_jwt_header},
    validate,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    let _ = decode_jwt_header(raw);

    if let Ok(token) = TokenDecoder::new().decode(raw) {
        let _ = token.subject();
        let _ = validate(&token.claims, &ValidationPolicy::general());
        let _ = validate(&token.claims, &ValidationPolicy::admin());
    }
});
