//! JWT algorithm validation.
//!
//! Tokens from the hosted backend are signed with its project secret
//! (`HS256`); service-issued tokens use Ed25519 (`EdDSA`). Deployments choose
//! which of those they accept. `none` is rejected unconditionally, whatever
//! the configured list says.

use std::str::FromStr;

use jsonwebtoken::Algorithm;

use crate::error::AuthError;

/// Algorithms that are never accepted.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none"];

/// Algorithms accepted when no explicit list is configured.
pub const DEFAULT_ACCEPTED_ALGORITHMS: &[&str] = &["HS256", "EdDSA"];

/// Validate a JWT header algorithm against the accepted list.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if:
/// - Algorithm is `none` (in any letter case)
/// - Algorithm is not in `accepted`
///
/// # Examples
///
/// ```
/// use estate_gate_authn::validation::validate_algorithm;
///
/// let accepted = vec!["HS256".to_owned()];
/// assert!(validate_algorithm("HS256", &accepted).is_ok());
/// assert!(validate_algorithm("RS256", &accepted).is_err());
/// assert!(validate_algorithm("none", &accepted).is_err());
/// ```
pub fn validate_algorithm(alg: &str, accepted: &[String]) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|f| f.eq_ignore_ascii_case(alg)) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !accepted.iter().any(|a| a == alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not in accepted list"
        )));
    }

    Ok(())
}

/// Parses an accepted algorithm name into a [`jsonwebtoken::Algorithm`].
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] for names `jsonwebtoken` does
/// not know.
pub fn parse_algorithm(alg: &str) -> Result<Algorithm, AuthError> {
    Algorithm::from_str(alg)
        .map_err(|_| AuthError::unsupported_algorithm(format!("Unknown algorithm '{alg}'")))
}

/// The default accepted list as owned strings.
#[must_use]
pub fn default_accepted_algorithms() -> Vec<String> {
    DEFAULT_ACCEPTED_ALGORITHMS.iter().map(|a| (*a).to_owned()).collect()
}
