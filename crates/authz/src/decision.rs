//! The pipeline's answer to a request.

use estate_gate_authn::IdentityClaims;

use crate::error::ErrorKind;

/// Terminal decision for one request.
///
/// The route layer maps this to a response: `Allowed` runs the handler,
/// `Denied` answers with `status` and the kind's public message, `Error`
/// answers 5xx.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Every stage passed; carries the validated caller.
    Allowed(IdentityClaims),
    /// A stage refused the request.
    Denied {
        /// HTTP status for the response.
        status: u16,
        /// Why (internal; never shown beyond its public message).
        kind: ErrorKind,
    },
    /// The pipeline could not reach a decision.
    Error(ErrorKind),
}

impl Decision {
    /// A denial with the kind's standard status.
    #[must_use]
    pub fn denied(kind: ErrorKind) -> Self {
        Self::Denied { status: kind.http_status(), kind }
    }

    /// Returns `true` for [`Decision::Allowed`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }

    /// Validated claims, when allowed.
    #[must_use]
    pub fn claims(&self) -> Option<&IdentityClaims> {
        match self {
            Self::Allowed(claims) => Some(claims),
            _ => None,
        }
    }

    /// HTTP status for the response.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Allowed(_) => 200,
            Self::Denied { status, .. } => *status,
            Self::Error(kind) => kind.http_status(),
        }
    }

    /// The failure kind, if not allowed.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Allowed(_) => None,
            Self::Denied { kind, .. } | Self::Error(kind) => Some(*kind),
        }
    }

    /// Message safe to return to the caller.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        self.kind().map_or("OK", ErrorKind::public_message)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_uses_kind_status() {
        let decision = Decision::denied(ErrorKind::RateLimitExceeded);
        assert_eq!(decision, Decision::Denied { status: 429, kind: ErrorKind::RateLimitExceeded });
        assert_eq!(decision.status(), 429);
        assert!(!decision.is_allowed());
        assert!(decision.claims().is_none());
        assert_eq!(decision.public_message(), "Too many requests");
    }

    #[test]
    fn test_error_decision() {
        let decision = Decision::Error(ErrorKind::StoreUnavailable);
        assert_eq!(decision.status(), 503);
        assert_eq!(decision.kind(), Some(ErrorKind::StoreUnavailable));
    }
}
