//! Decision counters for the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    audit::AuditMetricsSnapshot, decision::Decision, rate_limit::RateLimitMetricsSnapshot,
};

/// Counters shared by every route bound from one [`Gatekeeper`](crate::Gatekeeper).
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    allowed: AtomicU64,
    denied: AtomicU64,
    errors: AtomicU64,
}

impl PipelineMetrics {
    /// Counts one terminal decision.
    pub fn record(&self, decision: &Decision) {
        let counter = match decision {
            Decision::Allowed(_) => &self.allowed,
            Decision::Denied { .. } => &self.denied,
            Decision::Error(_) => &self.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current decision counts.
    #[must_use]
    pub fn snapshot(&self) -> DecisionCounts {
        DecisionCounts {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Decision counts at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionCounts {
    /// Requests that reached the handler.
    pub allowed: u64,
    /// Requests refused by a stage.
    pub denied: u64,
    /// Requests no decision could be reached for.
    pub errors: u64,
}

/// Combined pipeline metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineMetricsSnapshot {
    /// Terminal decisions.
    pub decisions: DecisionCounts,
    /// Rate limiter counters.
    pub rate_limit: RateLimitMetricsSnapshot,
    /// Audit recorder counters.
    pub audit: AuditMetricsSnapshot,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use estate_gate_authn::Role;

    use super::*;
    use crate::{error::ErrorKind, testutil::claims_with_role};

    #[test]
    fn test_counts_by_variant() {
        let metrics = PipelineMetrics::default();
        metrics.record(&Decision::Allowed(claims_with_role("u", Role::Buyer)));
        metrics.record(&Decision::denied(ErrorKind::PermissionDenied));
        metrics.record(&Decision::denied(ErrorKind::RateLimitExceeded));
        metrics.record(&Decision::Error(ErrorKind::StoreUnavailable));

        assert_eq!(metrics.snapshot(), DecisionCounts { allowed: 1, denied: 2, errors: 1 });
    }
}
