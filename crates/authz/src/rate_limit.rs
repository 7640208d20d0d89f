//! Fixed-window rate limiting.
//!
//! The limiter is a thin policy layer over an injected [`WindowStore`]: the
//! store counts, the limiter compares the count with the rule and computes
//! `remaining` and `retry_after`.
//!
//! Keys combine the caller with the endpoint so that limits are independent
//! per route:
//!
//! | caller | key |
//! |--------|-----|
//! | token with a verified signature and a subject | `sub:<subject>\|<endpoint>` |
//! | otherwise, known address | `ip:<addr>\|<endpoint>` |
//! | neither | `anonymous\|<endpoint>` |
//!
//! The subject only keys a window once the token's signature has been
//! checked. Unsigned or forged tokens fall back to the caller's address, so
//! they can neither fill another identity's window nor spread across fresh
//! ones.
//!
//! A window store failure or timeout is raised as a `store_unavailable`
//! [`OperationalAlert`] and returned as an error; the pipeline denies the
//! request.

use std::{
    fmt,
    net::IpAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use estate_gate_storage::WindowStore;
use tracing::{debug, instrument};

use crate::{
    alert::{AlertSink, OperationalAlert, TracingAlertSink},
    config::RateLimitRule,
    error::{AuthzError, ErrorKind, Result},
};

/// Default bound on a single window-store call.
pub const DEFAULT_RATE_LIMIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Builds the window key for a caller and endpoint.
#[must_use]
pub fn rate_limit_key(subject: Option<&str>, ip: Option<IpAddr>, endpoint: &str) -> String {
    match (subject.filter(|s| !s.is_empty()), ip) {
        (Some(sub), _) => format!("sub:{sub}|{endpoint}"),
        (None, Some(ip)) => format!("ip:{ip}|{endpoint}"),
        (None, None) => format!("anonymous|{endpoint}"),
    }
}

/// Result of one [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests seen in the current window, including this one.
    pub current_count: u64,
    /// Requests still allowed in the current window.
    pub remaining: u64,
    /// Time until the window resets; set iff denied.
    pub retry_after: Option<Duration>,
}

/// Metrics tracked by the rate limiter.
#[derive(Debug, Default)]
struct RateLimitMetrics {
    allowed: AtomicU64,
    rejected: AtomicU64,
}

/// A point-in-time snapshot of rate limiter metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitMetricsSnapshot {
    /// Requests that were allowed.
    pub allowed: u64,
    /// Requests that were rejected.
    pub rejected: u64,
}

/// Fixed-window limiter over a shared [`WindowStore`].
///
/// Clones share the store and the metrics.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    timeout: Duration,
    alerts: Arc<dyn AlertSink>,
    metrics: Arc<RateLimitMetrics>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("timeout", &self.timeout)
            .field("metrics", &self.metrics_snapshot())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Creates a limiter over `store` with the default timeout and tracing
    /// alerts.
    #[must_use]
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_RATE_LIMIT_TIMEOUT,
            alerts: Arc::new(TracingAlertSink),
            metrics: Arc::default(),
        }
    }

    /// Sets the store call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the alert destination.
    #[must_use]
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Records one request for `key` now and applies `rule`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::StoreUnavailable`] if the window store fails or
    /// times out.
    pub async fn check(&self, key: &str, rule: &RateLimitRule) -> Result<RateLimitDecision> {
        self.check_at(key, rule, Utc::now()).await
    }

    /// Records one request for `key` at `now` and applies `rule`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::StoreUnavailable`] if the window store fails or
    /// times out. The failure has already been alerted.
    #[instrument(skip(self, rule, now), fields(max = rule.max_requests))]
    pub async fn check_at(
        &self,
        key: &str,
        rule: &RateLimitRule,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision> {
        let hit = match tokio::time::timeout(self.timeout, self.store.hit(key, rule.window, now))
            .await
        {
            Ok(Ok(snapshot)) => Ok(snapshot),
            Ok(Err(err)) => Err(AuthzError::store("rate_limit", err)),
            Err(_) => Err(AuthzError::store_timeout("rate_limit", self.timeout)),
        };
        let snapshot = match hit {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.alerts.raise(
                    &OperationalAlert::builder()
                        .kind(ErrorKind::StoreUnavailable)
                        .component("rate_limit")
                        .message(format!("window store hit for {key}: {err}"))
                        .build(),
                );
                return Err(err);
            },
        };

        let allowed = snapshot.count <= rule.max_requests;
        let decision = RateLimitDecision {
            allowed,
            current_count: snapshot.count,
            remaining: rule.max_requests.saturating_sub(snapshot.count),
            retry_after: (!allowed).then(|| snapshot.remaining_in_window(rule.window, now)),
        };

        if allowed {
            self.metrics.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(count = snapshot.count, retry_after = ?decision.retry_after, "rate limit exceeded");
        }
        Ok(decision)
    }

    /// Returns a snapshot of limiter metrics.
    #[must_use]
    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            allowed: self.metrics.allowed.load(Ordering::Relaxed),
            rejected: self.metrics.rejected.load(Ordering::Relaxed),
        }
    }
}
