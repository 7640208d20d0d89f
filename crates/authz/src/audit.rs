//! Audit recording.
//!
//! [`AuditRecorder`] appends one [`AuditLogEntry`] per call to an injected
//! [`AuditStore`]. Each append is bounded by a timeout. A failed or timed-out
//! append is returned to the caller as [`AuthzError::AuditWriteFailed`],
//! raised as an `audit_write_failed` alert, and counted; the recorder never
//! retries and never waits past its timeout.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use estate_gate_storage::{AuditLogEntry, AuditOutcome, AuditStore, LogId, ResourceId};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::{
    alert::{AlertSink, OperationalAlert, TracingAlertSink},
    error::{AuthzError, ErrorKind, Result},
};

/// Default bound on a single audit append.
pub const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Action name recorded for requests rejected by the rate limiter.
pub const RATE_LIMITED_ACTION: &str = "rate_limited";

#[derive(Debug, Default)]
struct AuditMetrics {
    written: AtomicU64,
    failed: AtomicU64,
}

/// A point-in-time snapshot of audit recorder metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuditMetricsSnapshot {
    /// Entries the store acknowledged.
    pub written: u64,
    /// Appends that failed or timed out.
    pub failed: u64,
}

/// Writes audit entries with a bounded wait.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    timeout: Duration,
    alerts: Arc<dyn AlertSink>,
    metrics: Arc<AuditMetrics>,
}

impl fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("timeout", &self.timeout)
            .field("metrics", &self.metrics_snapshot())
            .finish_non_exhaustive()
    }
}

impl AuditRecorder {
    /// Creates a recorder with the default timeout and tracing alerts.
    #[must_use]
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            timeout: DEFAULT_AUDIT_TIMEOUT,
            alerts: Arc::new(TracingAlertSink),
            metrics: Arc::default(),
        }
    }

    /// Sets the append timeout.
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

    /// Records a completed action by `actor_id` on a resource, timestamped now.
    ///
    /// `metadata` carries the before/after values or request parameters.
    ///
    /// # Errors
    ///
    /// See [`record`](Self::record).
    pub async fn record_action(
        &self,
        actor_id: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: Option<ResourceId>,
        metadata: Value,
    ) -> Result<LogId> {
        let entry = AuditLogEntry::builder()
            .actor_id(actor_id.into())
            .action(action.into())
            .resource_type(resource_type.into())
            .maybe_resource_id(resource_id)
            .metadata(metadata)
            .outcome(AuditOutcome::Completed)
            .build();
        self.record(entry).await
    }

    /// Appends `entry` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::AuditWriteFailed`] if the store fails or does not
    /// answer within the timeout. The failure has already been alerted and
    /// counted when this returns.
    #[instrument(
        skip(self, entry),
        fields(actor = %entry.actor_id, action = %entry.action, outcome = %entry.outcome)
    )]
    pub async fn record(&self, entry: AuditLogEntry) -> Result<LogId> {
        let actor_id = entry.actor_id.clone();
        let action = entry.action.clone();

        let result = match tokio::time::timeout(self.timeout, self.store.append(entry)).await {
            Ok(Ok(id)) => Ok(id),
            Ok(Err(err)) => Err(AuthzError::audit(err)),
            Err(_) => Err(AuthzError::audit_timeout(self.timeout)),
        };

        match &result {
            Ok(id) => {
                self.metrics.written.fetch_add(1, Ordering::Relaxed);
                debug!(log_id = %id, "audit entry written");
            },
            Err(err) => {
                self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                self.alerts.raise(
                    &OperationalAlert::builder()
                        .kind(ErrorKind::AuditWriteFailed)
                        .component("audit")
                        .endpoint(action)
                        .actor_id(actor_id)
                        .message(err.to_string())
                        .build(),
                );
            },
        }
        result
    }

    /// Returns a snapshot of recorder metrics.
    #[must_use]
    pub fn metrics_snapshot(&self) -> AuditMetricsSnapshot {
        AuditMetricsSnapshot {
            written: self.metrics.written.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
        }
    }
}
