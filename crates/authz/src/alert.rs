//! Operational alerts.
//!
//! Some failures must reach an operator even though the caller only sees a
//! plain denial: the resource store timing out during an ownership check, or
//! an audit entry that could not be written after the handler already
//! succeeded. Components report them through an [`AlertSink`].
//!
//! [`TracingAlertSink`] (the default) emits each alert as an ERROR event with
//! an `alert` field so log pipelines can route it to paging.

use std::sync::Arc;

use serde::Serialize;
use tracing::error;

use crate::error::ErrorKind;

/// A failure that needs operator attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, bon::Builder)]
pub struct OperationalAlert {
    /// Taxonomy kind (`store_unavailable`, `audit_write_failed`).
    pub kind: ErrorKind,
    /// Component that raised it (`ownership`, `audit`, `rate_limit`).
    pub component: &'static str,
    /// Endpoint being served, when known.
    #[builder(into)]
    pub endpoint: Option<String>,
    /// Identity involved, when known.
    #[builder(into)]
    pub actor_id: Option<String>,
    /// Human-readable description of the failure.
    #[builder(into)]
    pub message: String,
}

/// Destination for operational alerts.
pub trait AlertSink: Send + Sync {
    /// Raises `alert`. Must not block.
    fn raise(&self, alert: &OperationalAlert);
}

impl<S: AlertSink + ?Sized> AlertSink for Arc<S> {
    fn raise(&self, alert: &OperationalAlert) {
        (**self).raise(alert);
    }
}

/// Emits alerts as `tracing` ERROR events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: &OperationalAlert) {
        error!(
            alert = %alert.kind,
            component = alert.component,
            endpoint = alert.endpoint.as_deref(),
            actor_id = alert.actor_id.as_deref(),
            "{}",
            alert.message,
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::testutil::RecordingAlertSink;

    fn sample() -> OperationalAlert {
        OperationalAlert::builder()
            .kind(ErrorKind::AuditWriteFailed)
            .component("audit")
            .endpoint("delete_property")
            .actor_id("seller-1")
            .message("audit store unreachable")
            .build()
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::fmt().with_test_writer().finish(),
        );
        TracingAlertSink.raise(&sample());
    }

    #[test]
    fn test_arc_sink_delegates() {
        let sink = Arc::new(RecordingAlertSink::default());
        let shared: Arc<dyn AlertSink> = sink.clone();
        shared.raise(&sample());
        assert_eq!(sink.alerts(), vec![sample()]);
    }

    #[test]
    fn test_alert_serializes() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["kind"], "audit_write_failed");
        assert_eq!(json["component"], "audit");
    }
}
