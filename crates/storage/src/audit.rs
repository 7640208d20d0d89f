//! Append-only audit trail for privileged decisions and mutations.
//!
//! Compliance requires recording who did what to which resource, when, and
//! how it ended. Entries are written once and never updated or deleted: the
//! [`AuditStore`] trait deliberately exposes nothing but
//! [`append`](AuditStore::append).
//!
//! # Architecture
//!
//! - [`MemoryAuditStore`]: In-process append-only log, used in tests and for local development.
//! - [`TracingAuditStore`]: Emits structured `tracing` events at INFO level, suitable for log
//!   aggregation and SIEM integration.
//! - Production deployments implement [`AuditStore`] over the hosted database's audit table.
//!
//! # Usage
//!
//! ```no_run
//! use estate_gate_storage::audit::{AuditLogEntry, AuditOutcome, AuditStore, MemoryAuditStore};
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemoryAuditStore::new();
//! let entry = AuditLogEntry::builder()
//!     .actor_id("admin-1")
//!     .action("approve_property")
//!     .resource_type("property")
//!     .resource_id("prop-42")
//!     .outcome(AuditOutcome::Completed)
//!     .metadata(json!({ "before": { "status": "pending" }, "after": { "status": "approved" } }))
//!     .build();
//! let id = store.append(entry).await.unwrap();
//! assert_eq!(store.len(), 1);
//! # let _ = id;
//! # });
//! ```

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fail::fail_point;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    error::{StorageError, StorageResult},
    types::{LogId, ResourceId},
};

/// How an audited request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// The privileged action ran to completion.
    Completed,
    /// The pipeline refused the request.
    Denied,
    /// The action failed after authorization.
    Error,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Denied => write!(f, "denied"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Immutable audit record.
///
/// `metadata` must carry everything needed to reconstruct the change later
/// (before/after values, request parameters); nothing is referenced by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
pub struct AuditLogEntry {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Identity that performed the action, or the rate-limit key for callers
    /// rejected before their identity was established.
    #[builder(into)]
    pub actor_id: String,
    /// Action name (e.g. `delete_property`, `rate_limited`).
    #[builder(into)]
    pub action: String,
    /// Resource type (e.g. `property`), or the endpoint for route-level events.
    #[builder(into)]
    pub resource_type: String,
    /// Specific resource row, when the action targets one.
    #[builder(into)]
    pub resource_id: Option<ResourceId>,
    /// Structured context: before/after values or request parameters.
    #[builder(default = serde_json::Value::Object(serde_json::Map::new()))]
    pub metadata: serde_json::Value,
    /// How the request ended.
    pub outcome: AuditOutcome,
}

/// Append-only audit backend.
///
/// There is intentionally no update or delete operation.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Appends one entry and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the entry could not be durably written.
    /// Implementations must not report success for an entry they dropped.
    async fn append(&self, entry: AuditLogEntry) -> StorageResult<LogId>;
}

#[async_trait]
impl<S: AuditStore + ?Sized> AuditStore for Arc<S> {
    async fn append(&self, entry: AuditLogEntry) -> StorageResult<LogId> {
        (**self).append(entry).await
    }
}

#[derive(Debug, Default)]
struct SimulatedFaults {
    unavailable: bool,
    latency: Option<Duration>,
}

/// In-memory append-only audit log.
///
/// Clones share the same log. An optional capacity bound rejects appends
/// once reached rather than discarding older entries.
#[derive(Debug, Clone)]
pub struct MemoryAuditStore {
    entries: Arc<RwLock<Vec<(LogId, AuditLogEntry)>>>,
    next_id: Arc<AtomicI64>,
    capacity: Option<usize>,
    faults: Arc<RwLock<SimulatedFaults>>,
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditStore {
    /// Creates an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicI64::new(1)),
            capacity: None,
            faults: Arc::new(RwLock::new(SimulatedFaults::default())),
        }
    }

    /// Creates a store that refuses appends beyond `capacity` entries.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity: Some(capacity), ..Self::new() }
    }

    /// Returns a copy of every entry in append order.
    #[must_use]
    pub fn entries(&self) -> Vec<(LogId, AuditLogEntry)> {
        self.entries.read().clone()
    }

    /// Returns every entry recorded for `actor_id`, in append order.
    #[must_use]
    pub fn entries_for_actor(&self, actor_id: &str) -> Vec<AuditLogEntry> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.actor_id == actor_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Number of entries appended so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Makes every subsequent append fail with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.write().unavailable = unavailable;
    }

    /// Delays every subsequent append by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.write().latency = latency;
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entry: AuditLogEntry) -> StorageResult<LogId> {
        fail_point!("audit-store-append", |_| {
            Err(StorageError::connection("injected audit store failure"))
        });

        let (unavailable, latency) = {
            let faults = self.faults.read();
            (faults.unavailable, faults.latency)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if unavailable {
            return Err(StorageError::connection("audit store unavailable"));
        }

        let mut entries = self.entries.write();
        if let Some(limit) = self.capacity
            && entries.len() >= limit
        {
            return Err(StorageError::capacity_exceeded(limit));
        }
        let id = LogId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
        entries.push((id, entry));
        Ok(id)
    }
}

/// Audit store that emits structured `tracing` events.
///
/// Field mapping:
/// - `audit.id`: assigned log id
/// - `audit.timestamp`: RFC 3339 timestamp
/// - `audit.actor`: who performed the action
/// - `audit.action`: the operation
/// - `audit.resource_type` / `audit.resource_id`: what was affected
/// - `audit.outcome`: "completed", "denied" or "error"
/// - `audit.metadata`: JSON-encoded context
#[derive(Debug, Default)]
pub struct TracingAuditStore {
    next_id: AtomicI64,
}

impl TracingAuditStore {
    /// Creates a tracing-backed store.
    #[must_use]
    pub fn new() -> Self {
        Self { next_id: AtomicI64::new(1) }
    }
}

#[async_trait]
impl AuditStore for TracingAuditStore {
    async fn append(&self, entry: AuditLogEntry) -> StorageResult<LogId> {
        let metadata = serde_json::to_string(&entry.metadata)?;
        let id = LogId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
        let resource_id = entry.resource_id.as_ref().map(ResourceId::as_str).unwrap_or("");

        tracing::info!(
            audit.id = %id,
            audit.timestamp = %entry.timestamp.to_rfc3339(),
            audit.actor = %entry.actor_id,
            audit.action = %entry.action,
            audit.resource_type = %entry.resource_type,
            audit.resource_id = %resource_id,
            audit.outcome = %entry.outcome,
            audit.metadata = %metadata,
            "audit_event"
        );
        Ok(id)
    }
}
