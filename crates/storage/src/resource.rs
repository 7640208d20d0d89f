//! Read-only access to the marketplace's resource rows for ownership checks.
//!
//! The relational store itself is an external collaborator. The pipeline only
//! ever asks one question of it: "does a row with this id exist in this table
//! with this owner column equal to this identity?". [`ResourceStore`] is that
//! question as a trait; [`MemoryResourceStore`] answers it from an in-process
//! table map for tests and local development.
//!
//! # Usage
//!
//! ```no_run
//! use estate_gate_storage::resource::{MemoryResourceStore, OwnershipQuery, ResourceStore};
//! use estate_gate_storage::{IdentityId, ResourceId};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemoryResourceStore::new();
//! store.insert_row("properties", "prop-1", [("seller_id", "seller-9")]);
//!
//! let resource_id = ResourceId::from("prop-1");
//! let owner_id = IdentityId::from("seller-9");
//! let query = OwnershipQuery {
//!     table: "properties",
//!     owner_column: "seller_id",
//!     resource_id: &resource_id,
//!     owner_id: &owner_id,
//! };
//! assert!(store.exists_owned(&query).await.unwrap());
//! # });
//! ```

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use fail::fail_point;
use parking_lot::RwLock;

use crate::{
    error::{StorageError, StorageResult},
    types::{IdentityId, ResourceId},
};

/// A single existence query filtered by resource id and owner column.
#[derive(Debug, Clone, Copy)]
pub struct OwnershipQuery<'a> {
    /// Table holding the resource rows (e.g. `properties`).
    pub table: &'a str,
    /// Column naming the owning identity (e.g. `seller_id`).
    pub owner_column: &'a str,
    /// Row identifier.
    pub resource_id: &'a ResourceId,
    /// Identity expected in `owner_column`.
    pub owner_id: &'a IdentityId,
}

/// Read-only resource lookups used by ownership verification.
///
/// Implementations must issue no writes to business data.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Returns `true` iff a row with `resource_id` exists in `table` and its
    /// `owner_column` equals `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the store cannot answer.
    async fn exists_owned(&self, query: &OwnershipQuery<'_>) -> StorageResult<bool>;
}

#[async_trait]
impl<S: ResourceStore + ?Sized> ResourceStore for Arc<S> {
    async fn exists_owned(&self, query: &OwnershipQuery<'_>) -> StorageResult<bool> {
        (**self).exists_owned(query).await
    }
}

type Row = HashMap<String, String>;

#[derive(Debug, Default)]
struct SimulatedFaults {
    unavailable: bool,
    latency: Option<Duration>,
}

/// In-memory [`ResourceStore`] keyed by table name and row id.
///
/// Cloning is cheap; clones share the same tables. Faults (unavailability,
/// added latency) can be injected to exercise fail-closed paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryResourceStore {
    tables: Arc<RwLock<HashMap<String, HashMap<ResourceId, Row>>>>,
    faults: Arc<RwLock<SimulatedFaults>>,
}

impl MemoryResourceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a row.
    pub fn insert_row<I, K, V>(&self, table: &str, resource_id: impl Into<ResourceId>, columns: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let row = columns.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self.tables.write().entry(table.to_owned()).or_default().insert(resource_id.into(), row);
    }

    /// Updates one column of an existing row. Returns `false` if the row is absent.
    pub fn set_column(
        &self,
        table: &str,
        resource_id: &ResourceId,
        column: &str,
        value: impl Into<String>,
    ) -> bool {
        let mut tables = self.tables.write();
        match tables.get_mut(table).and_then(|rows| rows.get_mut(resource_id)) {
            Some(row) => {
                row.insert(column.to_owned(), value.into());
                true
            },
            None => false,
        }
    }

    /// Removes a row. Returns `true` if it existed.
    pub fn remove_row(&self, table: &str, resource_id: &ResourceId) -> bool {
        self.tables.write().get_mut(table).is_some_and(|rows| rows.remove(resource_id).is_some())
    }

    /// Makes every subsequent lookup fail with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.write().unavailable = unavailable;
    }

    /// Delays every subsequent lookup by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.write().latency = latency;
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn exists_owned(&self, query: &OwnershipQuery<'_>) -> StorageResult<bool> {
        fail_point!("resource-store-lookup", |_| {
            Err(StorageError::connection("injected resource store failure"))
        });

        let (unavailable, latency) = {
            let faults = self.faults.read();
            (faults.unavailable, faults.latency)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if unavailable {
            return Err(StorageError::connection("resource store unavailable"));
        }

        let tables = self.tables.read();
        let owned = tables
            .get(query.table)
            .and_then(|rows| rows.get(query.resource_id))
            .and_then(|row| row.get(query.owner_column))
            .is_some_and(|owner| owner == query.owner_id.as_str());
        Ok(owned)
    }
}
