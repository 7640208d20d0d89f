//! Ownership verification.
//!
//! Before a mutation touches a specific row, the pipeline confirms the caller
//! owns it with one existence query: "a row with this id whose owner column
//! equals the caller". The answer is a plain `bool`:
//!
//! - missing row and someone else's row are indistinguishable (`false`)
//! - a store error or timeout is also `false`, and additionally raises a
//!   `store_unavailable` [`OperationalAlert`]
//!
//! Results are never cached; every request asks again.

use std::{fmt, sync::Arc, time::Duration};

use estate_gate_storage::{IdentityId, OwnershipQuery, ResourceId, ResourceStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::{
    alert::{AlertSink, OperationalAlert, TracingAlertSink},
    error::{AuthzError, ErrorKind},
};

/// Default bound on a single ownership lookup.
pub const DEFAULT_OWNERSHIP_TIMEOUT: Duration = Duration::from_secs(2);

/// Resource types that carry an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// A property listing, owned by its seller.
    Property,
    /// An inquiry, owned by the seller it was sent to.
    Inquiry,
    /// A viewing appointment, owned by the agent running it.
    Appointment,
    /// A saved favorite, owned by the user who saved it.
    Favorite,
    /// An agent's public profile, owned by that agent.
    AgentProfile,
}

impl ResourceType {
    /// Table holding rows of this type.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Property => "properties",
            Self::Inquiry => "inquiries",
            Self::Appointment => "appointments",
            Self::Favorite => "favorites",
            Self::AgentProfile => "agent_profiles",
        }
    }

    /// Column naming the owning identity.
    #[must_use]
    pub const fn owner_column(self) -> &'static str {
        match self {
            Self::Property | Self::Inquiry => "seller_id",
            Self::Appointment => "agent_id",
            Self::Favorite | Self::AgentProfile => "user_id",
        }
    }

    /// Singular name used in audit entries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Property => "property",
            Self::Inquiry => "inquiry",
            Self::Appointment => "appointment",
            Self::Favorite => "favorite",
            Self::AgentProfile => "agent_profile",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks that an identity owns a resource row.
#[derive(Clone)]
pub struct OwnershipVerifier {
    store: Arc<dyn ResourceStore>,
    timeout: Duration,
    alerts: Arc<dyn AlertSink>,
}

impl fmt::Debug for OwnershipVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnershipVerifier").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}

impl OwnershipVerifier {
    /// Creates a verifier with the default timeout and tracing alerts.
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store, timeout: DEFAULT_OWNERSHIP_TIMEOUT, alerts: Arc::new(TracingAlertSink) }
    }

    /// Sets the lookup timeout.
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

    /// Returns `true` iff `resource_id` exists and is owned by `identity_id`.
    ///
    /// Never fails: lookup errors are reported as alerts and answered with
    /// `false`.
    #[instrument(skip(self, resource_type), fields(resource_type = %resource_type))]
    pub async fn verify_ownership(
        &self,
        identity_id: &IdentityId,
        resource_type: ResourceType,
        resource_id: &ResourceId,
    ) -> bool {
        match self.lookup(identity_id, resource_type, resource_id).await {
            Ok(owned) => {
                debug!(owned, "ownership lookup complete");
                owned
            },
            Err(err) => {
                self.alerts.raise(
                    &OperationalAlert::builder()
                        .kind(ErrorKind::StoreUnavailable)
                        .component("ownership")
                        .actor_id(identity_id.as_str())
                        .message(format!("ownership lookup on {}: {err}", resource_type.table()))
                        .build(),
                );
                false
            },
        }
    }

    async fn lookup(
        &self,
        identity_id: &IdentityId,
        resource_type: ResourceType,
        resource_id: &ResourceId,
    ) -> Result<bool, AuthzError> {
        let query = OwnershipQuery {
            table: resource_type.table(),
            owner_column: resource_type.owner_column(),
            resource_id,
            owner_id: identity_id,
        };
        match tokio::time::timeout(self.timeout, self.store.exists_owned(&query)).await {
            Ok(Ok(owned)) => Ok(owned),
            Ok(Err(err)) => Err(AuthzError::store("resource", err)),
            Err(_) => Err(AuthzError::store_timeout("resource", self.timeout)),
        }
    }
}
