//! Role → permission mapping.
//!
//! A [`Permission`] is an opaque `action:resource` tag. A
//! [`RolePermissionSet`] is built once at process start and shared read-only
//! behind an [`Arc`]; cloning it is cheap and it is never mutated afterwards.
//!
//! The default marketplace mapping is cumulative:
//!
//! ```text
//! anon ⊂ authenticated (buyer) ⊂ seller ⊂ agent ⊂ admin ⊂ super_admin
//! service_role: separate machine-scoped set
//! ```

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use estate_gate_authn::Role;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AuthzError, Result};

/// An `action:resource` permission tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    /// A permission from a static tag. The tag is not checked.
    #[must_use]
    pub const fn from_static(tag: &'static str) -> Self {
        Self(Cow::Borrowed(tag))
    }

    /// Parses an `action:resource` tag.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidConfig`] unless the tag is exactly two
    /// non-empty, whitespace-free parts separated by `:`.
    pub fn parse(tag: &str) -> Result<Self> {
        let valid = match tag.split_once(':') {
            Some((action, resource)) => {
                !action.is_empty()
                    && !resource.is_empty()
                    && !resource.contains(':')
                    && !tag.chars().any(char::is_whitespace)
            },
            None => false,
        };
        if !valid {
            return Err(AuthzError::invalid_config(format!(
                "permission '{tag}' must have the form action:resource"
            )));
        }
        Ok(Self(Cow::Owned(tag.to_owned())))
    }

    /// The tag string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before `:`.
    #[must_use]
    pub fn action(&self) -> &str {
        self.0.split_once(':').map_or(&self.0, |(action, _)| action)
    }

    /// The part after `:`.
    #[must_use]
    pub fn resource(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, resource)| resource)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Permission::parse(&tag).map_err(serde::de::Error::custom)
    }
}

/// Permission tags used by the marketplace routes.
pub mod perm {
    use super::Permission;

    /// Browse published listings.
    pub const READ_PROPERTIES: Permission = Permission::from_static("read:properties");
    /// Send an inquiry about a listing.
    pub const CREATE_INQUIRIES: Permission = Permission::from_static("create:inquiries");
    /// Save and remove favorites.
    pub const MANAGE_FAVORITES: Permission = Permission::from_static("manage:favorites");
    /// Read one's own profile.
    pub const READ_PROFILE: Permission = Permission::from_static("read:profile");
    /// Edit one's own profile.
    pub const UPDATE_PROFILE: Permission = Permission::from_static("update:profile");
    /// Create a listing.
    pub const CREATE_PROPERTIES: Permission = Permission::from_static("create:properties");
    /// Edit a listing.
    pub const UPDATE_PROPERTIES: Permission = Permission::from_static("update:properties");
    /// Remove a listing.
    pub const DELETE_PROPERTIES: Permission = Permission::from_static("delete:properties");
    /// Read inquiries received.
    pub const READ_INQUIRIES: Permission = Permission::from_static("read:inquiries");
    /// Answer or close inquiries.
    pub const UPDATE_INQUIRIES: Permission = Permission::from_static("update:inquiries");
    /// Listing analytics.
    pub const READ_ANALYTICS: Permission = Permission::from_static("read:analytics");
    /// Schedule viewings.
    pub const MANAGE_APPOINTMENTS: Permission = Permission::from_static("manage:appointments");
    /// List users.
    pub const READ_USERS: Permission = Permission::from_static("read:users");
    /// Edit users.
    pub const WRITE_USERS: Permission = Permission::from_static("write:users");
    /// Delete users.
    pub const DELETE_USERS: Permission = Permission::from_static("delete:users");
    /// Approve listings for publication.
    pub const APPROVE_PROPERTIES: Permission = Permission::from_static("approve:properties");
    /// Read the audit trail.
    pub const READ_AUDIT_LOGS: Permission = Permission::from_static("read:audit_logs");
    /// Grant and revoke roles.
    pub const MANAGE_ROLES: Permission = Permission::from_static("manage:roles");
    /// Change marketplace settings.
    pub const MANAGE_SETTINGS: Permission = Permission::from_static("manage:settings");
}

/// Immutable role → permissions mapping.
///
/// Roles absent from the mapping have no permissions at all and are denied
/// by the authorizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePermissionSet {
    grants: Arc<HashMap<Role, HashSet<Permission>>>,
}

impl RolePermissionSet {
    /// Builds a mapping from explicit grants.
    pub fn new<I, P>(grants: I) -> Self
    where
        I: IntoIterator<Item = (Role, P)>,
        P: IntoIterator<Item = Permission>,
    {
        let grants =
            grants.into_iter().map(|(role, perms)| (role, perms.into_iter().collect())).collect();
        Self { grants: Arc::new(grants) }
    }

    /// The default marketplace mapping.
    #[must_use]
    pub fn marketplace_defaults() -> Self {
        use perm::*;

        let anonymous = vec![READ_PROPERTIES];

        let mut buyer = anonymous.clone();
        buyer.extend([CREATE_INQUIRIES, MANAGE_FAVORITES, READ_PROFILE, UPDATE_PROFILE]);

        let mut seller = buyer.clone();
        seller.extend([
            CREATE_PROPERTIES,
            UPDATE_PROPERTIES,
            DELETE_PROPERTIES,
            READ_INQUIRIES,
            UPDATE_INQUIRIES,
        ]);

        let mut agent = seller.clone();
        agent.extend([READ_ANALYTICS, MANAGE_APPOINTMENTS]);

        let mut admin = agent.clone();
        admin.extend([READ_USERS, WRITE_USERS, DELETE_USERS, APPROVE_PROPERTIES, READ_AUDIT_LOGS]);

        let mut super_admin = admin.clone();
        super_admin.extend([MANAGE_ROLES, MANAGE_SETTINGS]);

        let service = vec![READ_PROPERTIES, UPDATE_PROPERTIES, READ_INQUIRIES, READ_USERS];

        Self::new([
            (Role::Anonymous, anonymous),
            (Role::Buyer, buyer),
            (Role::Seller, seller),
            (Role::Agent, agent),
            (Role::Admin, admin),
            (Role::SuperAdmin, super_admin),
            (Role::Service, service),
        ])
    }

    /// Builds a mapping from configuration (`role name → [tags]`).
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidConfig`] for unknown role names or
    /// malformed permission tags.
    pub fn from_config(config: &HashMap<String, Vec<String>>) -> Result<Self> {
        let mut grants = HashMap::with_capacity(config.len());
        for (role_name, tags) in config {
            let role: Role = role_name
                .parse()
                .map_err(|e| AuthzError::invalid_config(format!("permission mapping: {e}")))?;
            let perms =
                tags.iter().map(|tag| Permission::parse(tag)).collect::<Result<HashSet<_>>>()?;
            grants.insert(role, perms);
        }
        Ok(Self { grants: Arc::new(grants) })
    }

    /// Permissions granted to `role`, or `None` if the role is unmapped.
    #[must_use]
    pub fn permissions_for(&self, role: Role) -> Option<&HashSet<Permission>> {
        self.grants.get(&role)
    }

    /// Returns `true` if `role` is mapped.
    #[must_use]
    pub fn is_mapped(&self, role: Role) -> bool {
        self.grants.contains_key(&role)
    }

    /// Returns `true` if `role` holds `permission`.
    #[must_use]
    pub fn grants(&self, role: Role, permission: &Permission) -> bool {
        self.grants.get(&role).is_some_and(|perms| perms.contains(permission))
    }
}

impl Default for RolePermissionSet {
    fn default() -> Self {
        Self::marketplace_defaults()
    }
}
