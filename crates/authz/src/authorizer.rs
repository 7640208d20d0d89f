//! Permission checks.
//!
//! [`PermissionAuthorizer`] answers one question: does the caller's role hold
//! *every* required permission? It fails closed: a role missing from the
//! mapping is denied outright, whatever was required.
//!
//! Destructive self-targeting actions get an explicit extra check. An admin
//! may hold `delete:users`, yet deleting or demoting their own account is
//! always refused.

use std::fmt;

use estate_gate_authn::IdentityClaims;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::permissions::{Permission, RolePermissionSet};

/// Destructive actions that may target the caller's own account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfTargetingAction {
    /// Deleting a user account.
    DeleteUser,
    /// Lowering a user's role.
    DemoteUser,
}

impl fmt::Display for SelfTargetingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeleteUser => f.write_str("delete_user"),
            Self::DemoteUser => f.write_str("demote_user"),
        }
    }
}

/// Why the authorizer refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// The role has no entry in the permission mapping.
    UnmappedRole,
    /// Required permissions the role lacks.
    MissingPermissions(Vec<Permission>),
    /// An admin targeting their own account with a destructive action.
    SelfTargeting(SelfTargetingAction),
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnmappedRole => f.write_str("role is not mapped"),
            Self::MissingPermissions(missing) => {
                f.write_str("missing permissions:")?;
                for p in missing {
                    write!(f, " {p}")?;
                }
                Ok(())
            },
            Self::SelfTargeting(action) => write!(f, "{action} on own admin account"),
        }
    }
}

/// Result of [`PermissionAuthorizer::authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Set iff not allowed.
    pub reason: Option<DenialReason>,
}

impl AuthorizationDecision {
    fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    fn deny(reason: DenialReason) -> Self {
        Self { allowed: false, reason: Some(reason) }
    }
}

/// Role-based permission checks over a shared [`RolePermissionSet`].
///
/// Pure: no I/O and no mutable state. The caller audits the decision.
#[derive(Debug, Clone, Default)]
pub struct PermissionAuthorizer {
    permissions: RolePermissionSet,
}

impl PermissionAuthorizer {
    /// Creates an authorizer over `permissions`.
    #[must_use]
    pub fn new(permissions: RolePermissionSet) -> Self {
        Self { permissions }
    }

    /// The mapping this authorizer checks against.
    #[must_use]
    pub fn permissions(&self) -> &RolePermissionSet {
        &self.permissions
    }

    /// Allowed iff the caller's role is mapped and holds all of `required`.
    #[must_use]
    pub fn authorize(
        &self,
        claims: &IdentityClaims,
        required: &[Permission],
    ) -> AuthorizationDecision {
        let Some(granted) = self.permissions.permissions_for(claims.role) else {
            debug!(role = %claims.role, "role not mapped");
            return AuthorizationDecision::deny(DenialReason::UnmappedRole);
        };

        let missing: Vec<Permission> =
            required.iter().filter(|p| !granted.contains(*p)).cloned().collect();
        if missing.is_empty() {
            AuthorizationDecision::allow()
        } else {
            debug!(role = %claims.role, missing = ?missing, "permission check failed");
            AuthorizationDecision::deny(DenialReason::MissingPermissions(missing))
        }
    }

    /// Refuses `action` when an admin targets their own account.
    ///
    /// Evaluated in addition to [`authorize`](Self::authorize), never instead
    /// of it.
    #[must_use]
    pub fn check_self_targeting(
        &self,
        claims: &IdentityClaims,
        action: SelfTargetingAction,
        target_identity: &str,
    ) -> AuthorizationDecision {
        if claims.role.is_admin() && claims.is_subject(target_identity) {
            debug!(sub = %claims.sub, %action, "self-targeting admin action refused");
            return AuthorizationDecision::deny(DenialReason::SelfTargeting(action));
        }
        AuthorizationDecision::allow()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use estate_gate_authn::Role;

    use super::*;
    use crate::{permissions::perm, testutil::claims_with_role};

    #[test]
    fn test_agent_may_create_properties() {
        let authz = PermissionAuthorizer::default();
        let decision = authz.authorize(&claims_with_role("agent-1", Role::Agent), &[perm::CREATE_PROPERTIES]);
        assert!(decision.allowed);
        assert!(decision.reason.is_none());
    }

    #[test]
    fn test_agent_may_not_delete_users() {
        let authz = PermissionAuthorizer::default();
        let decision = authz.authorize(&claims_with_role("agent-1", Role::Agent), &[perm::DELETE_USERS]);
        assert!(!decision.allowed);
        assert_eq!(
            decision.reason,
            Some(DenialReason::MissingPermissions(vec![perm::DELETE_USERS]))
        );
    }

    #[test]
    fn test_all_required_permissions_must_be_held() {
        let authz = PermissionAuthorizer::default();
        let claims = claims_with_role("seller-1", Role::Seller);
        assert!(authz.authorize(&claims, &[perm::CREATE_PROPERTIES, perm::READ_INQUIRIES]).allowed);

        let decision = authz.authorize(
            &claims,
            &[perm::CREATE_PROPERTIES, perm::READ_ANALYTICS, perm::APPROVE_PROPERTIES],
        );
        assert_eq!(
            decision.reason,
            Some(DenialReason::MissingPermissions(vec![
                perm::READ_ANALYTICS,
                perm::APPROVE_PROPERTIES
            ]))
        );
    }

    #[test]
    fn test_empty_requirement_allows_mapped_roles() {
        let authz = PermissionAuthorizer::default();
        for role in Role::ALL {
            assert!(authz.authorize(&claims_with_role("u", role), &[]).allowed, "{role}");
        }
    }

    #[test]
    fn test_unmapped_role_denied_even_without_requirements() {
        let authz = PermissionAuthorizer::new(RolePermissionSet::new([(
            Role::Buyer,
            vec![perm::READ_PROPERTIES],
        )]));
        let decision = authz.authorize(&claims_with_role("a", Role::Admin), &[]);
        assert_eq!(decision.reason, Some(DenialReason::UnmappedRole));
    }

    #[test]
    fn test_self_protection() {
        let authz = PermissionAuthorizer::default();
        let admin = claims_with_role("admin-1", Role::Admin);
        assert!(authz.authorize(&admin, &[perm::DELETE_USERS]).allowed);

        for action in [SelfTargetingAction::DeleteUser, SelfTargetingAction::DemoteUser] {
            let decision = authz.check_self_targeting(&admin, action, "admin-1");
            assert_eq!(decision.reason, Some(DenialReason::SelfTargeting(action)));
            assert!(authz.check_self_targeting(&admin, action, "someone-else").allowed);
        }

        let super_admin = claims_with_role("root-1", Role::SuperAdmin);
        assert!(
            !authz
                .check_self_targeting(&super_admin, SelfTargetingAction::DemoteUser, "root-1")
                .allowed
        );
    }

    #[test]
    fn test_denial_reason_display() {
        let reason = DenialReason::MissingPermissions(vec![perm::DELETE_USERS, perm::READ_USERS]);
        assert_eq!(reason.to_string(), "missing permissions: delete:users read:users");
        assert_eq!(
            DenialReason::SelfTargeting(SelfTargetingAction::DeleteUser).to_string(),
            "delete_user on own admin account"
        );
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn all_permissions() -> Vec<Permission> {
            let mut all: Vec<Permission> = RolePermissionSet::marketplace_defaults()
                .permissions_for(Role::SuperAdmin)
                .into_iter()
                .flatten()
                .cloned()
                .collect();
            all.sort();
            all
        }

        proptest! {
            #[test]
            fn allowed_iff_every_requirement_is_granted(
                role in proptest::sample::select(Role::ALL.to_vec()),
                required in proptest::sample::subsequence(all_permissions(), 0..6),
            ) {
                let authz = PermissionAuthorizer::default();
                let granted = authz.permissions().permissions_for(role).unwrap();
                let expected = required.iter().all(|p| granted.contains(p));
                let decision = authz.authorize(&claims_with_role("u", role), &required);
                prop_assert_eq!(decision.allowed, expected);
                prop_assert_eq!(decision.reason.is_none(), expected);
            }
        }
    }
}
