use serde::Serialize;
use thiserror::Error;

use crate::permissions::{Permission, PermissionSet};
use crate::roles::Role;
use crate::user::User;

/// A fully resolved principal for authorization decisions.
///
/// Construction of this object is decoupled from storage: the caller fetches
/// the user's roles and folds them with [`effective_permissions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user: User,
    pub permissions: PermissionSet,
}

impl Principal {
    pub fn new<'a>(user: User, roles: impl IntoIterator<Item = &'a Role>) -> Self {
        Self {
            permissions: effective_permissions(roles),
            user,
        }
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn require(&self, required: &[Permission]) -> Result<(), PermissionError> {
        require_permissions(&self.permissions, required.iter().copied())
    }
}

/// Missing-permission failure; lists every lacking permission, not just the first.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[error("forbidden: missing permissions [{}]", join(.missing))]
pub struct PermissionError {
    pub missing: PermissionSet,
}

fn join(set: &PermissionSet) -> String {
    set.iter().map(Permission::as_str).collect::<Vec<_>>().join(", ")
}

/// Command-side authorization contract (checked at the command boundary).
///
/// Implement this on commands that require global permissions. Services
/// enforce these requirements before touching the store.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &'static [Permission];
}

/// Union of the permission sets of every given role.
///
/// Order-independent; duplicates collapse through set semantics.
pub fn effective_permissions<'a>(roles: impl IntoIterator<Item = &'a Role>) -> PermissionSet {
    roles
        .into_iter()
        .flat_map(|role| role.permissions.iter().copied())
        .collect()
}

/// Check that `held` covers every permission in `required`.
pub fn require_permissions(
    held: &PermissionSet,
    required: impl IntoIterator<Item = Permission>,
) -> Result<(), PermissionError> {
    let missing: PermissionSet = required
        .into_iter()
        .filter(|p| !held.contains(p))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(PermissionError { missing })
    }
}

/// Authorize a principal for a command.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize<C: CommandAuthorization + ?Sized>(
    principal: &Principal,
    command: &C,
) -> Result<(), PermissionError> {
    principal.require(command.required_permissions())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;

    use portal_core::{RoleId, UserId};

    use super::*;
    use crate::roles::NewRole;

    fn role(id: i64, perms: impl IntoIterator<Item = Permission>) -> Role {
        Role {
            id: RoleId::new(id),
            name: format!("role-{id}"),
            description: None,
            permissions: perms.into_iter().collect(),
        }
    }

    fn user(role_ids: &[i64]) -> User {
        User {
            id: UserId::new(1),
            username: "bob".to_string(),
            email: "bob@acme.test".to_string(),
            full_name: None,
            password_hash: String::new(),
            is_active: true,
            organization_id: None,
            role_ids: role_ids.iter().map(|r| RoleId::new(*r)).collect(),
        }
    }

    #[test]
    fn no_roles_means_no_permissions() {
        let principal = Principal::new(user(&[]), []);
        assert!(principal.permissions.is_empty());
        assert!(!principal.has(Permission::ManageFiles));
    }

    #[test]
    fn require_lists_every_missing_permission() {
        let held: PermissionSet = [Permission::ManageUsers].into_iter().collect();
        let err = require_permissions(
            &held,
            [Permission::ManageUsers, Permission::ManageRoles, Permission::ViewAuditLogs],
        )
        .unwrap_err();

        let expected: PermissionSet = [Permission::ManageRoles, Permission::ViewAuditLogs]
            .into_iter()
            .collect();
        assert_eq!(err.missing, expected);
        assert_eq!(
            err.to_string(),
            "forbidden: missing permissions [manage:roles, view:audit_logs]"
        );
    }

    #[test]
    fn require_nothing_always_passes() {
        assert!(require_permissions(&PermissionSet::new(), []).is_ok());
    }

    #[test]
    fn authorize_uses_command_requirements() {
        let cmd = NewRole {
            name: "x".to_string(),
            description: None,
            permissions: PermissionSet::new(),
        };
        let admin = Principal::new(user(&[1]), [&role(1, Permission::ALL)]);
        let member = Principal::new(user(&[2]), [&role(2, [])]);

        assert!(authorize(&admin, &cmd).is_ok());
        assert!(authorize(&member, &cmd).is_err());
    }

    fn perm_strategy() -> impl Strategy<Value = BTreeSet<Permission>> {
        prop::collection::btree_set(prop::sample::select(Permission::ALL.to_vec()), 0..=6)
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: effective permissions of {R1, R2} equal the set union of
        /// their permissions, independent of assignment order.
        #[test]
        fn effective_permissions_is_order_independent_union(
            a in perm_strategy(),
            b in perm_strategy(),
        ) {
            let r1 = role(1, a.iter().copied());
            let r2 = role(2, b.iter().copied());

            let forward = effective_permissions([&r1, &r2]);
            let backward = effective_permissions([&r2, &r1]);
            let union: PermissionSet = a.union(&b).copied().collect();

            prop_assert_eq!(&forward, &union);
            prop_assert_eq!(&backward, &union);
        }

        /// Property: `require_permissions` fails exactly on required \ held.
        #[test]
        fn missing_is_set_difference(held in perm_strategy(), required in perm_strategy()) {
            let result = require_permissions(&held, required.iter().copied());
            let diff: PermissionSet = required.difference(&held).copied().collect();
            match result {
                Ok(()) => prop_assert!(diff.is_empty()),
                Err(e) => prop_assert_eq!(e.missing, diff),
            }
        }
    }
}
