use portal_auth::{
    CommandAuthorization, PermissionSet, Principal, User, authorize, effective_permissions,
};

use crate::error::PortalResult;
use crate::store::SharedStore;

/// Computes effective permissions from role memberships.
///
/// Missing permissions are reported by [`Principal::require`] once the
/// principal is resolved here.
pub struct PermissionResolver {
    store: SharedStore,
}

impl PermissionResolver {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Union over the user's roles. Role ids that no longer resolve add nothing.
    pub async fn effective_permissions(&self, user: &User) -> PortalResult<PermissionSet> {
        let roles = self.store.roles_by_ids(&user.role_ids).await?;
        Ok(effective_permissions(&roles))
    }

    /// User plus its effective permission set.
    pub async fn principal(&self, user: User) -> PortalResult<Principal> {
        let permissions = self.effective_permissions(&user).await?;
        Ok(Principal { user, permissions })
    }
}

/// Check a command's global permission requirements against a resolved principal.
pub fn authorize_command<C: CommandAuthorization + ?Sized>(
    principal: &Principal,
    command: &C,
) -> PortalResult<()> {
    authorize(principal, command).map_err(|e| {
        tracing::debug!(user = %principal.user.username, missing = %e, "command denied");
        e.into()
    })
}
