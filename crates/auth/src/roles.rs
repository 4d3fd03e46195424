use serde::{Deserialize, Serialize};

use portal_core::{DomainError, DomainResult, Entity, RoleId};

use crate::authorize::CommandAuthorization;
use crate::permissions::{Permission, PermissionSet};

/// Name of the bootstrap role holding every permission.
pub const ADMINISTRATOR_ROLE: &str = "administrator";

/// Name of the bootstrap role for regular organization users.
pub const MEMBER_ROLE: &str = "member";

/// Named bundle of permissions assignable to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub permissions: PermissionSet,
}

impl Entity for Role {
    type Id = RoleId;
    const KIND: &'static str = "role";
}

/// Command to create a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub description: Option<String>,
    pub permissions: PermissionSet,
}

impl NewRole {
    /// Trim and check the role name.
    pub fn validated(mut self) -> DomainResult<Self> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(DomainError::validation("role name cannot be empty"));
        }
        Ok(self)
    }
}

impl CommandAuthorization for NewRole {
    fn required_permissions(&self) -> &'static [Permission] {
        &[Permission::ManageRoles]
    }
}

/// Command to update a role. `None` leaves a field untouched; a provided
/// permission set replaces the previous one entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChanges {
    pub description: Option<String>,
    pub permissions: Option<PermissionSet>,
}

impl RoleChanges {
    pub fn apply_to(&self, role: &mut Role) {
        if let Some(description) = &self.description {
            role.description = Some(description.clone());
        }
        if let Some(permissions) = &self.permissions {
            role.permissions = permissions.clone();
        }
    }
}

impl CommandAuthorization for RoleChanges {
    fn required_permissions(&self) -> &'static [Permission] {
        &[Permission::ManageRoles]
    }
}
