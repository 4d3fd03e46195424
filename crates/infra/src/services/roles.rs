use chrono::{DateTime, Utc};
use tracing::instrument;

use portal_audit::{AuditAction, NewAuditEntry};
use portal_auth::{NewRole, Permission, Principal, Role, RoleChanges};
use portal_core::{Page, RoleId};

use crate::error::PortalResult;
use crate::services::audit::AuditRecorder;
use crate::services::permissions::authorize_command;
use crate::store::SharedStore;

/// Role administration. Every operation requires `manage:roles`.
pub struct RoleService {
    store: SharedStore,
    audit: AuditRecorder,
}

impl RoleService {
    pub fn new(store: SharedStore) -> Self {
        Self {
            audit: AuditRecorder::new(store.clone()),
            store,
        }
    }

    pub async fn list(&self, principal: &Principal, page: Page) -> PortalResult<Vec<Role>> {
        principal.require(&[Permission::ManageRoles])?;
        Ok(self.store.list_roles(page).await?)
    }

    #[instrument(skip_all, fields(actor = %principal.user.username, role = %cmd.name), err(Display))]
    pub async fn create(
        &self,
        principal: &Principal,
        cmd: NewRole,
        now: DateTime<Utc>,
    ) -> PortalResult<Role> {
        authorize_command(principal, &cmd)?;
        let role = self.store.create_role(cmd.validated()?).await?;
        tracing::info!(role = %role.id, "role created");

        self.audit
            .record(
                NewAuditEntry::new(Some(principal.user.id), AuditAction::RoleCreated, now)
                    .target(role.id)
                    .details(format!("Created role {}", role.name)),
            )
            .await?;
        Ok(role)
    }

    #[instrument(skip_all, fields(actor = %principal.user.username, role = %id), err(Display))]
    pub async fn update(
        &self,
        principal: &Principal,
        id: RoleId,
        changes: RoleChanges,
        now: DateTime<Utc>,
    ) -> PortalResult<Role> {
        authorize_command(principal, &changes)?;
        let role = self.store.update_role(id, changes).await?;
        tracing::info!(role = %role.id, permissions = role.permissions.len(), "role updated");

        self.audit
            .record(
                NewAuditEntry::new(Some(principal.user.id), AuditAction::RoleUpdated, now)
                    .target(role.id)
                    .details(format!("Updated role {}", role.name)),
            )
            .await?;
        Ok(role)
    }

    /// Also unlinks the role from every user holding it.
    #[instrument(skip_all, fields(actor = %principal.user.username, role = %id), err(Display))]
    pub async fn delete(
        &self,
        principal: &Principal,
        id: RoleId,
        now: DateTime<Utc>,
    ) -> PortalResult<Role> {
        principal.require(&[Permission::ManageRoles])?;
        let role = self.store.delete_role(id).await?;
        tracing::info!(role = %role.id, "role deleted");

        self.audit
            .record(
                NewAuditEntry::new(Some(principal.user.id), AuditAction::RoleDeleted, now)
                    .target(role.id)
                    .details(format!("Deleted role {}", role.name)),
            )
            .await?;
        Ok(role)
    }
}
