use chrono::{DateTime, Utc};
use tracing::instrument;

use portal_audit::{AuditAction, NewAuditEntry};
use portal_auth::{Permission, Principal, User};
use portal_core::{DomainError, OrganizationId, Page};
use portal_members::{NewOrganization, Organization, OrganizationChanges};

use crate::error::{PortalError, PortalResult};
use crate::services::audit::AuditRecorder;
use crate::services::permissions::authorize_command;
use crate::store::SharedStore;

/// Organization ("member") administration.
pub struct OrganizationService {
    store: SharedStore,
    audit: AuditRecorder,
}

impl OrganizationService {
    pub fn new(store: SharedStore) -> Self {
        Self {
            audit: AuditRecorder::new(store.clone()),
            store,
        }
    }

    pub async fn list(
        &self,
        principal: &Principal,
        page: Page,
    ) -> PortalResult<Vec<Organization>> {
        principal.require(&[Permission::ManageMembers])?;
        Ok(self.store.list_organizations(page).await?)
    }

    /// The organization the caller belongs to. Open to any active user.
    pub async fn current(&self, user: &User) -> PortalResult<Organization> {
        let Some(id) = user.organization_id else {
            return Err(PortalError::NotFound {
                entity: "membership",
                id: user.id.get(),
            });
        };
        self.store
            .get_organization(id)
            .await?
            .ok_or_else(|| DomainError::missing::<Organization>(id).into())
    }

    #[instrument(skip_all, fields(actor = %principal.user.username, name = %cmd.name), err(Display))]
    pub async fn create(
        &self,
        principal: &Principal,
        cmd: NewOrganization,
        now: DateTime<Utc>,
    ) -> PortalResult<Organization> {
        authorize_command(principal, &cmd)?;
        let org = self.store.create_organization(cmd.validated()?).await?;
        tracing::info!(organization = %org.id, "organization created");

        self.audit
            .record(
                NewAuditEntry::new(Some(principal.user.id), AuditAction::MemberCreated, now)
                    .target(org.id)
                    .details(format!("Created member {}", org.name)),
            )
            .await?;
        Ok(org)
    }

    #[instrument(skip_all, fields(actor = %principal.user.username, organization = %id), err(Display))]
    pub async fn update(
        &self,
        principal: &Principal,
        id: OrganizationId,
        changes: OrganizationChanges,
        now: DateTime<Utc>,
    ) -> PortalResult<Organization> {
        authorize_command(principal, &changes)?;
        let org = self
            .store
            .update_organization(id, changes.validated()?)
            .await?;
        tracing::info!(organization = %org.id, "organization updated");

        self.audit
            .record(
                NewAuditEntry::new(Some(principal.user.id), AuditAction::MemberUpdated, now)
                    .target(org.id)
                    .details(format!("Updated member {}", org.name)),
            )
            .await?;
        Ok(org)
    }

    /// Refused while users or files still reference the organization.
    #[instrument(skip_all, fields(actor = %principal.user.username, organization = %id), err(Display))]
    pub async fn delete(
        &self,
        principal: &Principal,
        id: OrganizationId,
        now: DateTime<Utc>,
    ) -> PortalResult<Organization> {
        principal.require(&[Permission::ManageMembers])?;
        let org = self.store.delete_organization(id).await?;
        tracing::info!(organization = %org.id, "organization deleted");

        self.audit
            .record(
                NewAuditEntry::new(Some(principal.user.id), AuditAction::MemberDeleted, now)
                    .target(org.id)
                    .details(format!("Deleted member {}", org.name)),
            )
            .await?;
        Ok(org)
    }
}
