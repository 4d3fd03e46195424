use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use portal_audit::{AuditAction, NewAuditEntry};
use portal_auth::{CreateUser, PasswordHasher, Permission, Principal, UpdateUser, User};
use portal_core::{DomainError, Page, UserId};

use crate::error::PortalResult;
use crate::services::audit::AuditRecorder;
use crate::services::permissions::authorize_command;
use crate::store::SharedStore;

/// User administration. Every operation requires `manage:users`.
pub struct UserService {
    store: SharedStore,
    hasher: Arc<dyn PasswordHasher>,
    audit: AuditRecorder,
}

impl UserService {
    pub fn new(store: SharedStore, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            audit: AuditRecorder::new(store.clone()),
            store,
            hasher,
        }
    }

    pub async fn list(&self, principal: &Principal, page: Page) -> PortalResult<Vec<User>> {
        principal.require(&[Permission::ManageUsers])?;
        Ok(self.store.list_users(page).await?)
    }

    pub async fn get(&self, principal: &Principal, id: UserId) -> PortalResult<User> {
        principal.require(&[Permission::ManageUsers])?;
        self.load(id).await
    }

    #[instrument(skip_all, fields(actor = %principal.user.username, username = %cmd.username), err(Display))]
    pub async fn create(
        &self,
        principal: &Principal,
        cmd: CreateUser,
        now: DateTime<Utc>,
    ) -> PortalResult<User> {
        authorize_command(principal, &cmd)?;
        cmd.validate()?;

        let hash = self.hasher.hash(&cmd.password)?;
        let user = self.store.create_user(cmd.into_record(hash)).await?;
        tracing::info!(user = %user.id, "user created");

        self.audit
            .record(
                NewAuditEntry::new(Some(principal.user.id), AuditAction::UserCreated, now)
                    .target(user.id)
                    .details(format!("Created user {}", user.username)),
            )
            .await?;
        Ok(user)
    }

    #[instrument(skip_all, fields(actor = %principal.user.username, user = %id), err(Display))]
    pub async fn update(
        &self,
        principal: &Principal,
        id: UserId,
        cmd: UpdateUser,
        now: DateTime<Utc>,
    ) -> PortalResult<User> {
        authorize_command(principal, &cmd)?;
        cmd.validate()?;

        let hash = match &cmd.password {
            Some(password) => Some(self.hasher.hash(password)?),
            None => None,
        };
        let user = self.store.update_user(id, cmd.into_changes(hash)).await?;
        tracing::info!(user = %user.id, "user updated");

        self.audit
            .record(
                NewAuditEntry::new(Some(principal.user.id), AuditAction::UserUpdated, now)
                    .target(user.id)
                    .details(format!("Updated user {}", user.username)),
            )
            .await?;
        Ok(user)
    }

    /// Hard delete; refused while the user still owns files.
    #[instrument(skip_all, fields(actor = %principal.user.username, user = %id), err(Display))]
    pub async fn delete(
        &self,
        principal: &Principal,
        id: UserId,
        now: DateTime<Utc>,
    ) -> PortalResult<User> {
        principal.require(&[Permission::ManageUsers])?;
        let user = self.store.delete_user(id).await?;
        tracing::info!(user = %user.id, "user deleted");

        self.audit
            .record(
                NewAuditEntry::new(Some(principal.user.id), AuditAction::UserDeleted, now)
                    .target(user.id)
                    .details(format!("Deleted user {}", user.username)),
            )
            .await?;
        Ok(user)
    }

    async fn load(&self, id: UserId) -> PortalResult<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| DomainError::missing::<User>(id).into())
    }
}
