use chrono::{DateTime, Utc};
use tracing::instrument;

use portal_auth::{Principal, User};
use portal_core::{FileId, OrganizationId, UserId};
use portal_files::{FileAction, FileAsset, FileShare, can_manage, can_view};

use crate::error::{PortalError, PortalResult};
use crate::store::SharedStore;

/// File-level view/manage decisions and share-grant replacement.
///
/// Decisions delegate to the pure policy in `portal-files`; this type only
/// fetches the share set those checks need.
pub struct AccessControl {
    store: SharedStore,
}

impl AccessControl {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn can_view(&self, user: &User, file: &FileAsset) -> PortalResult<bool> {
        let shares = self.store.shares_for_file(file.id).await?;
        let allowed = can_view(user, file, &shares);
        tracing::debug!(user = %user.username, file = %file.id, allowed, "view decision");
        Ok(allowed)
    }

    pub fn can_manage(&self, principal: &Principal, file: &FileAsset) -> bool {
        can_manage(&principal.user, file, &principal.permissions)
    }

    pub async fn ensure_view(&self, user: &User, file: &FileAsset) -> PortalResult<()> {
        if self.can_view(user, file).await? {
            Ok(())
        } else {
            Err(PortalError::forbidden(FileAction::View))
        }
    }

    pub fn ensure_manage(&self, principal: &Principal, file: &FileAsset) -> PortalResult<()> {
        if self.can_manage(principal, file) {
            Ok(())
        } else {
            tracing::debug!(user = %principal.user.username, file = %file.id, "manage denied");
            Err(PortalError::forbidden(FileAction::Manage))
        }
    }

    /// Replace the file's grant set with `targets`.
    ///
    /// Every target is validated before anything changes; the first unknown
    /// organization fails the call and the previous grants stay in place. An
    /// empty `targets` revokes all sharing.
    #[instrument(skip(self, now), err(Display))]
    pub async fn share(
        &self,
        file_id: FileId,
        targets: &[OrganizationId],
        granted_by: UserId,
        now: DateTime<Utc>,
    ) -> PortalResult<Vec<FileShare>> {
        if targets.is_empty() {
            self.revoke_all(file_id).await?;
            return Ok(Vec::new());
        }
        let grants = self
            .store
            .replace_shares(file_id, targets, granted_by, now)
            .await?;
        tracing::info!(file = %file_id, grants = grants.len(), "share grants replaced");
        Ok(grants)
    }

    /// Remove every grant of the file. Idempotent.
    pub async fn revoke_all(&self, file_id: FileId) -> PortalResult<()> {
        self.store.revoke_shares(file_id).await?;
        tracing::info!(file = %file_id, "share grants revoked");
        Ok(())
    }
}
