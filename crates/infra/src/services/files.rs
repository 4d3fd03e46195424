use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;
use tracing::instrument;

use portal_audit::{AuditAction, NewAuditEntry};
use portal_auth::{Principal, User};
use portal_core::{DomainError, FileId, OrganizationId};
use portal_files::{BlobReader, BlobStore, FileAsset, FileShare, NewFileAsset};

use crate::error::{PortalError, PortalResult};
use crate::services::access::AccessControl;
use crate::services::audit::AuditRecorder;
use crate::store::SharedStore;

/// Upload, listing, download, sharing and deletion of files.
pub struct FileService {
    store: SharedStore,
    blobs: Arc<dyn BlobStore>,
    access: AccessControl,
    audit: AuditRecorder,
}

/// Outcome of a share call: the file and the grant set now in force.
#[derive(Debug, Clone)]
pub struct SharedFile {
    pub file: FileAsset,
    pub shares: Vec<FileShare>,
}

impl FileService {
    pub fn new(store: SharedStore, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            access: AccessControl::new(store.clone()),
            audit: AuditRecorder::new(store.clone()),
            store,
            blobs,
        }
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    /// Files of the caller's organization plus files shared with it.
    pub async fn list(&self, user: &User) -> PortalResult<Vec<FileAsset>> {
        let org = require_organization(user)?;
        Ok(self.store.files_visible_to(org).await?)
    }

    #[instrument(skip_all, fields(actor = %principal.user.username, name = %original_name), err(Display))]
    pub async fn upload(
        &self,
        principal: &Principal,
        original_name: &str,
        content: &mut (dyn AsyncRead + Send + Unpin),
        now: DateTime<Utc>,
    ) -> PortalResult<FileAsset> {
        let org = require_organization(&principal.user)?;
        let original_name = original_name.trim();
        if original_name.is_empty() {
            return Err(PortalError::validation("file name is required"));
        }

        let blob = self.blobs.store(content, original_name).await?;
        let location = blob.location.clone();
        let record = NewFileAsset::from_blob(blob, original_name, principal.user.id, org, now);

        let file = match self.store.create_file(record).await {
            Ok(file) => file,
            Err(e) => {
                if let Err(cleanup) = self.blobs.delete(&location).await {
                    tracing::warn!(error = %cleanup, location, "orphaned blob after failed insert");
                }
                return Err(e.into());
            }
        };
        tracing::info!(file = %file.id, size_bytes = file.size_bytes, "file uploaded");

        self.audit
            .record(
                NewAuditEntry::new(Some(principal.user.id), AuditAction::FileUploaded, now)
                    .target(file.id)
                    .details(format!("Uploaded file {}", file.original_name)),
            )
            .await?;
        Ok(file)
    }

    /// Metadata and a content reader, for callers allowed to view the file.
    pub async fn download(
        &self,
        user: &User,
        id: FileId,
    ) -> PortalResult<(FileAsset, BlobReader)> {
        let file = self.load(id).await?;
        self.access.ensure_view(user, &file).await?;
        let reader = self.blobs.open(&file.location).await?;
        Ok((file, reader))
    }

    #[instrument(skip_all, fields(actor = %principal.user.username, file = %id), err(Display))]
    pub async fn share(
        &self,
        principal: &Principal,
        id: FileId,
        targets: &[OrganizationId],
        now: DateTime<Utc>,
    ) -> PortalResult<SharedFile> {
        let file = self.load(id).await?;
        self.access.ensure_manage(principal, &file)?;

        let shares = self.access.share(id, targets, principal.user.id, now).await?;
        let listed: Vec<String> = shares
            .iter()
            .map(|s| s.organization_id.to_string())
            .collect();

        self.audit
            .record(
                NewAuditEntry::new(Some(principal.user.id), AuditAction::FileShared, now)
                    .target(file.id)
                    .details(format!(
                        "Shared file {} with members [{}]",
                        file.original_name,
                        listed.join(", ")
                    )),
            )
            .await?;
        Ok(SharedFile { file, shares })
    }

    /// Removes the record with its grants, then the stored content.
    #[instrument(skip_all, fields(actor = %principal.user.username, file = %id), err(Display))]
    pub async fn delete(
        &self,
        principal: &Principal,
        id: FileId,
        now: DateTime<Utc>,
    ) -> PortalResult<FileAsset> {
        let file = self.load(id).await?;
        self.access.ensure_manage(principal, &file)?;

        let file = self.store.delete_file(id).await?;
        if let Err(e) = self.blobs.delete(&file.location).await {
            tracing::warn!(error = %e, file = %file.id, "blob removal failed after delete");
        }
        tracing::info!(file = %file.id, "file deleted");

        self.audit
            .record(
                NewAuditEntry::new(Some(principal.user.id), AuditAction::FileDeleted, now)
                    .target(file.id)
                    .details(format!("Deleted file {}", file.original_name)),
            )
            .await?;
        Ok(file)
    }

    /// Recompute the stored content's checksum and compare with the record.
    pub async fn verify_integrity(&self, file: &FileAsset) -> PortalResult<bool> {
        let actual = self.blobs.checksum(&file.location).await?;
        let intact = actual == file.checksum;
        if !intact {
            tracing::warn!(file = %file.id, expected = %file.checksum, actual, "checksum mismatch");
        }
        Ok(intact)
    }

    async fn load(&self, id: FileId) -> PortalResult<FileAsset> {
        self.store
            .get_file(id)
            .await?
            .ok_or_else(|| DomainError::missing::<FileAsset>(id).into())
    }
}

fn require_organization(user: &User) -> PortalResult<OrganizationId> {
    user.organization_id
        .ok_or_else(|| PortalError::validation("user not associated to a member"))
}
