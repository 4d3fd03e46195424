use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use portal_core::{Entity, FileId, OrganizationId, UserId};

use crate::blob::StoredBlob;

/// Metadata of an uploaded file. Content lives in the blob store at `location`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAsset {
    pub id: FileId,
    /// Generated storage name, unrelated to `original_name`.
    pub stored_name: String,
    pub original_name: String,
    #[serde(skip_serializing)]
    pub location: String,
    pub size_bytes: u64,
    /// SHA-256 hex digest of the full content.
    pub checksum: String,
    pub owner_id: UserId,
    pub organization_id: OrganizationId,
    pub uploaded_at: DateTime<Utc>,
}

impl Entity for FileAsset {
    type Id = FileId;
    const KIND: &'static str = "file";
}

/// Store-level record for a freshly uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileAsset {
    pub stored_name: String,
    pub original_name: String,
    pub location: String,
    pub size_bytes: u64,
    pub checksum: String,
    pub owner_id: UserId,
    pub organization_id: OrganizationId,
    pub uploaded_at: DateTime<Utc>,
}

impl NewFileAsset {
    pub fn from_blob(
        blob: StoredBlob,
        original_name: impl Into<String>,
        owner_id: UserId,
        organization_id: OrganizationId,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stored_name: blob.stored_name,
            original_name: original_name.into(),
            location: blob.location,
            size_bytes: blob.size_bytes,
            checksum: blob.checksum,
            owner_id,
            organization_id,
            uploaded_at,
        }
    }
}

/// Visibility grant of one file to one organization.
///
/// Identity is `(file_id, organization_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileShare {
    pub file_id: FileId,
    pub organization_id: OrganizationId,
    pub granted_by: UserId,
    pub granted_at: DateTime<Utc>,
}

impl FileShare {
    /// Fresh grant set for `file_id`, one per target, all stamped alike.
    pub fn grant_all(
        file_id: FileId,
        targets: &BTreeSet<OrganizationId>,
        granted_by: UserId,
        granted_at: DateTime<Utc>,
    ) -> Vec<FileShare> {
        targets
            .iter()
            .map(|&organization_id| FileShare {
                file_id,
                organization_id,
                granted_by,
                granted_at,
            })
            .collect()
    }
}
