//! File access policy.
//!
//! Visibility is broad: ownership, organization co-membership or an explicit
//! share grant each suffice. Management is narrow: only the owner or a holder
//! of `manage:files`. Both checks are pure; the caller fetches the share set
//! and the permission set beforehand.

use portal_auth::{Permission, PermissionSet, User};

use crate::model::{FileAsset, FileShare};

/// Resource-level action named in a denial.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileAction {
    View,
    Manage,
}

impl FileAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileAction::View => "view",
            FileAction::Manage => "manage",
        }
    }
}

impl core::fmt::Display for FileAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn can_view(user: &User, file: &FileAsset, shares: &[FileShare]) -> bool {
    if file.owner_id == user.id {
        return true;
    }
    let Some(org) = user.organization_id else {
        return false;
    };
    org == file.organization_id
        || shares
            .iter()
            .any(|s| s.file_id == file.id && s.organization_id == org)
}

/// Co-membership and share grants never confer management.
pub fn can_manage(user: &User, file: &FileAsset, permissions: &PermissionSet) -> bool {
    file.owner_id == user.id || permissions.contains(&Permission::ManageFiles)
}
