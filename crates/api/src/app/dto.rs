use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use portal_auth::{
    CreateUser, NewRole, RoleChanges, UpdateUser, User, parse_permissions,
};
use portal_core::{DomainResult, FileId, OrganizationId, Page, RoleId, UserId};
use portal_files::{FileAsset, FileShare};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

impl PageQuery {
    pub fn page(&self) -> Page {
        let default = Page::default();
        Page::new(
            self.skip.unwrap_or(default.skip),
            self.limit.unwrap_or(default.limit),
        )
    }
}

/// Organizations are called "members" on the wire.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    #[serde(alias = "organization_id")]
    pub member_id: Option<OrganizationId>,
    #[serde(default)]
    pub role_ids: BTreeSet<RoleId>,
}

impl From<CreateUserRequest> for CreateUser {
    fn from(req: CreateUserRequest) -> Self {
        CreateUser {
            username: req.username,
            email: req.email,
            password: req.password,
            full_name: req.full_name,
            organization_id: req.member_id,
            role_ids: req.role_ids,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub is_active: Option<bool>,
    pub password: Option<String>,
    #[serde(alias = "organization_id")]
    pub member_id: Option<OrganizationId>,
    pub role_ids: Option<BTreeSet<RoleId>>,
}

impl From<UpdateUserRequest> for UpdateUser {
    fn from(req: UpdateUserRequest) -> Self {
        UpdateUser {
            email: req.email,
            full_name: req.full_name,
            is_active: req.is_active,
            password: req.password,
            organization_id: req.member_id,
            role_ids: req.role_ids,
        }
    }
}

/// Permissions arrive as strings; unknown ones are rejected.
#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl CreateRoleRequest {
    pub fn into_command(self) -> DomainResult<NewRole> {
        Ok(NewRole {
            name: self.name,
            description: self.description,
            permissions: parse_permissions(&self.permissions)?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRoleRequest {
    pub description: Option<String>,
    pub permissions: Option<Vec<String>>,
}

impl UpdateRoleRequest {
    pub fn into_changes(self) -> DomainResult<RoleChanges> {
        Ok(RoleChanges {
            description: self.description,
            permissions: self.permissions.map(parse_permissions).transpose()?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    #[serde(default)]
    pub member_ids: Vec<OrganizationId>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub member_id: Option<OrganizationId>,
    pub role_ids: BTreeSet<RoleId>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            is_active: user.is_active,
            member_id: user.organization_id,
            role_ids: user.role_ids,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub id: FileId,
    pub original_name: String,
    pub stored_name: String,
    pub size_bytes: u64,
    pub checksum: String,
    pub owner_id: UserId,
    pub member_id: OrganizationId,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_with: Option<Vec<OrganizationId>>,
}

impl FileResponse {
    pub fn with_shares(mut self, shares: &[FileShare]) -> Self {
        self.shared_with = Some(shares.iter().map(|s| s.organization_id).collect());
        self
    }
}

impl From<FileAsset> for FileResponse {
    fn from(file: FileAsset) -> Self {
        Self {
            id: file.id,
            original_name: file.original_name,
            stored_name: file.stored_name,
            size_bytes: file.size_bytes,
            checksum: file.checksum,
            owner_id: file.owner_id,
            member_id: file.organization_id,
            uploaded_at: file.uploaded_at,
            shared_with: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use portal_auth::Permission;

    use super::*;

    #[test]
    fn role_request_rejects_unknown_permission() {
        let req = CreateRoleRequest {
            name: "ops".into(),
            description: None,
            permissions: vec!["manage:files".into(), "launch:rockets".into()],
        };
        assert!(req.into_command().is_err());
    }

    #[test]
    fn role_update_keeps_permissions_when_absent() {
        let changes = UpdateRoleRequest {
            description: Some("d".into()),
            permissions: None,
        }
        .into_changes()
        .unwrap();
        assert!(changes.permissions.is_none());

        let changes = UpdateRoleRequest {
            description: None,
            permissions: Some(vec!["view:audit_logs".into()]),
        }
        .into_changes()
        .unwrap();
        assert_eq!(
            changes.permissions,
            Some([Permission::ViewAuditLogs].into_iter().collect())
        );
    }

    #[test]
    fn create_user_accepts_member_id() {
        let req: CreateUserRequest = serde_json::from_str(
            r#"{"username":"a","email":"a@x.test","password":"p","member_id":3}"#,
        )
        .unwrap();
        assert_eq!(CreateUser::from(req).organization_id, Some(OrganizationId::new(3)));
    }

    #[test]
    fn page_query_defaults() {
        let page = PageQuery::default().page();
        assert_eq!(page, Page::default());
        assert_eq!(PageQuery { skip: Some(5), limit: Some(10_000) }.page().limit, portal_core::page::MAX_PAGE_SIZE);
    }
}
