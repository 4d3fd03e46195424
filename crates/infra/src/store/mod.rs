//! Persistent store boundary.
//!
//! `PortalStore` is the one storage abstraction the services talk to. Every
//! mutating method is a single atomic unit: either the whole change commits or
//! nothing does. Validation that must see a consistent snapshot (uniqueness,
//! referenced roles and organizations, share targets) happens inside that unit.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use portal_audit::{AuditLog, NewAuditEntry};
use portal_auth::{NewRole, NewUser, Role, RoleChanges, User, UserChanges};
use portal_core::{DomainResult, FileId, OrganizationId, Page, RoleId, UserId};
use portal_files::{FileAsset, FileShare, NewFileAsset};
use portal_members::{NewOrganization, Organization, OrganizationChanges};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryPortalStore;
pub use postgres::PostgresPortalStore;

/// Storage for users, roles, organizations, files, share grants and audit logs.
///
/// ## Error contract
///
/// - missing entity on mutation: `DomainError::NotFound { entity, id }`
/// - unique field taken: `DomainError::Conflict { field }` (`username`, `email`,
///   `name`), raised before anything is written
/// - unknown organization referenced by a user or share grant:
///   `DomainError::UnknownOrganization { id }`
/// - backend unreachable: `DomainError::StoreUnavailable`
#[async_trait]
pub trait PortalStore: Send + Sync {
    // users
    async fn get_user(&self, id: UserId) -> DomainResult<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> DomainResult<Option<User>>;
    async fn list_users(&self, page: Page) -> DomainResult<Vec<User>>;
    async fn create_user(&self, user: NewUser) -> DomainResult<User>;
    async fn update_user(&self, id: UserId, changes: UserChanges) -> DomainResult<User>;
    /// Refused with `Conflict { field: "files" }` while the user owns files.
    async fn delete_user(&self, id: UserId) -> DomainResult<User>;

    // roles
    async fn get_role(&self, id: RoleId) -> DomainResult<Option<Role>>;
    async fn find_role_by_name(&self, name: &str) -> DomainResult<Option<Role>>;
    async fn roles_by_ids(&self, ids: &BTreeSet<RoleId>) -> DomainResult<Vec<Role>>;
    async fn list_roles(&self, page: Page) -> DomainResult<Vec<Role>>;
    async fn create_role(&self, role: NewRole) -> DomainResult<Role>;
    async fn update_role(&self, id: RoleId, changes: RoleChanges) -> DomainResult<Role>;
    /// Insert by name, or overwrite description and permissions of the existing role.
    async fn upsert_role(&self, role: NewRole) -> DomainResult<Role>;
    /// Also unlinks the role from every user holding it.
    async fn delete_role(&self, id: RoleId) -> DomainResult<Role>;

    // organizations
    async fn get_organization(&self, id: OrganizationId) -> DomainResult<Option<Organization>>;
    async fn list_organizations(&self, page: Page) -> DomainResult<Vec<Organization>>;
    async fn create_organization(&self, org: NewOrganization) -> DomainResult<Organization>;
    async fn update_organization(
        &self,
        id: OrganizationId,
        changes: OrganizationChanges,
    ) -> DomainResult<Organization>;
    /// Refused while users or files reference it; drops grants targeting it.
    async fn delete_organization(&self, id: OrganizationId) -> DomainResult<Organization>;

    // files
    async fn get_file(&self, id: FileId) -> DomainResult<Option<FileAsset>>;
    /// Files of `org` plus files shared with it, each once, ordered by id.
    async fn files_visible_to(&self, org: OrganizationId) -> DomainResult<Vec<FileAsset>>;
    async fn create_file(&self, file: NewFileAsset) -> DomainResult<FileAsset>;
    /// Removes the record and all of its share grants.
    async fn delete_file(&self, id: FileId) -> DomainResult<FileAsset>;

    // share grants
    async fn shares_for_file(&self, id: FileId) -> DomainResult<Vec<FileShare>>;
    /// Validate every target, then replace the file's whole grant set.
    ///
    /// The first unknown target (in the given order) fails the call with
    /// `UnknownOrganization` and leaves the previous grants untouched.
    async fn replace_shares(
        &self,
        id: FileId,
        targets: &[OrganizationId],
        granted_by: UserId,
        granted_at: DateTime<Utc>,
    ) -> DomainResult<Vec<FileShare>>;
    /// Drop every grant of the file. `NotFound` if the file is gone.
    async fn revoke_shares(&self, id: FileId) -> DomainResult<()>;

    // audit
    async fn append_audit(&self, entry: NewAuditEntry) -> DomainResult<AuditLog>;
    /// Newest first.
    async fn list_audit(&self, page: Page) -> DomainResult<Vec<AuditLog>>;
}

/// Deduplicate share targets keeping first-seen order.
pub(crate) fn dedup_targets(targets: &[OrganizationId]) -> Vec<OrganizationId> {
    let mut seen = BTreeSet::new();
    targets.iter().copied().filter(|t| seen.insert(*t)).collect()
}

/// Shared handle used by services.
pub type SharedStore = Arc<dyn PortalStore>;
