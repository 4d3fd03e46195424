use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use portal_audit::{AuditLog, NewAuditEntry};
use portal_auth::{NewRole, NewUser, Role, RoleChanges, User, UserChanges};
use portal_core::{
    AuditLogId, DomainError, DomainResult, FileId, OrganizationId, Page, RoleId, UserId,
};
use portal_files::{FileAsset, FileShare, NewFileAsset};
use portal_members::{NewOrganization, Organization, OrganizationChanges};

use super::{PortalStore, dedup_targets};

/// One id sequence per table, like `BIGSERIAL` columns.
#[derive(Debug, Default)]
struct Sequences {
    users: i64,
    roles: i64,
    organizations: i64,
    files: i64,
    audit: i64,
}

fn next(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

#[derive(Debug, Default)]
struct Tables {
    seq: Sequences,
    users: BTreeMap<UserId, User>,
    roles: BTreeMap<RoleId, Role>,
    organizations: BTreeMap<OrganizationId, Organization>,
    files: BTreeMap<FileId, FileAsset>,
    shares: BTreeMap<(FileId, OrganizationId), FileShare>,
    audit: Vec<AuditLog>,
}

impl Tables {
    fn require_roles(&self, ids: &BTreeSet<RoleId>) -> DomainResult<()> {
        match ids.iter().find(|id| !self.roles.contains_key(id)) {
            Some(missing) => Err(DomainError::missing::<Role>(*missing)),
            None => Ok(()),
        }
    }

    fn require_organization(&self, id: Option<OrganizationId>) -> DomainResult<()> {
        match id {
            Some(id) if !self.organizations.contains_key(&id) => {
                Err(DomainError::UnknownOrganization { id })
            }
            _ => Ok(()),
        }
    }

    fn username_taken(&self, username: &str) -> bool {
        self.users.values().any(|u| u.username == username)
    }

    fn email_taken(&self, email: &str, except: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }

    fn role_name_taken(&self, name: &str, except: Option<RoleId>) -> bool {
        self.roles
            .values()
            .any(|r| r.name == name && Some(r.id) != except)
    }

    fn organization_name_taken(&self, name: &str, except: Option<OrganizationId>) -> bool {
        self.organizations
            .values()
            .any(|o| o.name == name && Some(o.id) != except)
    }
}

/// In-memory portal store.
///
/// Intended for tests/dev and for running without a database. Every mutation
/// runs under a single write lock, so readers see either the state before or
/// after it.
#[derive(Debug, Default)]
pub struct InMemoryPortalStore {
    tables: RwLock<Tables>,
}

impl InMemoryPortalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> DomainResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| DomainError::store_unavailable("lock poisoned"))
    }

    fn write(&self) -> DomainResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| DomainError::store_unavailable("lock poisoned"))
    }
}

#[async_trait]
impl PortalStore for InMemoryPortalStore {
    async fn get_user(&self, id: UserId) -> DomainResult<Option<User>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> DomainResult<Option<User>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_users(&self, page: Page) -> DomainResult<Vec<User>> {
        Ok(page.apply(self.read()?.users.values().cloned()))
    }

    async fn create_user(&self, user: NewUser) -> DomainResult<User> {
        let mut t = self.write()?;
        if t.username_taken(&user.username) {
            return Err(DomainError::conflict("username"));
        }
        if t.email_taken(&user.email, None) {
            return Err(DomainError::conflict("email"));
        }
        t.require_roles(&user.role_ids)?;
        t.require_organization(user.organization_id)?;

        let id = UserId::new(next(&mut t.seq.users));
        let created = User {
            id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            password_hash: user.password_hash,
            is_active: user.is_active,
            organization_id: user.organization_id,
            role_ids: user.role_ids,
        };
        t.users.insert(id, created.clone());
        Ok(created)
    }

    async fn update_user(&self, id: UserId, changes: UserChanges) -> DomainResult<User> {
        let mut t = self.write()?;
        if !t.users.contains_key(&id) {
            return Err(DomainError::missing::<User>(id));
        }
        if let Some(email) = &changes.email {
            if t.email_taken(email, Some(id)) {
                return Err(DomainError::conflict("email"));
            }
        }
        if let Some(role_ids) = &changes.role_ids {
            t.require_roles(role_ids)?;
        }
        t.require_organization(changes.organization_id)?;

        let user = t
            .users
            .get_mut(&id)
            .ok_or_else(|| DomainError::missing::<User>(id))?;
        changes.apply_to(user);
        Ok(user.clone())
    }

    async fn delete_user(&self, id: UserId) -> DomainResult<User> {
        let mut t = self.write()?;
        if !t.users.contains_key(&id) {
            return Err(DomainError::missing::<User>(id));
        }
        if t.files.values().any(|f| f.owner_id == id) {
            return Err(DomainError::conflict("files"));
        }
        t.users
            .remove(&id)
            .ok_or_else(|| DomainError::missing::<User>(id))
    }

    async fn get_role(&self, id: RoleId) -> DomainResult<Option<Role>> {
        Ok(self.read()?.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> DomainResult<Option<Role>> {
        Ok(self
            .read()?
            .roles
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn roles_by_ids(&self, ids: &BTreeSet<RoleId>) -> DomainResult<Vec<Role>> {
        let t = self.read()?;
        Ok(ids.iter().filter_map(|id| t.roles.get(id).cloned()).collect())
    }

    async fn list_roles(&self, page: Page) -> DomainResult<Vec<Role>> {
        Ok(page.apply(self.read()?.roles.values().cloned()))
    }

    async fn create_role(&self, role: NewRole) -> DomainResult<Role> {
        let mut t = self.write()?;
        if t.role_name_taken(&role.name, None) {
            return Err(DomainError::conflict("name"));
        }
        let id = RoleId::new(next(&mut t.seq.roles));
        let created = Role {
            id,
            name: role.name,
            description: role.description,
            permissions: role.permissions,
        };
        t.roles.insert(id, created.clone());
        Ok(created)
    }

    async fn update_role(&self, id: RoleId, changes: RoleChanges) -> DomainResult<Role> {
        let mut t = self.write()?;
        let role = t
            .roles
            .get_mut(&id)
            .ok_or_else(|| DomainError::missing::<Role>(id))?;
        changes.apply_to(role);
        Ok(role.clone())
    }

    async fn upsert_role(&self, role: NewRole) -> DomainResult<Role> {
        let mut t = self.write()?;
        if let Some(existing) = t.roles.values_mut().find(|r| r.name == role.name) {
            existing.description = role.description;
            existing.permissions = role.permissions;
            return Ok(existing.clone());
        }
        let id = RoleId::new(next(&mut t.seq.roles));
        let created = Role {
            id,
            name: role.name,
            description: role.description,
            permissions: role.permissions,
        };
        t.roles.insert(id, created.clone());
        Ok(created)
    }

    async fn delete_role(&self, id: RoleId) -> DomainResult<Role> {
        let mut t = self.write()?;
        let removed = t
            .roles
            .remove(&id)
            .ok_or_else(|| DomainError::missing::<Role>(id))?;
        for user in t.users.values_mut() {
            user.role_ids.remove(&id);
        }
        Ok(removed)
    }

    async fn get_organization(&self, id: OrganizationId) -> DomainResult<Option<Organization>> {
        Ok(self.read()?.organizations.get(&id).cloned())
    }

    async fn list_organizations(&self, page: Page) -> DomainResult<Vec<Organization>> {
        Ok(page.apply(self.read()?.organizations.values().cloned()))
    }

    async fn create_organization(&self, org: NewOrganization) -> DomainResult<Organization> {
        let mut t = self.write()?;
        if t.organization_name_taken(&org.name, None) {
            return Err(DomainError::conflict("name"));
        }
        let id = OrganizationId::new(next(&mut t.seq.organizations));
        let created = Organization {
            id,
            name: org.name,
            description: org.description,
            api_key: org.api_key,
            security_server_ip: org.security_server_ip,
        };
        t.organizations.insert(id, created.clone());
        Ok(created)
    }

    async fn update_organization(
        &self,
        id: OrganizationId,
        changes: OrganizationChanges,
    ) -> DomainResult<Organization> {
        let mut t = self.write()?;
        if !t.organizations.contains_key(&id) {
            return Err(DomainError::missing::<Organization>(id));
        }
        if let Some(name) = &changes.name {
            if t.organization_name_taken(name, Some(id)) {
                return Err(DomainError::conflict("name"));
            }
        }
        let org = t
            .organizations
            .get_mut(&id)
            .ok_or_else(|| DomainError::missing::<Organization>(id))?;
        changes.apply_to(org);
        Ok(org.clone())
    }

    async fn delete_organization(&self, id: OrganizationId) -> DomainResult<Organization> {
        let mut t = self.write()?;
        if !t.organizations.contains_key(&id) {
            return Err(DomainError::missing::<Organization>(id));
        }
        if t.users.values().any(|u| u.organization_id == Some(id)) {
            return Err(DomainError::conflict("users"));
        }
        if t.files.values().any(|f| f.organization_id == id) {
            return Err(DomainError::conflict("files"));
        }
        t.shares.retain(|(_, org), _| *org != id);
        t.organizations
            .remove(&id)
            .ok_or_else(|| DomainError::missing::<Organization>(id))
    }

    async fn get_file(&self, id: FileId) -> DomainResult<Option<FileAsset>> {
        Ok(self.read()?.files.get(&id).cloned())
    }

    async fn files_visible_to(&self, org: OrganizationId) -> DomainResult<Vec<FileAsset>> {
        let t = self.read()?;
        let shared: BTreeSet<FileId> = t
            .shares
            .keys()
            .filter(|(_, target)| *target == org)
            .map(|(file, _)| *file)
            .collect();
        Ok(t.files
            .values()
            .filter(|f| f.organization_id == org || shared.contains(&f.id))
            .cloned()
            .collect())
    }

    async fn create_file(&self, file: NewFileAsset) -> DomainResult<FileAsset> {
        let mut t = self.write()?;
        if !t.users.contains_key(&file.owner_id) {
            return Err(DomainError::missing::<User>(file.owner_id));
        }
        t.require_organization(Some(file.organization_id))?;

        let id = FileId::new(next(&mut t.seq.files));
        let created = FileAsset {
            id,
            stored_name: file.stored_name,
            original_name: file.original_name,
            location: file.location,
            size_bytes: file.size_bytes,
            checksum: file.checksum,
            owner_id: file.owner_id,
            organization_id: file.organization_id,
            uploaded_at: file.uploaded_at,
        };
        t.files.insert(id, created.clone());
        Ok(created)
    }

    async fn delete_file(&self, id: FileId) -> DomainResult<FileAsset> {
        let mut t = self.write()?;
        let removed = t
            .files
            .remove(&id)
            .ok_or_else(|| DomainError::missing::<FileAsset>(id))?;
        t.shares.retain(|(file, _), _| *file != id);
        Ok(removed)
    }

    async fn shares_for_file(&self, id: FileId) -> DomainResult<Vec<FileShare>> {
        Ok(self
            .read()?
            .shares
            .range((id, OrganizationId::new(i64::MIN))..=(id, OrganizationId::new(i64::MAX)))
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn replace_shares(
        &self,
        id: FileId,
        targets: &[OrganizationId],
        granted_by: UserId,
        granted_at: DateTime<Utc>,
    ) -> DomainResult<Vec<FileShare>> {
        let mut t = self.write()?;
        if !t.files.contains_key(&id) {
            return Err(DomainError::missing::<FileAsset>(id));
        }
        let targets = dedup_targets(targets);
        for target in &targets {
            t.require_organization(Some(*target))?;
        }

        t.shares.retain(|(file, _), _| *file != id);
        let grants = FileShare::grant_all(id, &targets.into_iter().collect(), granted_by, granted_at);
        for grant in &grants {
            t.shares
                .insert((grant.file_id, grant.organization_id), grant.clone());
        }
        Ok(grants)
    }

    async fn revoke_shares(&self, id: FileId) -> DomainResult<()> {
        let mut t = self.write()?;
        if !t.files.contains_key(&id) {
            return Err(DomainError::missing::<FileAsset>(id));
        }
        t.shares.retain(|(file, _), _| *file != id);
        Ok(())
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> DomainResult<AuditLog> {
        let mut t = self.write()?;
        let id = AuditLogId::new(next(&mut t.seq.audit));
        let log = AuditLog {
            id,
            actor_id: entry.actor_id,
            action: entry.action,
            target_type: entry.target_type,
            target_id: entry.target_id,
            details: entry.details,
            created_at: entry.created_at,
        };
        t.audit.push(log.clone());
        Ok(log)
    }

    async fn list_audit(&self, page: Page) -> DomainResult<Vec<AuditLog>> {
        let t = self.read()?;
        let mut logs: Vec<&AuditLog> = t.audit.iter().collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page.apply(logs.into_iter().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use portal_audit::AuditAction;
    use portal_auth::Permission;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn new_user(name: &str, org: Option<OrganizationId>) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: format!("{name}@example.test"),
            full_name: None,
            password_hash: "h".to_string(),
            is_active: true,
            organization_id: org,
            role_ids: BTreeSet::new(),
        }
    }

    fn new_org(name: &str) -> NewOrganization {
        NewOrganization {
            name: name.to_string(),
            description: None,
            api_key: None,
            security_server_ip: None,
        }
    }

    fn new_file(owner: UserId, org: OrganizationId) -> NewFileAsset {
        NewFileAsset {
            stored_name: "abc.pdf".to_string(),
            original_name: "report.pdf".to_string(),
            location: "/tmp/abc.pdf".to_string(),
            size_bytes: 10,
            checksum: "00".to_string(),
            owner_id: owner,
            organization_id: org,
            uploaded_at: at(0),
        }
    }

    #[tokio::test]
    async fn duplicate_username_and_email_conflict() {
        let store = InMemoryPortalStore::new();
        store.create_user(new_user("alice", None)).await.unwrap();

        let err = store.create_user(new_user("alice", None)).await.unwrap_err();
        assert_eq!(err, DomainError::conflict("username"));

        let mut other = new_user("alice2", None);
        other.email = "alice@example.test".to_string();
        let err = store.create_user(other).await.unwrap_err();
        assert_eq!(err, DomainError::conflict("email"));
    }

    #[tokio::test]
    async fn each_table_numbers_its_own_rows() {
        let store = InMemoryPortalStore::new();
        let acme = store.create_organization(new_org("Acme")).await.unwrap();
        let alice = store.create_user(new_user("alice", Some(acme.id))).await.unwrap();
        let globex = store.create_organization(new_org("Globex")).await.unwrap();
        let file = store.create_file(new_file(alice.id, acme.id)).await.unwrap();

        assert_eq!(acme.id, OrganizationId::new(1));
        assert_eq!(globex.id, OrganizationId::new(2));
        assert_eq!(alice.id, UserId::new(1));
        assert_eq!(file.id, FileId::new(1));
    }

    #[tokio::test]
    async fn create_user_checks_references() {
        let store = InMemoryPortalStore::new();
        let mut u = new_user("bob", None);
        u.role_ids.insert(RoleId::new(42));
        assert_eq!(
            store.create_user(u).await.unwrap_err(),
            DomainError::missing::<Role>(RoleId::new(42))
        );

        let u = new_user("bob", Some(OrganizationId::new(7)));
        assert!(matches!(
            store.create_user(u).await.unwrap_err(),
            DomainError::UnknownOrganization { .. }
        ));
        assert!(store.list_users(Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_role_unlinks_users() {
        let store = InMemoryPortalStore::new();
        let role = store
            .create_role(NewRole {
                name: "auditor".to_string(),
                description: None,
                permissions: [Permission::ViewAuditLogs].into_iter().collect(),
            })
            .await
            .unwrap();
        let mut u = new_user("carol", None);
        u.role_ids.insert(role.id);
        let user = store.create_user(u).await.unwrap();

        store.delete_role(role.id).await.unwrap();
        let user = store.get_user(user.id).await.unwrap().unwrap();
        assert!(user.role_ids.is_empty());
    }

    #[tokio::test]
    async fn replace_shares_is_all_or_nothing() {
        let store = InMemoryPortalStore::new();
        let acme = store.create_organization(new_org("Acme")).await.unwrap();
        let globex = store.create_organization(new_org("Globex")).await.unwrap();
        let owner = store.create_user(new_user("alice", Some(acme.id))).await.unwrap();
        let file = store.create_file(new_file(owner.id, acme.id)).await.unwrap();

        store
            .replace_shares(file.id, &[globex.id], owner.id, at(1))
            .await
            .unwrap();

        let err = store
            .replace_shares(file.id, &[acme.id, OrganizationId::new(999)], owner.id, at(2))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::UnknownOrganization {
                id: OrganizationId::new(999)
            }
        );

        let shares = store.shares_for_file(file.id).await.unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].organization_id, globex.id);
        assert_eq!(shares[0].granted_at, at(1));
    }

    #[tokio::test]
    async fn revoke_shares_touches_one_file_only() {
        let store = InMemoryPortalStore::new();
        let acme = store.create_organization(new_org("Acme")).await.unwrap();
        let globex = store.create_organization(new_org("Globex")).await.unwrap();
        let owner = store.create_user(new_user("alice", Some(acme.id))).await.unwrap();
        let first = store.create_file(new_file(owner.id, acme.id)).await.unwrap();
        let second = store.create_file(new_file(owner.id, acme.id)).await.unwrap();
        for file in [first.id, second.id] {
            store
                .replace_shares(file, &[globex.id], owner.id, at(1))
                .await
                .unwrap();
        }

        store.revoke_shares(first.id).await.unwrap();
        assert!(store.shares_for_file(first.id).await.unwrap().is_empty());
        assert_eq!(store.shares_for_file(second.id).await.unwrap().len(), 1);

        assert_eq!(
            store.revoke_shares(FileId::new(999)).await.unwrap_err(),
            DomainError::missing::<FileAsset>(FileId::new(999))
        );
    }

    #[tokio::test]
    async fn organization_delete_guards_and_cleans_grants() {
        let store = InMemoryPortalStore::new();
        let acme = store.create_organization(new_org("Acme")).await.unwrap();
        let globex = store.create_organization(new_org("Globex")).await.unwrap();
        let owner = store.create_user(new_user("alice", Some(acme.id))).await.unwrap();
        let file = store.create_file(new_file(owner.id, acme.id)).await.unwrap();
        store
            .replace_shares(file.id, &[globex.id], owner.id, at(1))
            .await
            .unwrap();

        assert_eq!(
            store.delete_organization(acme.id).await.unwrap_err(),
            DomainError::conflict("users")
        );

        store.delete_organization(globex.id).await.unwrap();
        assert!(store.shares_for_file(file.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn user_owning_files_cannot_be_deleted() {
        let store = InMemoryPortalStore::new();
        let acme = store.create_organization(new_org("Acme")).await.unwrap();
        let owner = store.create_user(new_user("alice", Some(acme.id))).await.unwrap();
        let file = store.create_file(new_file(owner.id, acme.id)).await.unwrap();

        assert_eq!(
            store.delete_user(owner.id).await.unwrap_err(),
            DomainError::conflict("files")
        );
        store.delete_file(file.id).await.unwrap();
        store.delete_user(owner.id).await.unwrap();
    }

    #[tokio::test]
    async fn visible_files_are_deduplicated() {
        let store = InMemoryPortalStore::new();
        let acme = store.create_organization(new_org("Acme")).await.unwrap();
        let owner = store.create_user(new_user("alice", Some(acme.id))).await.unwrap();
        let file = store.create_file(new_file(owner.id, acme.id)).await.unwrap();
        // sharing with the file's own organization must not list it twice
        store
            .replace_shares(file.id, &[acme.id], owner.id, at(1))
            .await
            .unwrap();

        let files = store.files_visible_to(acme.id).await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn audit_lists_newest_first_with_paging() {
        let store = InMemoryPortalStore::new();
        for i in 0..5 {
            store
                .append_audit(NewAuditEntry::new(None, AuditAction::RoleCreated, at(i)).target(i))
                .await
                .unwrap();
        }

        let page = store.list_audit(Page::new(1, 2)).await.unwrap();
        let targets: Vec<_> = page.iter().map(|l| l.target_id).collect();
        assert_eq!(targets, vec![Some(3), Some(2)]);
    }

    proptest::proptest! {
        /// Property: after any sequence of replacements the grant set equals
        /// the last requested set, and rejected calls leave it untouched.
        #[test]
        fn last_successful_replacement_wins(
            rounds in proptest::collection::vec(proptest::collection::vec(0usize..4, 0..4), 1..6),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = InMemoryPortalStore::new();
                let mut orgs = Vec::new();
                for name in ["a", "b", "c"] {
                    orgs.push(store.create_organization(new_org(name)).await.unwrap().id);
                }
                // Index 3 stands for an organization that does not exist.
                orgs.push(OrganizationId::new(999));

                let owner = store.create_user(new_user("owner", Some(orgs[0]))).await.unwrap();
                let file = store.create_file(new_file(owner.id, orgs[0])).await.unwrap();

                let mut expected = BTreeSet::new();
                for (i, round) in rounds.iter().enumerate() {
                    let targets: Vec<_> = round.iter().map(|&k| orgs[k]).collect();
                    let result = store.replace_shares(file.id, &targets, owner.id, at(i as i64)).await;
                    if round.contains(&3) {
                        assert!(result.is_err());
                    } else {
                        result.unwrap();
                        expected = targets.into_iter().collect();
                    }
                    let actual: BTreeSet<_> = store
                        .shares_for_file(file.id)
                        .await
                        .unwrap()
                        .into_iter()
                        .map(|s| s.organization_id)
                        .collect();
                    assert_eq!(actual, expected);
                }
            });
        }
    }
}
