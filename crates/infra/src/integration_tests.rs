//! End-to-end service tests against the in-memory store.
//!
//! Covers: login -> bearer resolution -> permission checks -> file sharing
//! -> audit trail, plus bootstrap idempotence.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tokio::io::AsyncReadExt;

    use portal_audit::AuditAction;
    use portal_auth::{
        CreateUser, NewRole, Permission, PermissionSet, Principal, RoleChanges, UpdateUser, User,
    };
    use portal_core::{FileId, OrganizationId, Page, RoleId};
    use portal_files::{FileAction, FileAsset, LocalBlobStore};
    use portal_members::{NewOrganization, Organization, OrganizationChanges};

    use crate::bootstrap::bootstrap;
    use crate::config::Settings;
    use crate::error::PortalError;
    use crate::services::PortalServices;
    use crate::store::{InMemoryPortalStore, SharedStore};

    const PASSWORD: &str = "correct-horse";

    struct Fixture {
        services: PortalServices,
        admin: Principal,
        member_role: RoleId,
        acme: Organization,
        globex: Organization,
        _dir: tempfile::TempDir,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn settings() -> Settings {
        Settings {
            secret_key: "integration-secret".to_string(),
            access_token_expire_minutes: 5,
            initial_admin_password: "admin-password".to_string(),
            bcrypt_cost: 4,
            ..Settings::default()
        }
    }

    async fn setup() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let settings = Arc::new(settings());
        let store: SharedStore = Arc::new(InMemoryPortalStore::new());
        let blobs = Arc::new(LocalBlobStore::new(dir.path().join("files")).await.unwrap());
        let services = PortalServices::new(settings.clone(), store.clone(), blobs).unwrap();

        let report = bootstrap(store.as_ref(), services.hasher.as_ref(), &settings)
            .await
            .unwrap();
        let admin = services.permissions.principal(report.admin_user).await.unwrap();

        let acme = org(&services, &admin, "Acme").await;
        let globex = org(&services, &admin, "Globex").await;

        Fixture {
            services,
            admin,
            member_role: report.member.id,
            acme,
            globex,
            _dir: dir,
        }
    }

    async fn org(services: &PortalServices, admin: &Principal, name: &str) -> Organization {
        services
            .organizations
            .create(
                admin,
                NewOrganization {
                    name: name.to_string(),
                    description: None,
                    api_key: None,
                    security_server_ip: None,
                },
                t0(),
            )
            .await
            .unwrap()
    }

    impl Fixture {
        async fn user(&self, username: &str, org: Option<&Organization>) -> Principal {
            let user = self
                .services
                .users
                .create(
                    &self.admin,
                    CreateUser {
                        username: username.to_string(),
                        email: format!("{username}@example.test"),
                        password: PASSWORD.to_string(),
                        full_name: None,
                        organization_id: org.map(|o| o.id),
                        role_ids: [self.member_role].into_iter().collect(),
                    },
                    t0(),
                )
                .await
                .unwrap();
            self.principal(user).await
        }

        async fn principal(&self, user: User) -> Principal {
            self.services.permissions.principal(user).await.unwrap()
        }

        async fn upload(&self, owner: &Principal, name: &str, body: &[u8]) -> FileAsset {
            let mut content = body;
            self.services
                .files
                .upload(owner, name, &mut content, t0())
                .await
                .unwrap()
        }

        async fn shared_with(&self, file: FileId) -> BTreeSet<OrganizationId> {
            self.services
                .store
                .shares_for_file(file)
                .await
                .unwrap()
                .into_iter()
                .map(|s| s.organization_id)
                .collect()
        }
    }

    #[tokio::test]
    async fn token_resolves_until_expiry_and_not_one_second_after() {
        let fx = setup().await;
        fx.user("alice", Some(&fx.acme)).await;

        let issued = fx
            .services
            .credentials
            .authenticate("alice", PASSWORD, t0())
            .await
            .unwrap();
        assert_eq!(issued.token_type, "bearer");
        assert_eq!(issued.expires_at, t0() + Duration::minutes(5));

        let tokens = &fx.services.tokens;
        let user = tokens.resolve(&issued.access_token, t0()).await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(tokens
            .resolve(&issued.access_token, t0() + Duration::minutes(5))
            .await
            .is_ok());

        let late = t0() + Duration::minutes(5) + Duration::seconds(1);
        let err = tokens.resolve(&issued.access_token, late).await.unwrap_err();
        assert!(matches!(err, PortalError::InvalidToken));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let fx = setup().await;
        fx.user("alice", Some(&fx.acme)).await;
        let creds = &fx.services.credentials;

        let wrong = creds.authenticate("alice", "not-it", t0()).await.unwrap_err();
        let unknown = creds.authenticate("mallory", PASSWORD, t0()).await.unwrap_err();
        let cased = creds.authenticate("Alice", PASSWORD, t0()).await.unwrap_err();

        for err in [wrong, unknown, cased] {
            assert!(matches!(err, PortalError::InvalidCredentials));
            assert_eq!(err.to_string(), "incorrect username or password");
        }
    }

    #[tokio::test]
    async fn tampered_token_is_rejected() {
        let fx = setup().await;
        fx.user("alice", Some(&fx.acme)).await;
        let issued = fx
            .services
            .credentials
            .authenticate("alice", PASSWORD, t0())
            .await
            .unwrap();

        let mut tampered = issued.access_token.clone();
        tampered.push('x');
        let err = fx.services.tokens.resolve(&tampered, t0()).await.unwrap_err();
        assert!(matches!(err, PortalError::InvalidToken));
    }

    #[tokio::test]
    async fn inactive_user_can_log_in_but_bearer_is_refused() {
        let fx = setup().await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        fx.services
            .users
            .update(
                &fx.admin,
                alice.user.id,
                UpdateUser {
                    is_active: Some(false),
                    ..Default::default()
                },
                t0(),
            )
            .await
            .unwrap();

        let issued = fx
            .services
            .credentials
            .authenticate("alice", PASSWORD, t0())
            .await
            .unwrap();
        let err = fx
            .services
            .authenticate_bearer(&issued.access_token, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::InactiveAccount));
    }

    #[tokio::test]
    async fn token_of_deleted_user_is_invalid() {
        let fx = setup().await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        let issued = fx
            .services
            .credentials
            .authenticate("alice", PASSWORD, t0())
            .await
            .unwrap();

        fx.services.users.delete(&fx.admin, alice.user.id, t0()).await.unwrap();

        let err = fx
            .services
            .tokens
            .resolve(&issued.access_token, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::InvalidToken));
    }

    #[tokio::test]
    async fn acme_file_shared_with_globex_is_viewable_not_manageable() {
        let fx = setup().await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        let carol = fx.user("carol", Some(&fx.acme)).await;
        let bob = fx.user("bob", Some(&fx.globex)).await;
        let files = &fx.services.files;

        let file = fx.upload(&alice, "plan.pdf", b"quarterly plan").await;
        assert_eq!(file.organization_id, fx.acme.id);
        assert_ne!(file.stored_name, "plan.pdf");

        // Before sharing: co-member yes, Globex no.
        assert!(files.download(&carol.user, file.id).await.is_ok());
        let err = files.download(&bob.user, file.id).await.err().unwrap();
        assert!(matches!(err, PortalError::Forbidden { action: FileAction::View }));
        assert!(files.list(&bob.user).await.unwrap().is_empty());

        files
            .share(&alice, file.id, &[fx.globex.id], t0())
            .await
            .unwrap();

        let (meta, mut reader) = files.download(&bob.user, file.id).await.unwrap();
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"quarterly plan");
        assert_eq!(meta.original_name, "plan.pdf");
        assert_eq!(
            files.list(&bob.user).await.unwrap().iter().map(|f| f.id).collect::<Vec<_>>(),
            vec![file.id]
        );

        // Sharing confers view only.
        let err = files.share(&bob, file.id, &[], t0()).await.unwrap_err();
        assert!(matches!(err, PortalError::Forbidden { action: FileAction::Manage }));
        let err = files.delete(&bob, file.id, t0()).await.unwrap_err();
        assert!(matches!(err, PortalError::Forbidden { action: FileAction::Manage }));
        // Co-membership does not either.
        assert!(files.delete(&carol, file.id, t0()).await.is_err());
    }

    #[tokio::test]
    async fn administrator_manages_any_file() {
        let fx = setup().await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        let file = fx.upload(&alice, "notes.txt", b"n").await;

        let shared = fx
            .services
            .files
            .share(&fx.admin, file.id, &[fx.globex.id], t0())
            .await
            .unwrap();
        assert_eq!(shared.shares.len(), 1);
        assert_eq!(shared.shares[0].granted_by, fx.admin.user.id);

        fx.services.files.delete(&fx.admin, file.id, t0()).await.unwrap();
        assert!(fx.services.store.get_file(file.id).await.unwrap().is_none());
        assert!(fx.shared_with(file.id).await.is_empty());
    }

    #[tokio::test]
    async fn share_replaces_and_is_idempotent() {
        let fx = setup().await;
        let initech = org(&fx.services, &fx.admin, "Initech").await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        let file = fx.upload(&alice, "a.csv", b"1,2").await;
        let access = fx.services.files.access();

        for _ in 0..2 {
            access.share(file.id, &[], alice.user.id, t0()).await.unwrap();
            assert!(fx.shared_with(file.id).await.is_empty());
        }

        let set = [fx.globex.id, initech.id];
        for _ in 0..2 {
            access.share(file.id, &set, alice.user.id, t0()).await.unwrap();
            assert_eq!(fx.shared_with(file.id).await, BTreeSet::from(set));
        }

        access.share(file.id, &[initech.id], alice.user.id, t0()).await.unwrap();
        assert_eq!(fx.shared_with(file.id).await, BTreeSet::from([initech.id]));

        access.revoke_all(file.id).await.unwrap();
        access.revoke_all(file.id).await.unwrap();
        assert!(fx.shared_with(file.id).await.is_empty());

        let err = access.revoke_all(FileId::new(999)).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn share_with_unknown_organization_changes_nothing() {
        let fx = setup().await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        let file = fx.upload(&alice, "a.csv", b"1,2").await;
        let files = &fx.services.files;

        files.share(&alice, file.id, &[fx.globex.id], t0()).await.unwrap();
        let before = fx.shared_with(file.id).await;

        let err = files
            .share(
                &alice,
                file.id,
                &[fx.acme.id, fx.globex.id, OrganizationId::new(999)],
                t0(),
            )
            .await
            .unwrap_err();
        assert!(
            matches!(err, PortalError::UnknownOrganization { id } if id == OrganizationId::new(999))
        );
        assert_eq!(fx.shared_with(file.id).await, before);
    }

    #[tokio::test]
    async fn missing_file_is_not_found_before_access_check() {
        let fx = setup().await;
        let bob = fx.user("bob", Some(&fx.globex)).await;
        let err = fx
            .services
            .files
            .download(&bob.user, FileId::new(404))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PortalError::NotFound { entity: "file", .. }));
    }

    #[tokio::test]
    async fn upload_requires_organization_and_name() {
        let fx = setup().await;
        let dave = fx.user("dave", None).await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        let files = &fx.services.files;

        let err = files.upload(&dave, "x.txt", &mut &b"x"[..], t0()).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(files.list(&dave.user).await.is_err());

        let err = files.upload(&alice, "  ", &mut &b"x"[..], t0()).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn integrity_check_detects_tampering() {
        let fx = setup().await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        let file = fx.upload(&alice, "data.bin", b"original").await;

        assert!(fx.services.files.verify_integrity(&file).await.unwrap());

        tokio::fs::write(&file.location, b"changed").await.unwrap();
        assert!(!fx.services.files.verify_integrity(&file).await.unwrap());
    }

    #[tokio::test]
    async fn missing_global_permissions_are_listed() {
        let fx = setup().await;
        let alice = fx.user("alice", Some(&fx.acme)).await;

        let err = fx
            .services
            .users
            .list(&alice, Page::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
        let expected: PermissionSet = [Permission::ManageUsers].into_iter().collect();
        assert_eq!(err.missing_permissions(), Some(&expected));

        assert!(fx.services.read_settings(&alice).is_err());
        let view = fx.services.read_settings(&fx.admin).unwrap();
        assert_eq!(view.access_token_expire_minutes, 5);
    }

    #[tokio::test]
    async fn role_permission_changes_apply_on_next_resolution() {
        let fx = setup().await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        assert!(!alice.has(Permission::ViewAuditLogs));

        let auditors = fx
            .services
            .roles
            .create(
                &fx.admin,
                NewRole {
                    name: "auditor".to_string(),
                    description: None,
                    permissions: BTreeSet::new(),
                },
                t0(),
            )
            .await
            .unwrap();
        fx.services
            .users
            .update(
                &fx.admin,
                alice.user.id,
                UpdateUser {
                    role_ids: Some([fx.member_role, auditors.id].into_iter().collect()),
                    ..Default::default()
                },
                t0(),
            )
            .await
            .unwrap();
        fx.services
            .roles
            .update(
                &fx.admin,
                auditors.id,
                RoleChanges {
                    description: None,
                    permissions: Some([Permission::ViewAuditLogs].into_iter().collect()),
                },
                t0(),
            )
            .await
            .unwrap();

        let user = fx.services.store.get_user(alice.user.id).await.unwrap().unwrap();
        let alice = fx.principal(user).await;
        assert!(alice.has(Permission::ViewAuditLogs));
        assert!(fx.services.audit.list(&alice, Page::default()).await.is_ok());

        // Deleting the role unlinks it and takes the permission away.
        fx.services.roles.delete(&fx.admin, auditors.id, t0()).await.unwrap();
        let user = fx.services.store.get_user(alice.user.id).await.unwrap().unwrap();
        assert!(!user.role_ids.contains(&auditors.id));
        assert!(!fx.principal(user).await.has(Permission::ViewAuditLogs));
    }

    #[tokio::test]
    async fn duplicate_username_conflicts_without_audit() {
        let fx = setup().await;
        fx.user("alice", Some(&fx.acme)).await;
        let before = fx.services.audit.list(&fx.admin, Page::default()).await.unwrap().len();

        let err = fx
            .services
            .users
            .create(
                &fx.admin,
                CreateUser {
                    username: "alice".to_string(),
                    email: "other@example.test".to_string(),
                    password: PASSWORD.to_string(),
                    full_name: None,
                    organization_id: None,
                    role_ids: BTreeSet::new(),
                },
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Conflict { field: "username" }));

        let after = fx.services.audit.list(&fx.admin, Page::default()).await.unwrap().len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn user_owning_files_cannot_be_deleted() {
        let fx = setup().await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        fx.upload(&alice, "keep.txt", b"k").await;

        let err = fx
            .services
            .users
            .delete(&fx.admin, alice.user.id, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Conflict { field: "files" }));
    }

    #[tokio::test]
    async fn audit_trail_is_newest_first_with_details() {
        let fx = setup().await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        let file = fx.upload(&alice, "plan.pdf", b"p").await;
        fx.services
            .files
            .share(&alice, file.id, &[fx.globex.id], t0() + Duration::seconds(1))
            .await
            .unwrap();

        let logs = fx.services.audit.list(&fx.admin, Page::default()).await.unwrap();
        assert_eq!(logs[0].action, AuditAction::FileShared);
        assert_eq!(logs[0].actor_id, Some(alice.user.id));
        assert_eq!(logs[0].target_id, Some(file.id.get()));
        assert_eq!(
            logs[0].details.as_deref(),
            Some(format!("Shared file plan.pdf with members [{}]", fx.globex.id).as_str())
        );
        assert_eq!(logs[1].action, AuditAction::FileUploaded);
        assert!(logs.iter().any(|l| l.action == AuditAction::MemberCreated));
        assert!(logs.iter().any(|l| l.action == AuditAction::UserCreated));

        let paged = fx.services.audit.list(&fx.admin, Page::new(1, 1)).await.unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].id, logs[1].id);
    }

    #[tokio::test]
    async fn current_organization_for_members_only() {
        let fx = setup().await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        let dave = fx.user("dave", None).await;
        let orgs = &fx.services.organizations;

        assert_eq!(orgs.current(&alice.user).await.unwrap().id, fx.acme.id);
        assert_eq!(orgs.current(&dave.user).await.unwrap_err().kind(), "not_found");
    }

    #[tokio::test]
    async fn organization_in_use_cannot_be_deleted() {
        let fx = setup().await;
        fx.user("bob", Some(&fx.globex)).await;
        let err = fx
            .services
            .organizations
            .delete(&fx.admin, fx.globex.id, t0())
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Conflict { field: "users" }));
    }

    #[tokio::test]
    async fn bootstrap_twice_keeps_one_admin() {
        let fx = setup().await;
        let settings = fx.services.settings.clone();
        let store = fx.services.store.clone();

        let again = bootstrap(store.as_ref(), fx.services.hasher.as_ref(), &settings)
            .await
            .unwrap();
        assert!(!again.admin_created);
        assert_eq!(again.admin_user.id, fx.admin.user.id);

        let roles = store.list_roles(Page::default()).await.unwrap();
        assert_eq!(roles.iter().filter(|r| r.name == "administrator").count(), 1);
        assert_eq!(roles.iter().filter(|r| r.name == "member").count(), 1);

        let users = store.list_users(Page::default()).await.unwrap();
        assert_eq!(users.iter().filter(|u| u.username == "admin").count(), 1);
        assert_eq!(fx.admin.permissions.len(), Permission::ALL.len());

        // Bootstrap never audits.
        let logs = store.list_audit(Page::default()).await.unwrap();
        assert!(logs.iter().all(|l| l.actor_id.is_some()));
    }

    #[tokio::test]
    async fn bootstrap_admin_can_log_in() {
        let fx = setup().await;
        let issued = fx
            .services
            .credentials
            .authenticate("admin", "admin-password", t0())
            .await
            .unwrap();
        let principal = fx
            .services
            .authenticate_bearer(&issued.access_token, t0())
            .await
            .unwrap();
        assert!(principal.has(Permission::ManageSettings));
        assert_eq!(principal.user.full_name.as_deref(), Some("System Administrator"));
    }

    #[tokio::test]
    async fn organizations_are_numbered_from_one() {
        let fx = setup().await;
        assert_eq!(fx.acme.id, OrganizationId::new(1));
        assert_eq!(fx.globex.id, OrganizationId::new(2));
    }

    #[tokio::test]
    async fn taken_email_on_update_changes_nothing() {
        let fx = setup().await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        let bob = fx.user("bob", Some(&fx.globex)).await;
        let before = fx.services.audit.list(&fx.admin, Page::default()).await.unwrap().len();

        let err = fx
            .services
            .users
            .update(
                &fx.admin,
                bob.user.id,
                UpdateUser {
                    email: Some(alice.user.email.clone()),
                    full_name: Some("Robert".to_string()),
                    ..Default::default()
                },
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Conflict { field: "email" }));

        let stored = fx.services.store.get_user(bob.user.id).await.unwrap().unwrap();
        assert_eq!(stored, bob.user);
        let after = fx.services.audit.list(&fx.admin, Page::default()).await.unwrap().len();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn role_ids_on_update_replace_the_whole_set() {
        let fx = setup().await;
        let alice = fx.user("alice", Some(&fx.acme)).await;
        let auditors = fx
            .services
            .roles
            .create(
                &fx.admin,
                NewRole {
                    name: "auditor".to_string(),
                    description: None,
                    permissions: [Permission::ViewAuditLogs].into_iter().collect(),
                },
                t0(),
            )
            .await
            .unwrap();

        let updated = fx
            .services
            .users
            .update(
                &fx.admin,
                alice.user.id,
                UpdateUser {
                    role_ids: Some([auditors.id].into_iter().collect()),
                    ..Default::default()
                },
                t0(),
            )
            .await
            .unwrap();
        assert_eq!(updated.role_ids, BTreeSet::from([auditors.id]));

        let alice = fx.principal(updated).await;
        let expected: PermissionSet = [Permission::ViewAuditLogs].into_iter().collect();
        assert_eq!(alice.permissions, expected);
    }

    #[tokio::test]
    async fn renaming_organization_to_taken_name_conflicts() {
        let fx = setup().await;
        let err = fx
            .services
            .organizations
            .update(
                &fx.admin,
                fx.globex.id,
                OrganizationChanges {
                    name: Some("Acme".to_string()),
                    ..Default::default()
                },
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Conflict { field: "name" }));

        let orgs = fx.services.organizations.list(&fx.admin, Page::default()).await.unwrap();
        let globex = orgs.iter().find(|o| o.id == fx.globex.id).unwrap();
        assert_eq!(globex.name, "Globex");
    }

    #[tokio::test]
    async fn duplicate_role_name_conflicts_without_audit() {
        let fx = setup().await;
        let before = fx.services.audit.list(&fx.admin, Page::default()).await.unwrap().len();

        let err = fx
            .services
            .roles
            .create(
                &fx.admin,
                NewRole {
                    name: "member".to_string(),
                    description: None,
                    permissions: BTreeSet::new(),
                },
                t0(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::Conflict { field: "name" }));

        let after = fx.services.audit.list(&fx.admin, Page::default()).await.unwrap().len();
        assert_eq!(before, after);
    }
}
