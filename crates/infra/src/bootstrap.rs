//! Startup seeding of the default roles and the initial administrator.
//!
//! Safe to run on every start: roles are upserted by name and the admin user is
//! only created when missing. An existing admin account is left untouched.

use std::collections::BTreeSet;

use portal_auth::{
    ADMINISTRATOR_ROLE, MEMBER_ROLE, NewRole, NewUser, PasswordHasher, Permission, Role, User,
};

use crate::config::Settings;
use crate::error::{PortalError, PortalResult};
use crate::store::PortalStore;

/// What a bootstrap run ended up with.
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub administrator: Role,
    pub member: Role,
    pub admin_user: User,
    pub admin_created: bool,
}

pub fn default_roles() -> [NewRole; 2] {
    [
        NewRole {
            name: ADMINISTRATOR_ROLE.to_string(),
            description: Some("Full access to all administrative features".to_string()),
            permissions: Permission::ALL.into_iter().collect(),
        },
        NewRole {
            name: MEMBER_ROLE.to_string(),
            description: Some("Regular member user with file collaboration rights".to_string()),
            permissions: BTreeSet::new(),
        },
    ]
}

pub async fn bootstrap(
    store: &dyn PortalStore,
    hasher: &dyn PasswordHasher,
    settings: &Settings,
) -> PortalResult<BootstrapReport> {
    let [admin_role, member_role] = default_roles();
    let administrator = store.upsert_role(admin_role).await?;
    let member = store.upsert_role(member_role).await?;
    tracing::info!(
        administrator = %administrator.id,
        member = %member.id,
        "default roles in place"
    );

    if let Some(admin_user) = store
        .find_user_by_username(&settings.initial_admin_username)
        .await?
    {
        return Ok(BootstrapReport {
            administrator,
            member,
            admin_user,
            admin_created: false,
        });
    }

    // Re-read by name: the upsert above must be visible before linking.
    let linked = store
        .find_role_by_name(ADMINISTRATOR_ROLE)
        .await?
        .ok_or_else(|| {
            PortalError::InvariantViolation("administrator role missing during bootstrap".into())
        })?;

    let admin_user = store
        .create_user(NewUser {
            username: settings.initial_admin_username.clone(),
            email: settings.initial_admin_email.clone(),
            full_name: Some("System Administrator".to_string()),
            password_hash: hasher.hash(&settings.initial_admin_password)?,
            is_active: true,
            organization_id: None,
            role_ids: [linked.id].into_iter().collect(),
        })
        .await?;
    tracing::info!(user = %admin_user.id, username = %admin_user.username, "initial administrator created");

    Ok(BootstrapReport {
        administrator,
        member,
        admin_user,
        admin_created: true,
    })
}
