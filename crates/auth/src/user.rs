//! User accounts and the commands that create and mutate them.
//!
//! Plaintext passwords only ever appear on the command types; what reaches the
//! store ([`NewUser`], [`UserChanges`]) carries the opaque hash instead.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use portal_core::{DomainError, DomainResult, Entity, OrganizationId, RoleId, UserId};

use crate::authorize::CommandAuthorization;
use crate::permissions::Permission;

/// Minimum accepted password length (characters).
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// A portal user account.
///
/// # Invariants
/// - `username` never changes after creation.
/// - `role_ids` holds each role at most once.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub password_hash: String,
    pub is_active: bool,
    pub organization_id: Option<OrganizationId>,
    pub role_ids: BTreeSet<RoleId>,
}

impl core::fmt::Debug for User {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("is_active", &self.is_active)
            .field("organization_id", &self.organization_id)
            .field("role_ids", &self.role_ids)
            .finish_non_exhaustive()
    }
}

impl Entity for User {
    type Id = UserId;
    const KIND: &'static str = "user";
}

/// Command to create a user (administrator action).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub role_ids: BTreeSet<RoleId>,
}

impl CreateUser {
    pub fn validate(&self) -> DomainResult<()> {
        if self.username.trim().is_empty() {
            return Err(DomainError::validation("username cannot be empty"));
        }
        if self.username.chars().any(char::is_whitespace) {
            return Err(DomainError::validation("username cannot contain whitespace"));
        }
        validate_email(&self.email)?;
        validate_password(&self.password)
    }

    /// Build the store record once the password has been hashed.
    pub fn into_record(self, password_hash: String) -> NewUser {
        NewUser {
            username: self.username,
            email: self.email.trim().to_string(),
            full_name: self.full_name,
            password_hash,
            is_active: true,
            organization_id: self.organization_id,
            role_ids: self.role_ids,
        }
    }
}

impl CommandAuthorization for CreateUser {
    fn required_permissions(&self) -> &'static [Permission] {
        &[Permission::ManageUsers]
    }
}

/// Store-level record for a new user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub password_hash: String,
    pub is_active: bool,
    pub organization_id: Option<OrganizationId>,
    pub role_ids: BTreeSet<RoleId>,
}

/// Command to update a user. There is deliberately no username field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub is_active: Option<bool>,
    pub password: Option<String>,
    pub organization_id: Option<OrganizationId>,
    pub role_ids: Option<BTreeSet<RoleId>>,
}

impl UpdateUser {
    pub fn validate(&self) -> DomainResult<()> {
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if let Some(password) = &self.password {
            validate_password(password)?;
        }
        Ok(())
    }

    /// Build the store-level change set; `password_hash` is the hash of
    /// `self.password` when one was given.
    pub fn into_changes(self, password_hash: Option<String>) -> UserChanges {
        UserChanges {
            email: self.email.map(|e| e.trim().to_string()),
            full_name: self.full_name,
            is_active: self.is_active,
            password_hash,
            organization_id: self.organization_id,
            role_ids: self.role_ids,
        }
    }
}

impl CommandAuthorization for UpdateUser {
    fn required_permissions(&self) -> &'static [Permission] {
        &[Permission::ManageUsers]
    }
}

/// Store-level change set for a user. `None` leaves a field untouched; a
/// provided role set replaces the previous one entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserChanges {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub is_active: Option<bool>,
    pub password_hash: Option<String>,
    pub organization_id: Option<OrganizationId>,
    pub role_ids: Option<BTreeSet<RoleId>>,
}

impl UserChanges {
    pub fn apply_to(&self, user: &mut User) {
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(full_name) = &self.full_name {
            user.full_name = Some(full_name.clone());
        }
        if let Some(is_active) = self.is_active {
            user.is_active = is_active;
        }
        if let Some(hash) = &self.password_hash {
            user.password_hash = hash.clone();
        }
        if let Some(org) = self.organization_id {
            user.organization_id = Some(org);
        }
        if let Some(role_ids) = &self.role_ids {
            user.role_ids = role_ids.clone();
        }
    }
}

fn validate_email(email: &str) -> DomainResult<()> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(DomainError::validation("invalid email format")),
    }
}

fn validate_password(password: &str) -> DomainResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(DomainError::validation(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}
