//! Service-level error: everything a portal operation can fail with.

use thiserror::Error;

use portal_auth::{AuthError, PasswordError, PermissionError, PermissionSet, TokenError};
use portal_core::{DomainError, OrganizationId};
use portal_files::{BlobError, FileAction};

use crate::config::ConfigError;

pub type PortalResult<T> = Result<T, PortalError>;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("incorrect username or password")]
    InvalidCredentials,

    #[error("could not validate credentials")]
    InvalidToken,

    #[error("inactive user")]
    InactiveAccount,

    #[error(transparent)]
    PermissionDenied(#[from] PermissionError),

    /// Resource-level denial (file view/manage), distinct from missing global permissions.
    #[error("not allowed to {action} this file")]
    Forbidden { action: FileAction },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("conflict: {field} already exists")]
    Conflict { field: &'static str },

    #[error("unknown organization {id}")]
    UnknownOrganization { id: OrganizationId },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("blob storage failed: {0}")]
    Blob(#[from] BlobError),

    #[error("password hashing failed: {0}")]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PortalError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PortalError::InvalidCredentials => "invalid_credentials",
            PortalError::InvalidToken => "invalid_token",
            PortalError::InactiveAccount => "inactive_account",
            PortalError::PermissionDenied(_) => "permission_denied",
            PortalError::Forbidden { .. } => "forbidden",
            PortalError::NotFound { .. } => "not_found",
            PortalError::Conflict { .. } => "conflict",
            PortalError::UnknownOrganization { .. } => "unknown_organization",
            PortalError::Validation(_) => "validation",
            PortalError::InvariantViolation(_) => "invariant_violation",
            PortalError::StoreUnavailable(_) => "store_unavailable",
            PortalError::Blob(_) => "storage_error",
            PortalError::Password(_) => "internal_error",
            PortalError::Config(_) => "configuration_error",
        }
    }

    pub fn missing_permissions(&self) -> Option<&PermissionSet> {
        match self {
            PortalError::PermissionDenied(e) => Some(&e.missing),
            _ => None,
        }
    }

    pub fn forbidden(action: FileAction) -> Self {
        PortalError::Forbidden { action }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        PortalError::Validation(msg.into())
    }
}

impl From<DomainError> for PortalError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                PortalError::Validation(msg)
            }
            DomainError::InvariantViolation(msg) => PortalError::InvariantViolation(msg),
            DomainError::NotFound { entity, id } => PortalError::NotFound { entity, id },
            DomainError::Conflict { field } => PortalError::Conflict { field },
            DomainError::UnknownOrganization { id } => PortalError::UnknownOrganization { id },
            DomainError::StoreUnavailable(msg) => PortalError::StoreUnavailable(msg),
        }
    }
}

impl From<AuthError> for PortalError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => PortalError::InvalidCredentials,
            AuthError::InvalidToken => PortalError::InvalidToken,
            AuthError::InactiveAccount => PortalError::InactiveAccount,
        }
    }
}

/// Every token failure (bad signature, malformed, expired) looks the same to callers.
impl From<TokenError> for PortalError {
    fn from(_: TokenError) -> Self {
        PortalError::InvalidToken
    }
}

#[cfg(test)]
mod tests {
    use portal_auth::{Permission, TokenValidationError};

    use super::*;

    #[test]
    fn domain_errors_keep_their_kind() {
        let e: PortalError = DomainError::conflict("email").into();
        assert_eq!(e.kind(), "conflict");
        assert_eq!(e.to_string(), "conflict: email already exists");

        let e: PortalError = DomainError::store_unavailable("down").into();
        assert_eq!(e.kind(), "store_unavailable");
    }

    #[test]
    fn token_failures_collapse_to_invalid_token() {
        let e: PortalError = TokenError::Claims(TokenValidationError::Expired).into();
        assert_eq!(e.kind(), "invalid_token");
    }

    #[test]
    fn permission_denied_exposes_missing_set() {
        let missing: PermissionSet = [Permission::ManageRoles].into_iter().collect();
        let e: PortalError = PermissionError { missing: missing.clone() }.into();
        assert_eq!(e.kind(), "permission_denied");
        assert_eq!(e.missing_permissions(), Some(&missing));
    }

    #[test]
    fn forbidden_names_action() {
        let e = PortalError::forbidden(FileAction::Manage);
        assert_eq!(e.kind(), "forbidden");
        assert_eq!(e.to_string(), "not allowed to manage this file");
    }
}
