//! `portal-auth` — identity, credentials and permission policy.
//!
//! This crate is intentionally decoupled from HTTP and storage: services in
//! `portal-infra` fetch users and roles and hand them to the pure checks here.

pub mod authorize;
pub mod claims;
pub mod error;
pub mod password;
pub mod permissions;
pub mod roles;
pub mod token;
pub mod user;

pub use authorize::{
    CommandAuthorization, PermissionError, Principal, authorize, effective_permissions,
    require_permissions,
};
pub use claims::{TokenClaims, TokenValidationError, validate_claims};
pub use error::AuthError;
pub use password::{BcryptHasher, PasswordError, PasswordHasher};
pub use permissions::{Permission, PermissionSet, parse_permissions};
pub use roles::{ADMINISTRATOR_ROLE, MEMBER_ROLE, NewRole, Role, RoleChanges};
pub use token::{JwtCodec, SUPPORTED_ALGORITHMS, TokenCodec, TokenError};
pub use user::{CreateUser, MIN_PASSWORD_LENGTH, NewUser, UpdateUser, User, UserChanges};
