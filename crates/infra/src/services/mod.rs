//! Application services.
//!
//! Each service owns a handle to the shared store and enforces its own
//! authorization. Callers pass the current time explicitly so that token
//! expiry and audit stamps are deterministic under test.

use std::sync::Arc;

use portal_auth::{BcryptHasher, JwtCodec, PasswordHasher, Permission, Principal, TokenCodec};
use portal_files::BlobStore;

use crate::config::{PublicSettings, Settings};
use crate::error::{PortalError, PortalResult};
use crate::store::SharedStore;

pub mod access;
pub mod audit;
pub mod credentials;
pub mod files;
pub mod organizations;
pub mod permissions;
pub mod roles;
pub mod tokens;
pub mod users;

pub use access::AccessControl;
pub use audit::AuditRecorder;
pub use credentials::{CredentialVerifier, IssuedToken};
pub use files::{FileService, SharedFile};
pub use organizations::OrganizationService;
pub use permissions::{PermissionResolver, authorize_command};
pub use roles::RoleService;
pub use tokens::TokenAuthenticator;
pub use users::UserService;

/// Every service wired against one store, one hasher and one token codec.
pub struct PortalServices {
    pub settings: Arc<Settings>,
    pub store: SharedStore,
    pub hasher: Arc<dyn PasswordHasher>,
    pub credentials: CredentialVerifier,
    pub tokens: TokenAuthenticator,
    pub permissions: PermissionResolver,
    pub audit: AuditRecorder,
    pub users: UserService,
    pub roles: RoleService,
    pub organizations: OrganizationService,
    pub files: FileService,
}

impl PortalServices {
    /// Build with bcrypt and HMAC-JWT configured from `settings`.
    pub fn new(
        settings: Arc<Settings>,
        store: SharedStore,
        blobs: Arc<dyn BlobStore>,
    ) -> PortalResult<Self> {
        let hasher = BcryptHasher::new(settings.bcrypt_cost)?;
        let codec = JwtCodec::new(&settings.secret_key, &settings.algorithm)
            .map_err(|e| PortalError::InvariantViolation(e.to_string()))?;
        Self::with_parts(settings, store, blobs, Arc::new(hasher), Arc::new(codec))
    }

    pub fn with_parts(
        settings: Arc<Settings>,
        store: SharedStore,
        blobs: Arc<dyn BlobStore>,
        hasher: Arc<dyn PasswordHasher>,
        codec: Arc<dyn TokenCodec>,
    ) -> PortalResult<Self> {
        let credentials = CredentialVerifier::new(
            store.clone(),
            hasher.clone(),
            codec.clone(),
            settings.token_lifetime(),
        )?;

        Ok(Self {
            tokens: TokenAuthenticator::new(store.clone(), codec),
            permissions: PermissionResolver::new(store.clone()),
            audit: AuditRecorder::new(store.clone()),
            users: UserService::new(store.clone(), hasher.clone()),
            roles: RoleService::new(store.clone()),
            organizations: OrganizationService::new(store.clone()),
            files: FileService::new(store.clone(), blobs),
            credentials,
            hasher,
            store,
            settings,
        })
    }

    /// Token to principal: verify, require an active account, resolve permissions.
    pub async fn authenticate_bearer(
        &self,
        token: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> PortalResult<Principal> {
        let user = self.tokens.resolve(token, now).await?;
        let user = self.tokens.require_active(user)?;
        self.permissions.principal(user).await
    }

    /// Non-secret settings, for holders of `manage:settings`.
    pub fn read_settings(&self, principal: &Principal) -> PortalResult<PublicSettings> {
        principal.require(&[Permission::ManageSettings])?;
        Ok(self.settings.public_view())
    }
}
