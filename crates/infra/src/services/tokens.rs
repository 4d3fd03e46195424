use std::sync::Arc;

use chrono::{DateTime, Utc};

use portal_auth::{AuthError, TokenCodec, User};

use crate::error::PortalResult;
use crate::store::SharedStore;

/// Resolves a bearer token to the user it names.
pub struct TokenAuthenticator {
    store: SharedStore,
    codec: Arc<dyn TokenCodec>,
}

impl TokenAuthenticator {
    pub fn new(store: SharedStore, codec: Arc<dyn TokenCodec>) -> Self {
        Self { store, codec }
    }

    /// Verify signature and expiry (no leeway) and look the subject up.
    ///
    /// A subject that no longer maps to a user is `InvalidToken`. The active
    /// flag is not checked here; see [`Self::require_active`].
    pub async fn resolve(&self, token: &str, now: DateTime<Utc>) -> PortalResult<User> {
        let claims = self.codec.verify(token, now).map_err(|e| {
            tracing::warn!(error = %e, "rejected bearer token");
            AuthError::InvalidToken
        })?;

        match self.store.find_user_by_username(&claims.sub).await? {
            Some(user) => Ok(user),
            None => {
                tracing::warn!(subject = %claims.sub, "token subject no longer exists");
                Err(AuthError::InvalidToken.into())
            }
        }
    }

    pub fn require_active(&self, user: User) -> PortalResult<User> {
        if user.is_active {
            Ok(user)
        } else {
            Err(AuthError::InactiveAccount.into())
        }
    }
}
