use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::instrument;

use portal_auth::{PasswordHasher, TokenClaims, TokenCodec};

use crate::error::{PortalError, PortalResult};
use crate::store::SharedStore;

/// Compared against when the username is unknown, so both failure paths pay
/// for one hash verification.
const DUMMY_PASSWORD: &str = "portal-dummy-password";

/// A freshly issued bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

/// Username/password check and session-token issuance.
pub struct CredentialVerifier {
    store: SharedStore,
    hasher: Arc<dyn PasswordHasher>,
    codec: Arc<dyn TokenCodec>,
    lifetime: Duration,
    dummy_hash: String,
}

impl CredentialVerifier {
    pub fn new(
        store: SharedStore,
        hasher: Arc<dyn PasswordHasher>,
        codec: Arc<dyn TokenCodec>,
        lifetime: Duration,
    ) -> PortalResult<Self> {
        let dummy_hash = hasher.hash(DUMMY_PASSWORD)?;
        Ok(Self {
            store,
            hasher,
            codec,
            lifetime,
            dummy_hash,
        })
    }

    /// Exact, case-sensitive lookup. Unknown user and wrong password both
    /// yield `InvalidCredentials`. Does not look at `is_active`.
    #[instrument(skip(self, password, now), err(Display))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> PortalResult<IssuedToken> {
        let user = self.store.find_user_by_username(username).await?;

        let verified = match &user {
            Some(user) => self.hasher.verify(password, &user.password_hash),
            None => {
                let _ = self.hasher.verify(password, &self.dummy_hash);
                false
            }
        };

        match user {
            Some(user) if verified => self.issue(&user.username, now),
            _ => {
                tracing::warn!(username, "rejected login");
                Err(PortalError::InvalidCredentials)
            }
        }
    }

    /// Sign a token for `subject`, valid from `now` for the configured lifetime.
    pub fn issue(&self, subject: &str, now: DateTime<Utc>) -> PortalResult<IssuedToken> {
        let claims = TokenClaims::issue(subject, now, self.lifetime);
        let access_token = self
            .codec
            .encode(&claims)
            .map_err(|e| PortalError::InvariantViolation(e.to_string()))?;
        Ok(IssuedToken {
            access_token,
            token_type: "bearer",
            expires_at: now + self.lifetime,
        })
    }
}
