use portal_auth::{Principal, User};

/// Authenticated caller of a request: active user plus effective permissions.
///
/// Inserted by the auth middleware; every protected handler extracts it.
#[derive(Debug, Clone)]
pub struct RequestPrincipal(Principal);

impl RequestPrincipal {
    pub fn new(principal: Principal) -> Self {
        Self(principal)
    }

    pub fn principal(&self) -> &Principal {
        &self.0
    }

    pub fn user(&self) -> &User {
        &self.0.user
    }
}
