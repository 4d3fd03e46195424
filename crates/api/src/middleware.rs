use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use portal_infra::{PortalError, PortalServices};

use crate::app::errors::ApiError;
use crate::context::RequestPrincipal;

/// Resolve the bearer token to an active principal and attach it to the request.
pub async fn auth_middleware(
    State(services): State<Arc<PortalServices>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer(req.headers()).ok_or(PortalError::InvalidToken)?;
    let principal = services.authenticate_bearer(token, Utc::now()).await?;

    tracing::debug!(user = %principal.user.username, "request authenticated");
    req.extensions_mut().insert(RequestPrincipal::new(principal));

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
