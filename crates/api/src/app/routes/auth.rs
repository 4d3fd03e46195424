use std::sync::Arc;

use axum::{Form, Json, extract::Extension};
use chrono::Utc;

use portal_infra::PortalServices;

use crate::app::dto::{TokenRequest, TokenResponse, UserResponse};
use crate::app::errors::ApiResult;
use crate::context::RequestPrincipal;

/// POST /auth/token - form-encoded username/password login
pub async fn issue_token(
    Extension(services): Extension<Arc<PortalServices>>,
    Form(req): Form<TokenRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let issued = services
        .credentials
        .authenticate(&req.username, &req.password, Utc::now())
        .await?;
    Ok(Json(TokenResponse {
        access_token: issued.access_token,
        token_type: issued.token_type,
    }))
}

/// GET /auth/me
pub async fn me(Extension(caller): Extension<RequestPrincipal>) -> Json<UserResponse> {
    Json(UserResponse::from(caller.user().clone()))
}
