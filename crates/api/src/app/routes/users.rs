use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
};
use chrono::Utc;

use portal_core::UserId;
use portal_infra::PortalServices;

use crate::app::dto::{CreateUserRequest, PageQuery, UpdateUserRequest, UserResponse};
use crate::app::errors::ApiResult;
use crate::context::RequestPrincipal;

pub async fn list(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<UserResponse>>> {
    let users = services.users.list(caller.principal(), page.page()).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

pub async fn get(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Path(id): Path<i64>,
) -> ApiResult<Json<UserResponse>> {
    let user = services.users.get(caller.principal(), UserId::new(id)).await?;
    Ok(Json(user.into()))
}

pub async fn create(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<UserResponse>)> {
    let user = services
        .users
        .create(caller.principal(), req.into(), Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

pub async fn update(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> ApiResult<Json<UserResponse>> {
    let user = services
        .users
        .update(caller.principal(), UserId::new(id), req.into(), Utc::now())
        .await?;
    Ok(Json(user.into()))
}

pub async fn delete(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    services
        .users
        .delete(caller.principal(), UserId::new(id), Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
