use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
};
use chrono::Utc;

use portal_auth::Role;
use portal_core::RoleId;
use portal_infra::PortalServices;

use crate::app::dto::{CreateRoleRequest, PageQuery, UpdateRoleRequest};
use crate::app::errors::ApiResult;
use crate::context::RequestPrincipal;

pub async fn list(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<Role>>> {
    Ok(Json(services.roles.list(caller.principal(), page.page()).await?))
}

pub async fn create(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Json(req): Json<CreateRoleRequest>,
) -> ApiResult<(StatusCode, Json<Role>)> {
    // Checked before parsing permission strings.
    caller.principal().require(&[portal_auth::Permission::ManageRoles])?;
    let role = services
        .roles
        .create(caller.principal(), req.into_command()?, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn update(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRoleRequest>,
) -> ApiResult<Json<Role>> {
    caller.principal().require(&[portal_auth::Permission::ManageRoles])?;
    let role = services
        .roles
        .update(caller.principal(), RoleId::new(id), req.into_changes()?, Utc::now())
        .await?;
    Ok(Json(role))
}

pub async fn delete(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    services
        .roles
        .delete(caller.principal(), RoleId::new(id), Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
