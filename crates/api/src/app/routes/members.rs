use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::StatusCode,
};
use chrono::Utc;

use portal_core::OrganizationId;
use portal_infra::PortalServices;
use portal_members::{NewOrganization, Organization, OrganizationChanges};

use crate::app::dto::PageQuery;
use crate::app::errors::ApiResult;
use crate::context::RequestPrincipal;

pub async fn list(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<Organization>>> {
    Ok(Json(
        services
            .organizations
            .list(caller.principal(), page.page())
            .await?,
    ))
}

/// GET /members/me - the caller's own organization
pub async fn current(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
) -> ApiResult<Json<Organization>> {
    Ok(Json(services.organizations.current(caller.user()).await?))
}

pub async fn create(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Json(req): Json<NewOrganization>,
) -> ApiResult<(StatusCode, Json<Organization>)> {
    let org = services
        .organizations
        .create(caller.principal(), req, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(org)))
}

pub async fn update(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Path(id): Path<i64>,
    Json(req): Json<OrganizationChanges>,
) -> ApiResult<Json<Organization>> {
    let org = services
        .organizations
        .update(caller.principal(), OrganizationId::new(id), req, Utc::now())
        .await?;
    Ok(Json(org))
}

pub async fn delete(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    services
        .organizations
        .delete(caller.principal(), OrganizationId::new(id), Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
