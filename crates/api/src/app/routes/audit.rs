use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
};

use portal_audit::AuditLog;
use portal_infra::PortalServices;

use crate::app::dto::PageQuery;
use crate::app::errors::ApiResult;
use crate::context::RequestPrincipal;

/// GET /audit - newest first (requires view:audit_logs)
pub async fn list(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<AuditLog>>> {
    Ok(Json(services.audit.list(caller.principal(), page.page()).await?))
}
