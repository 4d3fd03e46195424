use std::sync::Arc;

use axum::{Json, extract::Extension};
use serde_json::{Value, json};

use portal_infra::{PortalServices, PublicSettings};

use crate::app::errors::ApiResult;
use crate::context::RequestPrincipal;

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /settings - non-secret configuration (requires manage:settings)
pub async fn settings(
    Extension(services): Extension<Arc<PortalServices>>,
    Extension(caller): Extension<RequestPrincipal>,
) -> ApiResult<Json<PublicSettings>> {
    Ok(Json(services.read_settings(caller.principal())?))
}
