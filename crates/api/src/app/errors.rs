use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use portal_auth::PermissionError;
use portal_core::DomainError;
use portal_infra::PortalError;

/// Handler error: a service failure rendered as `{ "error": kind, "message": ... }`.
#[derive(Debug)]
pub struct ApiError(pub PortalError);

impl From<PortalError> for ApiError {
    fn from(err: PortalError) -> Self {
        ApiError(err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError(err.into())
    }
}

impl From<PermissionError> for ApiError {
    fn from(err: PermissionError) -> Self {
        ApiError(err.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn status_for(err: &PortalError) -> StatusCode {
    match err {
        PortalError::InvalidCredentials | PortalError::InvalidToken => StatusCode::UNAUTHORIZED,
        PortalError::InactiveAccount => StatusCode::BAD_REQUEST,
        PortalError::PermissionDenied(_) | PortalError::Forbidden { .. } => StatusCode::FORBIDDEN,
        PortalError::NotFound { .. } => StatusCode::NOT_FOUND,
        PortalError::Conflict { .. }
        | PortalError::UnknownOrganization { .. }
        | PortalError::Validation(_) => StatusCode::BAD_REQUEST,
        PortalError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        PortalError::InvariantViolation(_)
        | PortalError::Blob(_)
        | PortalError::Password(_)
        | PortalError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::error!(error = %err, kind = err.kind(), "request failed");
        }

        let mut response = match err.missing_permissions() {
            Some(missing) => (
                status,
                axum::Json(json!({
                    "error": err.kind(),
                    "message": err.to_string(),
                    "missing_permissions": missing,
                })),
            )
                .into_response(),
            None => json_error(status, err.kind(), err.to_string()),
        };

        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
