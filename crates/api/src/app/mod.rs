//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store selection, blob storage and bootstrap
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, extract::DefaultBodyLimit, routing::get};

use portal_infra::PortalServices;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Largest accepted request body (uploads included).
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Build the full HTTP router around already-wired services.
pub fn build_app(services: Arc<PortalServices>) -> Router {
    let protected = routes::protected()
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(
            services.clone(),
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::public().layer(Extension(services)))
        .merge(protected)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
