use axum::{
    Router,
    routing::{get, post, put},
};

pub mod audit;
pub mod auth;
pub mod files;
pub mod members;
pub mod roles;
pub mod system;
pub mod users;

/// Endpoints reachable without a bearer token.
pub fn public() -> Router {
    Router::new().route("/auth/token", post(auth::issue_token))
}

/// Endpoints behind the auth middleware.
pub fn protected() -> Router {
    Router::new()
        .route("/auth/me", get(auth::me))
        .route("/users", get(users::list).post(users::create))
        .route("/users/:id", get(users::get).put(users::update).delete(users::delete))
        .route("/roles", get(roles::list).post(roles::create))
        .route("/roles/:id", put(roles::update).delete(roles::delete))
        .route("/members", get(members::list).post(members::create))
        .route("/members/me", get(members::current))
        .route("/members/:id", put(members::update).delete(members::delete))
        .route("/files", get(files::list).post(files::upload))
        .route("/files/:id", get(files::download).delete(files::delete))
        .route("/files/:id/share", post(files::share))
        .route("/audit", get(audit::list))
        .route("/settings", get(system::settings))
}
