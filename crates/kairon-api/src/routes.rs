//! Router setup with all API routes and middleware.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.executor.services().config.server.body_limit_bytes;

    Router::new()
        .route("/webhook", post(handlers::webhook))
        .route("/health", get(handlers::health))
        .route("/actions", get(handlers::list_actions))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
