//! Axum router configuration with middleware.
//!
//! Routes:
//! - `POST /webhooks/{namespace}/{name}` (other methods get 405)
//! - `GET /healthz`, `GET /readyz`
//!
//! Middleware: body size cap, panic catcher, request tracing.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use taskgate_core::webhook::WEBHOOK_PATH_PREFIX;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.config.server.max_body_bytes;

    Router::new()
        .route(
            &format!("{WEBHOOK_PATH_PREFIX}/{{*path}}"),
            post(handlers::webhook::receive_webhook),
        )
        .route("/healthz", get(handlers::health::healthz))
        .route("/readyz", get(handlers::health::readyz))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
