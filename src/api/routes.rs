//! API route definitions.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/", get(handlers::index))
        .route("/api/decrypt", post(handlers::decrypt))
        .route("/api/contacts", get(handlers::list_contacts))
        .route("/api/export", post(handlers::export))
        .route("/api/status", get(handlers::status))
        .route("/api/reset", post(handlers::reset))
        .layer(trace_layer)
        .with_state(state)
}
