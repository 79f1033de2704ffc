use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::ApiState;

pub fn create_router(state: Arc<ApiState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.request_timeout()));

    Router::new()
        .route("/api/uploads/status", get(handlers::get_upload_status))
        .route(
            "/api/uploads/reservations",
            post(handlers::reserve_upload_slot),
        )
        .route("/api/uploads/finalize", post(handlers::finalize_upload))
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(middleware)
}
