//! HTTP route definitions

use crate::{handlers, middleware, AppState};
use axum::{middleware as axum_middleware, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Create the main router.
///
/// S3 addresses buckets and keys through the whole path and query, so a
/// single fallback handler classifies every request itself.
pub fn create_router(state: Arc<AppState>) -> Router {
    let rate_limiter = state.rate_limiter.clone();

    Router::new()
        .fallback(handlers::handle)
        // Apply middleware; the last layer added runs first
        .layer(axum_middleware::from_fn_with_state(
            rate_limiter,
            middleware::rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
