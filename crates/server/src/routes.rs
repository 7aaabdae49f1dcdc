//! Route configuration.

use crate::handlers;
use crate::metrics::{metrics_handler, register_metrics};
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.server.max_upload_size).unwrap_or(usize::MAX);

    let mut router = Router::new()
        .route(
            "/upload",
            post(handlers::upload_file).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/chunks/{file_id}", get(handlers::get_chunks))
        .route("/health", get(handlers::health_check))
        .route("/process", post(handlers::process_payload));

    // Unauthenticated; restrict to the scraper network when exposed.
    if state.config.server.metrics_enabled {
        register_metrics();
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
