//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let max_upload_bytes = state.config.publish.max_upload_bytes;

    let mut router = Router::new()
        // Client protocol
        .route("/manifest", get(handlers::get_manifest))
        .route("/assets", get(handlers::get_asset))
        // Publishing
        .route(
            "/publish-update",
            post(handlers::publish_update).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/health", get(handlers::health_check));

    // SECURITY: restrict /metrics to the scraper's network when enabled.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
