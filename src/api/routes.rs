//! Router construction

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::handlers;
use crate::middleware::auth::AuthLayer;
use crate::AppState;

/// Base64 inflation plus room for the JSON envelope
fn body_limit(max_payload_bytes: usize) -> usize {
    max_payload_bytes / 3 * 4 * 2 + 64 * 1024
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let settings = &state.settings;
    let limit = body_limit(settings.resilience.max_payload_bytes);

    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/backends", get(handlers::list_backends))
        .route("/v1/backends/configured", get(handlers::configured_backends))
        .route("/v1/images/generations", post(handlers::generate_image))
        .route("/v1/images/edits", post(handlers::edit_image))
        .layer(DefaultBodyLimit::max(limit));

    if settings.auth.enabled {
        router = router.layer(AuthLayer::new(settings.auth.api_keys.clone()));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
