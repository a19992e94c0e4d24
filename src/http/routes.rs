use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Recording control
        .route("/recording/start", post(handlers::start_recording))
        .route("/recording/stop", post(handlers::stop_recording))
        .route("/recording/status", get(handlers::get_status))
        .route("/recording/events", get(handlers::state_events))
        // Simulated tabs
        .route("/contexts", post(handlers::open_context))
        .route("/contexts/:context_id", delete(handlers::close_context))
        .route(
            "/contexts/:context_id/navigate",
            post(handlers::navigate_context),
        )
        // Permission settings surface
        .route("/settings/microphone", post(handlers::request_microphone))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
