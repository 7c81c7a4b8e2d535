use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        // Student attempts (require JWT)
        .nest(
            "/api/v1/attempts",
            attempts_routes()
                .route_layer(middleware::from_fn(
                    middlewares::auth::student_guard_middleware,
                ))
                .route_layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::auth::auth_middleware,
                )),
        )
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn attempts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start", post(handlers::attempts::start_attempt))
        .route("/auto-save", post(handlers::attempts::auto_save))
        .route("/status", get(handlers::attempts::attempt_status))
        .route("/submit", post(handlers::attempts::submit_attempt))
        .route("/{quiz_id}/stream", get(handlers::sse::attempt_stream))
}
