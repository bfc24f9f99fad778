//! API routes

use axum::{
    routing::{get, post, put},
    Router,
};

use super::handlers::{self, AppState};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))

        // Metrics
        .route("/api/v1/metrics", get(handlers::list_metrics))
        .route("/api/v1/metrics/:key", get(handlers::get_metric))

        // Subscriptions
        .route("/api/v1/users/:user_id/subscriptions", get(handlers::list_subscriptions))
        .route(
            "/api/v1/users/:user_id/subscriptions/:key",
            put(handlers::subscribe).delete(handlers::unsubscribe),
        )

        // Cycles
        .route("/api/v1/cycles", post(handlers::run_cycle))

        .with_state(state)
}
