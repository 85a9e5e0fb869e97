//! Route definitions

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::{handlers, middleware::request_id_middleware, state::AppState};

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        // Push ingestion
        .route("/events", post(handlers::events::push_event))
        // Integration CRUD (v1)
        .route(
            "/v1/integrations",
            get(handlers::integrations::list_integrations)
                .post(handlers::integrations::create_integration),
        )
        .route(
            "/v1/integrations/{id}",
            get(handlers::integrations::get_integration)
                .put(handlers::integrations::update_integration)
                .delete(handlers::integrations::delete_integration),
        )
        // Execution logs (v1)
        .route("/v1/logs", get(handlers::logs::list_logs))
        .route("/v1/logs/retry", post(handlers::logs::bulk_retry))
        .route("/v1/logs/{trace_id}", axum::routing::delete(handlers::logs::delete_log))
        // Scheduled deliveries (v1)
        .route("/v1/scheduled", get(handlers::scheduled::list_scheduled))
        .route(
            "/v1/scheduled/cancel-by-match",
            post(handlers::scheduled::cancel_by_match),
        )
        .route(
            "/v1/scheduled/{id}/cancel",
            post(handlers::scheduled::cancel_scheduled),
        )
        // Dead letter queue (v1)
        .route("/v1/dlq", get(handlers::dlq::list_dlq))
        .route("/v1/dlq/{id}/resolve", post(handlers::dlq::resolve_dlq_entry))
        .route("/v1/dlq/{id}/retry", post(handlers::dlq::retry_dlq_entry))
        // Stats (v1)
        .route("/v1/stats", get(handlers::stats::get_stats))
        // Middleware and state
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
