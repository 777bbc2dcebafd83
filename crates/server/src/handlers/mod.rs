//! HTTP handlers for the Stepflow API.

pub mod executions;
pub mod health;

pub use health::{api_health, health_check};

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router with all routes.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let health_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(api_health));

    let workflow_routes = Router::new().route(
        "/api/workflows/{workflow_id}/executions",
        post(executions::start).get(executions::history),
    );

    let execution_routes = Router::new()
        .route("/api/executions/{execution_id}", get(executions::get))
        .route(
            "/api/executions/{execution_id}/status",
            get(executions::get_status),
        )
        .route(
            "/api/executions/{execution_id}/cancel",
            post(executions::cancel),
        );

    Router::new()
        .merge(health_routes)
        .merge(workflow_routes)
        .merge(execution_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
