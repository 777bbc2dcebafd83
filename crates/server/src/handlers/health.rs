//! Health check endpoints for the Stepflow API.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::db::ping;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    /// Health status ("ok" or "unhealthy")
    pub status: String,
}

/// Detailed health check response for the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiHealthResponse {
    /// Overall health status
    pub status: String,

    /// Execution store backend
    pub store: String,

    /// Database connectivity status, when the store is PostgreSQL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Executions currently running
    pub live_executions: usize,

    /// Settled executions whose final state the store has not accepted yet
    pub unsaved_executions: usize,

    /// Server uptime in seconds
    pub uptime_seconds: u64,

    /// Server version
    pub version: String,
}

/// Basic health check endpoint.
///
/// `GET /health`
///
/// Returns quickly and touches nothing but the process, so it suits load
/// balancer checks.
pub async fn health_check() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "ok".to_string(),
    })
}

/// Detailed API health check endpoint.
///
/// `GET /api/health`
///
/// - `200 OK` when the execution store is reachable
/// - `503 Service Unavailable` when the database does not answer
pub async fn api_health(State(state): State<AppState>) -> (StatusCode, Json<ApiHealthResponse>) {
    let db_healthy = match &state.db {
        Some(pool) => Some(ping(pool).await),
        None => None,
    };

    let healthy = db_healthy.unwrap_or(true);
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = ApiHealthResponse {
        status: if healthy { "ok" } else { "unhealthy" }.to_string(),
        store: state.config.store.as_str().to_string(),
        database: db_healthy.map(|ok| if ok { "connected" } else { "disconnected" }.to_string()),
        live_executions: state.engine.live_count(),
        unsaved_executions: state.engine.unsaved_count(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
