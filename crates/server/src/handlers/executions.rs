//! Execution API handlers.
//!
//! Starting, observing and canceling workflow executions.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use stepflow_engine::{ExecutionProgress, ExecutionRecord};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Body of a start request. The body itself is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartExecutionRequest {
    #[serde(default, alias = "triggeredBy")]
    pub triggered_by: Option<String>,
}

/// Response for a started execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartExecutionResponse {
    pub execution_id: Uuid,
}

/// Query parameters for execution history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Response for a cancel request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub execution_id: Uuid,
    pub message: String,
}

const DEFAULT_TRIGGER: &str = "api";

/// Start an execution of a workflow.
///
/// POST /api/workflows/{workflow_id}/executions
pub async fn start(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    body: Bytes,
) -> AppResult<(StatusCode, Json<StartExecutionResponse>)> {
    let request: StartExecutionRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartExecutionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("invalid request body: {e}")))?
    };
    let triggered_by = request
        .triggered_by
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TRIGGER.to_string());

    let execution_id = state
        .engine
        .start_execution(&workflow_id, &triggered_by)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(StartExecutionResponse { execution_id })))
}

/// Executions of a workflow, most recent first.
///
/// GET /api/workflows/{workflow_id}/executions
pub async fn history(
    State(state): State<AppState>,
    Path(workflow_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<ExecutionRecord>>> {
    let records = state
        .engine
        .list_execution_history(&workflow_id, query.limit)
        .await?;
    Ok(Json(records))
}

/// Full execution record including every step result.
///
/// GET /api/executions/{execution_id}
pub async fn get(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> AppResult<Json<ExecutionRecord>> {
    let record = state.engine.get_execution_details(execution_id).await?;
    Ok(Json(record))
}

/// Progress summary.
///
/// GET /api/executions/{execution_id}/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> AppResult<Json<ExecutionProgress>> {
    let progress = state.engine.get_execution_status(execution_id).await?;
    Ok(Json(progress))
}

/// Request cancellation. Takes effect at the running step's next checkpoint.
///
/// POST /api/executions/{execution_id}/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(execution_id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<CancelResponse>)> {
    state.engine.cancel_execution(execution_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            execution_id,
            message: "Execution cancellation requested".to_string(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_accepts_camel_case() {
        let request: StartExecutionRequest =
            serde_json::from_str(r#"{"triggeredBy":"scheduler"}"#).unwrap();
        assert_eq!(request.triggered_by.as_deref(), Some("scheduler"));
    }

    #[test]
    fn test_history_query_default() {
        let query = HistoryQuery::default();
        assert!(query.limit.is_none());
    }
}
