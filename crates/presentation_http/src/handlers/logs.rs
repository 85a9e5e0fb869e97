//! Execution log handlers
//!
//! Read-only listing plus bulk retry and deletion for the admin layer.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use domain::entities::{ExecutionLog, ExecutionStatus};
use domain::value_objects::{OrgId, TraceId};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use application::ports::LogQuery;

use crate::{error::ApiError, state::AppState};

/// Execution log summary for API responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogResponse {
    pub trace_id: String,
    pub org_id: i64,
    pub integration_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub trigger: String,
    pub status: ExecutionStatus,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl From<ExecutionLog> for LogResponse {
    fn from(log: ExecutionLog) -> Self {
        Self {
            trace_id: log.trace_id.to_string(),
            org_id: log.org_id.as_i64(),
            integration_id: log.integration_id.to_string(),
            event_id: log.event_id.map(|id| id.as_str().to_string()),
            trigger: log.trigger.as_str().to_string(),
            status: log.status,
            attempt_count: log.attempt_count,
            response_status: log.response_status,
            error: log.error.map(|e| e.to_string()),
            started_at: log.started_at.to_rfc3339(),
            finished_at: log.finished_at.map(|at| at.to_rfc3339()),
            duration_ms: log.duration_ms,
        }
    }
}

/// Log list query parameters
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListLogsQuery {
    pub org_id: i64,
    pub status: Option<String>,
    pub limit: Option<u32>,
}

/// GET /v1/logs?orgId=…
#[instrument(skip(state))]
pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<ListLogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ExecutionStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let logs = state
        .logs
        .query(&LogQuery {
            org_id: Some(OrgId::new(query.org_id)),
            integration_id: None,
            status,
            limit: query.limit,
        })
        .await?;

    let body: Vec<LogResponse> = logs.into_iter().map(LogResponse::from).collect();
    Ok(Json(body))
}

/// Bulk retry request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRetryRequest {
    pub org_id: i64,
    pub trace_ids: Vec<String>,
}

/// Bulk retry outcome
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRetryResponse {
    pub requeued: u32,
    pub failed: Vec<String>,
}

/// POST /v1/logs/retry: re-queue deliveries for the retry engine
#[instrument(skip(state, request), fields(org = request.org_id, count = request.trace_ids.len()))]
pub async fn bulk_retry(
    State(state): State<AppState>,
    Json(request): Json<BulkRetryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let org_id = OrgId::new(request.org_id);
    let mut requeued = 0u32;
    let mut failed = Vec::new();

    for raw in &request.trace_ids {
        let Ok(trace_id) = TraceId::parse(raw) else {
            failed.push(raw.clone());
            continue;
        };
        match state.retry.requeue(org_id, trace_id).await {
            Ok(()) => requeued += 1,
            Err(err) => {
                warn!(trace = %trace_id, error = %err, "Bulk retry entry failed");
                failed.push(raw.clone());
            },
        }
    }

    info!(requeued, failed = failed.len(), "Bulk retry submitted");
    Ok(Json(BulkRetryResponse { requeued, failed }))
}

/// Tenant scope query parameter
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgScope {
    pub org_id: i64,
}

/// DELETE /v1/logs/{trace_id}?orgId=…
#[instrument(skip(state))]
pub async fn delete_log(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
    Query(query): Query<OrgScope>,
) -> Result<impl IntoResponse, ApiError> {
    let trace_id = TraceId::parse(&trace_id)
        .map_err(|_| ApiError::BadRequest(format!("invalid trace id: {trace_id}")))?;
    state.logs.delete(OrgId::new(query.org_id), trace_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
