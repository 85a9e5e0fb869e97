//! Dead letter queue handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::Utc;
use domain::entities::{DlqEntry, DlqStatus};
use domain::value_objects::OrgId;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// DLQ entry summary for API responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqResponse {
    pub id: String,
    pub trace_id: String,
    pub integration_id: String,
    pub org_id: i64,
    pub error: String,
    pub error_category: String,
    pub status: String,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
    pub created_at: String,
}

impl From<DlqEntry> for DlqResponse {
    fn from(entry: DlqEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            trace_id: entry.trace_id.to_string(),
            integration_id: entry.integration_id.to_string(),
            org_id: entry.org_id.as_i64(),
            error: entry.error.message,
            error_category: entry.error.category.as_str().to_string(),
            status: entry.status.as_str().to_string(),
            retry_count: entry.retry_count,
            resolved_at: entry.resolved_at.map(|at| at.to_rfc3339()),
            resolution_note: entry.resolution_note,
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// DLQ list query parameters
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDlqQuery {
    pub org_id: Option<i64>,
    pub status: Option<String>,
    pub limit: Option<u32>,
}

/// GET /v1/dlq
#[instrument(skip(state))]
pub async fn list_dlq(
    State(state): State<AppState>,
    Query(query): Query<ListDlqQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<DlqStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let entries = state
        .dlq
        .list(
            query.org_id.map(OrgId::new),
            status,
            query.limit.unwrap_or(100),
        )
        .await?;

    let body: Vec<DlqResponse> = entries.into_iter().map(DlqResponse::from).collect();
    Ok(Json(body))
}

/// Resolve request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub org_id: i64,
    pub note: String,
}

/// POST /v1/dlq/{id}/resolve
#[instrument(skip(state, request), fields(org = request.org_id))]
pub async fn resolve_dlq_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::BadRequest(format!("invalid id: {id}")))?;
    let org_id = OrgId::new(request.org_id);

    let mut entry = state
        .dlq
        .get(org_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("dlq entry {id}")))?;

    if entry.status == DlqStatus::Resolved {
        return Err(ApiError::Conflict("entry is already resolved".to_string()));
    }

    entry.resolve(request.note, Utc::now());
    state.dlq.update(&entry).await?;

    info!(entry = %id, "DLQ entry resolved");
    Ok(Json(DlqResponse::from(entry)))
}

/// Retry request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryDlqRequest {
    pub org_id: i64,
}

/// POST /v1/dlq/{id}/retry: re-queue the underlying delivery
#[instrument(skip(state, request), fields(org = request.org_id))]
pub async fn retry_dlq_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RetryDlqRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::BadRequest(format!("invalid id: {id}")))?;
    let org_id = OrgId::new(request.org_id);

    let mut entry = state
        .dlq
        .get(org_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("dlq entry {id}")))?;

    if !entry.begin_retry(Utc::now()) {
        state.dlq.update(&entry).await?;
        return Err(ApiError::Conflict(
            "manual retries exhausted, entry abandoned".to_string(),
        ));
    }

    state.retry.requeue(org_id, entry.trace_id).await?;
    state.dlq.update(&entry).await?;

    info!(entry = %id, trace = %entry.trace_id, "DLQ entry re-queued");
    Ok(Json(DlqResponse::from(entry)))
}
