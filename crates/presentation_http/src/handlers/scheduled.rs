//! Scheduled delivery handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use domain::entities::{CancellationMatch, ScheduleStatus, ScheduledDelivery};
use domain::value_objects::OrgId;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use application::ports::ScheduleQuery;

use crate::{error::ApiError, state::AppState};

/// Scheduled delivery summary for API responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledResponse {
    pub id: String,
    pub integration_id: String,
    pub org_id: i64,
    pub scheduled_for: String,
    pub status: ScheduleStatus,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurrence: Option<u32>,
}

impl From<ScheduledDelivery> for ScheduledResponse {
    fn from(entry: ScheduledDelivery) -> Self {
        Self {
            id: entry.id.to_string(),
            integration_id: entry.integration_id.to_string(),
            org_id: entry.org_id.as_i64(),
            scheduled_for: entry.scheduled_for.to_rfc3339(),
            status: entry.status,
            attempt_count: entry.attempt_count,
            delivered_at: entry.delivered_at.map(|at| at.to_rfc3339()),
            last_error: entry.last_error,
            occurrence: entry.recurrence.map(|r| r.occurrence),
        }
    }
}

/// Scheduled list query parameters
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListScheduledQuery {
    pub org_id: i64,
    pub status: Option<String>,
    pub limit: Option<u32>,
}

/// GET /v1/scheduled?orgId=…
#[instrument(skip(state))]
pub async fn list_scheduled(
    State(state): State<AppState>,
    Query(query): Query<ListScheduledQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ScheduleStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;

    let entries = state
        .scheduled
        .query(&ScheduleQuery {
            org_id: Some(OrgId::new(query.org_id)),
            status,
            limit: query.limit,
        })
        .await?;

    let body: Vec<ScheduledResponse> =
        entries.into_iter().map(ScheduledResponse::from).collect();
    Ok(Json(body))
}

/// Tenant scope request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub org_id: i64,
}

/// POST /v1/scheduled/{id}/cancel
#[instrument(skip(state, request), fields(org = request.org_id))]
pub async fn cancel_scheduled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CancelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::BadRequest(format!("invalid id: {id}")))?;
    let org_id = OrgId::new(request.org_id);

    let mut entry = state
        .scheduled
        .get(org_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("scheduled delivery {id}")))?;

    if entry.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "entry is already {}",
            entry.status
        )));
    }

    entry.cancel(Utc::now());
    state.scheduled.update(&entry).await?;

    info!(entry = %id, "Scheduled delivery cancelled");
    Ok(Json(ScheduledResponse::from(entry)))
}

/// Cancellation-by-match request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelByMatchRequest {
    pub org_id: i64,
    pub patient_rid: i64,
    pub scheduled_date_time: DateTime<Utc>,
}

/// Cancellation-by-match outcome
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelByMatchResponse {
    pub cancelled: u64,
}

/// POST /v1/scheduled/cancel-by-match
#[instrument(skip(state, request), fields(org = request.org_id, patient = request.patient_rid))]
pub async fn cancel_by_match(
    State(state): State<AppState>,
    Json(request): Json<CancelByMatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let cancelled = state
        .scheduler
        .cancel_by_match(
            OrgId::new(request.org_id),
            &CancellationMatch {
                patient_rid: request.patient_rid,
                scheduled_at: request.scheduled_date_time,
            },
        )
        .await?;

    Ok(Json(CancelByMatchResponse { cancelled }))
}
