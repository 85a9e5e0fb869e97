//! Push ingestion handler
//!
//! `POST /events` enqueues a pushed event into the pending-events queue;
//! the push ingest worker claims and processes it asynchronously.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use domain::value_objects::{EventType, OrgId};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use crate::{error::ApiError, state::AppState};

/// Push event request body
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PushEventRequest {
    /// Tenant (or org unit) the event belongs to
    #[validate(range(min = 1))]
    pub org_id: i64,
    /// Event type name
    #[validate(length(min = 1, max = 128))]
    pub event_type: String,
    /// Opaque payload
    pub payload: serde_json::Value,
    /// Free-form source label
    #[validate(length(min = 1, max = 64))]
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "push".to_string()
}

/// Push event acknowledgement
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEventResponse {
    /// Queue row id of the accepted event
    pub id: i64,
    /// Queue status at acceptance
    pub status: &'static str,
}

/// POST /events
#[instrument(skip(state, request), fields(org = request.org_id, event_type = %request.event_type))]
pub async fn push_event(
    State(state): State<AppState>,
    Json(request): Json<PushEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request.validate()?;

    let event_type = EventType::validated(request.event_type.clone())
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let id = state
        .push_queue
        .enqueue(
            OrgId::new(request.org_id),
            event_type,
            request.payload,
            request.source,
        )
        .await?;

    info!(id, "Push event accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(PushEventResponse {
            id,
            status: "pending",
        }),
    ))
}
