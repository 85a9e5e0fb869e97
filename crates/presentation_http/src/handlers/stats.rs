//! Operational stats handler

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use domain::value_objects::OrgId;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use application::services::GatewayStats;
use infrastructure::TaskStats;

use crate::{error::ApiError, state::AppState};

/// Stats query parameters
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    /// Restrict execution counts to one tenant
    pub org_id: Option<i64>,
}

/// Combined stats response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    /// Delivery engine counters
    #[serde(flatten)]
    pub gateway: GatewayStats,
    /// Periodic job counters
    pub tasks: Vec<TaskStats>,
}

/// GET /v1/stats
#[instrument(skip(state))]
pub async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let gateway = state.stats.snapshot(query.org_id.map(OrgId::new)).await?;
    Ok(Json(StatsResponse {
        gateway,
        tasks: state.tasks.stats(),
    }))
}
