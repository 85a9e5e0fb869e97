//! Integration configuration CRUD handlers
//!
//! The admin/UI layer manages integrations through these endpoints. The
//! signing secret is write-only: responses only say whether one is set.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use domain::entities::{
    AuthSpec, DeliveryMode, Direction, HttpMethod, Integration, IntegrationScope, ScheduleSpec,
    SigningSpec, TransformSpec,
};
use domain::value_objects::{EventType, IntegrationId, OrgId, OrgUnitId};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use crate::{error::ApiError, state::AppState};

/// Integration summary for API responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationResponse {
    pub id: String,
    pub org_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_unit: Option<i64>,
    pub name: String,
    pub event_type: String,
    pub direction: Option<Direction>,
    pub is_active: bool,
    pub target_url: String,
    pub method: HttpMethod,
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub transform: TransformSpec,
    pub signing_enabled: bool,
    pub has_signing_secret: bool,
    pub delivery_mode: DeliveryMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,
    pub scope: IntegrationScope,
    pub excluded_org_units: Vec<i64>,
    pub circuit_state: String,
    pub consecutive_failures: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Integration> for IntegrationResponse {
    fn from(integration: Integration) -> Self {
        Self {
            id: integration.id.to_string(),
            org_id: integration.org_id.as_i64(),
            org_unit: integration.org_unit.map(OrgUnitId::as_i64),
            name: integration.name,
            event_type: integration.event_type.as_str().to_string(),
            direction: integration.direction,
            is_active: integration.is_active,
            target_url: integration.target_url,
            method: integration.method,
            timeout_ms: integration.timeout_ms,
            retry_count: integration.retry_count,
            transform: integration.transform,
            signing_enabled: integration.signing.enabled,
            has_signing_secret: integration.signing.secret.is_some(),
            delivery_mode: integration.delivery_mode,
            schedule: integration.schedule,
            scope: integration.scope,
            excluded_org_units: integration
                .excluded_org_units
                .into_iter()
                .map(OrgUnitId::as_i64)
                .collect(),
            circuit_state: integration.breaker.state.as_str().to_string(),
            consecutive_failures: integration.breaker.consecutive_failures,
            created_at: integration.created_at.to_rfc3339(),
            updated_at: integration.updated_at.to_rfc3339(),
        }
    }
}

/// Create/update request body
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationRequest {
    #[validate(range(min = 1))]
    pub org_id: i64,
    pub org_unit: Option<i64>,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(min = 1, max = 128))]
    pub event_type: String,
    pub direction: Option<Direction>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[validate(url)]
    pub target_url: String,
    #[serde(default = "default_method")]
    pub method: HttpMethod,
    #[serde(default)]
    pub auth: AuthSpec,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default)]
    pub transform: TransformSpec,
    #[serde(default)]
    pub signing_enabled: bool,
    /// Write-only; omit to keep the current secret on update
    pub signing_secret: Option<String>,
    #[serde(default = "default_mode")]
    pub delivery_mode: DeliveryMode,
    pub schedule: Option<ScheduleSpec>,
    #[serde(default = "default_scope")]
    pub scope: IntegrationScope,
    #[serde(default)]
    pub excluded_org_units: Vec<i64>,
}

const fn default_active() -> bool {
    true
}

const fn default_method() -> HttpMethod {
    HttpMethod::Post
}

const fn default_timeout_ms() -> u64 {
    domain::entities::integration::DEFAULT_TIMEOUT_MS
}

const fn default_retry_count() -> u32 {
    domain::entities::integration::DEFAULT_RETRY_COUNT
}

const fn default_mode() -> DeliveryMode {
    DeliveryMode::Immediate
}

const fn default_scope() -> IntegrationScope {
    IntegrationScope::EntityOnly
}

impl IntegrationRequest {
    fn validate_semantics(&self) -> Result<(), ApiError> {
        if let Some(schedule) = &self.schedule {
            schedule
                .validate()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        }
        if self.delivery_mode.is_scheduled() && self.schedule.is_none() {
            return Err(ApiError::BadRequest(format!(
                "delivery mode {} requires a scheduling descriptor",
                self.delivery_mode.as_str()
            )));
        }
        if self.signing_enabled && self.signing_secret.is_none() {
            return Err(ApiError::BadRequest(
                "signing_enabled requires a signing_secret".to_string(),
            ));
        }
        Ok(())
    }

    fn apply(self, integration: &mut Integration) {
        integration.org_unit = self.org_unit.map(OrgUnitId::new);
        integration.name = self.name;
        integration.event_type = EventType::new(self.event_type);
        integration.direction = self.direction;
        integration.is_active = self.is_active;
        integration.target_url = self.target_url;
        integration.method = self.method;
        integration.auth = self.auth;
        integration.timeout_ms = self.timeout_ms;
        integration.retry_count = self.retry_count;
        integration.transform = self.transform;
        integration.signing.enabled = self.signing_enabled;
        if let Some(secret) = self.signing_secret {
            integration.signing = SigningSpec {
                enabled: self.signing_enabled,
                secret: Some(secrecy::SecretString::from(secret)),
            };
        }
        integration.delivery_mode = self.delivery_mode;
        integration.schedule = self.schedule;
        integration.scope = self.scope;
        integration.excluded_org_units =
            self.excluded_org_units.into_iter().map(OrgUnitId::new).collect();
        integration.updated_at = chrono::Utc::now();
    }
}

/// List query parameters
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub org_id: i64,
    pub event_type: Option<String>,
}

/// GET /v1/integrations?orgId=…
#[instrument(skip(state))]
pub async fn list_integrations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let event_type = query.event_type.map(EventType::new);
    let integrations = state
        .integrations
        .list_for_org(OrgId::new(query.org_id), event_type.as_ref())
        .await?;
    let body: Vec<IntegrationResponse> =
        integrations.into_iter().map(IntegrationResponse::from).collect();
    Ok(Json(body))
}

/// GET /v1/integrations/{id}?orgId=…
#[instrument(skip(state))]
pub async fn get_integration(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OrgScope>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let integration = state
        .integrations
        .get(OrgId::new(query.org_id), id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("integration {id}")))?;
    Ok(Json(IntegrationResponse::from(integration)))
}

/// Tenant scope query parameter
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgScope {
    pub org_id: i64,
}

/// POST /v1/integrations
#[instrument(skip(state, request), fields(org = request.org_id, name = %request.name))]
pub async fn create_integration(
    State(state): State<AppState>,
    Json(request): Json<IntegrationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request.validate()?;
    request.validate_semantics()?;

    let mut integration = Integration::new(
        OrgId::new(request.org_id),
        request.name.clone(),
        EventType::new(request.event_type.clone()),
        request.target_url.clone(),
    );
    request.apply(&mut integration);
    state.integrations.upsert(&integration).await?;

    info!(id = %integration.id, "Integration created");
    Ok((
        StatusCode::CREATED,
        Json(IntegrationResponse::from(integration)),
    ))
}

/// PUT /v1/integrations/{id}
///
/// The owning tenant is immutable: the request's org id must match.
#[instrument(skip(state, request), fields(org = request.org_id))]
pub async fn update_integration(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<IntegrationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request.validate()?;
    request.validate_semantics()?;

    let id = parse_id(&id)?;
    let mut integration = state
        .integrations
        .get(OrgId::new(request.org_id), id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("integration {id}")))?;

    request.apply(&mut integration);
    state.integrations.upsert(&integration).await?;

    info!(id = %integration.id, "Integration updated");
    Ok(Json(IntegrationResponse::from(integration)))
}

/// DELETE /v1/integrations/{id}?orgId=…
#[instrument(skip(state))]
pub async fn delete_integration(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OrgScope>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    state.integrations.delete(OrgId::new(query.org_id), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_id(raw: &str) -> Result<IntegrationId, ApiError> {
    IntegrationId::parse(raw).map_err(|_| ApiError::BadRequest(format!("invalid id: {raw}")))
}
