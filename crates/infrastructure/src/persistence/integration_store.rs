//! SQLite integration store

use async_trait::async_trait;
use chrono::Utc;
use domain::entities::{
    AuthSpec, BreakerState, Integration, ScheduleSpec, SigningSpec, TransformSpec,
};
use domain::value_objects::{EventType, IntegrationId, OrgId, OrgUnitId};
use secrecy::{ExposeSecret, SecretString};
use sqlx::SqlitePool;
use tracing::{info, instrument};

use application::ApplicationError;
use application::ports::IntegrationStore;

use super::{parse_datetime, parse_datetime_opt, store_err};

/// Row type for integration queries
#[derive(sqlx::FromRow)]
struct IntegrationRow {
    id: String,
    org_id: i64,
    org_unit: Option<i64>,
    name: String,
    event_type: String,
    direction: Option<String>,
    is_active: i64,
    target_url: String,
    method: String,
    auth: String,
    timeout_ms: i64,
    retry_count: i64,
    transform: String,
    signing_enabled: i64,
    signing_secret: Option<String>,
    delivery_mode: String,
    schedule: Option<String>,
    scope: String,
    excluded_org_units: String,
    circuit_state: String,
    consecutive_failures: i64,
    circuit_opened_at: Option<String>,
    last_failure_at: Option<String>,
    last_success_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl IntegrationRow {
    #[allow(clippy::cast_sign_loss, clippy::wrong_self_convention)]
    fn to_entity(self) -> Result<Integration, ApplicationError> {
        let auth: AuthSpec = serde_json::from_str(&self.auth)
            .map_err(|e| ApplicationError::Internal(format!("corrupt auth column: {e}")))?;
        let transform: TransformSpec = serde_json::from_str(&self.transform)
            .map_err(|e| ApplicationError::Internal(format!("corrupt transform column: {e}")))?;
        let schedule: Option<ScheduleSpec> = self
            .schedule
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| ApplicationError::Internal(format!("corrupt schedule column: {e}")))?;
        let excluded: Vec<i64> = serde_json::from_str(&self.excluded_org_units)
            .map_err(|e| ApplicationError::Internal(format!("corrupt exclusions column: {e}")))?;

        Ok(Integration {
            id: IntegrationId::parse(&self.id)
                .map_err(|e| ApplicationError::Internal(format!("corrupt integration id: {e}")))?,
            org_id: OrgId::new(self.org_id),
            org_unit: self.org_unit.map(OrgUnitId::new),
            name: self.name,
            event_type: EventType::new(self.event_type),
            direction: self.direction.as_deref().and_then(|raw| raw.parse().ok()),
            is_active: self.is_active != 0,
            target_url: self.target_url,
            method: self
                .method
                .parse()
                .map_err(ApplicationError::Internal)?,
            auth,
            timeout_ms: self.timeout_ms as u64,
            retry_count: self.retry_count as u32,
            transform,
            signing: SigningSpec {
                enabled: self.signing_enabled != 0,
                secret: self.signing_secret.map(SecretString::from),
            },
            delivery_mode: self
                .delivery_mode
                .parse()
                .map_err(ApplicationError::Internal)?,
            schedule,
            scope: self.scope.parse().map_err(ApplicationError::Internal)?,
            excluded_org_units: excluded.into_iter().map(OrgUnitId::new).collect(),
            breaker: BreakerState {
                state: self
                    .circuit_state
                    .parse()
                    .map_err(ApplicationError::Internal)?,
                consecutive_failures: self.consecutive_failures as u32,
                opened_at: parse_datetime_opt(self.circuit_opened_at.as_deref()),
                last_failure_at: parse_datetime_opt(self.last_failure_at.as_deref()),
                last_success_at: parse_datetime_opt(self.last_success_at.as_deref()),
            },
            created_at: parse_datetime(&self.created_at),
            updated_at: parse_datetime(&self.updated_at),
        })
    }
}

const SELECT_COLUMNS: &str = "id, org_id, org_unit, name, event_type, direction, is_active, \
     target_url, method, auth, timeout_ms, retry_count, transform, signing_enabled, \
     signing_secret, delivery_mode, schedule, scope, excluded_org_units, circuit_state, \
     consecutive_failures, circuit_opened_at, last_failure_at, last_success_at, \
     created_at, updated_at";

/// Integration configuration store backed by SQLite
#[derive(Debug, Clone)]
pub struct SqliteIntegrationStore {
    pool: SqlitePool,
}

impl SqliteIntegrationStore {
    /// Create the store over a pool
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IntegrationStore for SqliteIntegrationStore {
    async fn get(
        &self,
        org_id: OrgId,
        id: IntegrationId,
    ) -> Result<Option<Integration>, ApplicationError> {
        let row: Option<IntegrationRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM integration_configs WHERE org_id = $1 AND id = $2"
        ))
        .bind(org_id.as_i64())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(IntegrationRow::to_entity).transpose()
    }

    async fn list_for_org<'a>(
        &'a self,
        org_id: OrgId,
        event_type: Option<&'a EventType>,
    ) -> Result<Vec<Integration>, ApplicationError> {
        let rows: Vec<IntegrationRow> = match event_type {
            Some(event_type) => {
                sqlx::query_as(&format!(
                    "SELECT {SELECT_COLUMNS} FROM integration_configs \
                     WHERE org_id = $1 AND (event_type = $2 OR event_type = '*') \
                     ORDER BY updated_at DESC, id ASC"
                ))
                .bind(org_id.as_i64())
                .bind(event_type.as_str())
                .fetch_all(&self.pool)
                .await
            },
            None => {
                sqlx::query_as(&format!(
                    "SELECT {SELECT_COLUMNS} FROM integration_configs \
                     WHERE org_id = $1 ORDER BY updated_at DESC, id ASC"
                ))
                .bind(org_id.as_i64())
                .fetch_all(&self.pool)
                .await
            },
        }
        .map_err(store_err)?;

        rows.into_iter().map(IntegrationRow::to_entity).collect()
    }

    #[instrument(skip(self, integration), fields(id = %integration.id, org = %integration.org_id))]
    #[allow(clippy::cast_possible_wrap, clippy::too_many_lines)]
    async fn upsert(&self, integration: &Integration) -> Result<(), ApplicationError> {
        let auth = serde_json::to_string(&integration.auth)
            .map_err(|e| ApplicationError::Internal(e.to_string()))?;
        let transform = serde_json::to_string(&integration.transform)
            .map_err(|e| ApplicationError::Internal(e.to_string()))?;
        let schedule = integration
            .schedule
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ApplicationError::Internal(e.to_string()))?;
        let excluded = serde_json::to_string(
            &integration
                .excluded_org_units
                .iter()
                .map(|unit| unit.as_i64())
                .collect::<Vec<i64>>(),
        )
        .map_err(|e| ApplicationError::Internal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO integration_configs (
                id, org_id, org_unit, name, event_type, direction, is_active,
                target_url, method, auth, timeout_ms, retry_count, transform,
                signing_enabled, signing_secret, delivery_mode, schedule, scope,
                excluded_org_units, circuit_state, consecutive_failures,
                circuit_opened_at, last_failure_at, last_success_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                      $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
            ON CONFLICT(id) DO UPDATE SET
                org_unit = excluded.org_unit,
                name = excluded.name,
                event_type = excluded.event_type,
                direction = excluded.direction,
                is_active = excluded.is_active,
                target_url = excluded.target_url,
                method = excluded.method,
                auth = excluded.auth,
                timeout_ms = excluded.timeout_ms,
                retry_count = excluded.retry_count,
                transform = excluded.transform,
                signing_enabled = excluded.signing_enabled,
                signing_secret = excluded.signing_secret,
                delivery_mode = excluded.delivery_mode,
                schedule = excluded.schedule,
                scope = excluded.scope,
                excluded_org_units = excluded.excluded_org_units,
                circuit_state = excluded.circuit_state,
                consecutive_failures = excluded.consecutive_failures,
                circuit_opened_at = excluded.circuit_opened_at,
                last_failure_at = excluded.last_failure_at,
                last_success_at = excluded.last_success_at,
                updated_at = excluded.updated_at",
        )
        .bind(integration.id.to_string())
        .bind(integration.org_id.as_i64())
        .bind(integration.org_unit.map(OrgUnitId::as_i64))
        .bind(&integration.name)
        .bind(integration.event_type.as_str())
        .bind(integration.direction.map(|d| d.as_str()))
        .bind(i64::from(integration.is_active))
        .bind(&integration.target_url)
        .bind(integration.method.as_str())
        .bind(auth)
        .bind(integration.timeout_ms as i64)
        .bind(i64::from(integration.retry_count))
        .bind(transform)
        .bind(i64::from(integration.signing.enabled))
        .bind(
            integration
                .signing
                .secret
                .as_ref()
                .map(|secret| secret.expose_secret().to_string()),
        )
        .bind(integration.delivery_mode.as_str())
        .bind(schedule)
        .bind(integration.scope.as_str())
        .bind(excluded)
        .bind(integration.breaker.state.as_str())
        .bind(i64::from(integration.breaker.consecutive_failures))
        .bind(integration.breaker.opened_at.map(|at| at.to_rfc3339()))
        .bind(integration.breaker.last_failure_at.map(|at| at.to_rfc3339()))
        .bind(integration.breaker.last_success_at.map(|at| at.to_rfc3339()))
        .bind(integration.created_at.to_rfc3339())
        .bind(integration.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        info!("Integration upserted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, org_id: OrgId, id: IntegrationId) -> Result<(), ApplicationError> {
        let result =
            sqlx::query("DELETE FROM integration_configs WHERE org_id = $1 AND id = $2")
                .bind(org_id.as_i64())
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(ApplicationError::NotFound(format!("integration {id}")));
        }
        info!("Integration deleted");
        Ok(())
    }

    async fn update_breaker(
        &self,
        org_id: OrgId,
        id: IntegrationId,
        breaker: &BreakerState,
    ) -> Result<(), ApplicationError> {
        sqlx::query(
            "UPDATE integration_configs SET
                circuit_state = $1,
                consecutive_failures = $2,
                circuit_opened_at = $3,
                last_failure_at = $4,
                last_success_at = $5,
                updated_at = $6
             WHERE org_id = $7 AND id = $8",
        )
        .bind(breaker.state.as_str())
        .bind(i64::from(breaker.consecutive_failures))
        .bind(breaker.opened_at.map(|at| at.to_rfc3339()))
        .bind(breaker.last_failure_at.map(|at| at.to_rfc3339()))
        .bind(breaker.last_success_at.map(|at| at.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(org_id.as_i64())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn active_org_ids(&self) -> Result<Vec<OrgId>, ApplicationError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT org_id FROM integration_configs WHERE is_active = 1",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows.into_iter().map(|(org,)| OrgId::new(org)).collect())
    }
}
