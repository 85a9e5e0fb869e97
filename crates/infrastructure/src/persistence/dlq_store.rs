//! SQLite dead letter queue store

use async_trait::async_trait;
use domain::entities::{DeliveryError, DlqEntry, DlqStatus};
use domain::value_objects::{IntegrationId, OrgId, TraceId};
use sqlx::SqlitePool;
use tracing::{instrument, warn};
use uuid::Uuid;

use application::ApplicationError;
use application::ports::DlqStore;

use super::{parse_datetime, parse_datetime_opt, store_err};

/// Row type for DLQ queries
#[derive(sqlx::FromRow)]
struct DlqRow {
    id: String,
    trace_id: String,
    integration_id: String,
    org_id: i64,
    payload: String,
    error_message: String,
    error_category: String,
    error_status_code: Option<i64>,
    status: String,
    retry_count: i64,
    max_retries: i64,
    next_retry_at: Option<String>,
    resolved_at: Option<String>,
    resolution_note: Option<String>,
    created_at: String,
}

impl DlqRow {
    #[allow(clippy::cast_sign_loss, clippy::wrong_self_convention)]
    fn to_entity(self) -> Result<DlqEntry, ApplicationError> {
        Ok(DlqEntry {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| ApplicationError::Internal(format!("corrupt dlq id: {e}")))?,
            trace_id: TraceId::parse(&self.trace_id)
                .map_err(|e| ApplicationError::Internal(format!("corrupt trace id: {e}")))?,
            integration_id: IntegrationId::parse(&self.integration_id)
                .map_err(|e| ApplicationError::Internal(format!("corrupt integration id: {e}")))?,
            org_id: OrgId::new(self.org_id),
            payload: serde_json::from_str(&self.payload)
                .map_err(|e| ApplicationError::Internal(format!("corrupt payload column: {e}")))?,
            error: DeliveryError {
                message: self.error_message,
                category: self
                    .error_category
                    .parse()
                    .map_err(ApplicationError::Internal)?,
                status_code: self.error_status_code.map(|code| code as u16),
            },
            status: self.status.parse().map_err(ApplicationError::Internal)?,
            retry_count: self.retry_count as u32,
            max_retries: self.max_retries as u32,
            next_retry_at: parse_datetime_opt(self.next_retry_at.as_deref()),
            resolved_at: parse_datetime_opt(self.resolved_at.as_deref()),
            resolution_note: self.resolution_note,
            created_at: parse_datetime(&self.created_at),
        })
    }
}

const SELECT_COLUMNS: &str = "id, trace_id, integration_id, org_id, payload, error_message, \
     error_category, error_status_code, status, retry_count, max_retries, next_retry_at, \
     resolved_at, resolution_note, created_at";

/// Dead letter queue store backed by SQLite
#[derive(Debug, Clone)]
pub struct SqliteDlqStore {
    pool: SqlitePool,
}

impl SqliteDlqStore {
    /// Create the store over a pool
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DlqStore for SqliteDlqStore {
    #[instrument(skip(self, entry), fields(trace = %entry.trace_id, org = %entry.org_id))]
    async fn append(&self, entry: &DlqEntry) -> Result<(), ApplicationError> {
        sqlx::query(
            "INSERT INTO failed_deliveries (
                id, trace_id, integration_id, org_id, payload, error_message,
                error_category, error_status_code, status, retry_count, max_retries,
                next_retry_at, resolved_at, resolution_note, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(entry.id.to_string())
        .bind(entry.trace_id.to_string())
        .bind(entry.integration_id.to_string())
        .bind(entry.org_id.as_i64())
        .bind(entry.payload.to_string())
        .bind(&entry.error.message)
        .bind(entry.error.category.as_str())
        .bind(entry.error.status_code.map(i64::from))
        .bind(entry.status.as_str())
        .bind(i64::from(entry.retry_count))
        .bind(i64::from(entry.max_retries))
        .bind(entry.next_retry_at.map(|at| at.to_rfc3339()))
        .bind(entry.resolved_at.map(|at| at.to_rfc3339()))
        .bind(entry.resolution_note.clone())
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        warn!("Delivery dead-lettered");
        Ok(())
    }

    async fn get(&self, org_id: OrgId, id: Uuid) -> Result<Option<DlqEntry>, ApplicationError> {
        let row: Option<DlqRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM failed_deliveries WHERE org_id = $1 AND id = $2"
        ))
        .bind(org_id.as_i64())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(DlqRow::to_entity).transpose()
    }

    async fn list(
        &self,
        org_id: Option<OrgId>,
        status: Option<DlqStatus>,
        limit: u32,
    ) -> Result<Vec<DlqEntry>, ApplicationError> {
        let rows: Vec<DlqRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM failed_deliveries
             WHERE ($1 = 0 OR org_id = $1)
               AND ($2 = '' OR status = $2)
             ORDER BY created_at DESC
             LIMIT $3"
        ))
        .bind(org_id.map(OrgId::as_i64).unwrap_or_default())
        .bind(status.map(|status| status.as_str()).unwrap_or_default())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(DlqRow::to_entity).collect()
    }

    async fn update(&self, entry: &DlqEntry) -> Result<(), ApplicationError> {
        let result = sqlx::query(
            "UPDATE failed_deliveries SET
                status = $1, retry_count = $2, next_retry_at = $3,
                resolved_at = $4, resolution_note = $5
             WHERE org_id = $6 AND id = $7",
        )
        .bind(entry.status.as_str())
        .bind(i64::from(entry.retry_count))
        .bind(entry.next_retry_at.map(|at| at.to_rfc3339()))
        .bind(entry.resolved_at.map(|at| at.to_rfc3339()))
        .bind(entry.resolution_note.clone())
        .bind(entry.org_id.as_i64())
        .bind(entry.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(ApplicationError::NotFound(format!("dlq entry {}", entry.id)));
        }
        Ok(())
    }

    async fn count_by_status(&self) -> Result<Vec<(DlqStatus, u64)>, ApplicationError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM failed_deliveries GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?;

        rows.into_iter()
            .map(|(status, count)| {
                #[allow(clippy::cast_sign_loss)]
                Ok((
                    status.parse::<DlqStatus>().map_err(ApplicationError::Internal)?,
                    count as u64,
                ))
            })
            .collect()
    }
}
