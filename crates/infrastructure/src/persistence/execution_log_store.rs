//! SQLite execution log store
//!
//! Upsert is keyed by trace id so retries of one delivery always touch one
//! row; per-attempt details land in `delivery_attempts`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::entities::{
    DeliveryAttempt, DeliveryError, ExecutionLog, ExecutionStatus, RequestSnapshot,
};
use domain::value_objects::{IntegrationId, OrgId, StableEventId, TraceId};
use sqlx::SqlitePool;
use tracing::instrument;

use application::ApplicationError;
use application::ports::{ExecutionLogStore, LogQuery};

use super::{parse_datetime, parse_datetime_opt, store_err};

/// Row type for execution log queries
#[derive(sqlx::FromRow)]
struct LogRow {
    trace_id: String,
    org_id: i64,
    integration_id: String,
    event_id: Option<String>,
    direction: String,
    trigger_type: String,
    status: String,
    attempt_count: i64,
    last_attempt_at: Option<String>,
    response_status: Option<i64>,
    response_body: Option<String>,
    error_message: Option<String>,
    error_category: Option<String>,
    error_status_code: Option<i64>,
    request_snapshot: Option<String>,
    started_at: String,
    finished_at: Option<String>,
    duration_ms: Option<i64>,
    search_text: Option<String>,
}

impl LogRow {
    #[allow(clippy::cast_sign_loss, clippy::wrong_self_convention)]
    fn to_entity(self) -> Result<ExecutionLog, ApplicationError> {
        let error = match (self.error_message, self.error_category) {
            (Some(message), Some(category)) => Some(DeliveryError {
                message,
                category: category.parse().map_err(ApplicationError::Internal)?,
                status_code: self.error_status_code.map(|code| code as u16),
            }),
            _ => None,
        };
        let request: Option<RequestSnapshot> = self
            .request_snapshot
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| ApplicationError::Internal(format!("corrupt request snapshot: {e}")))?;

        Ok(ExecutionLog {
            trace_id: TraceId::parse(&self.trace_id)
                .map_err(|e| ApplicationError::Internal(format!("corrupt trace id: {e}")))?,
            org_id: OrgId::new(self.org_id),
            integration_id: IntegrationId::parse(&self.integration_id)
                .map_err(|e| ApplicationError::Internal(format!("corrupt integration id: {e}")))?,
            event_id: self.event_id.map(StableEventId::from_raw),
            direction: self
                .direction
                .parse()
                .map_err(ApplicationError::Internal)?,
            trigger: self
                .trigger_type
                .parse()
                .map_err(ApplicationError::Internal)?,
            status: self.status.parse().map_err(ApplicationError::Internal)?,
            attempt_count: self.attempt_count as u32,
            last_attempt_at: parse_datetime_opt(self.last_attempt_at.as_deref()),
            response_status: self.response_status.map(|status| status as u16),
            response_body: self.response_body,
            error,
            request,
            started_at: parse_datetime(&self.started_at),
            finished_at: parse_datetime_opt(self.finished_at.as_deref()),
            duration_ms: self.duration_ms.map(|ms| ms as u64),
            search_text: self.search_text,
        })
    }
}

const SELECT_COLUMNS: &str = "trace_id, org_id, integration_id, event_id, direction, \
     trigger_type, status, attempt_count, last_attempt_at, response_status, response_body, \
     error_message, error_category, error_status_code, request_snapshot, started_at, \
     finished_at, duration_ms, search_text";

/// Execution log store backed by SQLite
#[derive(Debug, Clone)]
pub struct SqliteExecutionLogStore {
    pool: SqlitePool,
}

impl SqliteExecutionLogStore {
    /// Create the store over a pool
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionLogStore for SqliteExecutionLogStore {
    #[instrument(skip(self, log), fields(trace = %log.trace_id, status = %log.status))]
    #[allow(clippy::cast_possible_wrap)]
    async fn upsert(&self, log: &ExecutionLog) -> Result<(), ApplicationError> {
        let request = log
            .request
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ApplicationError::Internal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO execution_logs (
                trace_id, org_id, integration_id, event_id, direction, trigger_type,
                status, attempt_count, last_attempt_at, response_status, response_body,
                error_message, error_category, error_status_code, request_snapshot,
                started_at, finished_at, duration_ms, search_text
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                      $16, $17, $18, $19)
            ON CONFLICT(trace_id) DO UPDATE SET
                status = excluded.status,
                attempt_count = excluded.attempt_count,
                last_attempt_at = excluded.last_attempt_at,
                response_status = excluded.response_status,
                response_body = excluded.response_body,
                error_message = excluded.error_message,
                error_category = excluded.error_category,
                error_status_code = excluded.error_status_code,
                request_snapshot = excluded.request_snapshot,
                finished_at = excluded.finished_at,
                duration_ms = excluded.duration_ms,
                search_text = excluded.search_text",
        )
        .bind(log.trace_id.to_string())
        .bind(log.org_id.as_i64())
        .bind(log.integration_id.to_string())
        .bind(log.event_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(log.direction.as_str())
        .bind(log.trigger.as_str())
        .bind(log.status.as_str())
        .bind(i64::from(log.attempt_count))
        .bind(log.last_attempt_at.map(|at| at.to_rfc3339()))
        .bind(log.response_status.map(i64::from))
        .bind(&log.response_body)
        .bind(log.error.as_ref().map(|e| e.message.clone()))
        .bind(log.error.as_ref().map(|e| e.category.as_str()))
        .bind(log.error.as_ref().and_then(|e| e.status_code).map(i64::from))
        .bind(request)
        .bind(log.started_at.to_rfc3339())
        .bind(log.finished_at.map(|at| at.to_rfc3339()))
        .bind(log.duration_ms.map(|ms| ms as i64))
        .bind(&log.search_text)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get(
        &self,
        org_id: OrgId,
        trace_id: TraceId,
    ) -> Result<Option<ExecutionLog>, ApplicationError> {
        let row: Option<LogRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM execution_logs WHERE org_id = $1 AND trace_id = $2"
        ))
        .bind(org_id.as_i64())
        .bind(trace_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(LogRow::to_entity).transpose()
    }

    #[allow(clippy::cast_possible_wrap)]
    async fn append_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), ApplicationError> {
        sqlx::query(
            "INSERT INTO delivery_attempts (
                trace_id, attempt, status_code, error, started_at, duration_ms
            ) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(attempt.trace_id.to_string())
        .bind(i64::from(attempt.attempt))
        .bind(attempt.status_code.map(i64::from))
        .bind(&attempt.error)
        .bind(attempt.started_at.to_rfc3339())
        .bind(attempt.duration_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn attempts_for(
        &self,
        trace_id: TraceId,
    ) -> Result<Vec<DeliveryAttempt>, ApplicationError> {
        #[derive(sqlx::FromRow)]
        struct AttemptRow {
            trace_id: String,
            attempt: i64,
            status_code: Option<i64>,
            error: Option<String>,
            started_at: String,
            duration_ms: i64,
        }

        let rows: Vec<AttemptRow> = sqlx::query_as(
            "SELECT trace_id, attempt, status_code, error, started_at, duration_ms
             FROM delivery_attempts WHERE trace_id = $1 ORDER BY attempt ASC",
        )
        .bind(trace_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|row| {
                #[allow(clippy::cast_sign_loss)]
                Ok(DeliveryAttempt {
                    trace_id: TraceId::parse(&row.trace_id)
                        .map_err(|e| ApplicationError::Internal(e.to_string()))?,
                    attempt: row.attempt as u32,
                    status_code: row.status_code.map(|code| code as u16),
                    error: row.error,
                    started_at: parse_datetime(&row.started_at),
                    duration_ms: row.duration_ms as u64,
                })
            })
            .collect()
    }

    async fn list_retrying(
        &self,
        window_start: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ExecutionLog>, ApplicationError> {
        let rows: Vec<LogRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM execution_logs
             WHERE status = 'RETRYING'
               AND trigger_type != 'SCHEDULE'
               AND last_attempt_at >= $1
             ORDER BY last_attempt_at ASC
             LIMIT $2"
        ))
        .bind(window_start.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(LogRow::to_entity).collect()
    }

    async fn list_retrying_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ExecutionLog>, ApplicationError> {
        let rows: Vec<LogRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM execution_logs
             WHERE status = 'RETRYING' AND last_attempt_at < $1
             ORDER BY last_attempt_at ASC
             LIMIT $2"
        ))
        .bind(cutoff.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(LogRow::to_entity).collect()
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<ExecutionLog>, ApplicationError> {
        // Empty-string / zero sentinels disable the optional filters so the
        // statement keeps a fixed parameter list.
        let rows: Vec<LogRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM execution_logs
             WHERE ($1 = 0 OR org_id = $1)
               AND ($2 = '' OR integration_id = $2)
               AND ($3 = '' OR status = $3)
             ORDER BY started_at DESC
             LIMIT $4"
        ))
        .bind(query.org_id.map(OrgId::as_i64).unwrap_or_default())
        .bind(
            query
                .integration_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
        )
        .bind(query.status.map(|status| status.as_str()).unwrap_or_default())
        .bind(i64::from(query.limit.unwrap_or(100)))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(LogRow::to_entity).collect()
    }

    #[instrument(skip(self))]
    async fn delete(&self, org_id: OrgId, trace_id: TraceId) -> Result<(), ApplicationError> {
        let result =
            sqlx::query("DELETE FROM execution_logs WHERE org_id = $1 AND trace_id = $2")
                .bind(org_id.as_i64())
                .bind(trace_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(ApplicationError::NotFound(format!("execution log {trace_id}")));
        }

        sqlx::query("DELETE FROM delivery_attempts WHERE trace_id = $1")
            .bind(trace_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn count_by_status(
        &self,
        org_id: Option<OrgId>,
    ) -> Result<Vec<(ExecutionStatus, u64)>, ApplicationError> {
        let rows: Vec<(String, i64)> = match org_id {
            Some(org_id) => {
                sqlx::query_as(
                    "SELECT status, COUNT(*) FROM execution_logs \
                     WHERE org_id = $1 GROUP BY status",
                )
                .bind(org_id.as_i64())
                .fetch_all(&self.pool)
                .await
            },
            None => {
                sqlx::query_as("SELECT status, COUNT(*) FROM execution_logs GROUP BY status")
                    .fetch_all(&self.pool)
                    .await
            },
        }
        .map_err(store_err)?;

        rows.into_iter()
            .map(|(status, count)| {
                #[allow(clippy::cast_sign_loss)]
                Ok((
                    status
                        .parse::<ExecutionStatus>()
                        .map_err(ApplicationError::Internal)?,
                    count as u64,
                ))
            })
            .collect()
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ApplicationError> {
        sqlx::query(
            "DELETE FROM delivery_attempts WHERE trace_id IN (
                SELECT trace_id FROM execution_logs
                WHERE finished_at IS NOT NULL AND finished_at < $1
             )",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        let result = sqlx::query(
            "DELETE FROM execution_logs WHERE finished_at IS NOT NULL AND finished_at < $1",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected())
    }
}
