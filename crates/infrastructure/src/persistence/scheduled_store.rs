//! SQLite scheduled delivery store
//!
//! The claim is a single `UPDATE … RETURNING` statement, so exactly one
//! worker can move any given entry `PENDING|OVERDUE → PROCESSING`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::entities::{CANCELLATION_WINDOW, CancellationMatch, Recurrence, ScheduledDelivery};
use domain::value_objects::{IntegrationId, OrgId, TraceId};
use sqlx::SqlitePool;
use tracing::{debug, instrument};
use uuid::Uuid;

use application::ApplicationError;
use application::ports::{ScheduleQuery, ScheduledDeliveryStore};

use super::{parse_datetime, parse_datetime_opt, store_err};

/// Row type for scheduled delivery queries
#[derive(sqlx::FromRow)]
struct ScheduledRow {
    id: String,
    integration_id: String,
    org_id: i64,
    scheduled_for: String,
    status: String,
    attempt_count: i64,
    payload: String,
    original_payload: String,
    recurrence: Option<String>,
    cancellation_patient_rid: Option<i64>,
    cancellation_scheduled_at: Option<String>,
    processing_started_at: Option<String>,
    delivered_at: Option<String>,
    delivery_log_id: Option<String>,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ScheduledRow {
    #[allow(clippy::cast_sign_loss, clippy::wrong_self_convention)]
    fn to_entity(self) -> Result<ScheduledDelivery, ApplicationError> {
        let recurrence: Option<Recurrence> = self
            .recurrence
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| ApplicationError::Internal(format!("corrupt recurrence column: {e}")))?;
        let cancellation = match (
            self.cancellation_patient_rid,
            parse_datetime_opt(self.cancellation_scheduled_at.as_deref()),
        ) {
            (Some(patient_rid), Some(scheduled_at)) => Some(CancellationMatch {
                patient_rid,
                scheduled_at,
            }),
            _ => None,
        };

        Ok(ScheduledDelivery {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| ApplicationError::Internal(format!("corrupt schedule id: {e}")))?,
            integration_id: IntegrationId::parse(&self.integration_id)
                .map_err(|e| ApplicationError::Internal(format!("corrupt integration id: {e}")))?,
            org_id: OrgId::new(self.org_id),
            scheduled_for: parse_datetime(&self.scheduled_for),
            status: self.status.parse().map_err(ApplicationError::Internal)?,
            attempt_count: self.attempt_count as u32,
            payload: serde_json::from_str(&self.payload)
                .map_err(|e| ApplicationError::Internal(format!("corrupt payload column: {e}")))?,
            original_payload: serde_json::from_str(&self.original_payload).map_err(|e| {
                ApplicationError::Internal(format!("corrupt original payload column: {e}"))
            })?,
            recurrence,
            cancellation,
            processing_started_at: parse_datetime_opt(self.processing_started_at.as_deref()),
            delivered_at: parse_datetime_opt(self.delivered_at.as_deref()),
            delivery_log_id: self
                .delivery_log_id
                .as_deref()
                .and_then(|raw| TraceId::parse(raw).ok()),
            last_error: self.last_error,
            created_at: parse_datetime(&self.created_at),
            updated_at: parse_datetime(&self.updated_at),
        })
    }
}

const SELECT_COLUMNS: &str = "id, integration_id, org_id, scheduled_for, status, attempt_count, \
     payload, original_payload, recurrence, cancellation_patient_rid, \
     cancellation_scheduled_at, processing_started_at, delivered_at, delivery_log_id, \
     last_error, created_at, updated_at";

/// Scheduled delivery store backed by SQLite
#[derive(Debug, Clone)]
pub struct SqliteScheduledStore {
    pool: SqlitePool,
}

impl SqliteScheduledStore {
    /// Create the store over a pool
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn bind_fields<'q>(
        query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        entry: &'q ScheduledDelivery,
        recurrence: Option<String>,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        query
            .bind(entry.scheduled_for.to_rfc3339())
            .bind(entry.status.as_str())
            .bind(i64::from(entry.attempt_count))
            .bind(entry.payload.to_string())
            .bind(entry.original_payload.to_string())
            .bind(recurrence)
            .bind(entry.cancellation.map(|c| c.patient_rid))
            .bind(entry.cancellation.map(|c| c.scheduled_at.to_rfc3339()))
            .bind(entry.processing_started_at.map(|at| at.to_rfc3339()))
            .bind(entry.delivered_at.map(|at| at.to_rfc3339()))
            .bind(entry.delivery_log_id.map(|id| id.to_string()))
            .bind(entry.last_error.clone())
            .bind(entry.updated_at.to_rfc3339())
    }
}

#[async_trait]
impl ScheduledDeliveryStore for SqliteScheduledStore {
    #[instrument(skip(self, entry), fields(id = %entry.id, org = %entry.org_id))]
    async fn insert(&self, entry: &ScheduledDelivery) -> Result<(), ApplicationError> {
        let recurrence = entry
            .recurrence
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ApplicationError::Internal(e.to_string()))?;

        let query = sqlx::query(
            "INSERT INTO scheduled_integrations (
                id, integration_id, org_id, created_at,
                scheduled_for, status, attempt_count, payload, original_payload,
                recurrence, cancellation_patient_rid, cancellation_scheduled_at,
                processing_started_at, delivered_at, delivery_log_id, last_error, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(entry.id.to_string())
        .bind(entry.integration_id.to_string())
        .bind(entry.org_id.as_i64())
        .bind(entry.created_at.to_rfc3339());

        Self::bind_fields(query, entry, recurrence)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get(
        &self,
        org_id: OrgId,
        id: Uuid,
    ) -> Result<Option<ScheduledDelivery>, ApplicationError> {
        let row: Option<ScheduledRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM scheduled_integrations \
             WHERE org_id = $1 AND id = $2"
        ))
        .bind(org_id.as_i64())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(ScheduledRow::to_entity).transpose()
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledDelivery>, ApplicationError> {
        let row: Option<ScheduledRow> = sqlx::query_as(&format!(
            "UPDATE scheduled_integrations
             SET status = 'PROCESSING', processing_started_at = $1, updated_at = $1
             WHERE id = (
                 SELECT id FROM scheduled_integrations
                 WHERE status IN ('PENDING', 'OVERDUE') AND scheduled_for <= $2
                 ORDER BY scheduled_for ASC
                 LIMIT 1
             )
             RETURNING {SELECT_COLUMNS}"
        ))
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(ScheduledRow::to_entity).transpose()
    }

    #[instrument(skip(self, entry), fields(id = %entry.id, status = %entry.status))]
    async fn update(&self, entry: &ScheduledDelivery) -> Result<(), ApplicationError> {
        let recurrence = entry
            .recurrence
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ApplicationError::Internal(e.to_string()))?;

        let query = sqlx::query(
            "UPDATE scheduled_integrations SET
                scheduled_for = $1, status = $2, attempt_count = $3, payload = $4,
                original_payload = $5, recurrence = $6, cancellation_patient_rid = $7,
                cancellation_scheduled_at = $8, processing_started_at = $9,
                delivered_at = $10, delivery_log_id = $11, last_error = $12, updated_at = $13
             WHERE org_id = $14 AND id = $15",
        );

        let result = Self::bind_fields(query, entry, recurrence)
            .bind(entry.org_id.as_i64())
            .bind(entry.id.to_string())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(ApplicationError::NotFound(format!(
                "scheduled delivery {}",
                entry.id
            )));
        }
        Ok(())
    }

    async fn release(&self, id: Uuid) -> Result<(), ApplicationError> {
        sqlx::query(
            "UPDATE scheduled_integrations
             SET status = 'PENDING', processing_started_at = NULL, updated_at = $1
             WHERE id = $2 AND status = 'PROCESSING'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    #[instrument(skip(self, descriptor), fields(org = %org_id, patient = descriptor.patient_rid))]
    async fn cancel_by_match(
        &self,
        org_id: OrgId,
        descriptor: &CancellationMatch,
    ) -> Result<u64, ApplicationError> {
        let window_start = descriptor.scheduled_at - CANCELLATION_WINDOW;
        let window_end = descriptor.scheduled_at + CANCELLATION_WINDOW;

        let result = sqlx::query(
            "UPDATE scheduled_integrations
             SET status = 'CANCELLED', processing_started_at = NULL, updated_at = $1
             WHERE org_id = $2
               AND status = 'PENDING'
               AND cancellation_patient_rid = $3
               AND cancellation_scheduled_at >= $4
               AND cancellation_scheduled_at <= $5",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(org_id.as_i64())
        .bind(descriptor.patient_rid)
        .bind(window_start.to_rfc3339())
        .bind(window_end.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        debug!(cancelled = result.rows_affected(), "Cancel-by-match applied");
        Ok(result.rows_affected())
    }

    async fn reset_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, ApplicationError> {
        let result = sqlx::query(
            "UPDATE scheduled_integrations
             SET status = 'PENDING', processing_started_at = NULL, updated_at = $1
             WHERE status = 'PROCESSING' AND processing_started_at < $2",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn mark_overdue(&self, cutoff: DateTime<Utc>) -> Result<u64, ApplicationError> {
        let result = sqlx::query(
            "UPDATE scheduled_integrations
             SET status = 'OVERDUE', updated_at = $1
             WHERE status = 'PENDING' AND scheduled_for < $2",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    async fn query(
        &self,
        query: &ScheduleQuery,
    ) -> Result<Vec<ScheduledDelivery>, ApplicationError> {
        let rows: Vec<ScheduledRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM scheduled_integrations
             WHERE ($1 = 0 OR org_id = $1)
               AND ($2 = '' OR status = $2)
             ORDER BY scheduled_for ASC
             LIMIT $3"
        ))
        .bind(query.org_id.map(OrgId::as_i64).unwrap_or_default())
        .bind(query.status.map(|status| status.as_str()).unwrap_or_default())
        .bind(i64::from(query.limit.unwrap_or(100)))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(ScheduledRow::to_entity).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::async_connection::AsyncDatabase;
    use chrono::Duration;
    use domain::entities::ScheduleStatus;

    async fn store() -> (AsyncDatabase, SqliteScheduledStore) {
        let db = AsyncDatabase::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let store = SqliteScheduledStore::new(db.pool().clone());
        (db, store)
    }

    fn entry(due_in: Duration) -> ScheduledDelivery {
        ScheduledDelivery::new(
            IntegrationId::new(),
            OrgId::new(84),
            Utc::now() + due_in,
            serde_json::json!({"patientRid": 59071145}),
        )
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let (_db, store) = store().await;
        let entry = entry(Duration::minutes(2)).with_cancellation(CancellationMatch {
            patient_rid: 59_071_145,
            scheduled_at: Utc::now(),
        });
        store.insert(&entry).await.unwrap();

        let loaded = store.get(entry.org_id, entry.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ScheduleStatus::Pending);
        assert_eq!(loaded.payload, entry.payload);
        assert_eq!(
            loaded.cancellation.map(|c| c.patient_rid),
            Some(59_071_145)
        );
    }

    #[tokio::test]
    async fn claim_due_takes_one_pending_entry() {
        let (_db, store) = store().await;
        let due = entry(Duration::minutes(-1));
        store.insert(&due).await.unwrap();
        let future = entry(Duration::minutes(30));
        store.insert(&future).await.unwrap();

        let claimed = store.claim_due(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, due.id);
        assert_eq!(claimed.status, ScheduleStatus::Processing);
        assert!(claimed.processing_started_at.is_some());

        // The future entry is not due; nothing else to claim.
        assert!(store.claim_due(Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_claims_return_distinct_entries() {
        let (_db, store) = store().await;
        let first = entry(Duration::minutes(-2));
        let second = entry(Duration::minutes(-1));
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let a = store.claim_due(Utc::now()).await.unwrap().unwrap();
        let b = store.claim_due(Utc::now()).await.unwrap().unwrap();
        assert_ne!(a.id, b.id);
        assert!(store.claim_due(Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_takes_overdue_entries_too() {
        let (_db, store) = store().await;
        let overdue = entry(Duration::minutes(-30));
        store.insert(&overdue).await.unwrap();
        store
            .mark_overdue(Utc::now() - Duration::minutes(10))
            .await
            .unwrap();

        let claimed = store.claim_due(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.id, overdue.id);
    }

    #[tokio::test]
    async fn cancel_by_match_hits_only_the_window() {
        let (_db, store) = store().await;
        let at = Utc::now() + Duration::hours(24);

        let inside = entry(Duration::minutes(5)).with_cancellation(CancellationMatch {
            patient_rid: 7,
            scheduled_at: at + Duration::minutes(30),
        });
        store.insert(&inside).await.unwrap();

        let outside = entry(Duration::minutes(5)).with_cancellation(CancellationMatch {
            patient_rid: 7,
            scheduled_at: at + Duration::hours(2),
        });
        store.insert(&outside).await.unwrap();

        let other_patient = entry(Duration::minutes(5)).with_cancellation(CancellationMatch {
            patient_rid: 8,
            scheduled_at: at,
        });
        store.insert(&other_patient).await.unwrap();

        let cancelled = store
            .cancel_by_match(
                OrgId::new(84),
                &CancellationMatch {
                    patient_rid: 7,
                    scheduled_at: at,
                },
            )
            .await
            .unwrap();
        assert_eq!(cancelled, 1);

        let loaded = store.get(inside.org_id, inside.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ScheduleStatus::Cancelled);
        let untouched = store
            .get(outside.org_id, outside.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(untouched.status, ScheduleStatus::Pending);
    }

    #[tokio::test]
    async fn cancelled_entries_are_never_claimed() {
        let (_db, store) = store().await;
        let at = Utc::now();
        let entry = entry(Duration::minutes(-1)).with_cancellation(CancellationMatch {
            patient_rid: 7,
            scheduled_at: at,
        });
        store.insert(&entry).await.unwrap();
        store
            .cancel_by_match(
                OrgId::new(84),
                &CancellationMatch {
                    patient_rid: 7,
                    scheduled_at: at,
                },
            )
            .await
            .unwrap();

        assert!(store.claim_due(Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reset_stale_returns_old_claims() {
        let (_db, store) = store().await;
        let due = entry(Duration::minutes(-30));
        store.insert(&due).await.unwrap();
        let claimed = store.claim_due(Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.status, ScheduleStatus::Processing);

        // Nothing stale yet.
        let reset = store
            .reset_stale(Utc::now() - Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(reset, 0);

        // Everything claimed before "now" is stale.
        let reset = store.reset_stale(Utc::now()).await.unwrap();
        assert_eq!(reset, 1);

        let reclaimed = store.claim_due(Utc::now()).await.unwrap().unwrap();
        assert_eq!(reclaimed.id, due.id);
    }

    #[tokio::test]
    async fn update_persists_transitions() {
        let (_db, store) = store().await;
        let mut entry = entry(Duration::minutes(-1));
        store.insert(&entry).await.unwrap();

        entry.mark_sent(TraceId::new(), Utc::now());
        store.update(&entry).await.unwrap();

        let loaded = store.get(entry.org_id, entry.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ScheduleStatus::Sent);
        assert!(loaded.delivered_at.is_some());
        assert!(loaded.delivery_log_id.is_some());
    }

    #[tokio::test]
    async fn query_filters_by_status() {
        let (_db, store) = store().await;
        let pending = entry(Duration::minutes(5));
        store.insert(&pending).await.unwrap();
        let mut sent = entry(Duration::minutes(5));
        sent.mark_sent(TraceId::new(), Utc::now());
        store.insert(&sent).await.unwrap();

        let results = store
            .query(&ScheduleQuery {
                org_id: Some(OrgId::new(84)),
                status: Some(ScheduleStatus::Pending),
                limit: Some(10),
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, pending.id);
    }
}
