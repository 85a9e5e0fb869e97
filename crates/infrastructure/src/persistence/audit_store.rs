//! SQLite event audit store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::entities::{AuditRecord, DeliverySummary, SourceKind, TimelineEntry};
use domain::value_objects::{EventType, OrgId, StableEventId};
use sqlx::SqlitePool;
use tracing::debug;

use application::ApplicationError;
use application::ports::AuditSink;

use super::{parse_datetime, store_err};

/// Row type for audit queries
#[derive(sqlx::FromRow)]
struct AuditRow {
    org_id: i64,
    event_id: String,
    event_type: String,
    source: String,
    source_id: String,
    status: String,
    skip_category: Option<String>,
    integrations_matched: i64,
    delivered_count: i64,
    failed_count: i64,
    processing_time_ms: i64,
    payload_summary: String,
    payload_hash: String,
    timeline: String,
    recorded_at: String,
}

impl AuditRow {
    #[allow(clippy::cast_sign_loss, clippy::wrong_self_convention)]
    fn to_entity(self) -> Result<AuditRecord, ApplicationError> {
        let payload_summary: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&self.payload_summary)
                .map_err(|e| ApplicationError::Internal(format!("corrupt summary column: {e}")))?;
        let timeline: Vec<TimelineEntry> = serde_json::from_str(&self.timeline)
            .map_err(|e| ApplicationError::Internal(format!("corrupt timeline column: {e}")))?;

        Ok(AuditRecord {
            org_id: OrgId::new(self.org_id),
            event_id: StableEventId::from_raw(self.event_id),
            event_type: EventType::new(self.event_type),
            source: self
                .source
                .parse::<SourceKind>()
                .map_err(ApplicationError::Internal)?,
            source_id: self.source_id,
            status: self.status.parse().map_err(ApplicationError::Internal)?,
            skip_category: self
                .skip_category
                .as_deref()
                .and_then(|raw| raw.parse().ok()),
            delivery: DeliverySummary {
                integrations_matched: self.integrations_matched as u32,
                delivered_count: self.delivered_count as u32,
                failed_count: self.failed_count as u32,
            },
            processing_time_ms: self.processing_time_ms as u64,
            payload_summary,
            payload_hash: self.payload_hash,
            timeline,
            recorded_at: parse_datetime(&self.recorded_at),
        })
    }
}

const SELECT_COLUMNS: &str = "org_id, event_id, event_type, source, source_id, status, \
     skip_category, integrations_matched, delivered_count, failed_count, processing_time_ms, \
     payload_summary, payload_hash, timeline, recorded_at";

/// Event audit store backed by SQLite
#[derive(Debug, Clone)]
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    /// Create the store over a pool
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditStore {
    #[allow(clippy::cast_possible_wrap)]
    async fn record(&self, record: &AuditRecord) -> Result<(), ApplicationError> {
        let payload_summary = serde_json::to_string(&record.payload_summary)
            .map_err(|e| ApplicationError::Internal(e.to_string()))?;
        let timeline = serde_json::to_string(&record.timeline)
            .map_err(|e| ApplicationError::Internal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO event_audit (
                org_id, event_id, event_type, source, source_id, status, skip_category,
                integrations_matched, delivered_count, failed_count, processing_time_ms,
                payload_summary, payload_hash, timeline, recorded_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(record.org_id.as_i64())
        .bind(record.event_id.as_str())
        .bind(record.event_type.as_str())
        .bind(record.source.as_str())
        .bind(&record.source_id)
        .bind(record.status.as_str())
        .bind(record.skip_category.map(|category| category.as_str()))
        .bind(i64::from(record.delivery.integrations_matched))
        .bind(i64::from(record.delivery.delivered_count))
        .bind(i64::from(record.delivery.failed_count))
        .bind(record.processing_time_ms as i64)
        .bind(payload_summary)
        .bind(&record.payload_hash)
        .bind(timeline)
        .bind(record.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn list_for_org(
        &self,
        org_id: OrgId,
        limit: u32,
    ) -> Result<Vec<AuditRecord>, ApplicationError> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM event_audit
             WHERE org_id = $1 ORDER BY recorded_at DESC LIMIT $2"
        ))
        .bind(org_id.as_i64())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(AuditRow::to_entity).collect()
    }

    async fn processing_times(&self, limit: u32) -> Result<Vec<u64>, ApplicationError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT processing_time_ms FROM event_audit ORDER BY recorded_at DESC LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        #[allow(clippy::cast_sign_loss)]
        Ok(rows.into_iter().map(|(ms,)| ms as u64).collect())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ApplicationError> {
        let result = sqlx::query("DELETE FROM event_audit WHERE recorded_at < $1")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        if result.rows_affected() > 0 {
            debug!(purged = result.rows_affected(), "Purged old audit records");
        }
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::async_connection::AsyncDatabase;
    use chrono::Duration;
    use domain::entities::{AuditStatus, ErrorCategory};

    async fn store() -> (AsyncDatabase, SqliteAuditStore) {
        let db = AsyncDatabase::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let store = SqliteAuditStore::new(db.pool().clone());
        (db, store)
    }

    fn record() -> AuditRecord {
        let payload = serde_json::json!({"patientRid": 59071145, "ssn": "redact-me"});
        AuditRecord::begin(
            OrgId::new(84),
            StableEventId::from_raw("84-PATIENT_REGISTERED-1001"),
            EventType::new("PATIENT_REGISTERED"),
            SourceKind::Relational,
            "1001",
            &payload,
            &["patientRid".to_string()],
        )
    }

    #[tokio::test]
    async fn record_and_list_roundtrip() {
        let (_db, store) = store().await;
        let mut record = record();
        let started = Utc::now();
        record.record_stage("matched", Some("1 integrations".to_string()));
        record.finish_with_summary(
            DeliverySummary {
                integrations_matched: 1,
                delivered_count: 1,
                failed_count: 0,
            },
            started,
        );
        store.record(&record).await.unwrap();

        let loaded = store.list_for_org(OrgId::new(84), 10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, AuditStatus::Delivered);
        assert_eq!(loaded[0].delivery.delivered_count, 1);
        assert_eq!(loaded[0].timeline.len(), 2);
        assert!(loaded[0].payload_summary.contains_key("patientRid"));
        assert!(!loaded[0].payload_summary.contains_key("ssn"));
    }

    #[tokio::test]
    async fn skip_category_roundtrips() {
        let (_db, store) = store().await;
        let mut record = record();
        record.finish_skipped(ErrorCategory::Duplicate, Utc::now());
        store.record(&record).await.unwrap();

        let loaded = store.list_for_org(OrgId::new(84), 10).await.unwrap();
        assert_eq!(loaded[0].skip_category, Some(ErrorCategory::Duplicate));
    }

    #[tokio::test]
    async fn tenant_scope_is_enforced() {
        let (_db, store) = store().await;
        store.record(&record()).await.unwrap();
        assert!(store.list_for_org(OrgId::new(85), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn processing_times_feed_percentiles() {
        let (_db, store) = store().await;
        for _ in 0..3 {
            let mut record = record();
            record.finish_with_summary(DeliverySummary::default(), Utc::now());
            store.record(&record).await.unwrap();
        }
        let times = store.processing_times(10).await.unwrap();
        assert_eq!(times.len(), 3);
    }

    #[tokio::test]
    async fn purge_respects_cutoff() {
        let (_db, store) = store().await;
        let mut old = record();
        old.recorded_at = Utc::now() - Duration::days(120);
        store.record(&old).await.unwrap();
        store.record(&record()).await.unwrap();

        let purged = store
            .purge_older_than(Utc::now() - Duration::days(90))
            .await
            .unwrap();
        assert_eq!(purged, 1);
    }
}
