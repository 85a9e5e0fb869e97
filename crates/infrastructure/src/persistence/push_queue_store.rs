//! SQLite push ingestion queue
//!
//! Bounded claimable work queue behind the HTTP push endpoint. Rows move
//! `pending → processing → done|failed`; the claim takes the oldest pending
//! rows in one statement, and a sweeper returns stale claims to `pending`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::value_objects::{EventType, OrgId};
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use application::ApplicationError;
use application::ports::{PushEnvelope, PushQueue};

use super::{parse_datetime, store_err};

/// Row type for push queue queries
#[derive(sqlx::FromRow)]
struct PushRow {
    id: i64,
    org_id: i64,
    event_type: String,
    payload: String,
    source: String,
    enqueued_at: String,
}

impl PushRow {
    #[allow(clippy::wrong_self_convention)]
    fn to_envelope(self) -> Result<PushEnvelope, ApplicationError> {
        Ok(PushEnvelope {
            id: self.id,
            org_id: OrgId::new(self.org_id),
            event_type: EventType::new(self.event_type),
            payload: serde_json::from_str(&self.payload)
                .map_err(|e| ApplicationError::Internal(format!("corrupt payload column: {e}")))?,
            source: self.source,
            enqueued_at: parse_datetime(&self.enqueued_at),
        })
    }
}

/// Push queue backed by SQLite
#[derive(Debug, Clone)]
pub struct SqlitePushQueueStore {
    pool: SqlitePool,
}

impl SqlitePushQueueStore {
    /// Create the store over a pool
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PushQueue for SqlitePushQueueStore {
    #[instrument(skip(self, payload), fields(org = %org_id, event_type = %event_type))]
    async fn enqueue(
        &self,
        org_id: OrgId,
        event_type: EventType,
        payload: serde_json::Value,
        source: String,
    ) -> Result<i64, ApplicationError> {
        let result = sqlx::query(
            "INSERT INTO pending_events (org_id, event_type, payload, source, status, enqueued_at)
             VALUES ($1, $2, $3, $4, 'pending', $5)",
        )
        .bind(org_id.as_i64())
        .bind(event_type.as_str())
        .bind(payload.to_string())
        .bind(source)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        debug!(id = result.last_insert_rowid(), "Push event enqueued");
        Ok(result.last_insert_rowid())
    }

    async fn claim(&self, batch: u32) -> Result<Vec<PushEnvelope>, ApplicationError> {
        let rows: Vec<PushRow> = sqlx::query_as(
            "UPDATE pending_events
             SET status = 'processing', claimed_at = $1
             WHERE id IN (
                 SELECT id FROM pending_events
                 WHERE status = 'pending'
                 ORDER BY id ASC
                 LIMIT $2
             )
             RETURNING id, org_id, event_type, payload, source, enqueued_at",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(i64::from(batch))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(PushRow::to_envelope).collect()
    }

    async fn mark_done(&self, id: i64) -> Result<(), ApplicationError> {
        sqlx::query("UPDATE pending_events SET status = 'done' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, reason: &str) -> Result<(), ApplicationError> {
        sqlx::query("UPDATE pending_events SET status = 'failed', error = $1 WHERE id = $2")
            .bind(reason)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn reset_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, ApplicationError> {
        let result = sqlx::query(
            "UPDATE pending_events
             SET status = 'pending', claimed_at = NULL
             WHERE status = 'processing' AND claimed_at < $1",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::async_connection::AsyncDatabase;
    use chrono::Duration;

    async fn store() -> (AsyncDatabase, SqlitePushQueueStore) {
        let db = AsyncDatabase::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let store = SqlitePushQueueStore::new(db.pool().clone());
        (db, store)
    }

    async fn enqueue(store: &SqlitePushQueueStore, n: u32) -> Vec<i64> {
        let mut ids = Vec::new();
        for i in 0..n {
            ids.push(
                store
                    .enqueue(
                        OrgId::new(84),
                        EventType::new("PATIENT_REGISTERED"),
                        serde_json::json!({"n": i}),
                        "test".to_string(),
                    )
                    .await
                    .unwrap(),
            );
        }
        ids
    }

    #[tokio::test]
    async fn claim_takes_oldest_pending_first() {
        let (_db, store) = store().await;
        let ids = enqueue(&store, 3).await;

        let claimed = store.claim(2).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].id, ids[0]);
        assert_eq!(claimed[1].id, ids[1]);

        // Claimed rows are no longer pending.
        let rest = store.claim(10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, ids[2]);
    }

    #[tokio::test]
    async fn done_rows_are_never_reclaimed() {
        let (_db, store) = store().await;
        let ids = enqueue(&store, 1).await;
        let _ = store.claim(1).await.unwrap();
        store.mark_done(ids[0]).await.unwrap();

        assert!(store.claim(10).await.unwrap().is_empty());
        assert_eq!(store.reset_stale(Utc::now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_rows_keep_the_reason() {
        let (_db, store) = store().await;
        let ids = enqueue(&store, 1).await;
        let _ = store.claim(1).await.unwrap();
        store.mark_failed(ids[0], "boom").await.unwrap();

        let (status, error): (String, Option<String>) =
            sqlx::query_as("SELECT status, error FROM pending_events WHERE id = $1")
                .bind(ids[0])
                .fetch_one(&store.pool)
                .await
                .unwrap();
        assert_eq!(status, "failed");
        assert_eq!(error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn stale_claims_return_to_pending() {
        let (_db, store) = store().await;
        enqueue(&store, 1).await;
        let claimed = store.claim(1).await.unwrap();
        assert_eq!(claimed.len(), 1);

        // Not yet stale.
        assert_eq!(
            store
                .reset_stale(Utc::now() - Duration::minutes(5))
                .await
                .unwrap(),
            0
        );

        // Claimed before "now": stale.
        assert_eq!(store.reset_stale(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.claim(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn envelope_roundtrips_payload() {
        let (_db, store) = store().await;
        store
            .enqueue(
                OrgId::new(84),
                EventType::new("X"),
                serde_json::json!({"nested": {"k": 1}}),
                "partner-api".to_string(),
            )
            .await
            .unwrap();

        let claimed = store.claim(1).await.unwrap();
        assert_eq!(claimed[0].payload, serde_json::json!({"nested": {"k": 1}}));
        assert_eq!(claimed[0].source, "partner-api");
    }
}
