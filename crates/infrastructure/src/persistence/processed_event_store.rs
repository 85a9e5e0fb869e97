//! SQLite processed event store
//!
//! The `stable_id` primary key is the idempotency invariant: the second
//! insert of the same id fails, and the failure maps to `DuplicateEvent`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::entities::ProcessedEvent;
use domain::value_objects::StableEventId;
use sqlx::SqlitePool;
use tracing::debug;

use application::ApplicationError;
use application::ports::ProcessedEventStore;

use super::{is_unique_violation, store_err};

/// Processed event store backed by SQLite
#[derive(Debug, Clone)]
pub struct SqliteProcessedEventStore {
    pool: SqlitePool,
}

impl SqliteProcessedEventStore {
    /// Create the store over a pool
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedEventStore for SqliteProcessedEventStore {
    async fn insert(&self, marker: &ProcessedEvent) -> Result<(), ApplicationError> {
        let result = sqlx::query(
            "INSERT INTO processed_events (
                stable_id, source_id, org_id, processed_at, expires_at
            ) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(marker.stable_id.as_str())
        .bind(&marker.source_id)
        .bind(marker.org_id.as_i64())
        .bind(marker.processed_at.to_rfc3339())
        .bind(marker.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(ApplicationError::DuplicateEvent(marker.stable_id.clone()))
            },
            Err(err) => Err(store_err(err)),
        }
    }

    async fn contains(&self, stable_id: &StableEventId) -> Result<bool, ApplicationError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM processed_events WHERE stable_id = $1 AND expires_at > $2",
        )
        .bind(stable_id.as_str())
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(count.0 > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ApplicationError> {
        let result = sqlx::query("DELETE FROM processed_events WHERE expires_at <= $1")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;

        if result.rows_affected() > 0 {
            debug!(purged = result.rows_affected(), "Purged expired processed events");
        }
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::async_connection::AsyncDatabase;
    use chrono::Duration;
    use domain::value_objects::OrgId;

    async fn store() -> (AsyncDatabase, SqliteProcessedEventStore) {
        let db = AsyncDatabase::in_memory().await.unwrap();
        db.migrate().await.unwrap();
        let store = SqliteProcessedEventStore::new(db.pool().clone());
        (db, store)
    }

    fn marker(id: &str) -> ProcessedEvent {
        ProcessedEvent::new(StableEventId::from_raw(id), "1001", OrgId::new(84))
    }

    #[tokio::test]
    async fn first_insert_succeeds() {
        let (_db, store) = store().await;
        store
            .insert(&marker("84-PATIENT_REGISTERED-1001"))
            .await
            .unwrap();
        assert!(
            store
                .contains(&StableEventId::from_raw("84-PATIENT_REGISTERED-1001"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let (_db, store) = store().await;
        store
            .insert(&marker("84-PATIENT_REGISTERED-1001"))
            .await
            .unwrap();

        let result = store.insert(&marker("84-PATIENT_REGISTERED-1001")).await;
        assert!(matches!(result, Err(ApplicationError::DuplicateEvent(_))));
    }

    #[tokio::test]
    async fn different_ids_do_not_collide() {
        let (_db, store) = store().await;
        store
            .insert(&marker("84-PATIENT_REGISTERED-1001"))
            .await
            .unwrap();
        store
            .insert(&marker("84-PATIENT_REGISTERED-1002"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn purge_removes_expired_markers() {
        let (_db, store) = store().await;
        let mut expired = marker("84-X-1");
        expired.expires_at = Utc::now() - Duration::minutes(1);
        store.insert(&expired).await.unwrap();
        store.insert(&marker("84-X-2")).await.unwrap();

        let purged = store.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(purged, 1);
        assert!(!store.contains(&StableEventId::from_raw("84-X-1")).await.unwrap());
        assert!(store.contains(&StableEventId::from_raw("84-X-2")).await.unwrap());
    }
}
