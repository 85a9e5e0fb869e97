//! SQLite source checkpoint store

use async_trait::async_trait;
use domain::entities::{Gap, SourceCheckpoint, SourceKind};
use domain::value_objects::OrgId;
use sqlx::SqlitePool;

use application::ApplicationError;
use application::ports::CheckpointStore;

use super::{parse_datetime_opt, store_err};

/// Row type for checkpoint queries
#[derive(sqlx::FromRow)]
struct CheckpointRow {
    source: String,
    identifier: String,
    org_id: Option<i64>,
    last_processed_id: i64,
    last_processed_at: Option<String>,
    gaps: String,
}

impl CheckpointRow {
    #[allow(clippy::wrong_self_convention)]
    fn to_entity(self) -> Result<SourceCheckpoint, ApplicationError> {
        let gaps: Vec<Gap> = serde_json::from_str(&self.gaps)
            .map_err(|e| ApplicationError::Internal(format!("corrupt gaps column: {e}")))?;
        Ok(SourceCheckpoint {
            source: self.source.parse().map_err(ApplicationError::Internal)?,
            identifier: self.identifier,
            org_id: self.org_id.map(OrgId::new),
            last_processed_id: self.last_processed_id,
            last_processed_at: parse_datetime_opt(self.last_processed_at.as_deref()),
            gaps,
        })
    }
}

/// Source checkpoint store backed by SQLite
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Create the store over a pool
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn get(
        &self,
        source: SourceKind,
        identifier: &str,
    ) -> Result<Option<SourceCheckpoint>, ApplicationError> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            "SELECT source, identifier, org_id, last_processed_id, last_processed_at, gaps
             FROM source_checkpoints WHERE source = $1 AND identifier = $2",
        )
        .bind(source.as_str())
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(CheckpointRow::to_entity).transpose()
    }

    async fn put(&self, checkpoint: &SourceCheckpoint) -> Result<(), ApplicationError> {
        let gaps = serde_json::to_string(&checkpoint.gaps)
            .map_err(|e| ApplicationError::Internal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO source_checkpoints (
                source, identifier, org_id, last_processed_id, last_processed_at, gaps
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(source, identifier) DO UPDATE SET
                org_id = excluded.org_id,
                last_processed_id = MAX(source_checkpoints.last_processed_id,
                                        excluded.last_processed_id),
                last_processed_at = excluded.last_processed_at,
                gaps = excluded.gaps",
        )
        .bind(checkpoint.source.as_str())
        .bind(&checkpoint.identifier)
        .bind(checkpoint.org_id.map(OrgId::as_i64))
        .bind(checkpoint.last_processed_id)
        .bind(checkpoint.last_processed_at.map(|at| at.to_rfc3339()))
        .bind(gaps)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SourceCheckpoint>, ApplicationError> {
        let rows: Vec<CheckpointRow> = sqlx::query_as(
            "SELECT source, identifier, org_id, last_processed_id, last_processed_at, gaps
             FROM source_checkpoints ORDER BY source, identifier",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(CheckpointRow::to_entity).collect()
    }
}
