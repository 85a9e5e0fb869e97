//! Sequential-relational source adapter
//!
//! Polls an append-only queue table by monotonic id:
//! `id > checkpoint AND created_at >= cutoff AND entity_parent_rid IN (…)
//! ORDER BY id LIMIT n`. The adapter never writes the source table; the
//! tenant allowlist is a 30-second cached read of active integration
//! tenants, and an empty checkpoint can be bootstrapped to the source's
//! max id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use domain::entities::{Event, SourceCheckpoint, SourceKind, SourceRef};
use domain::value_objects::{EventType, OrgId, OrgUnitId};
use moka::future::Cache;
use sqlx::SqlitePool;
use tracing::{debug, info, instrument, warn};

use application::ApplicationError;
use application::ports::{CheckpointStore, EventSource, IntegrationStore, SourceDescriptor};

/// TTL of the tenant allowlist cache
const ALLOWLIST_TTL: Duration = Duration::from_secs(30);

/// Settings of the relational adapter
#[derive(Debug, Clone)]
pub struct RelationalSourceSettings {
    /// Queue table name
    pub table: String,
    /// Drop rows older than N days; 0 disables the cutoff
    pub max_event_age_days: u32,
    /// Fast-forward an empty checkpoint to the source's max id
    pub bootstrap_checkpoint: bool,
    /// Restrict polling to tenants with active integrations
    pub allowed_parents_from_integrations: bool,
}

impl Default for RelationalSourceSettings {
    fn default() -> Self {
        Self {
            table: "notification_queue".to_string(),
            max_event_age_days: 0,
            bootstrap_checkpoint: false,
            allowed_parents_from_integrations: true,
        }
    }
}

/// Row shape of the external queue table
#[derive(sqlx::FromRow)]
struct QueueRow {
    id: i64,
    entity_rid: i64,
    entity_parent_rid: i64,
    transaction_type: String,
    message: String,
}

/// Polling adapter over the sequential-relational queue
pub struct SequentialRelationalSource {
    source_pool: SqlitePool,
    checkpoints: Arc<dyn CheckpointStore>,
    integrations: Arc<dyn IntegrationStore>,
    settings: RelationalSourceSettings,
    allowlist: Cache<u8, Arc<Vec<i64>>>,
}

impl std::fmt::Debug for SequentialRelationalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialRelationalSource")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SequentialRelationalSource {
    /// Create the adapter over the external source pool
    #[must_use]
    pub fn new(
        source_pool: SqlitePool,
        checkpoints: Arc<dyn CheckpointStore>,
        integrations: Arc<dyn IntegrationStore>,
        settings: RelationalSourceSettings,
    ) -> Self {
        Self {
            source_pool,
            checkpoints,
            integrations,
            settings,
            allowlist: Cache::builder()
                .max_capacity(1)
                .time_to_live(ALLOWLIST_TTL)
                .build(),
        }
    }

    async fn load_checkpoint(&self) -> Result<SourceCheckpoint, ApplicationError> {
        Ok(self
            .checkpoints
            .get(SourceKind::Relational, &self.settings.table)
            .await?
            .unwrap_or_else(|| SourceCheckpoint::new(SourceKind::Relational, self.settings.table.clone())))
    }

    /// Fast-forward an empty checkpoint so a fresh deployment does not
    /// replay the source's entire history
    async fn bootstrap(&self) -> Result<(), ApplicationError> {
        // MAX(id) on an empty table yields one NULL row.
        let (max_id,): (Option<i64>,) =
            sqlx::query_as(&format!("SELECT MAX(id) FROM {}", self.settings.table))
                .fetch_one(&self.source_pool)
                .await
                .map_err(|e| ApplicationError::Source(e.to_string()))?;

        let Some(max_id) = max_id else {
            return Ok(());
        };
        let mut checkpoint = SourceCheckpoint::new(SourceKind::Relational, self.settings.table.clone());
        checkpoint.advance(max_id, Utc::now());
        self.checkpoints.put(&checkpoint).await?;
        info!(max_id, "Bootstrapped relational checkpoint to source head");
        Ok(())
    }

    async fn allowed_parents(&self) -> Result<Arc<Vec<i64>>, ApplicationError> {
        let integrations = Arc::clone(&self.integrations);
        self.allowlist
            .try_get_with(0u8, async move {
                let orgs = integrations.active_org_ids().await?;
                Ok(Arc::new(
                    orgs.into_iter().map(|org| org.as_i64()).collect::<Vec<i64>>(),
                ))
            })
            .await
            .map_err(|e: Arc<ApplicationError>| ApplicationError::Source(e.to_string()))
    }

    fn row_to_event(&self, row: QueueRow) -> Event {
        let payload = serde_json::from_str(&row.message)
            .unwrap_or_else(|_| serde_json::json!({ "raw": row.message }));
        let mut event = Event::new(
            OrgId::new(row.entity_parent_rid),
            EventType::new(row.transaction_type),
            payload,
            SourceRef::relational(self.settings.table.clone(), row.id),
        );
        if row.entity_rid != row.entity_parent_rid {
            event = event.with_org_unit(OrgUnitId::new(row.entity_rid));
        }
        event
    }
}

#[async_trait]
impl EventSource for SequentialRelationalSource {
    fn descriptor(&self) -> SourceDescriptor {
        SourceDescriptor {
            kind: SourceKind::Relational,
            identifier: self.settings.table.clone(),
        }
    }

    #[instrument(skip(self))]
    async fn poll(&self, limit: u32) -> Result<Vec<Event>, ApplicationError> {
        let checkpoint = self.load_checkpoint().await?;

        if checkpoint.last_processed_at.is_none()
            && checkpoint.last_processed_id == 0
            && self.settings.bootstrap_checkpoint
        {
            self.bootstrap().await?;
            return Ok(Vec::new());
        }

        let cutoff = (self.settings.max_event_age_days > 0).then(|| {
            (Utc::now() - chrono::Duration::days(i64::from(self.settings.max_event_age_days)))
                .to_rfc3339()
        });

        // The allowlist is numeric tenant ids, inlined into the IN clause;
        // an empty allowlist means no tenant is listening.
        let parent_filter = if self.settings.allowed_parents_from_integrations {
            let parents = self.allowed_parents().await?;
            if parents.is_empty() {
                debug!("No active integration tenants, skipping poll");
                return Ok(Vec::new());
            }
            let list = parents
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!("AND entity_parent_rid IN ({list})")
        } else {
            String::new()
        };
        let age_filter = cutoff
            .as_deref()
            .map_or_else(String::new, |cutoff| format!("AND created_at >= '{cutoff}'"));

        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            "SELECT id, entity_rid, entity_parent_rid, transaction_type, message
             FROM {table}
             WHERE id > $1 {age_filter} {parent_filter}
             ORDER BY id ASC
             LIMIT $2",
            table = self.settings.table,
        ))
        .bind(checkpoint.last_processed_id)
        .bind(i64::from(limit))
        .fetch_all(&self.source_pool)
        .await
        .map_err(|e| ApplicationError::Source(e.to_string()))?;

        if !rows.is_empty() {
            debug!(count = rows.len(), "Polled relational source window");
        }
        Ok(rows.into_iter().map(|row| self.row_to_event(row)).collect())
    }

    async fn commit(&self, _event: &Event) -> Result<(), ApplicationError> {
        // The relational source is never written; the checkpoint advance in
        // the audit path is the commit.
        Ok(())
    }

    async fn reject(&self, event: &Event, reason: &str) -> Result<(), ApplicationError> {
        warn!(
            source_id = %event.source.source_id,
            reason,
            "Relational event handoff failed, row will be re-polled"
        );
        Ok(())
    }
}
