//! Operational statistics for the admin API
//!
//! Aggregates execution-log status counts, audit processing-time
//! percentiles, source-checkpoint lag and gap lists, and DLQ counts into
//! one snapshot.

use std::sync::Arc;

use chrono::Utc;
use domain::entities::{DlqStatus, ExecutionStatus, Gap, SourceKind};
use domain::value_objects::OrgId;
use serde::Serialize;

use crate::error::ApplicationError;
use crate::ports::{AuditSink, CheckpointStore, DlqStore, ExecutionLogStore};

/// Processing-time percentiles in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Percentiles {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

/// Checkpoint health of one source
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointStats {
    /// Source kind
    pub source: SourceKind,
    /// Table, topic or queue
    pub identifier: String,
    /// Highest processed id
    pub last_processed_id: i64,
    /// Seconds since the last processed event
    pub lag_seconds: Option<i64>,
    /// Recorded sequence gaps
    pub gaps: Vec<Gap>,
}

/// One stats snapshot
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    /// Execution logs per status (canonical status names)
    pub executions_by_status: Vec<(String, u64)>,
    /// Audit processing-time percentiles
    pub processing_time_ms: Percentiles,
    /// Per-source checkpoint health
    pub checkpoints: Vec<CheckpointStats>,
    /// DLQ entries per status
    pub dlq_by_status: Vec<(String, u64)>,
}

/// Sample size for the percentile computation
const PERCENTILE_SAMPLE: u32 = 1000;

/// Builds stats snapshots from the stores
pub struct StatsService {
    logs: Arc<dyn ExecutionLogStore>,
    audit: Arc<dyn AuditSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    dlq: Arc<dyn DlqStore>,
}

impl std::fmt::Debug for StatsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsService").finish_non_exhaustive()
    }
}

impl StatsService {
    /// Create the stats service
    #[must_use]
    pub fn new(
        logs: Arc<dyn ExecutionLogStore>,
        audit: Arc<dyn AuditSink>,
        checkpoints: Arc<dyn CheckpointStore>,
        dlq: Arc<dyn DlqStore>,
    ) -> Self {
        Self {
            logs,
            audit,
            checkpoints,
            dlq,
        }
    }

    /// Build one snapshot, optionally scoped to a tenant
    pub async fn snapshot(&self, org_id: Option<OrgId>) -> Result<GatewayStats, ApplicationError> {
        let executions: Vec<(String, u64)> = self
            .logs
            .count_by_status(org_id)
            .await?
            .into_iter()
            .map(|(status, count): (ExecutionStatus, u64)| (status.as_str().to_string(), count))
            .collect();

        let times = self.audit.processing_times(PERCENTILE_SAMPLE).await?;
        let processing_time_ms = percentiles(&times);

        let now = Utc::now();
        let checkpoints = self
            .checkpoints
            .list()
            .await?
            .into_iter()
            .map(|checkpoint| CheckpointStats {
                source: checkpoint.source,
                identifier: checkpoint.identifier.clone(),
                last_processed_id: checkpoint.last_processed_id,
                lag_seconds: checkpoint.lag_seconds(now),
                gaps: checkpoint.gaps,
            })
            .collect();

        let dlq_by_status: Vec<(String, u64)> = self
            .dlq
            .count_by_status()
            .await?
            .into_iter()
            .map(|(status, count): (DlqStatus, u64)| (status.as_str().to_string(), count))
            .collect();

        Ok(GatewayStats {
            executions_by_status: executions,
            processing_time_ms,
            checkpoints,
            dlq_by_status,
        })
    }
}

/// Nearest-rank percentiles over a sample
#[must_use]
pub fn percentiles(samples: &[u64]) -> Percentiles {
    if samples.is_empty() {
        return Percentiles::default();
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    let rank = |p: f64| -> u64 {
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let index = ((p / 100.0) * (sorted.len() as f64)).ceil() as usize;
        sorted[index.clamp(1, sorted.len()) - 1]
    };

    Percentiles {
        p50: rank(50.0),
        p95: rank(95.0),
        p99: rank(99.0),
    }
}
