//! Execution log storage port

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::entities::{DeliveryAttempt, ExecutionLog, ExecutionStatus};
use domain::value_objects::{IntegrationId, OrgId, TraceId};
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// Filters for listing execution logs
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    /// Restrict to one tenant
    pub org_id: Option<OrgId>,
    /// Restrict to one integration
    pub integration_id: Option<IntegrationId>,
    /// Restrict to one status
    pub status: Option<ExecutionStatus>,
    /// Maximum number of results
    pub limit: Option<u32>,
}

impl LogQuery {
    /// Query for all logs of a tenant
    #[must_use]
    pub fn for_org(org_id: OrgId) -> Self {
        Self {
            org_id: Some(org_id),
            ..Default::default()
        }
    }

    /// Set status filter
    #[must_use]
    pub const fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set limit
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Port for execution log persistence
///
/// Upsert is keyed by trace id: retries of one delivery always update the
/// same record and never insert a second one. Per-attempt detail rows are
/// appended separately.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExecutionLogStore: Send + Sync {
    /// Insert or update a log by its trace id
    async fn upsert(&self, log: &ExecutionLog) -> Result<(), ApplicationError>;

    /// Get a log by trace id within a tenant
    async fn get(
        &self,
        org_id: OrgId,
        trace_id: TraceId,
    ) -> Result<Option<ExecutionLog>, ApplicationError>;

    /// Append one per-attempt detail row
    async fn append_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), ApplicationError>;

    /// Attempt rows of one delivery, oldest first
    async fn attempts_for(
        &self,
        trace_id: TraceId,
    ) -> Result<Vec<DeliveryAttempt>, ApplicationError>;

    /// Logs awaiting a retry: `RETRYING`, non-scheduled trigger, last attempt
    /// inside `[window_start, now]`, oldest attempt first
    async fn list_retrying(
        &self,
        window_start: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ExecutionLog>, ApplicationError>;

    /// `RETRYING` logs whose last attempt predates the cutoff
    ///
    /// Feeds the retry-window sweeper.
    async fn list_retrying_older_than(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ExecutionLog>, ApplicationError>;

    /// Query logs for the admin API
    async fn query(&self, query: &LogQuery) -> Result<Vec<ExecutionLog>, ApplicationError>;

    /// Delete one log and its attempt rows
    async fn delete(&self, org_id: OrgId, trace_id: TraceId) -> Result<(), ApplicationError>;

    /// Count logs per status, optionally scoped to one tenant
    async fn count_by_status(
        &self,
        org_id: Option<OrgId>,
    ) -> Result<Vec<(ExecutionStatus, u64)>, ApplicationError>;

    /// Purge terminal logs older than the cutoff; returns rows removed
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ApplicationError>;
}
