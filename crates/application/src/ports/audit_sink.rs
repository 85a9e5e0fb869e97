//! Event audit sink port

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::entities::AuditRecord;
use domain::value_objects::OrgId;
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// Port for the per-event audit trail
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one audit record
    async fn record(&self, record: &AuditRecord) -> Result<(), ApplicationError>;

    /// Recent audit records of a tenant, newest first
    async fn list_for_org(
        &self,
        org_id: OrgId,
        limit: u32,
    ) -> Result<Vec<AuditRecord>, ApplicationError>;

    /// Processing times (milliseconds) of the most recent records
    ///
    /// Feeds the percentile stats on the admin API.
    async fn processing_times(&self, limit: u32) -> Result<Vec<u64>, ApplicationError>;

    /// Purge records older than the retention cutoff; returns rows removed
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, ApplicationError>;
}
