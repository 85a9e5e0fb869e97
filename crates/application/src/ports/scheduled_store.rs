//! Scheduled delivery storage port

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::entities::{CancellationMatch, ScheduleStatus, ScheduledDelivery};
use domain::value_objects::OrgId;
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

use crate::error::ApplicationError;

/// Filters for listing scheduled deliveries
#[derive(Debug, Clone, Default)]
pub struct ScheduleQuery {
    /// Restrict to one tenant
    pub org_id: Option<OrgId>,
    /// Restrict to one status
    pub status: Option<ScheduleStatus>,
    /// Maximum number of results
    pub limit: Option<u32>,
}

/// Port for scheduled delivery persistence
///
/// The claim is the concurrency primitive: `claim_due` must atomically
/// transition exactly one due `PENDING|OVERDUE` entry to `PROCESSING` and
/// return it. Repeated calls return distinct entries; a claimed entry is
/// owned by its claimer until a terminal write or the stale sweeper.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScheduledDeliveryStore: Send + Sync {
    /// Insert a new entry
    async fn insert(&self, entry: &ScheduledDelivery) -> Result<(), ApplicationError>;

    /// Get one entry by id within a tenant
    async fn get(
        &self,
        org_id: OrgId,
        id: Uuid,
    ) -> Result<Option<ScheduledDelivery>, ApplicationError>;

    /// Atomically claim one due entry, transitioning it to `PROCESSING`
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledDelivery>, ApplicationError>;

    /// Persist a status transition of a claimed entry
    async fn update(&self, entry: &ScheduledDelivery) -> Result<(), ApplicationError>;

    /// Return a claimed entry to `PENDING` without counting an attempt
    async fn release(&self, id: Uuid) -> Result<(), ApplicationError>;

    /// Cancel all `PENDING` entries of a tenant whose cancellation descriptor
    /// matches; returns the number cancelled
    async fn cancel_by_match(
        &self,
        org_id: OrgId,
        descriptor: &CancellationMatch,
    ) -> Result<u64, ApplicationError>;

    /// Return entries stuck in `PROCESSING` since before the cutoff to
    /// `PENDING`; returns the number reset
    async fn reset_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, ApplicationError>;

    /// Promote `PENDING` entries already past due at the cutoff to `OVERDUE`
    async fn mark_overdue(&self, cutoff: DateTime<Utc>) -> Result<u64, ApplicationError>;

    /// Query entries for the admin API
    async fn query(
        &self,
        query: &ScheduleQuery,
    ) -> Result<Vec<ScheduledDelivery>, ApplicationError>;
}
