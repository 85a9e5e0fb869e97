//! Processed event (deduplication) storage port

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::entities::ProcessedEvent;
use domain::value_objects::StableEventId;
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// Port for the short-TTL processed-event set
///
/// The insert is the commit point of the idempotency filter: a duplicate
/// stable id must fail with [`ApplicationError::DuplicateEvent`]. The
/// uniqueness constraint in the store is what enforces the invariant under
/// concurrency.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Insert an acceptance marker; fails on a duplicate stable id
    async fn insert(&self, marker: &ProcessedEvent) -> Result<(), ApplicationError>;

    /// Whether a stable id has been accepted (and not yet expired)
    async fn contains(&self, stable_id: &StableEventId) -> Result<bool, ApplicationError>;

    /// Remove markers past their expiry; returns rows removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, ApplicationError>;
}
