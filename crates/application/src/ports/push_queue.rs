//! Push ingestion queue port

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::value_objects::{EventType, OrgId};
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// One pushed event awaiting ingestion
#[derive(Debug, Clone)]
pub struct PushEnvelope {
    /// Queue row id; monotone, used as the push source's sequence
    pub id: i64,
    /// Tenant (or org unit) the event belongs to
    pub org_id: OrgId,
    /// Event type name
    pub event_type: EventType,
    /// Opaque payload
    pub payload: serde_json::Value,
    /// Free-form source label supplied by the pusher
    pub source: String,
    /// When the envelope was enqueued
    pub enqueued_at: DateTime<Utc>,
}

/// Port for the bounded push-ingestion work queue
///
/// Entries move `pending → processing → done|failed`; the claim takes the
/// oldest pending rows, and a stale sweeper returns long-`processing` rows
/// to `pending`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PushQueue: Send + Sync {
    /// Enqueue a pushed event; returns its queue row id
    async fn enqueue(
        &self,
        org_id: OrgId,
        event_type: EventType,
        payload: serde_json::Value,
        source: String,
    ) -> Result<i64, ApplicationError>;

    /// Atomically claim up to `batch` oldest pending rows
    async fn claim(&self, batch: u32) -> Result<Vec<PushEnvelope>, ApplicationError>;

    /// Mark a claimed row done
    async fn mark_done(&self, id: i64) -> Result<(), ApplicationError>;

    /// Mark a claimed row failed
    async fn mark_failed(&self, id: i64, reason: &str) -> Result<(), ApplicationError>;

    /// Return rows `processing` since before the cutoff to `pending`
    async fn reset_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, ApplicationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safe(_: &dyn PushQueue) {}
}
