//! Processed event marker - Short-TTL deduplication record

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{OrgId, StableEventId};

/// How long a processed-event marker is retained
pub const PROCESSED_EVENT_TTL: Duration = Duration::hours(6);

/// Marker that an event's stable id has been accepted
///
/// Uniqueness on the stable id is what enforces at-most-one acceptance;
/// the insert of this record is the commit point of the idempotency filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Stable event id (unique)
    pub stable_id: StableEventId,
    /// Source-local identifier
    pub source_id: String,
    /// Owning tenant
    pub org_id: OrgId,
    /// When the event was accepted
    pub processed_at: DateTime<Utc>,
    /// When this marker expires
    pub expires_at: DateTime<Utc>,
}

impl ProcessedEvent {
    /// Create a marker accepted now, expiring after the TTL
    #[must_use]
    pub fn new(stable_id: StableEventId, source_id: impl Into<String>, org_id: OrgId) -> Self {
        let now = Utc::now();
        Self {
            stable_id,
            source_id: source_id.into(),
            org_id,
            processed_at: now,
            expires_at: now + PROCESSED_EVENT_TTL,
        }
    }

    /// Whether the marker has outlived its TTL
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
