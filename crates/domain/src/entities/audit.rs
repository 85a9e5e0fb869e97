//! Event audit record - One record per received event

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::value_objects::{EventType, OrgId, StableEventId};

use super::event::SourceKind;
use super::execution_log::ErrorCategory;

/// Overall outcome of one received event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    /// At least one integration received the event
    Delivered,
    /// The event was not forwarded (duplicate, open circuit, no match)
    Skipped,
    /// Every matched integration failed
    Failed,
    /// Processing did not complete
    Stuck,
}

impl AuditStatus {
    /// Canonical persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "DELIVERED",
            Self::Skipped => "SKIPPED",
            Self::Failed => "FAILED",
            Self::Stuck => "STUCK",
        }
    }
}

impl std::str::FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DELIVERED" => Ok(Self::Delivered),
            "SKIPPED" => Ok(Self::Skipped),
            "FAILED" => Ok(Self::Failed),
            "STUCK" => Ok(Self::Stuck),
            _ => Err(format!("Unknown audit status: {s}")),
        }
    }
}

/// Per-event delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySummary {
    /// Integrations the matcher selected
    pub integrations_matched: u32,
    /// Deliveries that succeeded
    pub delivered_count: u32,
    /// Deliveries that failed or were abandoned
    pub failed_count: u32,
}

impl DeliverySummary {
    /// Derive the audit status from the counters
    ///
    /// Deliveries still in flight (retrying, or handed to the scheduler)
    /// count as neither delivered nor failed; an event whose matches are all
    /// in flight reads as delivered: it was accepted and handed off.
    #[must_use]
    pub const fn status(&self) -> AuditStatus {
        if self.integrations_matched == 0 {
            AuditStatus::Skipped
        } else if self.delivered_count > 0 {
            AuditStatus::Delivered
        } else if self.failed_count > 0 {
            AuditStatus::Failed
        } else {
            AuditStatus::Delivered
        }
    }
}

/// One step in the processing timeline of an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Stage name (e.g. `received`, `matched`, `delivered`)
    pub stage: String,
    /// When the stage completed
    pub at: DateTime<Utc>,
    /// Optional detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Audit record for one received event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Owning tenant
    pub org_id: OrgId,
    /// Stable event id
    pub event_id: StableEventId,
    /// Event type
    pub event_type: EventType,
    /// Source kind
    pub source: SourceKind,
    /// Source-local identifier
    pub source_id: String,
    /// Overall outcome
    pub status: AuditStatus,
    /// Why the event was skipped, when skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_category: Option<ErrorCategory>,
    /// Delivery counters
    pub delivery: DeliverySummary,
    /// End-to-end processing time in milliseconds
    pub processing_time_ms: u64,
    /// Allowlisted payload fields only
    pub payload_summary: serde_json::Map<String, serde_json::Value>,
    /// SHA-256 hex digest of the full payload
    pub payload_hash: String,
    /// Processing timeline
    pub timeline: Vec<TimelineEntry>,
    /// When the record was written
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Start an audit record for a received event
    #[must_use]
    pub fn begin(
        org_id: OrgId,
        event_id: StableEventId,
        event_type: EventType,
        source: SourceKind,
        source_id: impl Into<String>,
        payload: &serde_json::Value,
        allowed_fields: &[String],
    ) -> Self {
        let now = Utc::now();
        Self {
            org_id,
            event_id,
            event_type,
            source,
            source_id: source_id.into(),
            status: AuditStatus::Stuck,
            skip_category: None,
            delivery: DeliverySummary::default(),
            processing_time_ms: 0,
            payload_summary: summarize_payload(payload, allowed_fields),
            payload_hash: hash_payload(payload),
            timeline: vec![TimelineEntry {
                stage: "received".to_string(),
                at: now,
                detail: None,
            }],
            recorded_at: now,
        }
    }

    /// Append a timeline stage
    pub fn record_stage(&mut self, stage: impl Into<String>, detail: Option<String>) {
        self.timeline.push(TimelineEntry {
            stage: stage.into(),
            at: Utc::now(),
            detail,
        });
    }

    /// Finalize as skipped with the given category
    pub fn finish_skipped(&mut self, category: ErrorCategory, started_at: DateTime<Utc>) {
        self.status = AuditStatus::Skipped;
        self.skip_category = Some(category);
        self.finish(started_at);
    }

    /// Finalize with delivery counters; status derived from them
    pub fn finish_with_summary(&mut self, summary: DeliverySummary, started_at: DateTime<Utc>) {
        self.delivery = summary;
        self.status = summary.status();
        self.finish(started_at);
    }

    fn finish(&mut self, started_at: DateTime<Utc>) {
        let now = Utc::now();
        #[allow(clippy::cast_sign_loss)]
        let elapsed = (now - started_at).num_milliseconds().max(0) as u64;
        self.processing_time_ms = elapsed;
        self.recorded_at = now;
    }
}

/// Extract only the allowlisted top-level fields of a payload
#[must_use]
pub fn summarize_payload(
    payload: &serde_json::Value,
    allowed_fields: &[String],
) -> serde_json::Map<String, serde_json::Value> {
    let mut summary = serde_json::Map::new();
    if let Some(object) = payload.as_object() {
        for field in allowed_fields {
            if let Some(value) = object.get(field) {
                summary.insert(field.clone(), value.clone());
            }
        }
    }
    summary
}

/// SHA-256 hex digest of the canonical JSON serialization of a payload
#[must_use]
pub fn hash_payload(payload: &serde_json::Value) -> String {
    let canonical = payload.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}
