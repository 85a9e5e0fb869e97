//! Dead letter queue entry - Terminal record of an abandoned delivery

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::{IntegrationId, OrgId, TraceId};

use super::execution_log::DeliveryError;

/// Status of a dead-lettered delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqStatus {
    /// Awaiting operator attention
    Pending,
    /// Re-queued for another delivery round
    Retrying,
    /// Operator resolved the entry
    Resolved,
    /// Operator gave up on the entry
    Abandoned,
}

impl DlqStatus {
    /// Canonical persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Resolved => "resolved",
            Self::Abandoned => "abandoned",
        }
    }
}

impl std::str::FromStr for DlqStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "retrying" => Ok(Self::Retrying),
            "resolved" => Ok(Self::Resolved),
            "abandoned" => Ok(Self::Abandoned),
            _ => Err(format!("Unknown DLQ status: {s}")),
        }
    }
}

/// One dead-lettered delivery
///
/// Retained indefinitely until an operator resolves or abandons it.
#[derive(Debug, Clone)]
pub struct DlqEntry {
    /// Unique identifier
    pub id: Uuid,
    /// Execution log that exhausted its retries
    pub trace_id: TraceId,
    /// Integration the delivery was aimed at
    pub integration_id: IntegrationId,
    /// Owning tenant
    pub org_id: OrgId,
    /// Payload that failed to deliver
    pub payload: serde_json::Value,
    /// Final failure
    pub error: DeliveryError,
    /// Current status
    pub status: DlqStatus,
    /// Manual retries performed from the DLQ
    pub retry_count: u32,
    /// Manual retry ceiling
    pub max_retries: u32,
    /// Next manual retry time, when `Retrying`
    pub next_retry_at: Option<DateTime<Utc>>,
    /// When the entry was resolved; set iff `Resolved`
    pub resolved_at: Option<DateTime<Utc>>,
    /// Operator note recorded at resolution
    pub resolution_note: Option<String>,
    /// When the delivery was dead-lettered
    pub created_at: DateTime<Utc>,
}

impl DlqEntry {
    /// Dead-letter an abandoned delivery
    #[must_use]
    pub fn new(
        trace_id: TraceId,
        integration_id: IntegrationId,
        org_id: OrgId,
        payload: serde_json::Value,
        error: DeliveryError,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trace_id,
            integration_id,
            org_id,
            payload,
            error,
            status: DlqStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: None,
            resolved_at: None,
            resolution_note: None,
            created_at: Utc::now(),
        }
    }

    /// Resolve the entry with an operator note
    pub fn resolve(&mut self, note: impl Into<String>, now: DateTime<Utc>) {
        self.status = DlqStatus::Resolved;
        self.resolved_at = Some(now);
        self.resolution_note = Some(note.into());
    }

    /// Queue a manual retry; returns `false` once the ceiling is reached
    pub fn begin_retry(&mut self, next_at: DateTime<Utc>) -> bool {
        if self.retry_count >= self.max_retries {
            self.status = DlqStatus::Abandoned;
            return false;
        }
        self.retry_count += 1;
        self.status = DlqStatus::Retrying;
        self.next_retry_at = Some(next_at);
        true
    }

    /// Invariant check: `Resolved` implies `resolved_at` set
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        !matches!(self.status, DlqStatus::Resolved) || self.resolved_at.is_some()
    }
}
