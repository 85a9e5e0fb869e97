//! Scheduled delivery entity - Future-dated, possibly recurring dispatch

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::{IntegrationId, OrgId, TraceId};

/// Window inside which a cancellation request matches a scheduled entry
pub const CANCELLATION_WINDOW: Duration = Duration::hours(1);

/// Status of a scheduled delivery entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    /// Waiting for its scheduled time
    Pending,
    /// Scheduled time passed without a claim (restart backlog)
    Overdue,
    /// Claimed by a scheduler worker
    Processing,
    /// Delivered
    Sent,
    /// Delivery retries exhausted
    Failed,
    /// Cancelled by match or operator
    Cancelled,
}

impl ScheduleStatus {
    /// Whether a scheduler worker may claim this entry
    #[must_use]
    pub const fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Overdue)
    }

    /// Whether no further transitions are possible
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }

    /// Canonical persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Overdue => "OVERDUE",
            Self::Processing => "PROCESSING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "OVERDUE" => Ok(Self::Overdue),
            "PROCESSING" => Ok(Self::Processing),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown schedule status: {s}")),
        }
    }
}

/// Recurrence bookkeeping for a recurring integration
///
/// Every occurrence materializes as an independent entry; `occurrence`
/// counts up to `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    /// Interval between occurrences, in seconds
    pub interval_secs: i64,
    /// Total number of occurrences
    pub count: u32,
    /// 1-based index of this occurrence
    pub occurrence: u32,
}

impl Recurrence {
    /// Whether more occurrences follow this one
    #[must_use]
    pub const fn has_remaining(&self) -> bool {
        self.occurrence < self.count
    }

    /// The follow-up descriptor, if any occurrences remain
    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        if self.has_remaining() {
            Some(Self {
                interval_secs: self.interval_secs,
                count: self.count,
                occurrence: self.occurrence + 1,
            })
        } else {
            None
        }
    }
}

/// Match descriptor for cancellation-by-match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationMatch {
    /// The patient the scheduled delivery concerns
    pub patient_rid: i64,
    /// The appointment time the delivery was scheduled around
    pub scheduled_at: DateTime<Utc>,
}

impl CancellationMatch {
    /// Whether a cancellation request matches this descriptor
    ///
    /// The patient must be equal and the times within the ±1 h window.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.patient_rid == other.patient_rid
            && (self.scheduled_at - other.scheduled_at).abs() <= CANCELLATION_WINDOW
    }
}

/// A future-dated delivery entry
#[derive(Debug, Clone)]
pub struct ScheduledDelivery {
    /// Unique identifier
    pub id: Uuid,
    /// Integration to deliver through
    pub integration_id: IntegrationId,
    /// Owning tenant
    pub org_id: OrgId,
    /// When this entry becomes due
    pub scheduled_for: DateTime<Utc>,
    /// Current status
    pub status: ScheduleStatus,
    /// Delivery attempts made
    pub attempt_count: u32,
    /// Pre-transformed payload submitted at dispatch time
    pub payload: serde_json::Value,
    /// The original event payload, kept for audit and re-transformation
    pub original_payload: serde_json::Value,
    /// Recurrence bookkeeping, when recurring
    pub recurrence: Option<Recurrence>,
    /// Cancellation-match descriptor, when cancellable
    pub cancellation: Option<CancellationMatch>,
    /// When the current `Processing` claim started
    pub processing_started_at: Option<DateTime<Utc>>,
    /// When the entry was delivered
    pub delivered_at: Option<DateTime<Utc>>,
    /// Execution log of the delivering dispatch
    pub delivery_log_id: Option<TraceId>,
    /// Last delivery error
    pub last_error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl ScheduledDelivery {
    /// Create a new pending entry
    #[must_use]
    pub fn new(
        integration_id: IntegrationId,
        org_id: OrgId,
        scheduled_for: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            integration_id,
            org_id,
            scheduled_for,
            status: ScheduleStatus::Pending,
            attempt_count: 0,
            original_payload: payload.clone(),
            payload,
            recurrence: None,
            cancellation: None,
            processing_started_at: None,
            delivered_at: None,
            delivery_log_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach recurrence bookkeeping
    #[must_use]
    pub const fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = Some(recurrence);
        self
    }

    /// Attach a cancellation-match descriptor
    #[must_use]
    pub const fn with_cancellation(mut self, cancellation: CancellationMatch) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    /// Whether the entry is due at the given instant
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.scheduled_for <= now
    }

    /// Mark delivered
    pub fn mark_sent(&mut self, log_id: TraceId, now: DateTime<Utc>) {
        self.status = ScheduleStatus::Sent;
        self.delivered_at = Some(now);
        self.delivery_log_id = Some(log_id);
        self.processing_started_at = None;
        self.updated_at = now;
    }

    /// Reschedule after a transient failure
    pub fn reschedule(&mut self, next_at: DateTime<Utc>, error: impl Into<String>) {
        let now = Utc::now();
        self.status = ScheduleStatus::Pending;
        self.scheduled_for = next_at;
        self.attempt_count += 1;
        self.last_error = Some(error.into());
        self.processing_started_at = None;
        self.updated_at = now;
    }

    /// Mark terminally failed after retry exhaustion
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = ScheduleStatus::Failed;
        self.attempt_count += 1;
        self.last_error = Some(error.into());
        self.processing_started_at = None;
        self.updated_at = now;
    }

    /// Cancel the entry
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = ScheduleStatus::Cancelled;
        self.processing_started_at = None;
        self.updated_at = now;
    }

    /// Materialize the next recurring occurrence as an independent entry
    #[must_use]
    pub fn next_occurrence(&self) -> Option<Self> {
        let next = self.recurrence?.next()?;
        let mut entry = Self::new(
            self.integration_id,
            self.org_id,
            self.scheduled_for + Duration::seconds(next.interval_secs),
            self.original_payload.clone(),
        );
        entry.recurrence = Some(next);
        entry.cancellation = self.cancellation;
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ScheduledDelivery {
        ScheduledDelivery::new(
            IntegrationId::new(),
            OrgId::new(84),
            Utc::now() + Duration::minutes(2),
            serde_json::json!({"patientRid": 59071145}),
        )
    }

    #[test]
    fn new_entry_is_pending() {
        let entry = sample();
        assert_eq!(entry.status, ScheduleStatus::Pending);
        assert_eq!(entry.attempt_count, 0);
        assert_eq!(entry.payload, entry.original_payload);
    }

    #[test]
    fn due_only_when_time_reached_and_claimable() {
        let mut entry = sample();
        assert!(!entry.is_due(Utc::now()));
        assert!(entry.is_due(Utc::now() + Duration::minutes(5)));

        entry.status = ScheduleStatus::Overdue;
        assert!(entry.is_due(Utc::now() + Duration::minutes(5)));

        entry.status = ScheduleStatus::Processing;
        assert!(!entry.is_due(Utc::now() + Duration::minutes(5)));
    }

    #[test]
    fn mark_sent_is_terminal() {
        let mut entry = sample();
        let log_id = TraceId::new();
        let now = Utc::now();
        entry.mark_sent(log_id, now);
        assert_eq!(entry.status, ScheduleStatus::Sent);
        assert_eq!(entry.delivered_at, Some(now));
        assert_eq!(entry.delivery_log_id, Some(log_id));
        assert!(entry.status.is_terminal());
    }

    #[test]
    fn reschedule_increments_attempts() {
        let mut entry = sample();
        let next = Utc::now() + Duration::minutes(4);
        entry.reschedule(next, "503 from target");
        assert_eq!(entry.status, ScheduleStatus::Pending);
        assert_eq!(entry.scheduled_for, next);
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(entry.last_error.as_deref(), Some("503 from target"));
    }

    #[test]
    fn cancellation_match_within_window() {
        let at = Utc::now();
        let descriptor = CancellationMatch {
            patient_rid: 59_071_145,
            scheduled_at: at,
        };

        let same_time = CancellationMatch {
            patient_rid: 59_071_145,
            scheduled_at: at,
        };
        assert!(descriptor.matches(&same_time));

        let inside = CancellationMatch {
            patient_rid: 59_071_145,
            scheduled_at: at + Duration::minutes(59),
        };
        assert!(descriptor.matches(&inside));

        let outside = CancellationMatch {
            patient_rid: 59_071_145,
            scheduled_at: at + Duration::minutes(61),
        };
        assert!(!descriptor.matches(&outside));

        let other_patient = CancellationMatch {
            patient_rid: 1,
            scheduled_at: at,
        };
        assert!(!descriptor.matches(&other_patient));
    }

    #[test]
    fn cancellation_window_is_symmetric() {
        let at = Utc::now();
        let descriptor = CancellationMatch {
            patient_rid: 7,
            scheduled_at: at,
        };
        let earlier = CancellationMatch {
            patient_rid: 7,
            scheduled_at: at - Duration::minutes(45),
        };
        assert!(descriptor.matches(&earlier));
    }

    #[test]
    fn recurrence_expansion() {
        let entry = sample().with_recurrence(Recurrence {
            interval_secs: 3600,
            count: 3,
            occurrence: 1,
        });

        let second = entry.next_occurrence().unwrap();
        assert_eq!(second.scheduled_for, entry.scheduled_for + Duration::hours(1));
        assert_eq!(second.recurrence.unwrap().occurrence, 2);
        assert_eq!(second.status, ScheduleStatus::Pending);
        assert_ne!(second.id, entry.id);

        let third = second.next_occurrence().unwrap();
        assert_eq!(third.recurrence.unwrap().occurrence, 3);
        assert!(third.next_occurrence().is_none());
    }

    #[test]
    fn recurrence_keeps_cancellation_descriptor() {
        let cancellation = CancellationMatch {
            patient_rid: 9,
            scheduled_at: Utc::now(),
        };
        let entry = sample()
            .with_recurrence(Recurrence {
                interval_secs: 60,
                count: 2,
                occurrence: 1,
            })
            .with_cancellation(cancellation);

        let next = entry.next_occurrence().unwrap();
        assert_eq!(next.cancellation, Some(cancellation));
    }

    #[test]
    fn non_recurring_has_no_next() {
        assert!(sample().next_occurrence().is_none());
    }

    #[test]
    fn status_parse_roundtrip() {
        for status in [
            ScheduleStatus::Pending,
            ScheduleStatus::Overdue,
            ScheduleStatus::Processing,
            ScheduleStatus::Sent,
            ScheduleStatus::Failed,
            ScheduleStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ScheduleStatus>().unwrap(), status);
        }
    }
}
