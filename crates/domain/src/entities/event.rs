//! Event entity - Normalized record emitted by a source adapter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{EventType, OrgId, OrgUnitId, StableEventId};

/// Kind of source an event was drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Sequential-relational queue polled by monotonic id
    Relational,
    /// Streaming broker partition consumer
    Broker,
    /// HTTP push endpoint feeding the pending-events queue
    Push,
}

impl SourceKind {
    /// Canonical persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Broker => "broker",
            Self::Push => "push",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relational" => Ok(Self::Relational),
            "broker" => Ok(Self::Broker),
            "push" => Ok(Self::Push),
            _ => Err(format!("Unknown source kind: {s}")),
        }
    }
}

/// Where exactly an event came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Source kind
    pub kind: SourceKind,
    /// Table or topic name
    pub identifier: String,
    /// Broker partition, when applicable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<i32>,
    /// Monotonic sequence used for checkpointing (row id or offset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    /// Source-local identifier, part of the stable event id
    pub source_id: String,
}

impl SourceRef {
    /// Coordinates of a sequential-relational row
    #[must_use]
    pub fn relational(table: impl Into<String>, row_id: i64) -> Self {
        Self {
            kind: SourceKind::Relational,
            identifier: table.into(),
            partition: None,
            sequence: Some(row_id),
            source_id: row_id.to_string(),
        }
    }

    /// Coordinates of a broker record
    #[must_use]
    pub fn broker(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            kind: SourceKind::Broker,
            identifier: topic.into(),
            partition: Some(partition),
            sequence: Some(offset),
            source_id: format!("{partition}:{offset}"),
        }
    }

    /// Coordinates of a pushed event
    #[must_use]
    pub fn push(source_id: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Push,
            identifier: "pending_events".to_string(),
            partition: None,
            sequence: None,
            source_id: source_id.into(),
        }
    }
}

/// One normalized business occurrence
///
/// The payload is opaque to the core: only the transformer interprets it.
/// It is immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Owning tenant
    pub org_id: OrgId,
    /// Org unit the occurrence belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_unit: Option<OrgUnitId>,
    /// Event type name
    pub event_type: EventType,
    /// Opaque payload
    pub payload: serde_json::Value,
    /// Source coordinates
    pub source: SourceRef,
    /// When the adapter emitted this event
    pub received_at: DateTime<Utc>,
}

impl Event {
    /// Create a new event received now
    #[must_use]
    pub fn new(
        org_id: OrgId,
        event_type: EventType,
        payload: serde_json::Value,
        source: SourceRef,
    ) -> Self {
        Self {
            org_id,
            org_unit: None,
            event_type,
            payload,
            source,
            received_at: Utc::now(),
        }
    }

    /// Attach the org unit the occurrence belongs to
    #[must_use]
    pub const fn with_org_unit(mut self, unit: OrgUnitId) -> Self {
        self.org_unit = Some(unit);
        self
    }

    /// Deterministic deduplication id: `{orgId}-{eventType}-{sourceId}`
    #[must_use]
    pub fn stable_id(&self) -> StableEventId {
        StableEventId::from_parts(self.org_id, &self.event_type, &self.source.source_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Event {
        Event::new(
            OrgId::new(84),
            EventType::new("PATIENT_REGISTERED"),
            serde_json::json!({"patientRid": 59071145}),
            SourceRef::relational("notification_queue", 1001),
        )
    }

    #[test]
    fn stable_id_from_coordinates() {
        assert_eq!(sample().stable_id().as_str(), "84-PATIENT_REGISTERED-1001");
    }

    #[test]
    fn stable_id_is_deterministic() {
        assert_eq!(sample().stable_id(), sample().stable_id());
    }

    #[test]
    fn relational_source_ref() {
        let source = SourceRef::relational("notification_queue", 42);
        assert_eq!(source.kind, SourceKind::Relational);
        assert_eq!(source.sequence, Some(42));
        assert_eq!(source.source_id, "42");
    }

    #[test]
    fn broker_source_ref_encodes_partition_and_offset() {
        let source = SourceRef::broker("events", 3, 999);
        assert_eq!(source.partition, Some(3));
        assert_eq!(source.sequence, Some(999));
        assert_eq!(source.source_id, "3:999");
    }

    #[test]
    fn push_source_ref_has_no_sequence() {
        let source = SourceRef::push("req-abc");
        assert_eq!(source.kind, SourceKind::Push);
        assert!(source.sequence.is_none());
    }

    #[test]
    fn source_kind_parse_roundtrip() {
        for kind in [SourceKind::Relational, SourceKind::Broker, SourceKind::Push] {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("carrier-pigeon".parse::<SourceKind>().is_err());
    }
}
