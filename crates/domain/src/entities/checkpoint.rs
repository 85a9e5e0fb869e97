//! Source checkpoint entity - Per-source high-water mark with gap detection

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::OrgId;

use super::event::SourceKind;

/// A detected hole in the monotonic id sequence of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// First missing id
    pub start: i64,
    /// Last missing id
    pub end: i64,
    /// When the gap was detected
    pub detected_at: DateTime<Utc>,
}

/// Per-source high-water mark
///
/// `last_processed_id` is monotonically non-decreasing. Jumps of more than
/// one record a gap; gaps are surfaced to operators, never auto-healed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCheckpoint {
    /// Source kind
    pub source: SourceKind,
    /// Table, topic or `topic:partition`
    pub identifier: String,
    /// Tenant scope; `None` for sources shared across tenants
    pub org_id: Option<OrgId>,
    /// Highest processed id
    pub last_processed_id: i64,
    /// When the last id was processed
    pub last_processed_at: Option<DateTime<Utc>>,
    /// Detected sequence gaps
    pub gaps: Vec<Gap>,
}

impl SourceCheckpoint {
    /// Create an empty checkpoint (nothing processed yet)
    #[must_use]
    pub fn new(source: SourceKind, identifier: impl Into<String>) -> Self {
        Self {
            source,
            identifier: identifier.into(),
            org_id: None,
            last_processed_id: 0,
            last_processed_at: None,
            gaps: Vec::new(),
        }
    }

    /// Scope the checkpoint to one tenant
    #[must_use]
    pub const fn with_org(mut self, org_id: OrgId) -> Self {
        self.org_id = Some(org_id);
        self
    }

    /// Advance the high-water mark
    ///
    /// Ids at or below the current mark are ignored (monotonicity). A jump
    /// of `d > 1` records exactly one gap `{prev+1, curr-1}` and returns it.
    pub fn advance(&mut self, id: i64, now: DateTime<Utc>) -> Option<Gap> {
        if id <= self.last_processed_id {
            return None;
        }

        let gap = if self.last_processed_at.is_some() && id > self.last_processed_id + 1 {
            let gap = Gap {
                start: self.last_processed_id + 1,
                end: id - 1,
                detected_at: now,
            };
            self.gaps.push(gap);
            Some(gap)
        } else {
            None
        };

        self.last_processed_id = id;
        self.last_processed_at = Some(now);
        gap
    }

    /// Seconds since the last processed event, if any
    #[must_use]
    pub fn lag_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_processed_at
            .map(|at| (now - at).num_seconds().max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint() -> SourceCheckpoint {
        SourceCheckpoint::new(SourceKind::Relational, "notification_queue")
    }

    #[test]
    fn advance_is_monotone() {
        let mut cp = checkpoint();
        let now = Utc::now();
        assert!(cp.advance(5, now).is_none());
        assert_eq!(cp.last_processed_id, 5);

        // Going backwards is a no-op
        assert!(cp.advance(3, now).is_none());
        assert_eq!(cp.last_processed_id, 5);

        // Same id is a no-op
        assert!(cp.advance(5, now).is_none());
        assert_eq!(cp.last_processed_id, 5);
    }

    #[test]
    fn consecutive_ids_record_no_gap() {
        let mut cp = checkpoint();
        let now = Utc::now();
        cp.advance(1, now);
        assert!(cp.advance(2, now).is_none());
        assert!(cp.advance(3, now).is_none());
        assert!(cp.gaps.is_empty());
    }

    #[test]
    fn jump_records_exactly_one_gap() {
        let mut cp = checkpoint();
        let now = Utc::now();
        cp.advance(4, now);
        let gap = cp.advance(9, now).unwrap();
        assert_eq!(gap.start, 5);
        assert_eq!(gap.end, 8);
        assert_eq!(cp.gaps.len(), 1);
        assert_eq!(cp.last_processed_id, 9);
    }

    #[test]
    fn first_advance_records_no_gap() {
        // Bootstrapping from an empty checkpoint must not flag the whole
        // history below the first id as missing.
        let mut cp = checkpoint();
        assert!(cp.advance(1000, Utc::now()).is_none());
        assert!(cp.gaps.is_empty());
    }

    #[test]
    fn multiple_gaps_accumulate() {
        let mut cp = checkpoint();
        let now = Utc::now();
        cp.advance(1, now);
        cp.advance(3, now);
        cp.advance(7, now);
        assert_eq!(cp.gaps.len(), 2);
        assert_eq!((cp.gaps[0].start, cp.gaps[0].end), (2, 2));
        assert_eq!((cp.gaps[1].start, cp.gaps[1].end), (4, 6));
    }

    #[test]
    fn lag_is_zero_or_more() {
        let mut cp = checkpoint();
        assert!(cp.lag_seconds(Utc::now()).is_none());
        cp.advance(1, Utc::now());
        assert!(cp.lag_seconds(Utc::now()).unwrap() >= 0);
    }
}
