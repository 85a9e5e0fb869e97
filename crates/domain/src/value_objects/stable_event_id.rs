//! Stable event identifier used for deduplication
//!
//! # Examples
//!
//! ```
//! use domain::value_objects::{EventType, OrgId, StableEventId};
//!
//! let id = StableEventId::from_parts(
//!     OrgId::new(84),
//!     &EventType::new("PATIENT_REGISTERED"),
//!     "1001",
//! );
//! assert_eq!(id.as_str(), "84-PATIENT_REGISTERED-1001");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{EventType, OrgId};

/// Deterministic identifier of one source occurrence
///
/// Built as `{orgId}-{eventType}-{sourceId}` from the source coordinates,
/// so re-reading the same source row always yields the same id. The
/// processed-event set is keyed by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableEventId(String);

impl StableEventId {
    /// Derive the stable id from its source coordinates
    #[must_use]
    pub fn from_parts(org_id: OrgId, event_type: &EventType, source_id: &str) -> Self {
        Self(format!("{org_id}-{event_type}-{source_id}"))
    }

    /// Wrap an already-derived stable id (e.g. read back from the store)
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Get the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StableEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
