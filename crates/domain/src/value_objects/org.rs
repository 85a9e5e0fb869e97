//! Tenant and org-unit identifiers
//!
//! # Examples
//!
//! ```
//! use domain::value_objects::{OrgId, OrgUnitId};
//!
//! let org = OrgId::new(84);
//! assert_eq!(org.as_i64(), 84);
//! assert_eq!(org.to_string(), "84");
//!
//! let unit = OrgUnitId::new(435);
//! assert_eq!(unit.as_i64(), 435);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// A tenant identifier
///
/// Tenants (organizations) are the top-level isolation boundary: every
/// integration, execution log, scheduled delivery and audit record is owned
/// by exactly one tenant, and every store query is scoped by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(i64);

impl OrgId {
    /// Create an org id from its numeric form
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the underlying numeric id
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrgId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// An org-unit identifier
///
/// Org units are sub-entities of a tenant. They may carry their own
/// integrations and may be excluded from inherited parent integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgUnitId(i64);

impl OrgUnitId {
    /// Create an org-unit id from its numeric form
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the underlying numeric id
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrgUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrgUnitId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_id_roundtrip() {
        let org = OrgId::new(84);
        assert_eq!(org.as_i64(), 84);
        assert_eq!(OrgId::from(84), org);
    }

    #[test]
    fn org_id_display() {
        assert_eq!(OrgId::new(84).to_string(), "84");
    }

    #[test]
    fn org_unit_display() {
        assert_eq!(OrgUnitId::new(435).to_string(), "435");
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&OrgId::new(84)).unwrap();
        assert_eq!(json, "84");
        let back: OrgId = serde_json::from_str("84").unwrap();
        assert_eq!(back, OrgId::new(84));
    }
}
