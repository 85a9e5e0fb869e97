//! Org hierarchy directory
//!
//! The hierarchy itself is owned by the external admin layer; the gateway
//! only needs parent lookups. This implementation holds the two-level map
//! in memory, loaded at startup from configuration.

use std::collections::HashMap;

use async_trait::async_trait;
use domain::value_objects::OrgId;

use application::ApplicationError;
use application::ports::OrgDirectory;

/// In-memory two-level org hierarchy
#[derive(Debug, Clone, Default)]
pub struct StaticOrgDirectory {
    parents: HashMap<OrgId, OrgId>,
}

impl StaticOrgDirectory {
    /// Build the directory from `(child, parent)` pairs
    #[must_use]
    pub fn from_pairs(pairs: impl IntoIterator<Item = (i64, i64)>) -> Self {
        Self {
            parents: pairs
                .into_iter()
                .map(|(child, parent)| (OrgId::new(child), OrgId::new(parent)))
                .collect(),
        }
    }
}

#[async_trait]
impl OrgDirectory for StaticOrgDirectory {
    async fn parent_of(&self, org_id: OrgId) -> Result<Option<OrgId>, ApplicationError> {
        Ok(self.parents.get(&org_id).copied())
    }
}
