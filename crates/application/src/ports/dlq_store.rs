//! Dead letter queue storage port

use async_trait::async_trait;
use domain::entities::{DlqEntry, DlqStatus};
use domain::value_objects::OrgId;
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

use crate::error::ApplicationError;

/// Port for dead letter queue persistence
///
/// Entries are retained until an operator resolves or abandons them.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DlqStore: Send + Sync {
    /// Append a dead-lettered delivery
    async fn append(&self, entry: &DlqEntry) -> Result<(), ApplicationError>;

    /// Get one entry by id within a tenant
    async fn get(&self, org_id: OrgId, id: Uuid) -> Result<Option<DlqEntry>, ApplicationError>;

    /// List entries, newest first
    async fn list(
        &self,
        org_id: Option<OrgId>,
        status: Option<DlqStatus>,
        limit: u32,
    ) -> Result<Vec<DlqEntry>, ApplicationError>;

    /// Persist a status change
    async fn update(&self, entry: &DlqEntry) -> Result<(), ApplicationError>;

    /// Count entries per status
    async fn count_by_status(&self) -> Result<Vec<(DlqStatus, u64)>, ApplicationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safe(_: &dyn DlqStore) {}
}
