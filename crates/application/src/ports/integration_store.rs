//! Integration configuration storage port

use async_trait::async_trait;
use domain::entities::{BreakerState, Integration};
use domain::value_objects::{EventType, IntegrationId, OrgId};
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// Port for integration configuration persistence
///
/// Every operation is tenant-scoped: implementations must include the org id
/// in the predicate. The breaker update is a narrow single-row write so that
/// concurrent deliveries to the same integration stay last-writer-wins on
/// the breaker fields alone.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    /// Get one integration by id within a tenant
    async fn get(
        &self,
        org_id: OrgId,
        id: IntegrationId,
    ) -> Result<Option<Integration>, ApplicationError>;

    /// List a tenant's integrations, optionally filtered by exact selector
    async fn list_for_org<'a>(
        &'a self,
        org_id: OrgId,
        event_type: Option<&'a EventType>,
    ) -> Result<Vec<Integration>, ApplicationError>;

    /// Insert or replace an integration
    async fn upsert(&self, integration: &Integration) -> Result<(), ApplicationError>;

    /// Delete an integration
    async fn delete(&self, org_id: OrgId, id: IntegrationId) -> Result<(), ApplicationError>;

    /// Overwrite only the breaker fields of one integration
    async fn update_breaker(
        &self,
        org_id: OrgId,
        id: IntegrationId,
        breaker: &BreakerState,
    ) -> Result<(), ApplicationError>;

    /// Org ids that currently have at least one active integration
    ///
    /// Feeds the source adapters' tenant allowlist.
    async fn active_org_ids(&self) -> Result<Vec<OrgId>, ApplicationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safe(_: &dyn IntegrationStore) {}

    #[test]
    fn trait_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn IntegrationStore>();
    }
}
