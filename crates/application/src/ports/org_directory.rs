//! Tenant hierarchy lookup port

use async_trait::async_trait;
use domain::value_objects::OrgId;
#[cfg(test)]
use mockall::automock;

use crate::error::ApplicationError;

/// Port for the two-level org hierarchy
///
/// The hierarchy itself is maintained by the external admin layer; the
/// delivery path only ever asks for an entity's parent.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrgDirectory: Send + Sync {
    /// Parent of an entity; `None` when the entity is itself a root tenant
    async fn parent_of(&self, org_id: OrgId) -> Result<Option<OrgId>, ApplicationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safe(_: &dyn OrgDirectory) {}
}
