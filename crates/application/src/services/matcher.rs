//! Integration matcher
//!
//! Resolves which integrations fire for an event under the two-level org
//! hierarchy: tenant-level integrations are inherited by child org units
//! unless scoped to the entity only or explicitly excluded, and org units
//! may carry integrations of their own.

use std::sync::Arc;

use domain::entities::Integration;
use domain::value_objects::{EventType, OrgId, OrgUnitId};
use tracing::{debug, instrument};

use crate::error::ApplicationError;
use crate::ports::IntegrationStore;

/// Resolves the set of integrations to fire for an event
#[derive(Clone)]
pub struct IntegrationMatcher {
    store: Arc<dyn IntegrationStore>,
}

impl std::fmt::Debug for IntegrationMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationMatcher").finish_non_exhaustive()
    }
}

impl IntegrationMatcher {
    /// Create a matcher over the integration store
    #[must_use]
    pub fn new(store: Arc<dyn IntegrationStore>) -> Self {
        Self { store }
    }

    /// Resolve the ordered set of integrations for `(org, org_unit, event_type)`
    ///
    /// The result keeps only active outbound integrations whose selector
    /// matches, with inheritance and exclusion applied. Ordering carries no
    /// semantics but is stable across calls: last-updated descending, id as
    /// the tiebreak.
    #[instrument(skip(self), fields(org = %org_id, event_type = %event_type))]
    pub async fn resolve(
        &self,
        org_id: OrgId,
        org_unit: Option<OrgUnitId>,
        event_type: &EventType,
    ) -> Result<Vec<Integration>, ApplicationError> {
        let candidates = self.store.list_for_org(org_id, None).await?;

        let mut matched: Vec<Integration> = candidates
            .into_iter()
            .filter(|integration| integration.is_active && integration.is_outbound())
            .filter(|integration| integration.selects(event_type))
            .filter(|integration| Self::in_scope(integration, org_unit))
            .collect();

        matched.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.as_uuid().cmp(&b.id.as_uuid()))
        });

        debug!(matched = matched.len(), "Resolved integrations for event");
        Ok(matched)
    }

    /// Inheritance rule for one integration against the emitting entity
    ///
    /// An integration bound to an org unit fires only for that unit's
    /// events. A tenant-level integration fires for the tenant's own events
    /// always, and for child-unit events only when scoped to include
    /// children and the unit is not excluded.
    fn in_scope(integration: &Integration, org_unit: Option<OrgUnitId>) -> bool {
        match (integration.org_unit, org_unit) {
            (Some(owner), Some(unit)) => owner == unit,
            (Some(_), None) => false,
            (None, None) => true,
            (None, Some(unit)) => integration.applies_to_child(unit),
        }
    }
}
