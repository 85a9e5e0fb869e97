//! Value objects shared across the domain

mod event_type;
mod integration_id;
mod org;
mod stable_event_id;
mod trace_id;

pub use event_type::{EventType, WILDCARD};
pub use integration_id::IntegrationId;
pub use org::{OrgId, OrgUnitId};
pub use stable_event_id::StableEventId;
pub use trace_id::TraceId;
