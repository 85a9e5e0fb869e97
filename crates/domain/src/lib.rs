//! Domain layer of the RelayGate delivery gateway
//!
//! Pure types and invariants: tenants and integrations, normalized events,
//! delivery lifecycles, scheduled deliveries, checkpoints, audit records and
//! the dead letter queue. No I/O lives here; stores and transports are
//! defined as ports in the application layer and implemented in the
//! infrastructure layer.

pub mod entities;
pub mod errors;
pub mod value_objects;

pub use errors::DomainError;
pub use value_objects::{EventType, IntegrationId, OrgId, OrgUnitId, StableEventId, TraceId};
