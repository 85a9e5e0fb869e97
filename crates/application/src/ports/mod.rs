//! Ports: interfaces the infrastructure layer implements

mod audit_sink;
mod checkpoint_store;
mod delivery_transport;
mod dlq_store;
mod event_source;
mod execution_log_store;
mod integration_store;
mod org_directory;
mod processed_event_store;
mod push_queue;
mod scheduled_store;

pub use audit_sink::AuditSink;
pub use checkpoint_store::CheckpointStore;
pub use delivery_transport::{
    DeliveryRequest, DeliveryResponse, DeliveryTransport, TransportError,
};
pub use dlq_store::DlqStore;
pub use event_source::{EventSource, SourceDescriptor};
pub use execution_log_store::{ExecutionLogStore, LogQuery};
pub use integration_store::IntegrationStore;
pub use org_directory::OrgDirectory;
pub use processed_event_store::ProcessedEventStore;
pub use push_queue::{PushEnvelope, PushQueue};
pub use scheduled_store::{ScheduleQuery, ScheduledDeliveryStore};

#[cfg(test)]
pub use audit_sink::MockAuditSink;
#[cfg(test)]
pub use checkpoint_store::MockCheckpointStore;
#[cfg(test)]
pub use delivery_transport::MockDeliveryTransport;
#[cfg(test)]
pub use dlq_store::MockDlqStore;
#[cfg(test)]
pub use event_source::MockEventSource;
#[cfg(test)]
pub use execution_log_store::MockExecutionLogStore;
#[cfg(test)]
pub use integration_store::MockIntegrationStore;
#[cfg(test)]
pub use org_directory::MockOrgDirectory;
#[cfg(test)]
pub use processed_event_store::MockProcessedEventStore;
#[cfg(test)]
pub use push_queue::MockPushQueue;
#[cfg(test)]
pub use scheduled_store::MockScheduledDeliveryStore;
