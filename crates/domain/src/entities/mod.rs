//! Domain entities

pub mod audit;
pub mod checkpoint;
pub mod dlq;
pub mod event;
pub mod execution_log;
pub mod integration;
pub mod processed_event;
pub mod scheduled_delivery;

pub use audit::{AuditRecord, AuditStatus, DeliverySummary, TimelineEntry};
pub use checkpoint::{Gap, SourceCheckpoint};
pub use dlq::{DlqEntry, DlqStatus};
pub use event::{Event, SourceKind, SourceRef};
pub use execution_log::{
    DeliveryAttempt, DeliveryError, ErrorCategory, ExecutionLog, ExecutionStatus, RequestSnapshot,
    TriggerType,
};
pub use integration::{
    AuthSpec, BreakerState, CircuitState, DeliveryAction, DeliveryMode, Direction, FieldMapping,
    HttpMethod, Integration, IntegrationScope, ScheduleSpec, SigningSpec, TransformSpec,
};
pub use processed_event::{PROCESSED_EVENT_TTL, ProcessedEvent};
pub use scheduled_delivery::{
    CANCELLATION_WINDOW, CancellationMatch, Recurrence, ScheduleStatus, ScheduledDelivery,
};
