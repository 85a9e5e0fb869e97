//! SQLite persistence layer
//!
//! One store per collection, all over the shared sqlx pool created by
//! [`async_connection::AsyncDatabase`]. Every query carries its tenant
//! scope; transient sqlx failures surface as `ApplicationError::Store`.

pub mod async_connection;
mod audit_store;
mod checkpoint_store;
mod dlq_store;
mod execution_log_store;
mod integration_store;
mod processed_event_store;
mod push_queue_store;
mod scheduled_store;

pub use async_connection::{AsyncDatabase, AsyncDatabaseConfig, AsyncDatabaseError};
pub use audit_store::SqliteAuditStore;
pub use checkpoint_store::SqliteCheckpointStore;
pub use dlq_store::SqliteDlqStore;
pub use execution_log_store::SqliteExecutionLogStore;
pub use integration_store::SqliteIntegrationStore;
pub use processed_event_store::SqliteProcessedEventStore;
pub use push_queue_store::SqlitePushQueueStore;
pub use scheduled_store::SqliteScheduledStore;

use application::ApplicationError;
use chrono::{DateTime, Utc};

/// Map a sqlx failure to the transient store error
pub(crate) fn store_err(err: sqlx::Error) -> ApplicationError {
    ApplicationError::Store(err.to_string())
}

/// Parse an ISO8601 datetime string, falling back to now on corruption
pub(crate) fn parse_datetime(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

/// Parse an optional ISO8601 datetime string
pub(crate) fn parse_datetime_opt(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whether a sqlx error is a unique-constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}
