//! Application-level errors
//!
//! The gateway's error taxonomy. Each kind carries a fixed policy:
//! infrastructure errors are retryable and feed the circuit breaker,
//! client and business-logic failures are terminal for the attempt,
//! duplicates and open circuits are recorded as skips and never attempted.

use domain::DomainError;
use domain::entities::ErrorCategory;
use domain::value_objects::StableEventId;
use thiserror::Error;

/// Errors that can occur in the application layer
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// Domain-level error
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The store is unavailable or a query failed transiently
    #[error("Store unavailable: {0}")]
    Store(String),

    /// A source adapter could not reach its source
    #[error("Source unavailable: {0}")]
    Source(String),

    /// The event's stable id was already processed
    #[error("Event already processed: {0}")]
    DuplicateEvent(StableEventId),

    /// The circuit breaker refused the delivery
    #[error("Circuit open for integration {integration_id}")]
    CircuitOpen { integration_id: String },

    /// Payload transformation failed
    #[error("Transformation failed: {0}")]
    Transformation(String),

    /// Configuration is invalid (missing secret, malformed descriptor)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request or operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// A scheduled delivery was cancelled by match
    #[error("Delivery cancelled")]
    Cancelled,

    /// Retries exceeded the ceiling or window
    #[error("Retries exhausted: {0}")]
    Exhausted(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApplicationError {
    /// Check if this error is retryable
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Source(_))
    }

    /// The audit/log category this error maps to, if any
    #[must_use]
    pub const fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Store(_) | Self::Source(_) => Some(ErrorCategory::Infrastructure),
            Self::DuplicateEvent(_) => Some(ErrorCategory::Duplicate),
            Self::CircuitOpen { .. } => Some(ErrorCategory::CircuitOpen),
            Self::Transformation(_) => Some(ErrorCategory::Transformation),
            Self::Configuration(_) | Self::InvalidOperation(_) => Some(ErrorCategory::Validation),
            Self::Cancelled => Some(ErrorCategory::Cancelled),
            Self::Exhausted(_) => Some(ErrorCategory::Exhausted),
            Self::Domain(_) | Self::NotFound(_) | Self::Internal(_) => None,
        }
    }
}
