//! Execution log entity - Lifecycle record spanning all attempts of one delivery

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::{IntegrationId, OrgId, StableEventId, TraceId};

use super::integration::{Direction, HttpMethod};

/// Maximum stored response-body length in bytes
pub const RESPONSE_BODY_MAX: usize = 4096;

/// What initiated a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    /// A matched source event
    Event,
    /// The scheduled-delivery queue
    Schedule,
    /// An operator action via the admin API
    Manual,
    /// A replay of an earlier delivery
    Replay,
}

impl TriggerType {
    /// Canonical persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "EVENT",
            Self::Schedule => "SCHEDULE",
            Self::Manual => "MANUAL",
            Self::Replay => "REPLAY",
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EVENT" => Ok(Self::Event),
            "SCHEDULE" => Ok(Self::Schedule),
            "MANUAL" => Ok(Self::Manual),
            "REPLAY" => Ok(Self::Replay),
            _ => Err(format!("Unknown trigger type: {s}")),
        }
    }
}

/// Status of a delivery lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Created, no attempt finished yet
    Pending,
    /// Last attempt failed retryably; another attempt is due
    Retrying,
    /// Delivered
    Success,
    /// Terminal business/client failure, not retried
    Failed,
    /// Retries exhausted
    Abandoned,
    /// Never attempted (duplicate or open circuit)
    Skipped,
}

impl ExecutionStatus {
    /// Whether no further transitions are possible
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Abandoned | Self::Skipped
        )
    }

    /// Canonical persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Retrying => "RETRYING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Abandoned => "ABANDONED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RETRYING" => Ok(Self::Retrying),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "ABANDONED" => Ok(Self::Abandoned),
            "SKIPPED" => Ok(Self::Skipped),
            _ => Err(format!("Unknown execution status: {s}")),
        }
    }
}

/// Failure classification carried on logs, audits and DLQ entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Connection, timeout, DNS, 5xx, 429: retryable, feeds the breaker
    Infrastructure,
    /// Non-429 4xx: terminal for the attempt, breaker untouched
    Client,
    /// Payload transformation failed
    Transformation,
    /// Configuration invalid (missing secret, bad URL)
    Validation,
    /// Stable event id already processed
    Duplicate,
    /// Circuit breaker refused the delivery
    CircuitOpen,
    /// Scheduled entry cancelled by match
    Cancelled,
    /// Retry ceiling or window exceeded
    Exhausted,
}

impl ErrorCategory {
    /// Whether failures of this category feed the circuit breaker
    #[must_use]
    pub const fn counts_toward_breaker(&self) -> bool {
        matches!(self, Self::Infrastructure)
    }

    /// Canonical persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Infrastructure => "INFRASTRUCTURE",
            Self::Client => "CLIENT",
            Self::Transformation => "TRANSFORMATION",
            Self::Validation => "VALIDATION",
            Self::Duplicate => "DUPLICATE",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::Cancelled => "CANCELLED",
            Self::Exhausted => "EXHAUSTED",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFRASTRUCTURE" => Ok(Self::Infrastructure),
            "CLIENT" => Ok(Self::Client),
            "TRANSFORMATION" => Ok(Self::Transformation),
            "VALIDATION" => Ok(Self::Validation),
            "DUPLICATE" => Ok(Self::Duplicate),
            "CIRCUIT_OPEN" => Ok(Self::CircuitOpen),
            "CANCELLED" => Ok(Self::Cancelled),
            "EXHAUSTED" => Ok(Self::Exhausted),
            _ => Err(format!("Unknown error category: {s}")),
        }
    }
}

/// Message plus classification of a delivery failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryError {
    /// Human-readable message
    pub message: String,
    /// Classification
    pub category: ErrorCategory,
    /// HTTP status, when the target answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl DeliveryError {
    /// Create a delivery error
    #[must_use]
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category,
            status_code: None,
        }
    }

    /// Attach the HTTP status the target answered with
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Snapshot of the outbound request, for audit and replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    /// HTTP method
    pub method: HttpMethod,
    /// Target URL
    pub url: String,
    /// Header names sent (values are not persisted)
    pub header_names: Vec<String>,
    /// Request body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// One outbound attempt and its recorded outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Lifecycle this attempt belongs to
    pub trace_id: TraceId,
    /// 1-based attempt number
    pub attempt: u32,
    /// HTTP status, when the target answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Error message, when the attempt failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the attempt started
    pub started_at: DateTime<Utc>,
    /// Wall time of the attempt in milliseconds
    pub duration_ms: u64,
}

/// Lifecycle record of one delivery, updated in place across retries
#[derive(Debug, Clone)]
pub struct ExecutionLog {
    /// Trace id, constant across all attempts
    pub trace_id: TraceId,
    /// Owning tenant
    pub org_id: OrgId,
    /// Integration being delivered to
    pub integration_id: IntegrationId,
    /// Stable id of the triggering event, when event-triggered
    pub event_id: Option<StableEventId>,
    /// Traffic direction
    pub direction: Direction,
    /// What initiated the delivery
    pub trigger: TriggerType,
    /// Current lifecycle status
    pub status: ExecutionStatus,
    /// Attempts made so far
    pub attempt_count: u32,
    /// When the last attempt ran
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// HTTP status of the last attempt
    pub response_status: Option<u16>,
    /// Truncated response body of the last attempt
    pub response_body: Option<String>,
    /// Failure detail, when failed
    pub error: Option<DeliveryError>,
    /// Snapshot of the outbound request
    pub request: Option<RequestSnapshot>,
    /// When the lifecycle started
    pub started_at: DateTime<Utc>,
    /// When the lifecycle reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
    /// Total lifecycle duration in milliseconds
    pub duration_ms: Option<u64>,
    /// Free-text extract for admin search
    pub search_text: Option<String>,
}

impl ExecutionLog {
    /// Create a fresh pending log for a new delivery
    #[must_use]
    pub fn new(
        org_id: OrgId,
        integration_id: IntegrationId,
        event_id: Option<StableEventId>,
        trigger: TriggerType,
    ) -> Self {
        Self {
            trace_id: TraceId::new(),
            org_id,
            integration_id,
            event_id,
            direction: Direction::Outbound,
            trigger,
            status: ExecutionStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            response_status: None,
            response_body: None,
            error: None,
            request: None,
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            search_text: None,
        }
    }

    /// Record the start of an attempt
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.attempt_count += 1;
        self.last_attempt_at = Some(now);
    }

    /// Record a successful outcome; terminal
    pub fn complete_success(&mut self, status: u16, body: Option<String>, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Success;
        self.response_status = Some(status);
        self.response_body = body.map(truncate_body);
        self.error = None;
        self.finish(now);
    }

    /// Record a terminal client/business failure; never retried
    pub fn complete_failure(&mut self, error: DeliveryError, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Failed;
        self.response_status = error.status_code;
        self.error = Some(error);
        self.finish(now);
    }

    /// Record a retryable failure
    ///
    /// Transitions to `Retrying` while attempts remain under the ceiling,
    /// otherwise to `Abandoned`. Returns the resulting status.
    pub fn complete_retryable(
        &mut self,
        error: DeliveryError,
        retry_ceiling: u32,
        now: DateTime<Utc>,
    ) -> ExecutionStatus {
        self.response_status = error.status_code;
        self.error = Some(error);
        if self.attempt_count <= retry_ceiling {
            self.status = ExecutionStatus::Retrying;
        } else {
            self.status = ExecutionStatus::Abandoned;
            self.finish(now);
        }
        self.status
    }

    /// Record an abandonment outside the normal classification path
    /// (retry-window sweeper)
    pub fn abandon(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Abandoned;
        self.error = Some(DeliveryError::new(ErrorCategory::Exhausted, reason));
        self.finish(now);
    }

    /// Record a skip: the delivery was never attempted
    pub fn skip(&mut self, category: ErrorCategory, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Skipped;
        self.error = Some(DeliveryError::new(category, reason));
        self.finish(now);
    }

    /// Whether no further transitions are possible
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.finished_at = Some(now);
        #[allow(clippy::cast_sign_loss)]
        let elapsed = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.duration_ms = Some(elapsed);
    }
}

/// Truncate a response body to the stored maximum, on a char boundary
#[must_use]
pub fn truncate_body(body: String) -> String {
    if body.len() <= RESPONSE_BODY_MAX {
        return body;
    }
    let mut end = RESPONSE_BODY_MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
