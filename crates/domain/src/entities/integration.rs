//! Integration entity - Configuration of one outbound endpoint
//!
//! An integration binds a tenant (and optionally one of its org units) to an
//! external HTTP endpoint, selecting which event types fire it, how payloads
//! are transformed, how failures are retried and how its circuit breaker
//! behaves.

use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{EventType, IntegrationId, OrgId, OrgUnitId};

/// Direction of traffic this integration handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Gateway pushes events out to the target
    Outbound,
    /// Target pushes data into the gateway
    Inbound,
}

impl Direction {
    /// Canonical persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Outbound => "OUTBOUND",
            Self::Inbound => "INBOUND",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OUTBOUND" => Ok(Self::Outbound),
            "INBOUND" => Ok(Self::Inbound),
            _ => Err(format!("Unknown direction: {s}")),
        }
    }
}

/// When deliveries for this integration are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMode {
    /// Deliver as soon as the event is matched
    Immediate,
    /// Deliver once, after the configured delay
    Delayed,
    /// Deliver repeatedly at the configured interval
    Recurring,
}

impl DeliveryMode {
    /// Canonical persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "IMMEDIATE",
            Self::Delayed => "DELAYED",
            Self::Recurring => "RECURRING",
        }
    }

    /// Whether this mode goes through the scheduled-delivery queue
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        matches!(self, Self::Delayed | Self::Recurring)
    }
}

impl std::str::FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IMMEDIATE" => Ok(Self::Immediate),
            "DELAYED" => Ok(Self::Delayed),
            "RECURRING" => Ok(Self::Recurring),
            _ => Err(format!("Unknown delivery mode: {s}")),
        }
    }
}

/// Whether a parent-level integration also fires for child org units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrationScope {
    /// Fires only for events of the owning entity itself
    EntityOnly,
    /// Fires for the owning entity and all its child org units
    IncludeChildren,
}

impl IntegrationScope {
    /// Canonical persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EntityOnly => "ENTITY_ONLY",
            Self::IncludeChildren => "INCLUDE_CHILDREN",
        }
    }
}

impl std::str::FromStr for IntegrationScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENTITY_ONLY" => Ok(Self::EntityOnly),
            "INCLUDE_CHILDREN" => Ok(Self::IncludeChildren),
            _ => Err(format!("Unknown scope: {s}")),
        }
    }
}

/// HTTP method used for the outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Canonical persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(format!("Unknown HTTP method: {s}")),
        }
    }
}

/// Outbound authentication descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthSpec {
    /// No authentication headers
    #[default]
    None,
    /// `Authorization: Bearer <token>`
    Bearer { token: String },
    /// `Authorization: Basic <base64(user:pass)>`; the store carries the
    /// pre-encoded credential, the gateway never sees the raw password
    Basic { credential: String },
    /// Arbitrary API-key header
    ApiKey { header: String, value: String },
}

impl AuthSpec {
    /// Headers this descriptor contributes to the outbound request
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        match self {
            Self::None => Vec::new(),
            Self::Bearer { token } => {
                vec![("Authorization".to_string(), format!("Bearer {token}"))]
            },
            Self::Basic { credential } => {
                vec![("Authorization".to_string(), format!("Basic {credential}"))]
            },
            Self::ApiKey { header, value } => vec![(header.clone(), value.clone())],
        }
    }
}

/// One source-path → target-path rule of a template transform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Dotted path into the event payload (e.g. `patient.id`)
    pub source: String,
    /// Dotted path in the produced body (e.g. `subject.identifier`)
    pub target: String,
}

/// One entry of an action-list transform
///
/// Each action produces an independent delivery with its own execution log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAction {
    /// Label used in logs and the audit timeline
    pub name: String,
    /// Override target URL; falls back to the integration URL when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    /// Override HTTP method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,
    /// Template mapping for this action; passthrough when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Vec<FieldMapping>>,
}

/// How the event payload becomes the outbound request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransformSpec {
    /// The payload is the body, unchanged
    #[default]
    Simple,
    /// Declarative path mapping; no scripting
    Template { mapping: Vec<FieldMapping> },
    /// Ordered list of actions, each an independent delivery
    ActionList { actions: Vec<DeliveryAction> },
}

/// Scheduling descriptor for delayed/recurring delivery
///
/// Beyond the fields the scheduler consumes, this carries opaque metadata
/// (description, free-form map) that only the transformer may consult.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScheduleSpec {
    /// Delay before a `DELAYED` delivery fires, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_secs: Option<i64>,
    /// Interval between `RECURRING` occurrences, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<i64>,
    /// Total number of recurring occurrences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// IANA timezone name the descriptor was authored in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque metadata, not interpreted by the core
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ScheduleSpec {
    /// Validate the descriptor: positive durations, known timezone
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(delay) = self.delay_secs {
            if delay <= 0 {
                return Err(DomainError::ValidationError(format!(
                    "delay_secs must be positive, got {delay}"
                )));
            }
        }
        if let Some(interval) = self.interval_secs {
            if interval <= 0 {
                return Err(DomainError::ValidationError(format!(
                    "interval_secs must be positive, got {interval}"
                )));
            }
        }
        if let Some(tz) = &self.timezone {
            if tz.parse::<chrono_tz::Tz>().is_err() {
                return Err(DomainError::InvalidTimezone(tz.clone()));
            }
        }
        Ok(())
    }
}

/// Outbound body-signing descriptor
#[derive(Debug, Clone, Default)]
pub struct SigningSpec {
    /// Whether outbound bodies are signed
    pub enabled: bool,
    /// HMAC-SHA256 secret; never serialized
    pub secret: Option<SecretString>,
}

impl SigningSpec {
    /// Create an enabled signing spec
    #[must_use]
    pub fn enabled(secret: impl Into<String>) -> Self {
        Self {
            enabled: true,
            secret: Some(SecretString::from(secret.into())),
        }
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, deliveries pass through
    Closed,
    /// Too many consecutive infrastructure failures, deliveries are skipped
    Open,
    /// Recovery window elapsed, one probing delivery is permitted
    HalfOpen,
}

impl CircuitState {
    /// Canonical persisted form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLOSED" => Ok(Self::Closed),
            "OPEN" => Ok(Self::Open),
            "HALF_OPEN" => Ok(Self::HalfOpen),
            _ => Err(format!("Unknown circuit state: {s}")),
        }
    }
}

/// Per-integration breaker accounting
///
/// Only infrastructure failures feed this state machine. Transitions are
/// monotone in effect, so last-writer-wins persistence is acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerState {
    /// Current circuit state
    pub state: CircuitState,
    /// Consecutive infrastructure failures since the last success
    pub consecutive_failures: u32,
    /// When the circuit last opened; set whenever `state == Open`
    pub opened_at: Option<DateTime<Utc>>,
    /// Last infrastructure failure
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Last successful delivery
    pub last_success_at: Option<DateTime<Utc>>,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_failure_at: None,
            last_success_at: None,
        }
    }
}

impl BreakerState {
    /// Record a successful delivery: any state collapses to `Closed`
    pub fn note_success(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.last_success_at = Some(now);
    }

    /// Record an infrastructure failure, opening the circuit at the threshold
    ///
    /// Returns the state after the transition.
    pub fn note_infrastructure_failure(
        &mut self,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> CircuitState {
        self.consecutive_failures += 1;
        self.last_failure_at = Some(now);

        match self.state {
            CircuitState::Closed if self.consecutive_failures >= threshold => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
            },
            CircuitState::HalfOpen => {
                // A failed probe re-opens immediately.
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
            },
            CircuitState::Closed | CircuitState::Open => {},
        }
        self.state
    }

    /// Transition `Open` → `HalfOpen` once the recovery window has elapsed
    ///
    /// Returns `true` if the transition happened.
    pub fn try_half_open(&mut self, recovery: Duration, now: DateTime<Utc>) -> bool {
        if self.state != CircuitState::Open {
            return false;
        }
        match self.opened_at {
            Some(opened) if now - opened >= recovery => {
                self.state = CircuitState::HalfOpen;
                true
            },
            _ => false,
        }
    }

    /// Invariant check: `Open` implies `opened_at` set
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        !matches!(self.state, CircuitState::Open) || self.opened_at.is_some()
    }
}

/// Default outbound request timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default retry ceiling (attempts beyond the first)
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Persistent configuration of one outbound endpoint
#[derive(Debug, Clone)]
pub struct Integration {
    /// Unique identifier
    pub id: IntegrationId,
    /// Owning tenant; immutable after creation
    pub org_id: OrgId,
    /// Org unit this integration belongs to, if any
    pub org_unit: Option<OrgUnitId>,
    /// Display name
    pub name: String,
    /// Event-type selector (`*` matches any)
    pub event_type: EventType,
    /// Traffic direction; `None` is treated as outbound
    pub direction: Option<Direction>,
    /// Whether this integration currently fires
    pub is_active: bool,
    /// Target endpoint URL
    pub target_url: String,
    /// Outbound HTTP method
    pub method: HttpMethod,
    /// Authentication descriptor
    pub auth: AuthSpec,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Retry ceiling: maximum attempts beyond the first
    pub retry_count: u32,
    /// Payload transformation descriptor
    pub transform: TransformSpec,
    /// Outbound body signing
    pub signing: SigningSpec,
    /// Dispatch mode
    pub delivery_mode: DeliveryMode,
    /// Scheduling descriptor; required for delayed/recurring modes
    pub schedule: Option<ScheduleSpec>,
    /// Child-inheritance scope
    pub scope: IntegrationScope,
    /// Org units excluded from inheritance
    pub excluded_org_units: Vec<OrgUnitId>,
    /// Circuit breaker accounting
    pub breaker: BreakerState,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    /// Create a new active outbound integration with defaults
    #[must_use]
    pub fn new(
        org_id: OrgId,
        name: impl Into<String>,
        event_type: EventType,
        target_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: IntegrationId::new(),
            org_id,
            org_unit: None,
            name: name.into(),
            event_type,
            direction: Some(Direction::Outbound),
            is_active: true,
            target_url: target_url.into(),
            method: HttpMethod::Post,
            auth: AuthSpec::None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_count: DEFAULT_RETRY_COUNT,
            transform: TransformSpec::Simple,
            signing: SigningSpec::default(),
            delivery_mode: DeliveryMode::Immediate,
            schedule: None,
            scope: IntegrationScope::EntityOnly,
            excluded_org_units: Vec::new(),
            breaker: BreakerState::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Bind this integration to one org unit
    #[must_use]
    pub const fn with_org_unit(mut self, unit: OrgUnitId) -> Self {
        self.org_unit = Some(unit);
        self
    }

    /// Set the retry ceiling
    #[must_use]
    pub const fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the transformation descriptor
    #[must_use]
    pub fn with_transform(mut self, transform: TransformSpec) -> Self {
        self.transform = transform;
        self
    }

    /// Set the authentication descriptor
    #[must_use]
    pub fn with_auth(mut self, auth: AuthSpec) -> Self {
        self.auth = auth;
        self
    }

    /// Enable body signing with the given secret
    #[must_use]
    pub fn with_signing(mut self, secret: impl Into<String>) -> Self {
        self.signing = SigningSpec::enabled(secret);
        self
    }

    /// Set the delivery mode and scheduling descriptor
    #[must_use]
    pub fn with_schedule(mut self, mode: DeliveryMode, schedule: ScheduleSpec) -> Self {
        self.delivery_mode = mode;
        self.schedule = Some(schedule);
        self
    }

    /// Extend the scope to child org units, minus exclusions
    #[must_use]
    pub fn with_children(mut self, excluded: Vec<OrgUnitId>) -> Self {
        self.scope = IntegrationScope::IncludeChildren;
        self.excluded_org_units = excluded;
        self
    }

    /// Whether this integration handles outbound traffic
    ///
    /// An unset direction is treated as outbound for backwards compatibility
    /// with configurations created before the field existed.
    #[must_use]
    pub fn is_outbound(&self) -> bool {
        !matches!(self.direction, Some(Direction::Inbound))
    }

    /// Whether this integration's selector matches the event type
    #[must_use]
    pub fn selects(&self, event_type: &EventType) -> bool {
        self.event_type.selects(event_type)
    }

    /// Whether an inherited (parent-level) integration applies to an org unit
    ///
    /// `EntityOnly` integrations never apply to children; otherwise the unit
    /// must not be excluded.
    #[must_use]
    pub fn applies_to_child(&self, unit: OrgUnitId) -> bool {
        match self.scope {
            IntegrationScope::EntityOnly => false,
            IntegrationScope::IncludeChildren => !self.excluded_org_units.contains(&unit),
        }
    }

    /// Request timeout as a std duration
    #[must_use]
    pub const fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}
