//! Application services: the delivery engine's use cases

pub mod breaker;
pub mod deliverer;
pub mod ingest;
pub mod matcher;
pub mod retry_engine;
pub mod scheduler;
pub mod signing;
pub mod stats;
pub mod transformer;

pub use breaker::{BreakerConfig, BreakerDecision, CircuitBreakerService};
pub use deliverer::{DeliveryService, OutcomeClass, classify_status};
pub use ingest::{IngestConfig, IngestService};
pub use matcher::IntegrationMatcher;
pub use retry_engine::{RetryPolicy, RetryService, RetryTickOutcome};
pub use scheduler::{ScheduleService, SchedulerPolicy, SchedulerTickOutcome};
pub use stats::{GatewayStats, Percentiles, StatsService};
pub use transformer::{DeliveryPlan, Transformer};
