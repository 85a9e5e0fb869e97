//! Application layer of the RelayGate delivery gateway
//!
//! Defines the ports the infrastructure implements (stores, sources, the
//! outbound transport) and the services that make up the delivery engine:
//! matching, transformation, circuit breaking, delivery, retry, scheduling,
//! ingestion and stats.

pub mod error;
pub mod ports;
pub mod services;

pub use error::ApplicationError;
pub use services::{
    BreakerConfig, CircuitBreakerService, DeliveryService, IngestConfig, IngestService,
    IntegrationMatcher, RetryPolicy, RetryService, ScheduleService, SchedulerPolicy,
    StatsService, Transformer,
};
