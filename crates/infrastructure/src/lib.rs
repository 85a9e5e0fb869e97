//! Infrastructure layer of the RelayGate delivery gateway
//!
//! Implements the application ports: SQLite persistence for every
//! collection, the reqwest outbound transport, the three source adapters,
//! the periodic task runner and the ingest workers, plus configuration
//! loading.

pub mod config;
pub mod directory;
pub mod http;
pub mod persistence;
pub mod sources;
pub mod tasks;
pub mod workers;

pub use config::GatewayConfig;
pub use directory::StaticOrgDirectory;
pub use http::{OutboundClientConfig, ReqwestTransport};
pub use persistence::{
    AsyncDatabase, AsyncDatabaseConfig, SqliteAuditStore, SqliteCheckpointStore, SqliteDlqStore,
    SqliteExecutionLogStore, SqliteIntegrationStore, SqliteProcessedEventStore,
    SqlitePushQueueStore, SqliteScheduledStore,
};
pub use sources::{
    BrokerConsumer, BrokerRecord, BrokerSource, InMemoryBroker, PushSource,
    RelationalSourceSettings, SequentialRelationalSource,
};
pub use tasks::{GatewayTaskDeps, TaskRunner, TaskStats, register_gateway_tasks};
pub use workers::{IngestWorkerConfig, spawn_ingest_worker};
