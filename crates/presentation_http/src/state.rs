//! Application state shared across handlers

use std::sync::Arc;

use application::ports::{
    DeliveryTransport, DlqStore, ExecutionLogStore, IntegrationStore, ProcessedEventStore,
    PushQueue, ScheduledDeliveryStore,
};
use application::services::{
    BreakerConfig, CircuitBreakerService, DeliveryService, IngestConfig, IngestService,
    IntegrationMatcher, RetryPolicy, RetryService, ScheduleService, SchedulerPolicy,
    StatsService,
};
use infrastructure::GatewayConfig;
use infrastructure::persistence::{
    AsyncDatabase, SqliteAuditStore, SqliteCheckpointStore, SqliteDlqStore,
    SqliteExecutionLogStore, SqliteIntegrationStore, SqliteProcessedEventStore,
    SqlitePushQueueStore, SqliteScheduledStore,
};
use infrastructure::tasks::TaskRunner;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Database handle, for readiness probes
    pub db: AsyncDatabase,
    /// Gateway configuration
    pub config: Arc<GatewayConfig>,
    /// Integration configuration store
    pub integrations: Arc<dyn IntegrationStore>,
    /// Execution log store
    pub logs: Arc<dyn ExecutionLogStore>,
    /// Scheduled delivery store
    pub scheduled: Arc<dyn ScheduledDeliveryStore>,
    /// Dead letter queue store
    pub dlq: Arc<dyn DlqStore>,
    /// Push ingestion queue
    pub push_queue: Arc<dyn PushQueue>,
    /// Processed-event (dedup) store
    pub processed: Arc<dyn ProcessedEventStore>,
    /// Audit store
    pub audit: Arc<SqliteAuditStore>,
    /// Ingest pipeline
    pub ingest: Arc<IngestService>,
    /// Retry engine
    pub retry: Arc<RetryService>,
    /// Scheduled delivery engine
    pub scheduler: Arc<ScheduleService>,
    /// Stats aggregation
    pub stats: Arc<StatsService>,
    /// Periodic task runner, for job stats
    pub tasks: Arc<TaskRunner>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Assemble the delivery engine over one database
    ///
    /// Used by the server binary and the integration tests; the transport
    /// is injected so tests can point deliveries at a mock target.
    #[must_use]
    pub fn assemble(
        db: AsyncDatabase,
        config: GatewayConfig,
        transport: Arc<dyn DeliveryTransport>,
        tasks: Arc<TaskRunner>,
    ) -> Self {
        let pool = db.pool().clone();
        let integrations: Arc<dyn IntegrationStore> =
            Arc::new(SqliteIntegrationStore::new(pool.clone()));
        let logs: Arc<dyn ExecutionLogStore> =
            Arc::new(SqliteExecutionLogStore::new(pool.clone()));
        let scheduled: Arc<dyn ScheduledDeliveryStore> =
            Arc::new(SqliteScheduledStore::new(pool.clone()));
        let dlq: Arc<dyn DlqStore> = Arc::new(SqliteDlqStore::new(pool.clone()));
        let push_queue: Arc<dyn PushQueue> = Arc::new(SqlitePushQueueStore::new(pool.clone()));
        let processed: Arc<dyn ProcessedEventStore> =
            Arc::new(SqliteProcessedEventStore::new(pool.clone()));
        let audit = Arc::new(SqliteAuditStore::new(pool.clone()));
        let checkpoints = Arc::new(SqliteCheckpointStore::new(pool));

        let breaker = Arc::new(CircuitBreakerService::new(
            Arc::clone(&integrations),
            BreakerConfig {
                failure_threshold: config.delivery.breaker_failure_threshold,
                recovery_secs: config.delivery.breaker_recovery_secs,
            },
        ));
        let deliverer = Arc::new(DeliveryService::new(
            breaker,
            transport,
            Arc::clone(&logs),
            Arc::clone(&dlq),
        ));
        let scheduler = Arc::new(ScheduleService::new(
            Arc::clone(&scheduled),
            Arc::clone(&integrations),
            Arc::clone(&logs),
            Arc::clone(&deliverer),
            SchedulerPolicy {
                claim_batch: config.scheduler.claim_batch,
                idle_timeout_secs: config.scheduler.idle_timeout_secs,
                base_delay_secs: config.scheduler.base_delay_secs,
                max_delay_secs: config.scheduler.max_delay_secs,
                jitter: true,
            },
        ));
        let retry = Arc::new(RetryService::new(
            Arc::clone(&logs),
            Arc::clone(&integrations),
            Arc::clone(&dlq),
            Arc::clone(&deliverer),
            RetryPolicy {
                base_delay_secs: config.retry.base_delay_secs,
                max_delay_secs: config.retry.max_delay_secs,
                window_secs: config.retry.window_secs,
                batch_size: config.retry.batch_size,
            },
        ));
        let ingest = Arc::new(IngestService::new(
            Arc::clone(&processed),
            Arc::clone(&audit) as Arc<dyn application::ports::AuditSink>,
            Arc::clone(&checkpoints) as Arc<dyn application::ports::CheckpointStore>,
            IntegrationMatcher::new(Arc::clone(&integrations)),
            Arc::clone(&deliverer),
            Arc::clone(&scheduler),
            IngestConfig {
                allowed_summary_fields: config.audit.allowed_summary_fields.clone(),
                dispatch_concurrency: config.delivery.dispatch_concurrency,
            },
        ));
        let stats = Arc::new(StatsService::new(
            Arc::clone(&logs),
            Arc::clone(&audit) as Arc<dyn application::ports::AuditSink>,
            checkpoints,
            Arc::clone(&dlq),
        ));

        Self {
            db,
            config: Arc::new(config),
            integrations,
            logs,
            scheduled,
            dlq,
            push_queue,
            processed,
            audit,
            ingest,
            retry,
            scheduler,
            stats,
            tasks,
        }
    }
}
