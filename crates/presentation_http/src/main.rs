//! RelayGate server
//!
//! Main entry point: configuration, database, delivery engine, source
//! workers, periodic jobs, HTTP server, graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use infrastructure::persistence::{AsyncDatabase, AsyncDatabaseConfig};
use infrastructure::sources::{PushSource, RelationalSourceSettings, SequentialRelationalSource};
use infrastructure::tasks::{GatewayTaskDeps, TaskRunner, register_gateway_tasks};
use infrastructure::workers::{IngestWorkerConfig, spawn_ingest_worker};
use infrastructure::{
    GatewayConfig, OutboundClientConfig, ReqwestTransport, StaticOrgDirectory,
};
use presentation_http::{routes, state::AppState};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first so the log format can honour it
    let config = GatewayConfig::load().unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        GatewayConfig::default()
    });

    init_tracing(&config);
    info!("RelayGate v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        host = %config.server.host,
        port = config.server.port,
        database = %config.database.url,
        "Configuration loaded"
    );

    // Database
    let db = AsyncDatabase::new(&AsyncDatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        wal_mode: config.database.wal_mode,
    })
    .await
    .context("failed to open database")?;
    db.migrate().await.context("failed to run migrations")?;

    // Delivery engine
    let transport = Arc::new(
        ReqwestTransport::new(&OutboundClientConfig {
            default_timeout: Duration::from_millis(config.delivery.default_timeout_ms),
            ..Default::default()
        })
        .context("failed to build outbound client")?,
    );
    let tasks = Arc::new(TaskRunner::new().await.context("failed to create task runner")?);
    let state = AppState::assemble(db.clone(), config.clone(), transport, Arc::clone(&tasks));

    // Periodic jobs: retry tick, scheduler tick, sweepers, retention
    register_gateway_tasks(
        &tasks,
        GatewayTaskDeps {
            retry: Arc::clone(&state.retry),
            scheduler: Arc::clone(&state.scheduler),
            push_queue: Arc::clone(&state.push_queue),
            logs: Arc::clone(&state.logs),
            audit: Arc::clone(&state.audit) as Arc<dyn application::ports::AuditSink>,
            processed: Arc::clone(&state.processed),
            retention_days: config.audit.retention_days,
        },
    )
    .await
    .context("failed to register periodic tasks")?;
    tasks.start().await.context("failed to start task runner")?;

    // Ingest workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_config = IngestWorkerConfig {
        poll_interval: Duration::from_secs(config.ingest.poll_interval_secs),
        poll_batch: config.ingest.poll_batch,
    };
    let directory = Arc::new(StaticOrgDirectory::from_pairs(
        config.ingest.org_parent_pairs(),
    ));
    let mut workers = Vec::new();

    // Push source is always on; it drains the /events queue.
    workers.push(spawn_ingest_worker(
        Arc::new(PushSource::new(Arc::clone(&state.push_queue), directory)),
        Arc::clone(&state.ingest),
        worker_config.clone(),
        shutdown_rx.clone(),
    ));

    // The relational source runs only when a source database is configured.
    if config.ingest.relational_source_url.is_empty() {
        info!("No relational source configured, adapter disabled");
    } else {
        let source_db = AsyncDatabase::new(&AsyncDatabaseConfig {
            url: config.ingest.relational_source_url.clone(),
            max_connections: 2,
            wal_mode: false,
        })
        .await
        .context("failed to open relational source database")?;

        let source = SequentialRelationalSource::new(
            source_db.pool().clone(),
            Arc::new(infrastructure::SqliteCheckpointStore::new(db.pool().clone())),
            Arc::clone(&state.integrations),
            RelationalSourceSettings {
                table: config.ingest.relational_table.clone(),
                max_event_age_days: config.ingest.max_event_age_days,
                bootstrap_checkpoint: config.ingest.bootstrap_checkpoint,
                allowed_parents_from_integrations: config
                    .ingest
                    .allowed_parents_from_integrations,
            },
        );
        workers.push(spawn_ingest_worker(
            Arc::new(source),
            Arc::clone(&state.ingest),
            worker_config,
            shutdown_rx,
        ));
    }

    // HTTP server
    let app = routes::create_router(state).layer(TraceLayer::new_for_http());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain: stop workers and jobs, close the pool
    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(err) = tasks.shutdown().await {
        warn!(error = %err, "Task runner shutdown failed");
    }
    for worker in workers {
        if tokio::time::timeout(Duration::from_secs(10), worker)
            .await
            .is_err()
        {
            warn!("Ingest worker did not stop in time");
        }
    }
    db.close().await;

    Ok(())
}

fn init_tracing(config: &GatewayConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "relaygate_server=info,presentation_http=info,infrastructure=info,application=info".into());

    if config.server.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
