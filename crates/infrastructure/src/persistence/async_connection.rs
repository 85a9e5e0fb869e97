//! Async database connection using sqlx
//!
//! SQLite pool with WAL mode and the gateway schema. The schema bootstrap
//! is idempotent; the in-memory constructor backs the test suites.

use std::{path::Path, str::FromStr};

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::{debug, info, instrument};

/// Error type for async database operations
#[derive(Debug, thiserror::Error)]
pub enum AsyncDatabaseError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Configuration for the database connection
#[derive(Debug, Clone)]
pub struct AsyncDatabaseConfig {
    /// Database URL (e.g. "sqlite:relaygate.db" or "sqlite::memory:")
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Enable WAL mode for better concurrency
    pub wal_mode: bool,
}

impl Default for AsyncDatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:relaygate.db".to_string(),
            max_connections: 5,
            wal_mode: true,
        }
    }
}

impl AsyncDatabaseConfig {
    /// In-memory database for tests
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1, // single connection keeps the memory db alive
            wal_mode: false,
        }
    }

    /// File-based database
    #[must_use]
    pub fn file(path: impl AsRef<Path>) -> Self {
        let path_str = path.as_ref().display().to_string();
        Self {
            url: format!("sqlite:{path_str}"),
            ..Default::default()
        }
    }
}

/// Async database connection pool
#[derive(Debug, Clone)]
pub struct AsyncDatabase {
    pool: SqlitePool,
}

impl AsyncDatabase {
    /// Create a new connection pool
    #[instrument(skip_all, fields(url = %config.url))]
    pub async fn new(config: &AsyncDatabaseConfig) -> Result<Self, AsyncDatabaseError> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        if config.wal_mode && !config.url.contains(":memory:") {
            sqlx::query("PRAGMA journal_mode=WAL")
                .execute(&pool)
                .await?;
            debug!("WAL mode enabled");
        }

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        Ok(Self { pool })
    }

    /// Create an in-memory database for testing
    pub async fn in_memory() -> Result<Self, AsyncDatabaseError> {
        Self::new(&AsyncDatabaseConfig::in_memory()).await
    }

    /// Get the underlying pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply the gateway schema
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<(), AsyncDatabaseError> {
        self.run_schema().await?;
        info!("Database migrations completed");
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    async fn run_schema(&self) -> Result<(), AsyncDatabaseError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS integration_configs (
                id TEXT PRIMARY KEY,
                org_id INTEGER NOT NULL,
                org_unit INTEGER,
                name TEXT NOT NULL,
                event_type TEXT NOT NULL,
                direction TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                target_url TEXT NOT NULL,
                method TEXT NOT NULL,
                auth TEXT NOT NULL,
                timeout_ms INTEGER NOT NULL,
                retry_count INTEGER NOT NULL,
                transform TEXT NOT NULL,
                signing_enabled INTEGER NOT NULL DEFAULT 0,
                signing_secret TEXT,
                delivery_mode TEXT NOT NULL,
                schedule TEXT,
                scope TEXT NOT NULL,
                excluded_org_units TEXT NOT NULL,
                circuit_state TEXT NOT NULL DEFAULT 'CLOSED',
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                circuit_opened_at TEXT,
                last_failure_at TEXT,
                last_success_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_integrations_org
            ON integration_configs(org_id, event_type)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS execution_logs (
                trace_id TEXT PRIMARY KEY,
                org_id INTEGER NOT NULL,
                integration_id TEXT NOT NULL,
                event_id TEXT,
                direction TEXT NOT NULL,
                trigger_type TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt_count INTEGER NOT NULL,
                last_attempt_at TEXT,
                response_status INTEGER,
                response_body TEXT,
                error_message TEXT,
                error_category TEXT,
                error_status_code INTEGER,
                request_snapshot TEXT,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                duration_ms INTEGER,
                search_text TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_logs_status_attempt
            ON execution_logs(status, last_attempt_at)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_logs_org
            ON execution_logs(org_id, started_at DESC)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS delivery_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trace_id TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                status_code INTEGER,
                error TEXT,
                started_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_attempts_trace
            ON delivery_attempts(trace_id, attempt)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS scheduled_integrations (
                id TEXT PRIMARY KEY,
                integration_id TEXT NOT NULL,
                org_id INTEGER NOT NULL,
                scheduled_for TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL,
                original_payload TEXT NOT NULL,
                recurrence TEXT,
                cancellation_patient_rid INTEGER,
                cancellation_scheduled_at TEXT,
                processing_started_at TEXT,
                delivered_at TEXT,
                delivery_log_id TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_scheduled_due
            ON scheduled_integrations(status, scheduled_for)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS processed_events (
                stable_id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                org_id INTEGER NOT NULL,
                processed_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_processed_expiry
            ON processed_events(expires_at)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS event_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                org_id INTEGER NOT NULL,
                event_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                source TEXT NOT NULL,
                source_id TEXT NOT NULL,
                status TEXT NOT NULL,
                skip_category TEXT,
                integrations_matched INTEGER NOT NULL,
                delivered_count INTEGER NOT NULL,
                failed_count INTEGER NOT NULL,
                processing_time_ms INTEGER NOT NULL,
                payload_summary TEXT NOT NULL,
                payload_hash TEXT NOT NULL,
                timeline TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_audit_recorded
            ON event_audit(recorded_at DESC)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS source_checkpoints (
                source TEXT NOT NULL,
                identifier TEXT NOT NULL,
                org_id INTEGER,
                last_processed_id INTEGER NOT NULL DEFAULT 0,
                last_processed_at TEXT,
                gaps TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (source, identifier)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS failed_deliveries (
                id TEXT PRIMARY KEY,
                trace_id TEXT NOT NULL,
                integration_id TEXT NOT NULL,
                org_id INTEGER NOT NULL,
                payload TEXT NOT NULL,
                error_message TEXT NOT NULL,
                error_category TEXT NOT NULL,
                error_status_code INTEGER,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                next_retry_at TEXT,
                resolved_at TEXT,
                resolution_note TEXT,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS pending_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                org_id INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                source TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                claimed_at TEXT,
                error TEXT,
                enqueued_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_pending_events_claim
            ON pending_events(status, id)
            ",
        )
        .execute(&self.pool)
        .await?;

        debug!("Gateway schema ensured");
        Ok(())
    }

    /// Close all connections in the pool
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Database pool closed");
    }
}
