//! Gateway configuration
//!
//! Layered: defaults in code, overridden by a `config.toml` next to the
//! binary, overridden by `RELAYGATE_*` environment variables.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Shared default for boolean `true` fields across config structs
pub(crate) const fn default_true() -> bool {
    true
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log format: "json" for structured JSON logs, "text" for human-readable
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8090
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_format: default_log_format(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g. `sqlite:relaygate.db` or `sqlite::memory:`)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum pool connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Enable WAL mode for better concurrency
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

fn default_database_url() -> String {
    "sqlite:relaygate.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            wal_mode: true,
        }
    }
}

/// Delivery pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Default outbound timeout when an integration sets none, milliseconds
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Dispatch pool width (concurrent deliveries per event)
    #[serde(default = "default_dispatch_concurrency")]
    pub dispatch_concurrency: usize,

    /// Consecutive infrastructure failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub breaker_failure_threshold: u32,

    /// Seconds before an open breaker admits a probe
    #[serde(default = "default_recovery_secs")]
    pub breaker_recovery_secs: i64,
}

const fn default_timeout_ms() -> u64 {
    30_000
}

const fn default_dispatch_concurrency() -> usize {
    8
}

const fn default_failure_threshold() -> u32 {
    10
}

const fn default_recovery_secs() -> i64 {
    300
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            dispatch_concurrency: default_dispatch_concurrency(),
            breaker_failure_threshold: default_failure_threshold(),
            breaker_recovery_secs: default_recovery_secs(),
        }
    }
}

/// Retry engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base backoff delay in seconds
    #[serde(default = "default_retry_base")]
    pub base_delay_secs: i64,

    /// Backoff cap in seconds
    #[serde(default = "default_retry_max")]
    pub max_delay_secs: i64,

    /// Retry window in seconds; older `RETRYING` logs are abandoned
    #[serde(default = "default_retry_window")]
    pub window_secs: i64,

    /// Logs examined per tick
    #[serde(default = "default_retry_batch")]
    pub batch_size: u32,
}

const fn default_retry_base() -> i64 {
    60
}

const fn default_retry_max() -> i64 {
    3600
}

const fn default_retry_window() -> i64 {
    4 * 3600
}

const fn default_retry_batch() -> u32 {
    10
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_retry_base(),
            max_delay_secs: default_retry_max(),
            window_secs: default_retry_window(),
            batch_size: default_retry_batch(),
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Entries claimed per tick
    #[serde(default = "default_claim_batch")]
    pub claim_batch: u32,

    /// Seconds after which a `PROCESSING` claim counts as stale
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: i64,

    /// Base reschedule delay in seconds
    #[serde(default = "default_schedule_base")]
    pub base_delay_secs: i64,

    /// Reschedule delay cap in seconds
    #[serde(default = "default_schedule_max")]
    pub max_delay_secs: i64,
}

const fn default_claim_batch() -> u32 {
    10
}

const fn default_idle_timeout() -> i64 {
    600
}

const fn default_schedule_base() -> i64 {
    120
}

const fn default_schedule_max() -> i64 {
    3600
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            claim_batch: default_claim_batch(),
            idle_timeout_secs: default_idle_timeout(),
            base_delay_secs: default_schedule_base(),
            max_delay_secs: default_schedule_max(),
        }
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Poll interval per ingest worker, seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Events polled per window
    #[serde(default = "default_poll_batch")]
    pub poll_batch: u32,

    /// URL of the sequential-relational source; empty disables the adapter
    #[serde(default)]
    pub relational_source_url: String,

    /// Table name of the relational source
    #[serde(default = "default_source_table")]
    pub relational_table: String,

    /// Drop source rows older than N days; 0 disables the cutoff
    #[serde(default)]
    pub max_event_age_days: u32,

    /// On an empty checkpoint, fast-forward to the source's max id
    #[serde(default)]
    pub bootstrap_checkpoint: bool,

    /// Restrict relational polling to tenants with active integrations
    #[serde(default = "default_true")]
    pub allowed_parents_from_integrations: bool,

    /// Two-level org hierarchy: child entity id (as string key) → parent id
    #[serde(default)]
    pub org_parents: HashMap<String, i64>,
}

impl IngestSettings {
    /// The hierarchy as numeric `(child, parent)` pairs
    ///
    /// Non-numeric keys are ignored.
    #[must_use]
    pub fn org_parent_pairs(&self) -> Vec<(i64, i64)> {
        self.org_parents
            .iter()
            .filter_map(|(child, parent)| child.parse::<i64>().ok().map(|c| (c, *parent)))
            .collect()
    }
}

const fn default_poll_interval() -> u64 {
    5
}

const fn default_poll_batch() -> u32 {
    50
}

fn default_source_table() -> String {
    "notification_queue".to_string()
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            poll_batch: default_poll_batch(),
            relational_source_url: String::new(),
            relational_table: default_source_table(),
            max_event_age_days: 0,
            bootstrap_checkpoint: false,
            allowed_parents_from_integrations: true,
            org_parents: HashMap::new(),
        }
    }
}

/// Audit and retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Days to retain execution logs and audit records
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Payload fields allowed into the compliance-safe audit summary
    #[serde(default)]
    pub allowed_summary_fields: Vec<String>,
}

const fn default_retention_days() -> u32 {
    90
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            allowed_summary_fields: Vec::new(),
        }
    }
}

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Delivery pipeline settings
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Retry engine settings
    #[serde(default)]
    pub retry: RetryConfig,
    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Ingestion settings
    #[serde(default)]
    pub ingest: IngestSettings,
    /// Audit and retention settings
    #[serde(default)]
    pub audit: AuditConfig,
}

impl GatewayConfig {
    /// Load configuration: defaults ← `config.toml` ← `RELAYGATE_*` env
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("RELAYGATE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = GatewayConfig::default();
        assert_eq!(config.delivery.breaker_failure_threshold, 10);
        assert_eq!(config.delivery.breaker_recovery_secs, 300);
        assert_eq!(config.retry.window_secs, 4 * 3600);
        assert_eq!(config.scheduler.idle_timeout_secs, 600);
        assert_eq!(config.audit.retention_days, 90);
        assert_eq!(config.ingest.relational_table, "notification_queue");
        assert!(config.ingest.allowed_parents_from_integrations);
        assert!(!config.ingest.bootstrap_checkpoint);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: GatewayConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [audit]
            allowed_summary_fields = ["patientRid"]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.server.port, 9000);
        assert_eq!(parsed.server.host, "127.0.0.1");
        assert_eq!(parsed.audit.retention_days, 90);
        assert_eq!(
            parsed.audit.allowed_summary_fields,
            vec!["patientRid".to_string()]
        );
    }
}
