//! Periodic background jobs
//!
//! Runs the gateway's timers on a cron scheduler: the retry tick, the
//! scheduler tick, the sweepers (stuck `RETRYING`, stale `PROCESSING`,
//! stale push claims) and the retention cleanup. Every job carries
//! success/failure counters surfaced on the stats endpoint.

use std::collections::HashMap;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, error, info, instrument};

use application::{RetryService, ScheduleService};
use application::ports::{AuditSink, ExecutionLogStore, ProcessedEventStore, PushQueue};

/// Task runner errors
#[derive(Debug, Error)]
pub enum TaskError {
    /// Invalid cron expression
    #[error("Invalid cron expression: {0}")]
    InvalidCronExpression(String),

    /// Scheduler failed to start
    #[error("Task runner failed to start: {0}")]
    StartupFailed(String),

    /// Internal scheduler error
    #[error("Internal task runner error: {0}")]
    Internal(String),
}

impl From<JobSchedulerError> for TaskError {
    fn from(err: JobSchedulerError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A periodic job body
pub type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Per-job execution counters
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskStats {
    /// Job name
    pub name: String,
    /// Cron expression the job runs on
    pub cron_expression: String,
    /// Successful executions
    pub success_count: u64,
    /// Failed executions
    pub failure_count: u64,
    /// Last execution time
    pub last_run: Option<DateTime<Utc>>,
    /// Last error message
    pub last_error: Option<String>,
    /// Average execution duration in milliseconds
    pub avg_duration_ms: u64,
}

struct TaskMetadata {
    cron_expression: String,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    total_duration_ms: AtomicU64,
    last_run: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

impl TaskMetadata {
    fn new(cron_expression: String) -> Self {
        Self {
            cron_expression,
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            last_run: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    fn record(&self, result: &Result<(), String>, duration_ms: u64) {
        *self.last_run.write() = Some(Utc::now());
        self.total_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);
        match result {
            Ok(()) => {
                self.success_count.fetch_add(1, Ordering::Relaxed);
            },
            Err(message) => {
                self.failure_count.fetch_add(1, Ordering::Relaxed);
                *self.last_error.write() = Some(message.clone());
            },
        }
    }

    fn to_stats(&self, name: &str) -> TaskStats {
        let success = self.success_count.load(Ordering::Relaxed);
        let failure = self.failure_count.load(Ordering::Relaxed);
        let total = success + failure;
        TaskStats {
            name: name.to_string(),
            cron_expression: self.cron_expression.clone(),
            success_count: success,
            failure_count: failure,
            last_run: *self.last_run.read(),
            last_error: self.last_error.read().clone(),
            avg_duration_ms: if total > 0 {
                self.total_duration_ms.load(Ordering::Relaxed) / total
            } else {
                0
            },
        }
    }
}

/// Cron-backed runner for the gateway's periodic jobs
pub struct TaskRunner {
    scheduler: JobScheduler,
    tasks: Arc<RwLock<HashMap<String, Arc<TaskMetadata>>>>,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("tasks", &self.tasks.read().len())
            .finish_non_exhaustive()
    }
}

impl TaskRunner {
    /// Create an idle runner
    pub async fn new() -> Result<Self, TaskError> {
        Ok(Self {
            scheduler: JobScheduler::new().await?,
            tasks: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Register a job under a cron expression (with seconds field)
    #[instrument(skip(self, task))]
    pub async fn register(
        &self,
        name: &str,
        cron_expression: &str,
        task: TaskFn,
    ) -> Result<(), TaskError> {
        let metadata = Arc::new(TaskMetadata::new(cron_expression.to_string()));
        self.tasks
            .write()
            .insert(name.to_string(), Arc::clone(&metadata));

        let job_name = name.to_string();
        let job = Job::new_async(cron_expression, move |_id, _scheduler| {
            let task = Arc::clone(&task);
            let metadata = Arc::clone(&metadata);
            let job_name = job_name.clone();
            Box::pin(async move {
                let started = std::time::Instant::now();
                let result = task().await;
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = started.elapsed().as_millis() as u64;
                metadata.record(&result, duration_ms);
                match result {
                    Ok(()) => debug!(task = %job_name, duration_ms, "Task completed"),
                    Err(err) => error!(task = %job_name, error = %err, "Task failed"),
                }
            })
        })
        .map_err(|e| TaskError::InvalidCronExpression(e.to_string()))?;

        self.scheduler.add(job).await?;
        info!(task = name, cron = cron_expression, "Task registered");
        Ok(())
    }

    /// Start firing registered jobs
    pub async fn start(&self) -> Result<(), TaskError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| TaskError::StartupFailed(e.to_string()))
    }

    /// Stop the runner
    pub async fn shutdown(&self) -> Result<(), TaskError> {
        self.scheduler.clone().shutdown().await?;
        info!("Task runner stopped");
        Ok(())
    }

    /// Counters of every registered job
    #[must_use]
    pub fn stats(&self) -> Vec<TaskStats> {
        let mut stats: Vec<TaskStats> = self
            .tasks
            .read()
            .iter()
            .map(|(name, metadata)| metadata.to_stats(name))
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

/// Everything the standard job set needs
pub struct GatewayTaskDeps {
    pub retry: Arc<RetryService>,
    pub scheduler: Arc<ScheduleService>,
    pub push_queue: Arc<dyn PushQueue>,
    pub logs: Arc<dyn ExecutionLogStore>,
    pub audit: Arc<dyn AuditSink>,
    pub processed: Arc<dyn ProcessedEventStore>,
    pub retention_days: u32,
}

impl std::fmt::Debug for GatewayTaskDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayTaskDeps")
            .field("retention_days", &self.retention_days)
            .finish_non_exhaustive()
    }
}

/// Task name of the retry tick
pub const RETRY_TICK_TASK: &str = "retry_tick";
/// Task name of the retry-window sweeper
pub const RETRY_SWEEP_TASK: &str = "retry_window_sweep";
/// Task name of the scheduled-delivery tick
pub const SCHEDULER_TICK_TASK: &str = "scheduler_tick";
/// Task name of the stale-claim sweeper
pub const SCHEDULER_SWEEP_TASK: &str = "scheduler_stale_sweep";
/// Task name of the push-claim sweeper
pub const PUSH_SWEEP_TASK: &str = "push_stale_sweep";
/// Task name of the retention cleanup
pub const RETENTION_TASK: &str = "retention_cleanup";

/// Register the gateway's standard periodic jobs
#[allow(clippy::too_many_lines)]
pub async fn register_gateway_tasks(
    runner: &TaskRunner,
    deps: GatewayTaskDeps,
) -> Result<(), TaskError> {
    let retry = Arc::clone(&deps.retry);
    runner
        .register(
            RETRY_TICK_TASK,
            "*/30 * * * * *",
            Arc::new(move || {
                let retry = Arc::clone(&retry);
                Box::pin(async move {
                    retry.tick().await.map(|_| ()).map_err(|e| e.to_string())
                })
            }),
        )
        .await?;

    let retry = Arc::clone(&deps.retry);
    runner
        .register(
            RETRY_SWEEP_TASK,
            "0 */5 * * * *",
            Arc::new(move || {
                let retry = Arc::clone(&retry);
                Box::pin(async move {
                    retry
                        .sweep_expired()
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                })
            }),
        )
        .await?;

    let scheduler = Arc::clone(&deps.scheduler);
    runner
        .register(
            SCHEDULER_TICK_TASK,
            "*/15 * * * * *",
            Arc::new(move || {
                let scheduler = Arc::clone(&scheduler);
                Box::pin(async move {
                    scheduler.tick().await.map(|_| ()).map_err(|e| e.to_string())
                })
            }),
        )
        .await?;

    let scheduler = Arc::clone(&deps.scheduler);
    runner
        .register(
            SCHEDULER_SWEEP_TASK,
            "0 * * * * *",
            Arc::new(move || {
                let scheduler = Arc::clone(&scheduler);
                Box::pin(async move {
                    scheduler.reset_stale().await.map_err(|e| e.to_string())?;
                    scheduler.mark_overdue().await.map_err(|e| e.to_string())?;
                    Ok(())
                })
            }),
        )
        .await?;

    let push_queue = Arc::clone(&deps.push_queue);
    runner
        .register(
            PUSH_SWEEP_TASK,
            "30 * * * * *",
            Arc::new(move || {
                let push_queue = Arc::clone(&push_queue);
                Box::pin(async move {
                    let cutoff = Utc::now() - Duration::minutes(5);
                    push_queue
                        .reset_stale(cutoff)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                })
            }),
        )
        .await?;

    let logs = Arc::clone(&deps.logs);
    let audit = Arc::clone(&deps.audit);
    let processed = Arc::clone(&deps.processed);
    let retention_days = deps.retention_days;
    runner
        .register(
            RETENTION_TASK,
            "0 10 3 * * *",
            Arc::new(move || {
                let logs = Arc::clone(&logs);
                let audit = Arc::clone(&audit);
                let processed = Arc::clone(&processed);
                Box::pin(async move {
                    let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
                    let purged_logs = logs
                        .purge_older_than(cutoff)
                        .await
                        .map_err(|e| e.to_string())?;
                    let purged_audit = audit
                        .purge_older_than(cutoff)
                        .await
                        .map_err(|e| e.to_string())?;
                    let purged_markers = processed
                        .purge_expired(Utc::now())
                        .await
                        .map_err(|e| e.to_string())?;
                    info!(
                        purged_logs,
                        purged_audit, purged_markers, "Retention cleanup complete"
                    );
                    Ok(())
                })
            }),
        )
        .await?;

    Ok(())
}
