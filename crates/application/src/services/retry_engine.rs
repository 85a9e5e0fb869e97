//! Retry engine
//!
//! Drives `RETRYING` execution logs back through the delivery pipeline with
//! exponential backoff, bounded by the per-integration retry ceiling and a
//! hard retry window. A sweeper abandons anything still retrying past the
//! window and dead-letters it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domain::entities::{DeliveryError, DlqEntry, ErrorCategory, ExecutionLog};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::ApplicationError;
use crate::ports::{DlqStore, ExecutionLogStore, IntegrationStore};
use crate::services::deliverer::DeliveryService;

/// Backoff and windowing policy for the retry engine
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay before the first retry, in seconds
    pub base_delay_secs: i64,
    /// Cap on the computed delay, in seconds
    pub max_delay_secs: i64,
    /// Hard window after the last attempt inside which retries may run
    pub window_secs: i64,
    /// Logs examined per tick
    pub batch_size: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: 60,
            max_delay_secs: 3600,
            window_secs: 4 * 3600,
            batch_size: 10,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, given `attempt` attempts so far
    ///
    /// `min(base · 2^(attempt−1), max)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1i64.checked_shl(exponent).unwrap_or(i64::MAX);
        let delay = self
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs);
        Duration::seconds(delay)
    }

    /// The retry window as a chrono duration
    #[must_use]
    pub const fn window(&self) -> Duration {
        Duration::seconds(self.window_secs)
    }
}

/// Outcome counters of one retry tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryTickOutcome {
    /// Logs examined
    pub examined: u32,
    /// Retries actually dispatched
    pub dispatched: u32,
    /// Logs skipped because their backoff is not yet due
    pub not_due: u32,
    /// Logs dropped (integration gone or ceiling passed)
    pub dropped: u32,
}

/// Periodically re-dispatches retryable deliveries
pub struct RetryService {
    logs: Arc<dyn ExecutionLogStore>,
    integrations: Arc<dyn IntegrationStore>,
    dlq: Arc<dyn DlqStore>,
    deliverer: Arc<DeliveryService>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RetryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryService")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryService {
    /// Create the retry service
    #[must_use]
    pub fn new(
        logs: Arc<dyn ExecutionLogStore>,
        integrations: Arc<dyn IntegrationStore>,
        dlq: Arc<dyn DlqStore>,
        deliverer: Arc<DeliveryService>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            logs,
            integrations,
            dlq,
            deliverer,
            policy,
        }
    }

    /// One retry tick: pick up due `RETRYING` logs and re-dispatch them
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<RetryTickOutcome, ApplicationError> {
        let now = Utc::now();
        let window_start = now - self.policy.window();
        let due = self
            .logs
            .list_retrying(window_start, self.policy.batch_size)
            .await?;

        let mut outcome = RetryTickOutcome::default();
        for log in due {
            outcome.examined += 1;

            let Some(integration) = self
                .integrations
                .get(log.org_id, log.integration_id)
                .await?
            else {
                debug!(trace = %log.trace_id, "Integration gone, leaving log for sweeper");
                outcome.dropped += 1;
                continue;
            };

            // Past the ceiling: the sweeper owns abandonment.
            if log.attempt_count > integration.retry_count {
                outcome.dropped += 1;
                continue;
            }

            let next_due = log
                .last_attempt_at
                .map(|at| at + self.policy.delay_for_attempt(log.attempt_count));
            if let Some(next_due) = next_due {
                if now < next_due {
                    outcome.not_due += 1;
                    continue;
                }
            }

            debug!(
                trace = %log.trace_id,
                attempt = log.attempt_count + 1,
                "Dispatching retry"
            );
            let result = self.deliverer.retry(&integration, log).await;
            outcome.dispatched += 1;
            debug!(trace = %result.trace_id, status = %result.status, "Retry finished");
        }

        if outcome.dispatched > 0 {
            info!(
                dispatched = outcome.dispatched,
                examined = outcome.examined,
                "Retry tick complete"
            );
        }
        Ok(outcome)
    }

    /// Sweep: abandon logs still `RETRYING` past the window and dead-letter them
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<u64, ApplicationError> {
        let cutoff = Utc::now() - self.policy.window();
        let expired = self
            .logs
            .list_retrying_older_than(cutoff, self.policy.batch_size)
            .await?;

        let mut abandoned = 0u64;
        for mut log in expired {
            log.abandon("Exceeded retry window", Utc::now());
            self.logs.upsert(&log).await?;
            self.dead_letter(&log).await;
            abandoned += 1;
            warn!(trace = %log.trace_id, "Abandoned delivery past the retry window");
        }
        Ok(abandoned)
    }

    /// Re-queue a log for delivery from the admin API (bulk retry)
    ///
    /// Resets the status to `RETRYING` so the next tick picks it up.
    pub async fn requeue(
        &self,
        org_id: domain::value_objects::OrgId,
        trace_id: domain::value_objects::TraceId,
    ) -> Result<(), ApplicationError> {
        let mut log = self
            .logs
            .get(org_id, trace_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("execution log {trace_id}")))?;

        if log.request.is_none() {
            return Err(ApplicationError::InvalidOperation(
                "log has no request snapshot to retry from".to_string(),
            ));
        }
        log.status = domain::entities::ExecutionStatus::Retrying;
        log.last_attempt_at = Some(Utc::now() - self.policy.delay_for_attempt(log.attempt_count));
        log.finished_at = None;
        self.logs.upsert(&log).await
    }

    async fn dead_letter(&self, log: &ExecutionLog) {
        let payload = log
            .request
            .as_ref()
            .and_then(|snapshot| snapshot.body.as_deref())
            .and_then(|body| serde_json::from_str(body).ok())
            .unwrap_or(Value::Null);
        let error = log
            .error
            .clone()
            .unwrap_or_else(|| DeliveryError::new(ErrorCategory::Exhausted, "Exceeded retry window"));
        let entry = DlqEntry::new(log.trace_id, log.integration_id, log.org_id, payload, error);
        if let Err(err) = self.dlq.append(&entry).await {
            warn!(error = %err, trace = %log.trace_id, "Failed to dead-letter swept delivery");
        }
    }

    /// When the next retry of a log is due, given the policy
    #[must_use]
    pub fn next_due_at(&self, last_attempt_at: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        last_attempt_at + self.policy.delay_for_attempt(attempt)
    }
}
