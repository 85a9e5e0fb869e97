//! Scheduled delivery engine
//!
//! Persistent timer queue for delayed and recurring integrations. A tick
//! claims due entries one at a time (the store's atomic find-and-modify is
//! the exclusivity primitive), re-checks cancellation, dispatches through
//! the delivery pipeline, expands recurrences and reschedules transient
//! failures with backoff. Sweepers return stale `PROCESSING` claims to
//! `PENDING` and promote missed entries to `OVERDUE`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domain::entities::{
    CancellationMatch, DeliveryMode, Event, ExecutionStatus, Integration, Recurrence,
    ScheduledDelivery, TriggerType,
};
use domain::value_objects::OrgId;
use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::error::ApplicationError;
use crate::ports::{ExecutionLogStore, IntegrationStore, ScheduledDeliveryStore};
use crate::services::deliverer::DeliveryService;
use crate::services::transformer::Transformer;

/// Scheduling and reschedule-backoff policy
#[derive(Debug, Clone)]
pub struct SchedulerPolicy {
    /// Entries claimed per tick
    pub claim_batch: u32,
    /// `PROCESSING` entries older than this are returned to `PENDING`
    pub idle_timeout_secs: i64,
    /// Base reschedule delay after a transient failure, in seconds
    pub base_delay_secs: i64,
    /// Cap on the reschedule delay, in seconds
    pub max_delay_secs: i64,
    /// Add up to 10% jitter to reschedules to avoid thundering herds
    pub jitter: bool,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self {
            claim_batch: 10,
            idle_timeout_secs: 600,
            base_delay_secs: 120,
            max_delay_secs: 3600,
            jitter: true,
        }
    }
}

impl SchedulerPolicy {
    /// Reschedule delay after `attempt` failed attempts
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1i64.checked_shl(exponent).unwrap_or(i64::MAX);
        let base = self
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs);

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let seconds = if self.jitter {
            let jitter = rand::rng().random_range(0.0..0.1);
            ((base as f64) * (1.0 + jitter)) as i64
        } else {
            base
        };
        Duration::seconds(seconds)
    }

    /// The stale-claim cutoff relative to `now`
    #[must_use]
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::seconds(self.idle_timeout_secs)
    }
}

/// Outcome counters of one scheduler tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerTickOutcome {
    /// Entries claimed
    pub claimed: u32,
    /// Entries delivered
    pub sent: u32,
    /// Entries rescheduled after a transient failure
    pub rescheduled: u32,
    /// Entries terminally failed
    pub failed: u32,
    /// Entries found cancelled after the claim
    pub cancelled: u32,
}

/// Drives the persistent timer queue
pub struct ScheduleService {
    store: Arc<dyn ScheduledDeliveryStore>,
    integrations: Arc<dyn IntegrationStore>,
    logs: Arc<dyn ExecutionLogStore>,
    deliverer: Arc<DeliveryService>,
    transformer: Transformer,
    policy: SchedulerPolicy,
}

impl std::fmt::Debug for ScheduleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleService")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ScheduleService {
    /// Create the schedule service
    #[must_use]
    pub fn new(
        store: Arc<dyn ScheduledDeliveryStore>,
        integrations: Arc<dyn IntegrationStore>,
        logs: Arc<dyn ExecutionLogStore>,
        deliverer: Arc<DeliveryService>,
        policy: SchedulerPolicy,
    ) -> Self {
        Self {
            store,
            integrations,
            logs,
            deliverer,
            transformer: Transformer::new(),
            policy,
        }
    }

    /// Materialize the scheduled entry for a delayed/recurring integration
    /// matched by an event
    ///
    /// The payload is pre-transformed when the transform yields exactly one
    /// plan; action lists keep the original payload and transform at
    /// dispatch. The cancellation descriptor is lifted from the event's
    /// `cancellationInfo`, when present.
    #[instrument(skip(self, event), fields(integration = %integration.id))]
    pub async fn schedule_for_event(
        &self,
        integration: &Integration,
        event: &Event,
    ) -> Result<ScheduledDelivery, ApplicationError> {
        let schedule = integration.schedule.as_ref().ok_or_else(|| {
            ApplicationError::Configuration(format!(
                "integration {} is {} but has no scheduling descriptor",
                integration.id,
                integration.delivery_mode.as_str()
            ))
        })?;

        let now = Utc::now();
        let (scheduled_for, recurrence) = match integration.delivery_mode {
            DeliveryMode::Delayed => {
                let delay = schedule.delay_secs.ok_or_else(|| {
                    ApplicationError::Configuration(
                        "delayed integration without delay_secs".to_string(),
                    )
                })?;
                (now + Duration::seconds(delay), None)
            },
            DeliveryMode::Recurring => {
                let interval = schedule.interval_secs.ok_or_else(|| {
                    ApplicationError::Configuration(
                        "recurring integration without interval_secs".to_string(),
                    )
                })?;
                let recurrence = Recurrence {
                    interval_secs: interval,
                    count: schedule.count.unwrap_or(1),
                    occurrence: 1,
                };
                (now + Duration::seconds(interval), Some(recurrence))
            },
            DeliveryMode::Immediate => {
                return Err(ApplicationError::InvalidOperation(
                    "immediate integrations are not scheduled".to_string(),
                ));
            },
        };

        let payload = {
            let plans = self.transformer.transform(integration, &event.payload)?;
            match plans.as_slice() {
                [single] => single.body.clone(),
                _ => event.payload.clone(),
            }
        };

        let mut entry = ScheduledDelivery::new(
            integration.id,
            integration.org_id,
            scheduled_for,
            event.payload.clone(),
        );
        entry.payload = payload;
        entry.recurrence = recurrence;
        entry.cancellation = cancellation_from_payload(&event.payload);

        self.store.insert(&entry).await?;
        info!(
            entry = %entry.id,
            scheduled_for = %entry.scheduled_for,
            "Scheduled delivery created"
        );
        Ok(entry)
    }

    /// One scheduler tick: claim and dispatch due entries
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<SchedulerTickOutcome, ApplicationError> {
        let mut outcome = SchedulerTickOutcome::default();

        for _ in 0..self.policy.claim_batch {
            let Some(entry) = self.store.claim_due(Utc::now()).await? else {
                break;
            };
            outcome.claimed += 1;
            self.process_claimed(entry, &mut outcome).await?;
        }

        if outcome.claimed > 0 {
            info!(
                claimed = outcome.claimed,
                sent = outcome.sent,
                rescheduled = outcome.rescheduled,
                failed = outcome.failed,
                "Scheduler tick complete"
            );
        }
        Ok(outcome)
    }

    async fn process_claimed(
        &self,
        mut entry: ScheduledDelivery,
        outcome: &mut SchedulerTickOutcome,
    ) -> Result<(), ApplicationError> {
        let now = Utc::now();

        // A cancel may have landed between the due-query and our claim.
        if let Some(current) = self.store.get(entry.org_id, entry.id).await? {
            if current.status == domain::entities::ScheduleStatus::Cancelled {
                debug!(entry = %entry.id, "Entry cancelled in flight, releasing");
                outcome.cancelled += 1;
                return Ok(());
            }
        }

        let Some(integration) = self
            .integrations
            .get(entry.org_id, entry.integration_id)
            .await?
        else {
            warn!(entry = %entry.id, "Integration gone, failing scheduled entry");
            entry.mark_failed("integration deleted", now);
            return self.store.update(&entry).await;
        };

        // Re-use the existing execution log across scheduled retries so
        // the whole lifecycle stays one record.
        let log = match entry.delivery_log_id {
            Some(trace_id) => match self.logs.get(entry.org_id, trace_id).await? {
                Some(log) if !log.is_terminal() => {
                    self.deliverer.retry(&integration, log).await
                },
                _ => {
                    self.deliverer
                        .deliver_prepared(&integration, &entry.payload, TriggerType::Schedule)
                        .await
                },
            },
            None => {
                self.deliverer
                    .deliver_prepared(&integration, &entry.payload, TriggerType::Schedule)
                    .await
            },
        };
        entry.delivery_log_id = Some(log.trace_id);

        match log.status {
            ExecutionStatus::Success => {
                entry.mark_sent(log.trace_id, Utc::now());
                self.store.update(&entry).await?;
                outcome.sent += 1;

                if let Some(next) = entry.next_occurrence() {
                    debug!(
                        entry = %entry.id,
                        next = %next.id,
                        occurrence = next.recurrence.map_or(0, |r| r.occurrence),
                        "Materialized next recurring occurrence"
                    );
                    self.store.insert(&next).await?;
                }
            },
            ExecutionStatus::Retrying | ExecutionStatus::Skipped => {
                if entry.attempt_count < integration.retry_count {
                    let next_at =
                        Utc::now() + self.policy.delay_for_attempt(entry.attempt_count + 1);
                    entry.reschedule(
                        next_at,
                        log.error
                            .as_ref()
                            .map_or_else(|| "transient failure".to_string(), ToString::to_string),
                    );
                    self.store.update(&entry).await?;
                    outcome.rescheduled += 1;
                } else {
                    entry.mark_failed("delivery retries exhausted", Utc::now());
                    self.store.update(&entry).await?;
                    outcome.failed += 1;
                }
            },
            ExecutionStatus::Failed | ExecutionStatus::Abandoned => {
                entry.mark_failed(
                    log.error
                        .as_ref()
                        .map_or_else(|| "delivery failed".to_string(), ToString::to_string),
                    Utc::now(),
                );
                self.store.update(&entry).await?;
                outcome.failed += 1;
            },
            ExecutionStatus::Pending => {
                // The pipeline never leaves a log pending; treat as transient.
                self.store.release(entry.id).await?;
            },
        }
        Ok(())
    }

    /// Cancel all matching pending entries of a tenant
    #[instrument(skip(self))]
    pub async fn cancel_by_match(
        &self,
        org_id: OrgId,
        descriptor: &CancellationMatch,
    ) -> Result<u64, ApplicationError> {
        let cancelled = self.store.cancel_by_match(org_id, descriptor).await?;
        if cancelled > 0 {
            info!(org = %org_id, cancelled, "Cancelled scheduled deliveries by match");
        }
        Ok(cancelled)
    }

    /// Return stale `PROCESSING` claims to `PENDING`
    pub async fn reset_stale(&self) -> Result<u64, ApplicationError> {
        let cutoff = self.policy.stale_cutoff(Utc::now());
        let reset = self.store.reset_stale(cutoff).await?;
        if reset > 0 {
            warn!(reset, "Reset stale scheduled-delivery claims");
        }
        Ok(reset)
    }

    /// Promote missed `PENDING` entries to `OVERDUE`
    pub async fn mark_overdue(&self) -> Result<u64, ApplicationError> {
        self.store.mark_overdue(Utc::now()).await
    }
}

/// Lift a cancellation descriptor out of an event payload
///
/// Looks for `cancellationInfo: {patientRid, scheduledDateTime}`.
#[must_use]
pub fn cancellation_from_payload(payload: &serde_json::Value) -> Option<CancellationMatch> {
    let info = payload.get("cancellationInfo")?;
    let patient_rid = info.get("patientRid")?.as_i64()?;
    let scheduled_at = info
        .get("scheduledDateTime")?
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())?
        .with_timezone(&Utc);
    Some(CancellationMatch {
        patient_rid,
        scheduled_at,
    })
}
