//! Event ingestion pipeline
//!
//! One entry point per polled event: deduplicate against the processed-event
//! set, open the audit record, resolve integrations, fan the deliveries out
//! (immediate through the delivery pipeline, delayed/recurring into the
//! scheduler queue), finalize the audit, and advance the source checkpoint
//! with gap detection.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use domain::entities::{
    AuditRecord, AuditStatus, DeliverySummary, ErrorCategory, Event, ExecutionLog,
    ExecutionStatus, ProcessedEvent, SourceCheckpoint, TriggerType,
};
use domain::value_objects::IntegrationId;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::ApplicationError;
use crate::ports::{AuditSink, CheckpointStore, ProcessedEventStore};
use crate::services::deliverer::DeliveryService;
use crate::services::matcher::IntegrationMatcher;
use crate::services::scheduler::{ScheduleService, cancellation_from_payload};

/// Ingestion configuration
#[derive(Debug, Clone, Default)]
pub struct IngestConfig {
    /// Payload fields allowed into the audit summary
    pub allowed_summary_fields: Vec<String>,
    /// Bounded concurrency of the per-event delivery fan-out
    pub dispatch_concurrency: usize,
}

/// Per-integration outcome of the fan-out
enum DispatchResult {
    /// Entry enqueued into the scheduler (id and due time on success)
    Scheduled(
        IntegrationId,
        Result<(Uuid, DateTime<Utc>), ApplicationError>,
    ),
    /// Immediate delivery logs
    Dispatched(IntegrationId, Vec<ExecutionLog>),
}

/// Runs the receive-side pipeline for every event
pub struct IngestService {
    processed: Arc<dyn ProcessedEventStore>,
    audit: Arc<dyn AuditSink>,
    checkpoints: Arc<dyn CheckpointStore>,
    matcher: IntegrationMatcher,
    deliverer: Arc<DeliveryService>,
    scheduler: Arc<ScheduleService>,
    config: IngestConfig,
}

impl std::fmt::Debug for IngestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IngestService {
    /// Create the ingest service
    #[must_use]
    pub fn new(
        processed: Arc<dyn ProcessedEventStore>,
        audit: Arc<dyn AuditSink>,
        checkpoints: Arc<dyn CheckpointStore>,
        matcher: IntegrationMatcher,
        deliverer: Arc<DeliveryService>,
        scheduler: Arc<ScheduleService>,
        config: IngestConfig,
    ) -> Self {
        Self {
            processed,
            audit,
            checkpoints,
            matcher,
            deliverer,
            scheduler,
            config,
        }
    }

    /// Process one event end to end; returns the audit outcome
    #[instrument(skip(self, event), fields(event = %event.stable_id(), org = %event.org_id))]
    pub async fn process_event(&self, event: &Event) -> Result<AuditStatus, ApplicationError> {
        let started_at = Utc::now();
        let stable_id = event.stable_id();
        let mut audit = AuditRecord::begin(
            event.org_id,
            stable_id.clone(),
            event.event_type.clone(),
            event.source.kind,
            event.source.source_id.clone(),
            &event.payload,
            &self.config.allowed_summary_fields,
        );

        // Idempotency: the insert is the commit of acceptance.
        let marker = ProcessedEvent::new(
            stable_id.clone(),
            event.source.source_id.clone(),
            event.org_id,
        );
        match self.processed.insert(&marker).await {
            Ok(()) => {},
            Err(ApplicationError::DuplicateEvent(_)) => {
                debug!(event = %stable_id, "Duplicate event suppressed");
                audit.finish_skipped(ErrorCategory::Duplicate, started_at);
                self.record_audit(&audit).await;
                self.advance_checkpoint(event).await;
                return Ok(AuditStatus::Skipped);
            },
            Err(err) => return Err(err),
        }

        // A cancellation event may retire pending scheduled deliveries
        // before anything new is matched.
        self.apply_cancellation(event, &mut audit).await;

        let integrations = match self
            .matcher
            .resolve(event.org_id, event.org_unit, &event.event_type)
            .await
        {
            Ok(integrations) => integrations,
            Err(err) => {
                // The event is accepted but unprocessed: leave a STUCK audit
                // trail for operators.
                audit.record_stage("error", Some(err.to_string()));
                self.record_audit(&audit).await;
                return Err(err);
            },
        };
        audit.record_stage("matched", Some(format!("{} integrations", integrations.len())));

        #[allow(clippy::cast_possible_truncation)]
        let mut summary = DeliverySummary {
            integrations_matched: integrations.len() as u32,
            ..Default::default()
        };
        let mut circuit_skips = 0u32;
        let mut terminal_logs = 0u32;

        // Bounded fan-out: deliveries of one event run concurrently up to
        // the dispatch pool width, and the event completes only when all of
        // them have settled.
        let results: Vec<DispatchResult> = stream::iter(integrations.iter().cloned())
            .map(|integration| {
                let stable_id = stable_id.clone();
                async move {
                    if integration.delivery_mode.is_scheduled() {
                        DispatchResult::Scheduled(
                            integration.id,
                            self.scheduler
                                .schedule_for_event(&integration, event)
                                .await
                                .map(|entry| (entry.id, entry.scheduled_for)),
                        )
                    } else {
                        DispatchResult::Dispatched(
                            integration.id,
                            self.deliverer
                                .deliver(
                                    &integration,
                                    &event.payload,
                                    Some(stable_id),
                                    TriggerType::Event,
                                )
                                .await,
                        )
                    }
                }
            })
            .buffer_unordered(self.config.dispatch_concurrency.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                DispatchResult::Scheduled(_, Ok((entry_id, scheduled_for))) => {
                    audit.record_stage(
                        "scheduled",
                        Some(format!("{entry_id} at {scheduled_for}")),
                    );
                },
                DispatchResult::Scheduled(integration_id, Err(err)) => {
                    warn!(
                        integration = %integration_id,
                        error = %err,
                        "Failed to schedule delivery"
                    );
                    summary.failed_count += 1;
                },
                DispatchResult::Dispatched(integration_id, logs) => {
                    for log in &logs {
                        match log.status {
                            ExecutionStatus::Success => {
                                summary.delivered_count += 1;
                                terminal_logs += 1;
                            },
                            ExecutionStatus::Failed | ExecutionStatus::Abandoned => {
                                summary.failed_count += 1;
                                terminal_logs += 1;
                            },
                            ExecutionStatus::Skipped => {
                                terminal_logs += 1;
                                if log
                                    .error
                                    .as_ref()
                                    .is_some_and(|e| e.category == ErrorCategory::CircuitOpen)
                                {
                                    circuit_skips += 1;
                                }
                            },
                            // Retrying deliveries resolve later through the
                            // retry engine.
                            ExecutionStatus::Pending | ExecutionStatus::Retrying => {},
                        }
                    }
                    audit.record_stage("dispatched", Some(format!("integration {integration_id}")));
                },
            }
        }

        // Every match refused by an open circuit: the whole event is a
        // circuit-open skip, not a failure.
        if summary.integrations_matched > 0
            && circuit_skips == terminal_logs
            && circuit_skips == summary.integrations_matched
        {
            audit.delivery = summary;
            audit.finish_skipped(ErrorCategory::CircuitOpen, started_at);
        } else {
            audit.finish_with_summary(summary, started_at);
        }
        let status = audit.status;
        self.record_audit(&audit).await;
        self.advance_checkpoint(event).await;

        info!(
            event = %stable_id,
            status = status.as_str(),
            matched = summary.integrations_matched,
            delivered = summary.delivered_count,
            failed = summary.failed_count,
            "Event processed"
        );
        Ok(status)
    }

    /// Cancel matching scheduled deliveries for cancellation events
    async fn apply_cancellation(&self, event: &Event, audit: &mut AuditRecord) {
        if !event.event_type.as_str().ends_with("_CANCELLED") {
            return;
        }
        let Some(descriptor) = cancellation_from_payload(&event.payload) else {
            return;
        };
        match self
            .scheduler
            .cancel_by_match(event.org_id, &descriptor)
            .await
        {
            Ok(0) => {},
            Ok(cancelled) => {
                audit.record_stage("cancelled-scheduled", Some(format!("{cancelled} entries")));
            },
            Err(err) => {
                warn!(error = %err, "Cancellation-by-match failed");
            },
        }
    }

    /// Advance the source checkpoint; detected gaps are logged, not healed
    ///
    /// Broker checkpoints are per partition; the push queue is not
    /// checkpointed (claim order is not a monotone sequence).
    async fn advance_checkpoint(&self, event: &Event) {
        if event.source.kind == domain::entities::SourceKind::Push {
            return;
        }
        let Some(sequence) = event.source.sequence else {
            return;
        };
        let identifier = event.source.partition.map_or_else(
            || event.source.identifier.clone(),
            |partition| format!("{}:{partition}", event.source.identifier),
        );

        let result: Result<(), ApplicationError> = async {
            let mut checkpoint = self
                .checkpoints
                .get(event.source.kind, &identifier)
                .await?
                .unwrap_or_else(|| {
                    SourceCheckpoint::new(event.source.kind, identifier.clone())
                });

            if let Some(gap) = checkpoint.advance(sequence, Utc::now()) {
                warn!(
                    source = %identifier,
                    gap_start = gap.start,
                    gap_end = gap.end,
                    "Gap detected in source id sequence"
                );
            }
            self.checkpoints.put(&checkpoint).await
        }
        .await;

        if let Err(err) = result {
            error!(error = %err, "Failed to advance source checkpoint");
        }
    }

    /// Audit writes degrade to best-effort when the store is down
    async fn record_audit(&self, audit: &AuditRecord) {
        if let Err(err) = self.audit.record(audit).await {
            error!(error = %err, event = %audit.event_id, "Failed to record audit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{
        DeliveryResponse, MockAuditSink, MockCheckpointStore, MockDeliveryTransport,
        MockDlqStore, MockExecutionLogStore, MockIntegrationStore, MockProcessedEventStore,
        MockScheduledDeliveryStore,
    };
    use crate::services::breaker::{BreakerConfig, CircuitBreakerService};
    use crate::services::scheduler::SchedulerPolicy;
    use domain::entities::{DeliveryMode, Integration, ScheduleSpec, SourceRef};
    use domain::value_objects::{EventType, OrgId, StableEventId};
    use serde_json::json;

    fn integration() -> Integration {
        Integration::new(
            OrgId::new(84),
            "emr-sync",
            EventType::new("PATIENT_REGISTERED"),
            "http://svc/a",
        )
    }

    fn event() -> Event {
        Event::new(
            OrgId::new(84),
            EventType::new("PATIENT_REGISTERED"),
            json!({"patientRid": 59071145}),
            SourceRef::relational("notification_queue", 1001),
        )
    }

    struct Harness {
        processed: MockProcessedEventStore,
        audit: MockAuditSink,
        checkpoints: MockCheckpointStore,
        integrations: MockIntegrationStore,
        scheduled: MockScheduledDeliveryStore,
        transport: MockDeliveryTransport,
    }

    impl Harness {
        fn new() -> Self {
            let mut audit = MockAuditSink::new();
            audit.expect_record().returning(|_| Ok(()));
            let mut checkpoints = MockCheckpointStore::new();
            checkpoints.expect_get().returning(|_, _| Ok(None));
            checkpoints.expect_put().returning(|_| Ok(()));
            let mut integrations = MockIntegrationStore::new();
            integrations
                .expect_update_breaker()
                .returning(|_, _, _| Ok(()));
            Self {
                processed: MockProcessedEventStore::new(),
                audit,
                checkpoints,
                integrations,
                scheduled: MockScheduledDeliveryStore::new(),
                transport: MockDeliveryTransport::new(),
            }
        }

        fn build(self) -> IngestService {
            let integrations: Arc<dyn crate::ports::IntegrationStore> =
                Arc::new(self.integrations);
            let logs: Arc<dyn crate::ports::ExecutionLogStore> = {
                let mut logs = MockExecutionLogStore::new();
                logs.expect_upsert().returning(|_| Ok(()));
                logs.expect_append_attempt().returning(|_| Ok(()));
                logs.expect_get().returning(|_, _| Ok(None));
                Arc::new(logs)
            };
            let breaker = Arc::new(CircuitBreakerService::new(
                Arc::clone(&integrations),
                BreakerConfig::default(),
            ));
            let deliverer = Arc::new(DeliveryService::new(
                breaker,
                Arc::new(self.transport),
                Arc::clone(&logs),
                Arc::new(MockDlqStore::new()),
            ));
            let scheduler = Arc::new(ScheduleService::new(
                Arc::new(self.scheduled),
                Arc::clone(&integrations),
                logs,
                Arc::clone(&deliverer),
                SchedulerPolicy::default(),
            ));
            let matcher = IntegrationMatcher::new(integrations);
            IngestService::new(
                Arc::new(self.processed),
                Arc::new(self.audit),
                Arc::new(self.checkpoints),
                matcher,
                deliverer,
                scheduler,
                IngestConfig {
                    allowed_summary_fields: vec!["patientRid".to_string()],
                    dispatch_concurrency: 4,
                },
            )
        }
    }

    #[tokio::test]
    async fn happy_path_delivers_and_audits() {
        let mut harness = Harness::new();
        harness.processed.expect_insert().returning(|_| Ok(()));
        let listed = vec![integration()];
        harness
            .integrations
            .expect_list_for_org()
            .returning(move |_, _| Ok(listed.clone()));
        harness.transport.expect_execute().times(1).returning(|_| {
            Ok(DeliveryResponse {
                status: 200,
                body: "ok".to_string(),
            })
        });

        // Audit must carry matched=1, delivered=1.
        let mut audit = MockAuditSink::new();
        audit
            .expect_record()
            .withf(|record| {
                record.status == AuditStatus::Delivered
                    && record.delivery.integrations_matched == 1
                    && record.delivery.delivered_count == 1
                    && record.delivery.failed_count == 0
            })
            .times(1)
            .returning(|_| Ok(()));
        harness.audit = audit;

        let status = harness.build().process_event(&event()).await.unwrap();
        assert_eq!(status, AuditStatus::Delivered);
    }

    #[tokio::test]
    async fn duplicate_is_skipped_without_matching() {
        let mut harness = Harness::new();
        harness.processed.expect_insert().returning(|_| {
            Err(ApplicationError::DuplicateEvent(StableEventId::from_raw(
                "84-PATIENT_REGISTERED-1001",
            )))
        });
        // list_for_org is never set up: a matcher call would panic.
        let mut audit = MockAuditSink::new();
        audit
            .expect_record()
            .withf(|record| {
                record.status == AuditStatus::Skipped
                    && record.skip_category == Some(ErrorCategory::Duplicate)
            })
            .times(1)
            .returning(|_| Ok(()));
        harness.audit = audit;

        let status = harness.build().process_event(&event()).await.unwrap();
        assert_eq!(status, AuditStatus::Skipped);
    }

    #[tokio::test]
    async fn no_match_is_skipped() {
        let mut harness = Harness::new();
        harness.processed.expect_insert().returning(|_| Ok(()));
        harness
            .integrations
            .expect_list_for_org()
            .returning(|_, _| Ok(Vec::new()));

        let status = harness.build().process_event(&event()).await.unwrap();
        assert_eq!(status, AuditStatus::Skipped);
    }

    #[tokio::test]
    async fn scheduled_integration_enqueues_instead_of_delivering() {
        let mut harness = Harness::new();
        harness.processed.expect_insert().returning(|_| Ok(()));
        let scheduled_integration = integration().with_schedule(
            DeliveryMode::Delayed,
            ScheduleSpec {
                delay_secs: Some(120),
                ..Default::default()
            },
        );
        let listed = vec![scheduled_integration];
        harness
            .integrations
            .expect_list_for_org()
            .returning(move |_, _| Ok(listed.clone()));
        harness
            .scheduled
            .expect_insert()
            .times(1)
            .returning(|_| Ok(()));
        // transport.execute is never set up: an immediate delivery would panic.

        let status = harness.build().process_event(&event()).await.unwrap();
        // Nothing delivered immediately; the event was handed off to the
        // scheduler queue.
        assert_eq!(status, AuditStatus::Delivered);
    }

    #[tokio::test]
    async fn all_matches_circuit_open_audits_as_skip() {
        let mut harness = Harness::new();
        harness.processed.expect_insert().returning(|_| Ok(()));
        let mut open = integration();
        open.breaker.state = domain::entities::CircuitState::Open;
        open.breaker.opened_at = Some(Utc::now());
        let listed = vec![open];
        harness
            .integrations
            .expect_list_for_org()
            .returning(move |_, _| Ok(listed.clone()));

        let mut audit = MockAuditSink::new();
        audit
            .expect_record()
            .withf(|record| {
                record.status == AuditStatus::Skipped
                    && record.skip_category == Some(ErrorCategory::CircuitOpen)
            })
            .times(1)
            .returning(|_| Ok(()));
        harness.audit = audit;

        let status = harness.build().process_event(&event()).await.unwrap();
        assert_eq!(status, AuditStatus::Skipped);
    }

    #[tokio::test]
    async fn cancellation_event_cancels_matching_entries() {
        let mut harness = Harness::new();
        harness.processed.expect_insert().returning(|_| Ok(()));
        harness
            .integrations
            .expect_list_for_org()
            .returning(|_, _| Ok(Vec::new()));
        harness
            .scheduled
            .expect_cancel_by_match()
            .withf(|org, descriptor| {
                *org == OrgId::new(84) && descriptor.patient_rid == 59_071_145
            })
            .times(1)
            .returning(|_, _| Ok(1));

        let cancel_event = Event::new(
            OrgId::new(84),
            EventType::new("APPOINTMENT_CANCELLED"),
            json!({
                "cancellationInfo": {
                    "patientRid": 59071145,
                    "scheduledDateTime": "2026-08-01T10:00:00Z"
                }
            }),
            SourceRef::relational("notification_queue", 1002),
        );

        harness.build().process_event(&cancel_event).await.unwrap();
    }

    #[tokio::test]
    async fn checkpoint_advances_after_processing() {
        let mut harness = Harness::new();
        harness.processed.expect_insert().returning(|_| Ok(()));
        harness
            .integrations
            .expect_list_for_org()
            .returning(|_, _| Ok(Vec::new()));

        let mut checkpoints = MockCheckpointStore::new();
        checkpoints.expect_get().returning(|_, _| Ok(None));
        checkpoints
            .expect_put()
            .withf(|checkpoint| checkpoint.last_processed_id == 1001)
            .times(1)
            .returning(|_| Ok(()));
        harness.checkpoints = checkpoints;

        harness.build().process_event(&event()).await.unwrap();
    }

    #[tokio::test]
    async fn matcher_failure_leaves_a_stuck_audit() {
        let mut harness = Harness::new();
        harness.processed.expect_insert().returning(|_| Ok(()));
        harness
            .integrations
            .expect_list_for_org()
            .returning(|_, _| Err(ApplicationError::Store("locked".to_string())));

        let mut audit = MockAuditSink::new();
        audit
            .expect_record()
            .withf(|record| record.status == AuditStatus::Stuck)
            .times(1)
            .returning(|_| Ok(()));
        harness.audit = audit;

        let result = harness.build().process_event(&event()).await;
        assert!(matches!(result, Err(ApplicationError::Store(_))));
    }
}
