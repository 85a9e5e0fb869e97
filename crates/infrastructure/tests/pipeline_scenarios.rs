//! End-to-end delivery pipeline scenarios
//!
//! The full engine assembled over in-memory SQLite and a wiremock target:
//! ingestion, dedup, matching, breaker, delivery, retry, scheduling and
//! audit, exercised the way the gateway runs in production.

use std::sync::Arc;

use chrono::{Duration, Utc};
use domain::entities::{
    AuditStatus, CancellationMatch, CircuitState, DeliveryMode, ErrorCategory, Event,
    ExecutionStatus, Integration, ScheduleSpec, ScheduleStatus, SourceKind, SourceRef,
};
use domain::value_objects::{EventType, OrgId, OrgUnitId};
use serde_json::json;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use application::ports::{
    AuditSink, CheckpointStore, DlqStore, ExecutionLogStore, IntegrationStore, LogQuery,
    ProcessedEventStore, ScheduleQuery, ScheduledDeliveryStore,
};
use application::services::{
    BreakerConfig, CircuitBreakerService, DeliveryService, IngestConfig, IngestService,
    IntegrationMatcher, RetryPolicy, RetryService, ScheduleService, SchedulerPolicy,
};
use infrastructure::http::{OutboundClientConfig, ReqwestTransport};
use infrastructure::persistence::{
    AsyncDatabase, SqliteAuditStore, SqliteCheckpointStore, SqliteDlqStore,
    SqliteExecutionLogStore, SqliteIntegrationStore, SqliteProcessedEventStore,
    SqliteScheduledStore,
};

/// The assembled delivery engine over one in-memory database
struct Gateway {
    integrations: Arc<SqliteIntegrationStore>,
    logs: Arc<SqliteExecutionLogStore>,
    scheduled: Arc<SqliteScheduledStore>,
    processed: Arc<SqliteProcessedEventStore>,
    checkpoints: Arc<SqliteCheckpointStore>,
    dlq: Arc<SqliteDlqStore>,
    audit: Arc<SqliteAuditStore>,
    ingest: IngestService,
    retry: RetryService,
    scheduler: Arc<ScheduleService>,
    _db: AsyncDatabase,
}

async fn gateway() -> Gateway {
    let db = AsyncDatabase::in_memory().await.unwrap();
    db.migrate().await.unwrap();
    let pool = db.pool().clone();

    let integrations = Arc::new(SqliteIntegrationStore::new(pool.clone()));
    let logs = Arc::new(SqliteExecutionLogStore::new(pool.clone()));
    let scheduled = Arc::new(SqliteScheduledStore::new(pool.clone()));
    let processed = Arc::new(SqliteProcessedEventStore::new(pool.clone()));
    let checkpoints = Arc::new(SqliteCheckpointStore::new(pool.clone()));
    let dlq = Arc::new(SqliteDlqStore::new(pool.clone()));
    let audit = Arc::new(SqliteAuditStore::new(pool.clone()));

    let breaker = Arc::new(CircuitBreakerService::new(
        Arc::clone(&integrations) as Arc<dyn IntegrationStore>,
        BreakerConfig::default(),
    ));
    let transport = Arc::new(
        ReqwestTransport::new(&OutboundClientConfig::default()).unwrap(),
    );
    let deliverer = Arc::new(DeliveryService::new(
        breaker,
        transport,
        Arc::clone(&logs) as Arc<dyn ExecutionLogStore>,
        Arc::clone(&dlq) as Arc<dyn DlqStore>,
    ));
    let scheduler = Arc::new(ScheduleService::new(
        Arc::clone(&scheduled) as Arc<dyn ScheduledDeliveryStore>,
        Arc::clone(&integrations) as Arc<dyn IntegrationStore>,
        Arc::clone(&logs) as Arc<dyn ExecutionLogStore>,
        Arc::clone(&deliverer),
        SchedulerPolicy {
            jitter: false,
            ..Default::default()
        },
    ));
    let retry = RetryService::new(
        Arc::clone(&logs) as Arc<dyn ExecutionLogStore>,
        Arc::clone(&integrations) as Arc<dyn IntegrationStore>,
        Arc::clone(&dlq) as Arc<dyn DlqStore>,
        Arc::clone(&deliverer),
        RetryPolicy {
            base_delay_secs: 0,
            ..Default::default()
        },
    );
    let ingest = IngestService::new(
        Arc::clone(&processed) as Arc<dyn ProcessedEventStore>,
        Arc::clone(&audit) as Arc<dyn AuditSink>,
        Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
        IntegrationMatcher::new(Arc::clone(&integrations) as Arc<dyn IntegrationStore>),
        deliverer,
        Arc::clone(&scheduler),
        IngestConfig {
            allowed_summary_fields: vec!["patientRid".to_string()],
            dispatch_concurrency: 4,
        },
    );

    Gateway {
        integrations,
        logs,
        scheduled,
        processed,
        checkpoints,
        dlq,
        audit,
        ingest,
        retry,
        scheduler,
        _db: db,
    }
}

fn patient_event(source_id: i64) -> Event {
    Event::new(
        OrgId::new(84),
        EventType::new("PATIENT_REGISTERED"),
        json!({"patientRid": 59071145, "name": "A."}),
        SourceRef::relational("notification_queue", source_id),
    )
}

fn integration(target: &str) -> Integration {
    Integration::new(
        OrgId::new(84),
        "emr-sync",
        EventType::new("PATIENT_REGISTERED"),
        format!("{target}/a"),
    )
    .with_retry_count(3)
}

// Scenario 1: happy path.
#[tokio::test]
async fn happy_path_delivers_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/a"))
        .and(header_exists("X-Message-Id"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway().await;
    gateway
        .integrations
        .upsert(&integration(&server.uri()))
        .await
        .unwrap();

    let status = gateway
        .ingest
        .process_event(&patient_event(1001))
        .await
        .unwrap();
    assert_eq!(status, AuditStatus::Delivered);

    // One execution log, one attempt, success.
    let logs = gateway
        .logs
        .query(&LogQuery::for_org(OrgId::new(84)))
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, ExecutionStatus::Success);
    assert_eq!(logs[0].attempt_count, 1);

    // The processed-event set holds the stable id.
    assert!(
        gateway
            .processed
            .contains(&domain::value_objects::StableEventId::from_raw(
                "84-PATIENT_REGISTERED-1001"
            ))
            .await
            .unwrap()
    );

    // Audit: delivered, 1 matched, 1 delivered, summary allowlisted.
    let audits = gateway.audit.list_for_org(OrgId::new(84), 10).await.unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].delivery.integrations_matched, 1);
    assert_eq!(audits[0].delivery.delivered_count, 1);
    assert!(audits[0].payload_summary.contains_key("patientRid"));
    assert!(!audits[0].payload_summary.contains_key("name"));

    // Checkpoint advanced.
    let checkpoint = gateway
        .checkpoints
        .get(SourceKind::Relational, "notification_queue")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.last_processed_id, 1001);
}

// Scenario 2: replaying the same event is a duplicate skip.
#[tokio::test]
async fn duplicate_replay_is_suppressed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1) // called once, never for the replay
        .mount(&server)
        .await;

    let gateway = gateway().await;
    gateway
        .integrations
        .upsert(&integration(&server.uri()))
        .await
        .unwrap();

    let first = gateway
        .ingest
        .process_event(&patient_event(1001))
        .await
        .unwrap();
    assert_eq!(first, AuditStatus::Delivered);

    let replay = gateway
        .ingest
        .process_event(&patient_event(1001))
        .await
        .unwrap();
    assert_eq!(replay, AuditStatus::Skipped);

    // No second execution log.
    let logs = gateway
        .logs
        .query(&LogQuery::for_org(OrgId::new(84)))
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);

    // The replay audits as SKIPPED/DUPLICATE.
    let audits = gateway.audit.list_for_org(OrgId::new(84), 10).await.unwrap();
    assert_eq!(audits.len(), 2);
    assert!(audits.iter().any(|a| {
        a.status == AuditStatus::Skipped && a.skip_category == Some(ErrorCategory::Duplicate)
    }));
}

// Scenario 3: transient 503s then success within the retry ceiling.
#[tokio::test]
async fn transient_failures_retry_to_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let gateway = gateway().await;
    gateway
        .integrations
        .upsert(&integration(&server.uri()))
        .await
        .unwrap();

    gateway
        .ingest
        .process_event(&patient_event(1001))
        .await
        .unwrap();

    let logs = gateway
        .logs
        .query(&LogQuery::for_org(OrgId::new(84)))
        .await
        .unwrap();
    assert_eq!(logs[0].status, ExecutionStatus::Retrying);
    let trace_id = logs[0].trace_id;

    // Two retry ticks: 503 then 200. Zero base delay makes both due.
    gateway.retry.tick().await.unwrap();
    gateway.retry.tick().await.unwrap();

    let log = gateway
        .logs
        .get(OrgId::new(84), trace_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.status, ExecutionStatus::Success);
    assert_eq!(log.attempt_count, 3);

    // Exactly one log, three attempt rows.
    let attempts = gateway.logs.attempts_for(trace_id).await.unwrap();
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[2].status_code, Some(200));

    // The breaker counter reset on the final 200.
    let integration = gateway
        .integrations
        .list_for_org(OrgId::new(84), None)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(integration.breaker.state, CircuitState::Closed);
    assert_eq!(integration.breaker.consecutive_failures, 0);
}

// Scenario 4: ten consecutive infrastructure failures open the breaker;
// recovery goes through a half-open probe.
#[tokio::test]
async fn breaker_opens_then_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(10)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let gateway = gateway().await;
    // retry_count 0: every event is a single abandoned attempt.
    let mut config = integration(&server.uri());
    config.retry_count = 0;
    gateway.integrations.upsert(&config).await.unwrap();

    for n in 1..=10 {
        gateway
            .ingest
            .process_event(&patient_event(n))
            .await
            .unwrap();
    }

    let loaded = gateway
        .integrations
        .get(config.org_id, config.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.breaker.state, CircuitState::Open);
    assert_eq!(loaded.breaker.consecutive_failures, 10);

    // Event 11: skipped, target untouched.
    let status = gateway
        .ingest
        .process_event(&patient_event(11))
        .await
        .unwrap();
    assert_eq!(status, AuditStatus::Skipped);
    let skipped = gateway
        .logs
        .query(
            &LogQuery::for_org(OrgId::new(84)).with_status(ExecutionStatus::Skipped),
        )
        .await
        .unwrap();
    assert_eq!(skipped.len(), 1);
    assert_eq!(
        skipped[0].error.as_ref().map(|e| e.category),
        Some(ErrorCategory::CircuitOpen)
    );

    // Recovery window elapses (rewind opened_at instead of sleeping).
    let mut breaker = loaded.breaker.clone();
    breaker.opened_at = Some(Utc::now() - Duration::minutes(6));
    gateway
        .integrations
        .update_breaker(config.org_id, config.id, &breaker)
        .await
        .unwrap();

    // Event 12 is the half-open probe; the 200 closes the circuit.
    let status = gateway
        .ingest
        .process_event(&patient_event(12))
        .await
        .unwrap();
    assert_eq!(status, AuditStatus::Delivered);

    let recovered = gateway
        .integrations
        .get(config.org_id, config.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recovered.breaker.state, CircuitState::Closed);
    assert_eq!(recovered.breaker.consecutive_failures, 0);

    // Every abandoned delivery was dead-lettered.
    let dead = gateway.dlq.list(Some(OrgId::new(84)), None, 50).await.unwrap();
    assert_eq!(dead.len(), 10);
}

// Scenario 5: delayed delivery cancelled by match before it fires.
#[tokio::test]
async fn scheduled_delivery_cancelled_by_match() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0) // the target must never be called
        .mount(&server)
        .await;

    let gateway = gateway().await;
    let appointment_at = Utc::now() + Duration::hours(24);
    let config = Integration::new(
        OrgId::new(84),
        "appointment-reminder",
        EventType::new("APPOINTMENT_CREATED"),
        format!("{}/a", server.uri()),
    )
    .with_schedule(
        DeliveryMode::Delayed,
        ScheduleSpec {
            delay_secs: Some(120),
            ..Default::default()
        },
    );
    gateway.integrations.upsert(&config).await.unwrap();

    let created = Event::new(
        OrgId::new(84),
        EventType::new("APPOINTMENT_CREATED"),
        json!({
            "cancellationInfo": {
                "patientRid": 59071145,
                "scheduledDateTime": appointment_at.to_rfc3339()
            }
        }),
        SourceRef::relational("notification_queue", 2001),
    );
    gateway.ingest.process_event(&created).await.unwrap();

    let entries = gateway
        .scheduled
        .query(&ScheduleQuery {
            org_id: Some(OrgId::new(84)),
            status: None,
            limit: Some(10),
        })
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, ScheduleStatus::Pending);

    // A cancellation arrives before the entry fires.
    let cancelled = gateway
        .scheduler
        .cancel_by_match(
            OrgId::new(84),
            &CancellationMatch {
                patient_rid: 59_071_145,
                scheduled_at: appointment_at,
            },
        )
        .await
        .unwrap();
    assert_eq!(cancelled, 1);

    // The entry is terminally cancelled.
    let current = gateway
        .scheduled
        .get(entries[0].org_id, entries[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(current.status, ScheduleStatus::Cancelled);

    let outcome = gateway.scheduler.tick().await.unwrap();
    assert_eq!(outcome.claimed, 0);
}

// Scenario 5b: an undisturbed delayed delivery fires once due.
#[tokio::test]
async fn scheduled_delivery_fires_when_due() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway().await;
    let config = Integration::new(
        OrgId::new(84),
        "appointment-reminder",
        EventType::new("APPOINTMENT_CREATED"),
        format!("{}/a", server.uri()),
    )
    .with_schedule(
        DeliveryMode::Delayed,
        ScheduleSpec {
            delay_secs: Some(120),
            ..Default::default()
        },
    );
    gateway.integrations.upsert(&config).await.unwrap();

    let event = Event::new(
        OrgId::new(84),
        EventType::new("APPOINTMENT_CREATED"),
        json!({"patientRid": 1}),
        SourceRef::relational("notification_queue", 2002),
    );
    gateway.ingest.process_event(&event).await.unwrap();

    // Pull the entry forward to due and tick.
    let mut entries = gateway
        .scheduled
        .query(&ScheduleQuery {
            org_id: Some(OrgId::new(84)),
            status: Some(ScheduleStatus::Pending),
            limit: Some(10),
        })
        .await
        .unwrap();
    let mut entry = entries.remove(0);
    entry.scheduled_for = Utc::now() - Duration::minutes(1);
    gateway.scheduled.update(&entry).await.unwrap();

    let outcome = gateway.scheduler.tick().await.unwrap();
    assert_eq!(outcome.claimed, 1);
    assert_eq!(outcome.sent, 1);

    let sent = gateway
        .scheduled
        .get(entry.org_id, entry.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sent.status, ScheduleStatus::Sent);
    assert!(sent.delivered_at.is_some());
    assert!(sent.delivery_log_id.is_some());

    // The delivery logged with the schedule trigger.
    let log = gateway
        .logs
        .get(entry.org_id, sent.delivery_log_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.trigger, domain::entities::TriggerType::Schedule);
    assert_eq!(log.status, ExecutionStatus::Success);
}

// Scenario 6: hierarchy inheritance with exclusion.
#[tokio::test]
async fn inherited_integration_honours_exclusions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1) // only the non-excluded unit delivers
        .mount(&server)
        .await;

    let gateway = gateway().await;
    let config = Integration::new(
        OrgId::new(84),
        "parent-hook",
        EventType::wildcard(),
        format!("{}/a", server.uri()),
    )
    .with_children(vec![OrgUnitId::new(435)]);
    gateway.integrations.upsert(&config).await.unwrap();

    // Excluded child unit: no delivery.
    let from_excluded = Event::new(
        OrgId::new(84),
        EventType::new("ANY_EVENT"),
        json!({}),
        SourceRef::relational("notification_queue", 3001),
    )
    .with_org_unit(OrgUnitId::new(435));
    let status = gateway.ingest.process_event(&from_excluded).await.unwrap();
    assert_eq!(status, AuditStatus::Skipped);

    // Other child unit: delivered.
    let from_other = Event::new(
        OrgId::new(84),
        EventType::new("ANY_EVENT"),
        json!({}),
        SourceRef::relational("notification_queue", 3002),
    )
    .with_org_unit(OrgUnitId::new(3264));
    let status = gateway.ingest.process_event(&from_other).await.unwrap();
    assert_eq!(status, AuditStatus::Delivered);
}

// Gap detection: a jump in source ids records exactly one gap.
#[tokio::test]
async fn id_jump_records_one_gap() {
    let gateway = gateway().await;

    gateway
        .ingest
        .process_event(&patient_event(100))
        .await
        .unwrap();
    gateway
        .ingest
        .process_event(&patient_event(105))
        .await
        .unwrap();

    let checkpoint = gateway
        .checkpoints
        .get(SourceKind::Relational, "notification_queue")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.last_processed_id, 105);
    assert_eq!(checkpoint.gaps.len(), 1);
    assert_eq!(
        (checkpoint.gaps[0].start, checkpoint.gaps[0].end),
        (101, 104)
    );
}

// Retry-window sweeper: stale RETRYING logs are abandoned and dead-lettered.
#[tokio::test]
async fn sweeper_abandons_logs_past_the_window() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let gateway = gateway().await;
    gateway
        .integrations
        .upsert(&integration(&server.uri()))
        .await
        .unwrap();

    gateway
        .ingest
        .process_event(&patient_event(1001))
        .await
        .unwrap();

    // Age the retrying log past the four-hour window.
    let mut logs = gateway
        .logs
        .query(&LogQuery::for_org(OrgId::new(84)))
        .await
        .unwrap();
    let mut log = logs.remove(0);
    assert_eq!(log.status, ExecutionStatus::Retrying);
    log.last_attempt_at = Some(Utc::now() - Duration::hours(5));
    gateway.logs.upsert(&log).await.unwrap();

    let abandoned = gateway.retry.sweep_expired().await.unwrap();
    assert_eq!(abandoned, 1);

    let swept = gateway
        .logs
        .get(log.org_id, log.trace_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(swept.status, ExecutionStatus::Abandoned);
    assert!(
        swept
            .error
            .as_ref()
            .is_some_and(|e| e.message.contains("Exceeded retry window"))
    );

    let dead = gateway.dlq.list(Some(OrgId::new(84)), None, 10).await.unwrap();
    assert_eq!(dead.len(), 1);
}
