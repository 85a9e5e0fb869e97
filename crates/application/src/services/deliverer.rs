//! Delivery pipeline
//!
//! For one integration and payload: consult the circuit breaker, transform,
//! build and sign the request, issue it, classify the outcome, record the
//! execution log and attempt rows, update the breaker, and dead-letter
//! abandoned deliveries. Retries re-enter the same pipeline with the
//! original trace id, so one delivery lifecycle is always one log record.

use std::sync::Arc;

use chrono::Utc;
use domain::entities::{
    DeliveryAttempt, DeliveryError, DlqEntry, ErrorCategory, ExecutionLog, ExecutionStatus,
    Integration, RequestSnapshot, TriggerType, execution_log::truncate_body,
};
use domain::value_objects::StableEventId;
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::error::ApplicationError;
use crate::ports::{
    DeliveryRequest, DeliveryTransport, DlqStore, ExecutionLogStore, TransportError,
};
use crate::services::breaker::CircuitBreakerService;
use crate::services::signing;
use crate::services::transformer::{DeliveryPlan, Transformer};

/// How a target's answer (or the lack of one) is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeClass {
    /// 2xx
    Success,
    /// Non-429 4xx (and any stray 3xx): terminal, breaker untouched
    ClientFailure,
    /// 429, 5xx, network, timeout: retryable, feeds the breaker
    Infrastructure,
}

/// Classify an HTTP status the target answered with
#[must_use]
pub const fn classify_status(status: u16) -> OutcomeClass {
    match status {
        200..=299 => OutcomeClass::Success,
        429 => OutcomeClass::Infrastructure,
        500..=599 => OutcomeClass::Infrastructure,
        _ => OutcomeClass::ClientFailure,
    }
}

/// Executes deliveries through the transform → breaker → transport pipeline
pub struct DeliveryService {
    transformer: Transformer,
    breaker: Arc<CircuitBreakerService>,
    transport: Arc<dyn DeliveryTransport>,
    logs: Arc<dyn ExecutionLogStore>,
    dlq: Arc<dyn DlqStore>,
}

impl std::fmt::Debug for DeliveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryService").finish_non_exhaustive()
    }
}

impl DeliveryService {
    /// Create the delivery service
    #[must_use]
    pub fn new(
        breaker: Arc<CircuitBreakerService>,
        transport: Arc<dyn DeliveryTransport>,
        logs: Arc<dyn ExecutionLogStore>,
        dlq: Arc<dyn DlqStore>,
    ) -> Self {
        Self {
            transformer: Transformer::new(),
            breaker,
            transport,
            logs,
            dlq,
        }
    }

    /// Run the full pipeline for one integration and payload
    ///
    /// Action-list integrations produce one log per action; every other
    /// mode produces exactly one.
    #[instrument(skip(self, payload), fields(integration = %integration.id, org = %integration.org_id))]
    pub async fn deliver(
        &self,
        integration: &Integration,
        payload: &Value,
        event_id: Option<StableEventId>,
        trigger: TriggerType,
    ) -> Vec<ExecutionLog> {
        // Breaker first: an open circuit skips without transforming.
        match self.breaker.check(integration).await {
            Ok(decision) if !decision.allowed => {
                let mut log =
                    ExecutionLog::new(integration.org_id, integration.id, event_id, trigger);
                log.skip(
                    ErrorCategory::CircuitOpen,
                    decision
                        .reason
                        .unwrap_or_else(|| "circuit open".to_string()),
                    Utc::now(),
                );
                self.persist_log(&log).await;
                return vec![log];
            },
            Ok(_) => {},
            Err(err) => {
                // Breaker state unavailable degrades to allowing the
                // delivery; the target's own answer still governs.
                warn!(error = %err, "Breaker check failed, delivering anyway");
            },
        }

        let plans = match self.transformer.transform(integration, payload) {
            Ok(plans) => plans,
            Err(err) => {
                let mut log =
                    ExecutionLog::new(integration.org_id, integration.id, event_id, trigger);
                log.begin_attempt(Utc::now());
                log.complete_failure(
                    DeliveryError::new(ErrorCategory::Transformation, err.to_string()),
                    Utc::now(),
                );
                self.persist_log(&log).await;
                return vec![log];
            },
        };

        let mut logs = Vec::with_capacity(plans.len());
        for plan in plans {
            let log = ExecutionLog::new(integration.org_id, integration.id, event_id.clone(), trigger);
            logs.push(self.attempt_plan(integration, &plan, log).await);
        }
        logs
    }

    /// Deliver an already-transformed body through the pipeline
    ///
    /// Used by the scheduler, whose entries carry the pre-transformed
    /// payload. The breaker, signing, classification and logging behave
    /// exactly as in [`Self::deliver`].
    #[instrument(skip(self, body), fields(integration = %integration.id))]
    pub async fn deliver_prepared(
        &self,
        integration: &Integration,
        body: &Value,
        trigger: TriggerType,
    ) -> ExecutionLog {
        match self.breaker.check(integration).await {
            Ok(decision) if !decision.allowed => {
                let mut log = ExecutionLog::new(integration.org_id, integration.id, None, trigger);
                log.skip(
                    ErrorCategory::CircuitOpen,
                    decision
                        .reason
                        .unwrap_or_else(|| "circuit open".to_string()),
                    Utc::now(),
                );
                self.persist_log(&log).await;
                return log;
            },
            Ok(_) => {},
            Err(err) => {
                warn!(error = %err, "Breaker check failed, delivering anyway");
            },
        }

        let plan = DeliveryPlan {
            action_name: None,
            url: integration.target_url.clone(),
            method: integration.method,
            body: body.clone(),
        };
        let log = ExecutionLog::new(integration.org_id, integration.id, None, trigger);
        self.attempt_plan(integration, &plan, log).await
    }

    /// Re-attempt an existing `RETRYING` log from its request snapshot
    ///
    /// Used by the retry engine; the trace id and attempt count carry over,
    /// so the store updates the one existing record.
    #[instrument(skip(self, log), fields(trace = %log.trace_id, attempt = log.attempt_count + 1))]
    pub async fn retry(&self, integration: &Integration, log: ExecutionLog) -> ExecutionLog {
        let mut log = log;

        match self.breaker.check(integration).await {
            Ok(decision) if !decision.allowed => {
                // Leave the log RETRYING; the next tick re-evaluates once
                // the circuit recovers, and the window sweeper bounds it.
                debug!(trace = %log.trace_id, "Retry deferred, circuit open");
                return log;
            },
            Ok(_) => {},
            Err(err) => {
                warn!(error = %err, "Breaker check failed, retrying anyway");
            },
        }

        let Some(snapshot) = log.request.clone() else {
            log.begin_attempt(Utc::now());
            log.complete_failure(
                DeliveryError::new(
                    ErrorCategory::Validation,
                    "no request snapshot to retry from",
                ),
                Utc::now(),
            );
            self.persist_log(&log).await;
            return log;
        };

        let plan = DeliveryPlan {
            action_name: None,
            url: snapshot.url,
            method: snapshot.method,
            body: snapshot
                .body
                .as_deref()
                .and_then(|body| serde_json::from_str(body).ok())
                .unwrap_or(Value::Null),
        };
        self.attempt_plan(integration, &plan, log).await
    }

    /// One attempt of one plan: build, send, classify, record
    async fn attempt_plan(
        &self,
        integration: &Integration,
        plan: &DeliveryPlan,
        mut log: ExecutionLog,
    ) -> ExecutionLog {
        let now = Utc::now();
        let body = plan.body.to_string();

        let request = match self.build_request(integration, plan, &body, &log) {
            Ok(request) => request,
            Err(err) => {
                log.begin_attempt(now);
                log.complete_failure(
                    DeliveryError::new(ErrorCategory::Validation, err.to_string()),
                    Utc::now(),
                );
                self.persist_log(&log).await;
                return log;
            },
        };

        log.request = Some(RequestSnapshot {
            method: plan.method,
            url: plan.url.clone(),
            header_names: request.headers.iter().map(|(name, _)| name.clone()).collect(),
            body: Some(body.clone()),
        });
        log.begin_attempt(now);

        let attempt_started = Utc::now();
        let result = self.transport.execute(&request).await;
        #[allow(clippy::cast_sign_loss)]
        let duration_ms = (Utc::now() - attempt_started).num_milliseconds().max(0) as u64;

        let (status_code, attempt_error) = match result {
            Ok(response) => {
                let status = response.status;
                match classify_status(status) {
                    OutcomeClass::Success => {
                        log.complete_success(status, Some(response.body), Utc::now());
                        self.record_breaker_success(integration).await;
                        (Some(status), None)
                    },
                    OutcomeClass::ClientFailure => {
                        log.complete_failure(
                            DeliveryError::new(
                                ErrorCategory::Client,
                                format!("target answered {status}"),
                            )
                            .with_status(status),
                            Utc::now(),
                        );
                        (Some(status), Some(format!("target answered {status}")))
                    },
                    OutcomeClass::Infrastructure => {
                        let message = format!("target answered {status}");
                        self.handle_infrastructure_failure(
                            integration,
                            &mut log,
                            DeliveryError::new(ErrorCategory::Infrastructure, message.clone())
                                .with_status(status),
                        )
                        .await;
                        (Some(status), Some(message))
                    },
                }
            },
            Err(err) if err.is_invalid_request() => {
                log.complete_failure(
                    DeliveryError::new(ErrorCategory::Validation, err.to_string()),
                    Utc::now(),
                );
                (None, Some(err.to_string()))
            },
            Err(err) => {
                let message = transport_error_message(&err);
                self.handle_infrastructure_failure(
                    integration,
                    &mut log,
                    DeliveryError::new(ErrorCategory::Infrastructure, message.clone()),
                )
                .await;
                (None, Some(message))
            },
        };

        self.persist_attempt(&DeliveryAttempt {
            trace_id: log.trace_id,
            attempt: log.attempt_count,
            status_code,
            error: attempt_error,
            started_at: attempt_started,
            duration_ms,
        })
        .await;
        self.persist_log(&log).await;

        if log.status == ExecutionStatus::Abandoned {
            self.dead_letter(integration, &log, plan).await;
        }

        log
    }

    fn build_request(
        &self,
        integration: &Integration,
        plan: &DeliveryPlan,
        body: &str,
        log: &ExecutionLog,
    ) -> Result<DeliveryRequest, ApplicationError> {
        let now = Utc::now();
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        headers.extend(integration.auth.headers());
        headers.extend(signing::signature_headers(
            integration,
            body,
            log.trace_id,
            now.timestamp(),
        )?);

        Ok(DeliveryRequest {
            method: plan.method,
            url: plan.url.clone(),
            headers,
            body: Some(body.to_string()),
            timeout: integration.timeout(),
        })
    }

    async fn handle_infrastructure_failure(
        &self,
        integration: &Integration,
        log: &mut ExecutionLog,
        error: DeliveryError,
    ) {
        log.complete_retryable(error, integration.retry_count, Utc::now());
        if let Err(err) = self.breaker.on_infrastructure_failure(integration).await {
            warn!(error = %err, "Failed to record breaker failure");
        }
    }

    async fn record_breaker_success(&self, integration: &Integration) {
        if let Err(err) = self.breaker.on_success(integration).await {
            warn!(error = %err, "Failed to record breaker success");
        }
    }

    async fn dead_letter(&self, integration: &Integration, log: &ExecutionLog, plan: &DeliveryPlan) {
        let error = log.error.clone().unwrap_or_else(|| {
            DeliveryError::new(ErrorCategory::Exhausted, "retries exhausted")
        });
        let entry = DlqEntry::new(
            log.trace_id,
            integration.id,
            integration.org_id,
            plan.body.clone(),
            error,
        );
        if let Err(err) = self.dlq.append(&entry).await {
            error!(error = %err, trace = %log.trace_id, "Failed to dead-letter abandoned delivery");
        } else {
            warn!(trace = %log.trace_id, "Delivery abandoned, dead-lettered");
        }
    }

    /// Store-unavailable during logging degrades to best-effort
    async fn persist_log(&self, log: &ExecutionLog) {
        if let Err(err) = self.logs.upsert(log).await {
            error!(error = %err, trace = %log.trace_id, "Failed to persist execution log");
        }
    }

    async fn persist_attempt(&self, attempt: &DeliveryAttempt) {
        if let Err(err) = self.logs.append_attempt(attempt).await {
            error!(error = %err, trace = %attempt.trace_id, "Failed to persist delivery attempt");
        }
    }
}

fn transport_error_message(err: &TransportError) -> String {
    truncate_body(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{
        DeliveryResponse, MockDeliveryTransport, MockDlqStore, MockExecutionLogStore,
        MockIntegrationStore,
    };
    use crate::services::breaker::BreakerConfig;
    use domain::entities::CircuitState;
    use domain::value_objects::{EventType, OrgId};
    use serde_json::json;

    fn integration() -> Integration {
        Integration::new(
            OrgId::new(84),
            "emr-sync",
            EventType::new("PATIENT_REGISTERED"),
            "http://svc/a",
        )
        .with_retry_count(3)
    }

    struct Harness {
        integration_store: MockIntegrationStore,
        transport: MockDeliveryTransport,
        logs: MockExecutionLogStore,
        dlq: MockDlqStore,
    }

    impl Harness {
        fn new() -> Self {
            let mut logs = MockExecutionLogStore::new();
            logs.expect_upsert().returning(|_| Ok(()));
            logs.expect_append_attempt().returning(|_| Ok(()));
            let mut integration_store = MockIntegrationStore::new();
            integration_store
                .expect_update_breaker()
                .returning(|_, _, _| Ok(()));
            Self {
                integration_store,
                transport: MockDeliveryTransport::new(),
                logs,
                dlq: MockDlqStore::new(),
            }
        }

        fn build(self) -> DeliveryService {
            let breaker = Arc::new(CircuitBreakerService::new(
                Arc::new(self.integration_store),
                BreakerConfig::default(),
            ));
            DeliveryService::new(
                breaker,
                Arc::new(self.transport),
                Arc::new(self.logs),
                Arc::new(self.dlq),
            )
        }
    }

    #[tokio::test]
    async fn success_path() {
        let mut harness = Harness::new();
        harness.transport.expect_execute().returning(|_| {
            Ok(DeliveryResponse {
                status: 200,
                body: "ok".to_string(),
            })
        });

        let logs = harness
            .build()
            .deliver(
                &integration(),
                &json!({"k": "v"}),
                Some(StableEventId::from_raw("84-PATIENT_REGISTERED-1001")),
                TriggerType::Event,
            )
            .await;

        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ExecutionStatus::Success);
        assert_eq!(logs[0].attempt_count, 1);
        assert_eq!(logs[0].response_status, Some(200));
    }

    #[tokio::test]
    async fn client_failure_is_terminal_and_breaker_untouched() {
        let mut harness = Harness::new();
        harness.transport.expect_execute().returning(|_| {
            Ok(DeliveryResponse {
                status: 404,
                body: "missing".to_string(),
            })
        });
        // No update_breaker expectation beyond the permissive default;
        // the assertion is on the log classification.
        let logs = harness
            .build()
            .deliver(&integration(), &json!({}), None, TriggerType::Event)
            .await;

        assert_eq!(logs[0].status, ExecutionStatus::Failed);
        assert_eq!(
            logs[0].error.as_ref().map(|e| e.category),
            Some(ErrorCategory::Client)
        );
    }

    #[tokio::test]
    async fn server_error_becomes_retrying() {
        let mut harness = Harness::new();
        harness.transport.expect_execute().returning(|_| {
            Ok(DeliveryResponse {
                status: 503,
                body: String::new(),
            })
        });

        let logs = harness
            .build()
            .deliver(&integration(), &json!({}), None, TriggerType::Event)
            .await;

        assert_eq!(logs[0].status, ExecutionStatus::Retrying);
        assert_eq!(
            logs[0].error.as_ref().map(|e| e.category),
            Some(ErrorCategory::Infrastructure)
        );
    }

    #[tokio::test]
    async fn timeout_becomes_retrying() {
        let mut harness = Harness::new();
        harness
            .transport
            .expect_execute()
            .returning(|_| Err(TransportError::Timeout(std::time::Duration::from_secs(30))));

        let logs = harness
            .build()
            .deliver(&integration(), &json!({}), None, TriggerType::Event)
            .await;

        assert_eq!(logs[0].status, ExecutionStatus::Retrying);
    }

    #[tokio::test]
    async fn open_circuit_skips_without_calling_target() {
        // expect_execute is never set up: a transport call would panic.
        let harness = Harness::new();
        let mut integration = integration();
        integration.breaker.state = CircuitState::Open;
        integration.breaker.opened_at = Some(Utc::now());

        let logs = harness
            .build()
            .deliver(&integration, &json!({}), None, TriggerType::Event)
            .await;

        assert_eq!(logs[0].status, ExecutionStatus::Skipped);
        assert_eq!(
            logs[0].error.as_ref().map(|e| e.category),
            Some(ErrorCategory::CircuitOpen)
        );
    }

    #[tokio::test]
    async fn transformation_failure_never_reaches_transport() {
        let harness = Harness::new();
        let integration = integration().with_transform(domain::entities::TransformSpec::Template {
            mapping: vec![domain::entities::FieldMapping {
                source: "a".to_string(),
                target: "b".to_string(),
            }],
        });

        // Array payload cannot be template-mapped.
        let logs = harness
            .build()
            .deliver(&integration, &json!([1, 2, 3]), None, TriggerType::Event)
            .await;

        assert_eq!(logs[0].status, ExecutionStatus::Failed);
        assert_eq!(
            logs[0].error.as_ref().map(|e| e.category),
            Some(ErrorCategory::Transformation)
        );
    }

    #[tokio::test]
    async fn action_list_yields_one_log_per_action() {
        let mut harness = Harness::new();
        harness.transport.expect_execute().times(2).returning(|_| {
            Ok(DeliveryResponse {
                status: 200,
                body: String::new(),
            })
        });

        let integration =
            integration().with_transform(domain::entities::TransformSpec::ActionList {
                actions: vec![
                    domain::entities::DeliveryAction {
                        name: "first".to_string(),
                        target_url: None,
                        method: None,
                        mapping: None,
                    },
                    domain::entities::DeliveryAction {
                        name: "second".to_string(),
                        target_url: Some("http://svc/b".to_string()),
                        method: None,
                        mapping: None,
                    },
                ],
            });

        let logs = harness
            .build()
            .deliver(&integration, &json!({}), None, TriggerType::Event)
            .await;

        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|log| log.status == ExecutionStatus::Success));
        assert_ne!(logs[0].trace_id, logs[1].trace_id);
    }

    #[tokio::test]
    async fn exhausted_retries_abandon_and_dead_letter() {
        let mut harness = Harness::new();
        harness.transport.expect_execute().returning(|_| {
            Ok(DeliveryResponse {
                status: 503,
                body: String::new(),
            })
        });
        harness
            .dlq
            .expect_append()
            .withf(|entry| entry.error.category == ErrorCategory::Infrastructure)
            .times(1)
            .returning(|_| Ok(()));

        let integration = integration().with_retry_count(0);
        let logs = harness
            .build()
            .deliver(&integration, &json!({}), None, TriggerType::Event)
            .await;

        assert_eq!(logs[0].status, ExecutionStatus::Abandoned);
    }

    #[tokio::test]
    async fn retry_reuses_trace_and_increments_attempt() {
        let mut harness = Harness::new();
        harness.transport.expect_execute().returning(|_| {
            Ok(DeliveryResponse {
                status: 200,
                body: String::new(),
            })
        });

        let service = harness.build();
        let integration = integration();

        let mut log = ExecutionLog::new(
            integration.org_id,
            integration.id,
            None,
            TriggerType::Event,
        );
        log.begin_attempt(Utc::now());
        log.complete_retryable(
            DeliveryError::new(ErrorCategory::Infrastructure, "503").with_status(503),
            integration.retry_count,
            Utc::now(),
        );
        log.request = Some(RequestSnapshot {
            method: integration.method,
            url: integration.target_url.clone(),
            header_names: vec!["Content-Type".to_string()],
            body: Some("{}".to_string()),
        });
        let trace_id = log.trace_id;

        let retried = service.retry(&integration, log).await;
        assert_eq!(retried.trace_id, trace_id);
        assert_eq!(retried.attempt_count, 2);
        assert_eq!(retried.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn retry_without_snapshot_fails_validation() {
        let harness = Harness::new();
        let service = harness.build();
        let integration = integration();

        let mut log = ExecutionLog::new(
            integration.org_id,
            integration.id,
            None,
            TriggerType::Event,
        );
        log.status = ExecutionStatus::Retrying;
        log.attempt_count = 1;

        let retried = service.retry(&integration, log).await;
        assert_eq!(retried.status, ExecutionStatus::Failed);
        assert_eq!(
            retried.error.as_ref().map(|e| e.category),
            Some(ErrorCategory::Validation)
        );
    }

    #[test]
    fn classification_table() {
        assert_eq!(classify_status(200), OutcomeClass::Success);
        assert_eq!(classify_status(204), OutcomeClass::Success);
        assert_eq!(classify_status(301), OutcomeClass::ClientFailure);
        for status in [400, 401, 403, 404, 422] {
            assert_eq!(classify_status(status), OutcomeClass::ClientFailure);
        }
        assert_eq!(classify_status(429), OutcomeClass::Infrastructure);
        for status in [500, 502, 503, 504] {
            assert_eq!(classify_status(status), OutcomeClass::Infrastructure);
        }
    }
}
