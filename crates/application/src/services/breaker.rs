//! Per-integration circuit breaker
//!
//! Guards every outbound delivery against a target that keeps failing with
//! infrastructure errors. The state machine lives on the integration record
//! (so it survives restarts and is shared across workers); transitions are
//! persisted through the store's narrow breaker update. The half-open probe
//! gate is process-local: at most one in-flight probe per integration.
//!
//! # States
//!
//! - **Closed**: deliveries pass through
//! - **Open**: deliveries are skipped until the recovery window elapses
//! - **Half-open**: exactly one probing delivery is permitted

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use domain::entities::{CircuitState, Integration};
use domain::value_objects::IntegrationId;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::ApplicationError;
use crate::ports::IntegrationStore;

/// Configuration for the circuit breaker
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive infrastructure failures before opening
    pub failure_threshold: u32,
    /// Seconds to wait before probing an open circuit
    pub recovery_secs: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            recovery_secs: 300,
        }
    }
}

impl BreakerConfig {
    /// Recovery window as a chrono duration
    #[must_use]
    pub const fn recovery(&self) -> Duration {
        Duration::seconds(self.recovery_secs)
    }
}

/// The breaker's answer to a delivery request
#[derive(Debug, Clone)]
pub struct BreakerDecision {
    /// Whether the delivery may proceed
    pub allowed: bool,
    /// Circuit state after the check
    pub state: CircuitState,
    /// Why the delivery was refused, when refused
    pub reason: Option<String>,
    /// Whether this delivery is the half-open probe
    pub is_probe: bool,
}

/// Circuit breaker service over persisted per-integration state
pub struct CircuitBreakerService {
    store: Arc<dyn IntegrationStore>,
    config: BreakerConfig,
    // Integrations with an in-flight half-open probe.
    probes: Mutex<HashSet<IntegrationId>>,
}

impl std::fmt::Debug for CircuitBreakerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerService {
    /// Create a breaker service with the given thresholds
    #[must_use]
    pub fn new(store: Arc<dyn IntegrationStore>, config: BreakerConfig) -> Self {
        Self {
            store,
            config,
            probes: Mutex::new(HashSet::new()),
        }
    }

    /// Decide whether a delivery to this integration may proceed
    ///
    /// An open circuit past its recovery window transitions to half-open
    /// (persisted) and admits exactly one probe.
    pub async fn check(
        &self,
        integration: &Integration,
    ) -> Result<BreakerDecision, ApplicationError> {
        let now = Utc::now();
        let mut breaker = integration.breaker.clone();

        match breaker.state {
            CircuitState::Closed => Ok(BreakerDecision {
                allowed: true,
                state: CircuitState::Closed,
                reason: None,
                is_probe: false,
            }),
            CircuitState::Open => {
                if breaker.try_half_open(self.config.recovery(), now) {
                    info!(
                        integration = %integration.id,
                        "Circuit transitioning from Open to HalfOpen"
                    );
                    self.store
                        .update_breaker(integration.org_id, integration.id, &breaker)
                        .await?;
                    Ok(self.admit_probe(integration.id))
                } else {
                    debug!(integration = %integration.id, "Circuit open, delivery refused");
                    Ok(BreakerDecision {
                        allowed: false,
                        state: CircuitState::Open,
                        reason: Some(format!(
                            "circuit open since {}",
                            breaker
                                .opened_at
                                .map_or_else(|| "unknown".to_string(), |at| at.to_rfc3339())
                        )),
                        is_probe: false,
                    })
                }
            },
            CircuitState::HalfOpen => Ok(self.admit_probe(integration.id)),
        }
    }

    /// Record a successful delivery: counter reset, circuit closed
    pub async fn on_success(&self, integration: &Integration) -> Result<(), ApplicationError> {
        let mut breaker = integration.breaker.clone();
        let was = breaker.state;
        breaker.note_success(Utc::now());
        if was != CircuitState::Closed {
            info!(
                integration = %integration.id,
                from = %was,
                "Circuit closed after successful delivery"
            );
        }
        self.clear_probe(integration.id);
        self.store
            .update_breaker(integration.org_id, integration.id, &breaker)
            .await
    }

    /// Record an infrastructure failure
    ///
    /// Business-logic and client failures must not be reported here.
    pub async fn on_infrastructure_failure(
        &self,
        integration: &Integration,
    ) -> Result<CircuitState, ApplicationError> {
        let mut breaker = integration.breaker.clone();
        let was = breaker.state;
        let state = breaker.note_infrastructure_failure(self.config.failure_threshold, Utc::now());
        if state == CircuitState::Open && was != CircuitState::Open {
            warn!(
                integration = %integration.id,
                failures = breaker.consecutive_failures,
                "Circuit opened"
            );
        }
        self.clear_probe(integration.id);
        self.store
            .update_breaker(integration.org_id, integration.id, &breaker)
            .await?;
        Ok(state)
    }

    /// Admit at most one half-open probe per integration
    fn admit_probe(&self, id: IntegrationId) -> BreakerDecision {
        let mut probes = self.probes.lock();
        if probes.insert(id) {
            BreakerDecision {
                allowed: true,
                state: CircuitState::HalfOpen,
                reason: None,
                is_probe: true,
            }
        } else {
            BreakerDecision {
                allowed: false,
                state: CircuitState::HalfOpen,
                reason: Some("half-open probe already in flight".to_string()),
                is_probe: false,
            }
        }
    }

    fn clear_probe(&self, id: IntegrationId) {
        self.probes.lock().remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MockIntegrationStore;
    use domain::value_objects::{EventType, OrgId};

    fn integration() -> Integration {
        Integration::new(
            OrgId::new(84),
            "emr-sync",
            EventType::new("PATIENT_REGISTERED"),
            "http://svc/a",
        )
    }

    fn service(store: MockIntegrationStore) -> CircuitBreakerService {
        CircuitBreakerService::new(Arc::new(store), BreakerConfig::default())
    }

    #[tokio::test]
    async fn closed_circuit_allows() {
        let service = service(MockIntegrationStore::new());
        let decision = service.check(&integration()).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.state, CircuitState::Closed);
        assert!(!decision.is_probe);
    }

    #[tokio::test]
    async fn open_circuit_refuses_inside_recovery_window() {
        let mut integration = integration();
        integration.breaker.state = CircuitState::Open;
        integration.breaker.opened_at = Some(Utc::now());

        let service = service(MockIntegrationStore::new());
        let decision = service.check(&integration).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.state, CircuitState::Open);
        assert!(decision.reason.is_some());
    }

    #[tokio::test]
    async fn open_circuit_probes_after_recovery() {
        let mut integration = integration();
        integration.breaker.state = CircuitState::Open;
        integration.breaker.opened_at = Some(Utc::now() - Duration::minutes(6));

        let mut store = MockIntegrationStore::new();
        store
            .expect_update_breaker()
            .withf(|_, _, breaker| breaker.state == CircuitState::HalfOpen)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service(store);
        let decision = service.check(&integration).await.unwrap();
        assert!(decision.allowed);
        assert!(decision.is_probe);
        assert_eq!(decision.state, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_admits_only_one_probe() {
        let mut integration = integration();
        integration.breaker.state = CircuitState::HalfOpen;

        let service = service(MockIntegrationStore::new());
        let first = service.check(&integration).await.unwrap();
        assert!(first.allowed);
        assert!(first.is_probe);

        let second = service.check(&integration).await.unwrap();
        assert!(!second.allowed);
        assert_eq!(second.state, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn success_resets_and_persists() {
        let mut integration = integration();
        integration.breaker.state = CircuitState::HalfOpen;
        integration.breaker.consecutive_failures = 10;

        let mut store = MockIntegrationStore::new();
        store
            .expect_update_breaker()
            .withf(|_, _, breaker| {
                breaker.state == CircuitState::Closed && breaker.consecutive_failures == 0
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service(store);
        service.on_success(&integration).await.unwrap();
    }

    #[tokio::test]
    async fn failure_below_threshold_stays_closed() {
        let mut store = MockIntegrationStore::new();
        store
            .expect_update_breaker()
            .withf(|_, _, breaker| {
                breaker.state == CircuitState::Closed && breaker.consecutive_failures == 1
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service(store);
        let state = service
            .on_infrastructure_failure(&integration())
            .await
            .unwrap();
        assert_eq!(state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn failure_at_threshold_opens() {
        let mut integration = integration();
        integration.breaker.consecutive_failures = 9;

        let mut store = MockIntegrationStore::new();
        store
            .expect_update_breaker()
            .withf(|_, _, breaker| {
                breaker.state == CircuitState::Open && breaker.opened_at.is_some()
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service(store);
        let state = service
            .on_infrastructure_failure(&integration)
            .await
            .unwrap();
        assert_eq!(state, CircuitState::Open);
    }

    #[tokio::test]
    async fn probe_failure_reopens_and_frees_gate() {
        let mut integration = integration();
        integration.breaker.state = CircuitState::HalfOpen;

        let mut store = MockIntegrationStore::new();
        store
            .expect_update_breaker()
            .returning(|_, _, _| Ok(()));

        let service = service(store);
        // Take the probe slot, then fail the probe.
        let probe = service.check(&integration).await.unwrap();
        assert!(probe.is_probe);
        let state = service
            .on_infrastructure_failure(&integration)
            .await
            .unwrap();
        assert_eq!(state, CircuitState::Open);

        // The probe gate must be free again for the next half-open cycle.
        integration.breaker.state = CircuitState::HalfOpen;
        let next = service.check(&integration).await.unwrap();
        assert!(next.allowed);
    }
}
