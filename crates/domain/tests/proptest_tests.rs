//! Property-based tests for domain invariants
//!
//! These tests use proptest to verify invariants across many random inputs.

use chrono::Utc;
use domain::entities::checkpoint::SourceCheckpoint;
use domain::entities::event::SourceKind;
use domain::entities::integration::{BreakerState, CircuitState};
use domain::entities::scheduled_delivery::Recurrence;
use domain::value_objects::{EventType, OrgId, StableEventId};
use proptest::prelude::*;

// ============================================================================
// Stable event id
// ============================================================================

mod stable_event_id_tests {
    use super::*;

    proptest! {
        #[test]
        fn derivation_is_deterministic(
            org in any::<i64>(),
            event_type in "[A-Z_]{1,32}",
            source_id in "[0-9]{1,12}"
        ) {
            let a = StableEventId::from_parts(
                OrgId::new(org),
                &EventType::new(event_type.clone()),
                &source_id,
            );
            let b = StableEventId::from_parts(
                OrgId::new(org),
                &EventType::new(event_type),
                &source_id,
            );
            prop_assert_eq!(a, b);
        }

        #[test]
        fn format_embeds_all_coordinates(
            org in 1i64..1_000_000,
            event_type in "[A-Z_]{1,32}",
            source_id in "[0-9]{1,12}"
        ) {
            let id = StableEventId::from_parts(
                OrgId::new(org),
                &EventType::new(event_type.clone()),
                &source_id,
            );
            prop_assert_eq!(id.as_str(), format!("{org}-{event_type}-{source_id}"));
        }
    }
}

// ============================================================================
// Event-type selector
// ============================================================================

mod selector_tests {
    use super::*;

    proptest! {
        #[test]
        fn wildcard_selects_everything(name in "[A-Z_]{1,32}") {
            prop_assert!(EventType::wildcard().selects(&EventType::new(name)));
        }

        #[test]
        fn exact_selector_only_selects_itself(
            a in "[A-Z_]{1,16}",
            b in "[A-Z_]{1,16}"
        ) {
            let selector = EventType::new(a.clone());
            prop_assert_eq!(selector.selects(&EventType::new(b.clone())), a == b);
        }
    }
}

// ============================================================================
// Checkpoint gap law
// ============================================================================

mod checkpoint_tests {
    use super::*;

    proptest! {
        #[test]
        fn advance_never_regresses(ids in prop::collection::vec(1i64..100_000, 1..50)) {
            let mut cp = SourceCheckpoint::new(SourceKind::Relational, "notification_queue");
            let mut high = 0;
            for id in ids {
                cp.advance(id, Utc::now());
                high = high.max(id);
                prop_assert_eq!(cp.last_processed_id, high);
            }
        }

        #[test]
        fn jump_of_d_records_gap_of_d_minus_one(
            start in 1i64..10_000,
            jump in 2i64..1_000
        ) {
            let mut cp = SourceCheckpoint::new(SourceKind::Relational, "notification_queue");
            cp.advance(start, Utc::now());
            let gap = cp.advance(start + jump, Utc::now());
            let gap = gap.expect("jump > 1 must record a gap");
            prop_assert_eq!(gap.start, start + 1);
            prop_assert_eq!(gap.end, start + jump - 1);
            prop_assert_eq!(gap.end - gap.start + 1, jump - 1);
        }

        #[test]
        fn consecutive_advances_record_no_gaps(start in 1i64..10_000, len in 1i64..100) {
            let mut cp = SourceCheckpoint::new(SourceKind::Relational, "notification_queue");
            for id in start..start + len {
                cp.advance(id, Utc::now());
            }
            prop_assert!(cp.gaps.is_empty());
        }
    }
}

// ============================================================================
// Breaker counter law
// ============================================================================

mod breaker_tests {
    use super::*;

    proptest! {
        #[test]
        fn circuit_open_iff_threshold_reached(
            threshold in 1u32..50,
            failures in 0u32..100
        ) {
            let mut breaker = BreakerState::default();
            let now = Utc::now();
            for _ in 0..failures {
                breaker.note_infrastructure_failure(threshold, now);
            }
            if failures >= threshold {
                prop_assert_eq!(breaker.state, CircuitState::Open);
                prop_assert!(breaker.opened_at.is_some());
            } else {
                prop_assert_eq!(breaker.state, CircuitState::Closed);
            }
            prop_assert!(breaker.is_consistent());
        }

        #[test]
        fn success_always_resets(failures in 0u32..100) {
            let mut breaker = BreakerState::default();
            let now = Utc::now();
            for _ in 0..failures {
                breaker.note_infrastructure_failure(10, now);
            }
            breaker.note_success(now);
            prop_assert_eq!(breaker.state, CircuitState::Closed);
            prop_assert_eq!(breaker.consecutive_failures, 0);
        }
    }
}

// ============================================================================
// Recurrence expansion
// ============================================================================

mod recurrence_tests {
    use super::*;

    proptest! {
        #[test]
        fn expansion_yields_exactly_count_occurrences(
            interval in 1i64..86_400,
            count in 1u32..20
        ) {
            let mut current = Some(Recurrence {
                interval_secs: interval,
                count,
                occurrence: 1,
            });
            let mut seen = 0u32;
            while let Some(recurrence) = current {
                seen += 1;
                prop_assert_eq!(recurrence.occurrence, seen);
                current = recurrence.next();
            }
            prop_assert_eq!(seen, count);
        }
    }
}
