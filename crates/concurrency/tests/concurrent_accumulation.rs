//! Concurrent tests for cohort-concurrency
//!
//! These tests drive accumulators from many threads at once to check that:
//!
//! 1. **Single winner** - exactly one concurrent maintenance success wins
//! 2. **Order independence** - merged answers do not depend on arrival order
//! 3. **Sealing** - outcomes arriving after materialization are dropped
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test concurrent_accumulation
//! ```

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use cohort_concurrency::{
    AccumulatorState, EntityDetailAccumulator, InstancesAccumulator, MaintenanceAccumulator,
    PrecedenceTable, WaitOutcome,
};
use cohort_core::{
    Classification, CohortError, EntityDetail, ErrorKind, Guid, Instance, InstanceType,
    PagingParams, SequencingOrder, TypeDefCategory,
};
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn entity(guid: &str, home: &str, version: u64) -> EntityDetail {
    EntityDetail::new(
        guid,
        InstanceType::new("t", "Asset", TypeDefCategory::Entity),
        home,
    )
    .with_version(version)
}

fn members(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("r{:02}", i)).collect()
}

// ============================================================================
// SECTION 1: Single Winner
// ============================================================================

mod single_winner {
    use super::*;

    #[test]
    fn test_exactly_one_concurrent_success_wins() {
        let acc = Arc::new(MaintenanceAccumulator::new("add_entity"));
        let ids = members(16);
        for m in &ids {
            acc.base().tracker().dispatched(m);
        }
        let barrier = Arc::new(Barrier::new(ids.len()));
        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|m| {
                let acc = Arc::clone(&acc);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let won = acc.record_result(&m, m.clone());
                    acc.base().tracker().completed(&m);
                    won
                })
            })
            .collect();
        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
        let winner = acc.winner().unwrap();
        assert_eq!(acc.result().unwrap(), Some(winner));
        assert_eq!(acc.base().state(), AccumulatorState::Satisfied);
    }

    #[test]
    fn test_waiter_wakes_on_first_success() {
        let acc = Arc::new(MaintenanceAccumulator::<u32>::new("update_entity_status"));
        acc.base().tracker().dispatched("fast");
        acc.base().tracker().dispatched("never");
        let worker = {
            let acc = Arc::clone(&acc);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                acc.record_result("fast", 1);
                acc.base().tracker().completed("fast");
            })
        };
        let outcome = acc.base().tracker().wait(Duration::from_secs(5));
        worker.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Satisfied);
        assert_eq!(acc.result().unwrap(), Some(1));
    }
}

// ============================================================================
// SECTION 2: Order Independence
// ============================================================================

mod order_independence {
    use super::*;

    fn offers() -> Vec<(String, EntityDetail)> {
        vec![
            ("r1".into(), entity("a", "r1", 1)),
            ("r2".into(), entity("a", "r1", 3)),
            ("r3".into(), entity("a", "r1", 3)),
            ("r2".into(), entity("b", "r2", 1)),
            ("r3".into(), entity("c", "r3", 2)),
            ("r1".into(), entity("c", "r3", 2)),
            ("r3".into(), entity("d", "r3", 1)),
        ]
    }

    fn merged(order: &[usize]) -> (Vec<(String, u64)>, Vec<String>) {
        let paging = PagingParams::page(0, 3).ordered_by(SequencingOrder::Guid);
        let acc = InstancesAccumulator::new("find_entities_by_property", paging);
        let all = offers();
        for &i in order {
            let (member, e) = all[i].clone();
            acc.record_instances(&member, vec![e]);
        }
        let page = acc.results().unwrap();
        let items = page
            .items
            .iter()
            .map(|e| (e.guid().to_string(), e.version()))
            .collect();
        let reporters = ["a", "b", "c"]
            .iter()
            .map(|g| acc.reporter_of(&Guid::from(*g)).unwrap_or_default())
            .collect();
        (items, reporters)
    }

    proptest! {
        #[test]
        fn prop_merge_ignores_arrival_order(order in Just((0..7).collect::<Vec<usize>>()).prop_shuffle()) {
            let expected = merged(&(0..7).collect::<Vec<_>>());
            prop_assert_eq!(merged(&order), expected);
        }

        #[test]
        fn prop_best_error_ignores_capture_order(
            order in Just((0..5).collect::<Vec<usize>>()).prop_shuffle()
        ) {
            let errors = [
                ("r1", CohortError::repository_error("down")),
                ("r2", CohortError::UserNotAuthorized { user: "u".into() }),
                ("r3", CohortError::entity_not_known("e")),
                ("r4", CohortError::entity_not_known("e")),
                ("r5", CohortError::unclassified("boom")),
            ];
            let acc = EntityDetailAccumulator::new("get_entity_detail", Guid::from("e"));
            for i in order {
                let (member, error) = &errors[i];
                acc.base().capture_error(member, error.clone());
            }
            let best = acc.result().unwrap_err();
            prop_assert_eq!(best, CohortError::entity_not_known("e"));
            prop_assert_eq!(
                acc.base().precedence().rank(ErrorKind::EntityNotKnown),
                PrecedenceTable::RETRIEVAL.rank(ErrorKind::EntityNotKnown)
            );
        }
    }

    #[test]
    fn test_concurrent_classification_merge() {
        let acc = Arc::new(EntityDetailAccumulator::new("get_entity_detail", Guid::from("e")));
        let barrier = Arc::new(Barrier::new(3));
        let handles: Vec<_> = vec![
            ("r1", Some(entity("e", "r1", 2)), Vec::new()),
            (
                "r2",
                Some(entity("e", "r1", 1).with_classification(Classification::new("Retention", "r2"))),
                Vec::new(),
            ),
            ("r3", None, vec![Classification::new("Criticality", "r3")]),
        ]
        .into_iter()
        .map(|(member, copy, home)| {
            let acc = Arc::clone(&acc);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                match copy {
                    Some(e) => {
                        acc.record_entity(member, e);
                    }
                    None => acc.record_home_classifications(member, home),
                }
            })
        })
        .collect();
        for h in handles {
            h.join().unwrap();
        }
        let merged = acc.result().unwrap().unwrap();
        assert_eq!(merged.version(), 2);
        let names: Vec<_> = merged.classifications.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Criticality", "Retention"]);
    }
}

// ============================================================================
// SECTION 3: Sealing
// ============================================================================

mod sealing {
    use super::*;

    #[test]
    fn test_late_results_are_dropped_after_seal() {
        let acc = InstancesAccumulator::new("find_entities_by_property", PagingParams::unbounded());
        acc.base().tracker().dispatched("on-time");
        acc.base().tracker().dispatched("late");
        acc.record_instances("on-time", vec![entity("a", "on-time", 1)]);
        acc.base().tracker().completed("on-time");
        match acc.base().tracker().wait(Duration::from_millis(10)) {
            WaitOutcome::TimedOut { outstanding } => assert_eq!(outstanding, vec!["late"]),
            other => panic!("expected timeout, got {:?}", other),
        }
        acc.base().tracker().seal();
        acc.record_instances("late", vec![entity("z", "late", 1)]);
        let page = acc.results().unwrap();
        assert_eq!(page.len(), 1);
    }
}
