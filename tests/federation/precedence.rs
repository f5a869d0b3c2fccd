//! Single-Winner and Error Precedence Tests
//!
//! The outcome a caller sees must not depend on which member answered
//! first. These tests register the same members in every order and check
//! that writes and failures come out identical.

use crate::common::*;
use proptest::prelude::*;
use std::sync::Arc;

/// Members that each fail a query in their own way
fn failing_members() -> Vec<Arc<InMemoryCollection>> {
    let failures = [
        ("m0", CohortError::UserNotAuthorized { user: USER.to_string() }),
        ("m1", CohortError::repository_error("link down")),
        ("m2", CohortError::unclassified("connector bug")),
        ("m3", CohortError::repository_error("disk offline")),
        ("m4", CohortError::function_not_supported("find_entities_by_property")),
    ];
    failures
        .into_iter()
        .map(|(id, error)| {
            let repo = member(id);
            repo.fail_operation("find_entities_by_property", error);
            repo
        })
        .collect()
}

/// Members where only `m2` can create an `Asset`
fn one_willing_member() -> Vec<Arc<InMemoryCollection>> {
    let m0 = Arc::new(InMemoryCollection::new("m0"));
    let m1 = member("m1");
    m1.fail_operation("add_entity", CohortError::repository_error("read only"));
    let m2 = member("m2");
    let m3 = member("m3");
    m3.fail_operation(
        "add_entity",
        CohortError::UserNotAuthorized {
            user: USER.to_string(),
        },
    );
    vec![m0, m1, m2, m3]
}

fn in_order(members: &[Arc<InMemoryCollection>], order: &[usize]) -> Vec<Arc<InMemoryCollection>> {
    order.iter().map(|&i| Arc::clone(&members[i])).collect()
}

// ============================================================================
// No positive result
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Test: with zero successes the surfaced error is the same for every
    /// registration order
    #[test]
    fn prop_query_failure_ignores_member_order(
        order in Just((0..5).collect::<Vec<usize>>()).prop_shuffle(),
        parallel in any::<bool>(),
    ) {
        let members = failing_members();
        let federation = federation(
            FederationConfig { parallel_queries: parallel, ..test_config() },
            &in_order(&members, &order),
        );
        let err = federation
            .find_entities_by_property(USER, None, None, &[], &PagingParams::unbounded())
            .unwrap_err();
        // RepositoryError outranks the rest; the tie goes to the smaller member id
        prop_assert_eq!(err, CohortError::repository_error("link down"));
    }

    /// Test: exactly one member accepts the create, whatever the order
    #[test]
    fn prop_single_winner_ignores_member_order(
        order in Just((0..4).collect::<Vec<usize>>()).prop_shuffle(),
    ) {
        let members = one_willing_member();
        let federation = federation(test_config(), &in_order(&members, &order));
        let created = federation.add_entity(USER, &new_asset("pump")).unwrap();
        prop_assert_eq!(created.home_metadata_collection_id(), "m2");
        prop_assert_eq!(members[2].call_count("add_entity"), 1);
        for m in &members {
            prop_assert!(m.call_count("add_entity") <= 1);
        }
    }
}

// ============================================================================
// Fixed cases
// ============================================================================

/// Test: an unclassified failure keeps the member and operation it came from
#[test]
fn test_unclassified_failure_names_its_origin() {
    let repo = member("m9");
    repo.fail_operation("get_all_types", CohortError::unclassified("socket reset"));
    let federation = federation(test_config(), &[repo]);
    match federation.get_all_types(USER).unwrap_err() {
        CohortError::Unclassified {
            repository,
            operation,
            reason,
        } => {
            assert_eq!(repository, "m9");
            assert_eq!(operation, "get_all_types");
            assert_eq!(reason, "socket reset");
        }
        other => panic!("expected unclassified error, got {:?}", other),
    }
}

/// Test: when every member refuses a write, the most specific refusal wins
#[test]
fn test_write_failure_precedence() {
    let refusing = member("m0");
    refusing.fail_operation(
        "add_entity",
        CohortError::PropertyError {
            reason: "name is mandatory".to_string(),
        },
    );
    let unknown_type = Arc::new(InMemoryCollection::new("m1"));
    let federation = federation(test_config(), &[refusing, unknown_type]);
    let err = federation.add_entity(USER, &new_asset("pump")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeDefNotKnown);
}
