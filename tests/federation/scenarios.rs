//! End-to-End Scenarios
//!
//! Whole requests against three-member cohorts seeded the way a real
//! deployment drifts: stale reference copies, classifications homed away
//! from the entity, members that fail or hang.

use crate::common::*;
use std::sync::Arc;
use std::time::Duration;

fn e1() -> Guid {
    Guid::from("e1")
}

// ============================================================================
// Copies and classifications
// ============================================================================

/// Test: home copy at R1 (v3, C1), stale copy at R2 (v2), C2 homed at R3.
/// The cohort answers with R1's content carrying both classifications.
#[test]
fn test_home_copy_with_classification_homed_elsewhere() {
    let r1 = member("r1");
    let r2 = member("r2");
    let r3 = member("r3");
    r1.save_entity(
        asset("e1", "r1")
            .with_version(3)
            .with_property("name", "pump-current")
            .with_classification(Classification::new("C1", "r1")),
    );
    r2.save_entity(
        asset("e1", "r1")
            .with_version(2)
            .with_property("name", "pump-stale"),
    );
    r3.save_home_classification(&e1(), Classification::new("C2", "r3"));

    for parallel in [true, false] {
        let federation = federation(
            FederationConfig {
                parallel_queries: parallel,
                ..test_config()
            },
            &[Arc::clone(&r1), Arc::clone(&r2), Arc::clone(&r3)],
        );
        let entity = federation.get_entity_detail(USER, &e1(), None).unwrap();
        assert_eq!(entity.version(), 3);
        assert_eq!(
            entity.properties.get("name").and_then(|v| v.as_text()),
            Some("pump-current")
        );
        assert_eq!(classification_names(&entity), vec!["C1", "C2"]);
    }
}

/// Test: a classification homed at B is attached even though B only holds
/// a proxy and never returns the full entity
#[test]
fn test_split_classification_recovery() {
    let a = member("a");
    let b = member("b");
    let entity = asset("e1", "a");
    a.save_entity(entity.clone());
    b.save_proxy(EntityProxy::from(&entity));
    b.save_home_classification(&e1(), Classification::new("Sensitive", "b"));

    let federation = federation(test_config(), &[a, Arc::clone(&b)]);
    let found = federation.get_entity_detail(USER, &e1(), None).unwrap();
    assert_eq!(found.home_metadata_collection_id(), "a");
    assert_eq!(classification_names(&found), vec!["Sensitive"]);
    assert!(b.call_count("get_home_classifications") >= 1);
}

/// Test: the same entity reported identically by two members is returned once
#[test]
fn test_identical_copies_merge_into_one() {
    let r1 = member("r1");
    let r2 = member("r2");
    let entity = asset("e1", "r1").with_property("name", "pump");
    r1.save_entity(entity.clone());
    r2.save_entity(entity.clone());

    let federation = federation(test_config(), &[r1, r2]);
    let page = federation
        .find_entities_by_property(USER, None, None, &[], &PagingParams::unbounded())
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page.items[0], entity);

    let fetched = federation.get_entity_detail(USER, &e1(), None).unwrap();
    assert_eq!(fetched, entity);
}

/// Test: a classification homed at the reporting member is not duplicated
/// when phase two asks the same member again
#[test]
fn test_classification_reported_twice_is_kept_once() {
    let r1 = member("r1");
    let r2 = member("r2");
    r1.save_entity(asset("e1", "r1").with_classification(Classification::new("Owned", "r1")));
    r2.save_entity(asset("e1", "r1").with_classification(Classification::new("Owned", "r1")));

    let federation = federation(test_config(), &[r1, r2]);
    let entity = federation.get_entity_detail(USER, &e1(), None).unwrap();
    assert_eq!(classification_names(&entity), vec!["Owned"]);
}

// ============================================================================
// Partial failure
// ============================================================================

/// Test: one member throwing and one hanging still leaves a usable answer
#[test]
fn test_partial_failure_tolerance() {
    let healthy = member("healthy");
    let broken = member("broken");
    let slow = member("slow");
    healthy.save_entity(asset("e1", "healthy"));
    broken.save_entity(asset("e2", "broken"));
    slow.save_entity(asset("e3", "slow"));
    broken.fail_operation(
        "find_entities_by_property",
        CohortError::repository_error("connection refused"),
    );
    slow.set_delay(Duration::from_millis(500));

    let federation = federation(
        FederationConfig {
            max_wait_ms: 100,
            ..test_config()
        },
        &[healthy, broken, slow],
    );
    let page = federation
        .find_entities_by_property(USER, None, None, &[], &PagingParams::unbounded())
        .unwrap();
    assert_eq!(guids(&page.items), vec!["e1"]);

    let metrics = federation.control().metrics();
    assert_eq!(metrics.member_timeouts, 1);
}

/// Test: a cohort of one broken member surfaces that member's error
#[test]
fn test_lone_failure_is_surfaced() {
    let broken = member("broken");
    broken.fail_operation(
        "get_entity_detail",
        CohortError::repository_error("connection refused"),
    );
    let federation = federation(test_config(), &[broken]);
    let err = federation.get_entity_detail(USER, &e1(), None).unwrap_err();
    assert_eq!(err, CohortError::repository_error("connection refused"));
}

// ============================================================================
// Configuration
// ============================================================================

/// Test: a federation built from a config file uses its settings
#[test]
fn test_federation_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(cohort::CONFIG_FILE_NAME);
    FederationConfig {
        local_metadata_collection_id: Some("r2".to_string()),
        ..test_config()
    }
    .write_to_file(&path)
    .unwrap();

    let federation = FederatedMetadataCollection::from_config_file(&path).unwrap();
    let r1 = member("r1");
    let r2 = member("r2");
    federation.register(Arc::clone(&r1) as Arc<dyn MetadataCollection>);
    federation.register(Arc::clone(&r2) as Arc<dyn MetadataCollection>);

    let created = federation.add_entity(USER, &new_asset("pump")).unwrap();
    assert_eq!(created.home_metadata_collection_id(), "r2");
    assert_eq!(r1.call_count("add_entity"), 0);
}
