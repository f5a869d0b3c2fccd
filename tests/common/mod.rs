//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::{Arc, Once};

pub use cohort::testing::InMemoryCollection;
pub use cohort::{
    Classification, CohortError, EntityDetail, EntityProxy, ErrorKind, FederatedMetadataCollection,
    FederationConfig, Guid, Instance, InstanceProperties, InstanceStatus, InstanceType,
    MetadataCollection, NewEntity, PagingParams, SequencingOrder, TypeDef, TypeDefCategory,
};

pub const USER: &str = "integration";

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route engine logs to the test harness output.
///
/// Shown for failing tests, or for all tests with `--nocapture`.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

// ============================================================================
// Cohort builders
// ============================================================================

/// Config with a generous wait budget and a small pool
pub fn test_config() -> FederationConfig {
    FederationConfig {
        max_wait_ms: 5_000,
        worker_threads: 4,
        ..FederationConfig::default()
    }
}

/// An in-memory member that already knows the `Asset` type
pub fn member(id: &str) -> Arc<InMemoryCollection> {
    let repo = InMemoryCollection::new(id);
    repo.save_type_def(TypeDef::new("t-asset", "Asset", TypeDefCategory::Entity));
    Arc::new(repo)
}

/// A federation over `members`, registered in the given order
pub fn federation(config: FederationConfig, members: &[Arc<InMemoryCollection>]) -> FederatedMetadataCollection {
    init_tracing();
    let federation =
        FederatedMetadataCollection::new(config).expect("test config is valid");
    for m in members {
        federation.register(Arc::clone(m) as Arc<dyn MetadataCollection>);
    }
    federation
}

// ============================================================================
// Instances
// ============================================================================

/// An `Asset` entity homed at `home`
pub fn asset(guid: &str, home: &str) -> EntityDetail {
    EntityDetail::new(
        guid,
        InstanceType::new("t-asset", "Asset", TypeDefCategory::Entity),
        home,
    )
}

/// Request to create an `Asset`
pub fn new_asset(name: &str) -> NewEntity {
    let mut properties = InstanceProperties::new();
    properties.insert("name".to_string(), name.into());
    NewEntity {
        type_def_guid: Guid::from("t-asset"),
        properties,
        classifications: Vec::new(),
        status: InstanceStatus::Active,
    }
}

/// GUIDs of a result page, in order
pub fn guids<I: Instance>(items: &[I]) -> Vec<String> {
    items.iter().map(|i| i.guid().to_string()).collect()
}

/// Classification names of an entity, in order
pub fn classification_names(entity: &EntityDetail) -> Vec<String> {
    entity
        .classifications
        .iter()
        .map(|c| c.name.clone())
        .collect()
}
