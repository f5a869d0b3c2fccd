//! Single-winner maintenance executors
//!
//! | Executor | Member calls |
//! |----------|--------------|
//! | [`AddEntityExecutor`] | `add_entity` |
//! | [`AddRelationshipExecutor`] | `is_entity_known`, `add_entity_proxy`, `add_relationship` |
//! | [`EntityMaintenanceExecutor`] | status, properties, delete, restore, classify, declassify |
//! | [`RelationshipMaintenanceExecutor`] | delete, restore |
//! | [`PurgeExecutor`] | `purge_entity`, `purge_relationship` |
//! | [`VerifyTypeExecutor`] | `verify_type_def`, `verify_attribute_type_def` |
//!
//! A success returns `true`, which stops the scatter.

use std::sync::Arc;

use cohort_concurrency::{AccumulatorBase, MaintenanceAccumulator, VerificationAccumulator};
use cohort_core::{
    AttributeTypeDef, CohortError, EntityDetail, EntityProxy, Guid, InstanceProperties,
    InstanceStatus, MetadataCollection, NewEntity, NewRelationship, Relationship, TypeDef,
};
use tracing::{debug, warn};

use crate::executor::{captured, RepositoryExecutor};

// =============================================================================
// Creation
// =============================================================================

/// Create an entity in the first member that accepts it
#[derive(Debug, Clone)]
pub struct AddEntityExecutor {
    user_id: String,
    entity: NewEntity,
    preferred: Option<String>,
    accumulator: Arc<MaintenanceAccumulator<EntityDetail>>,
}

impl AddEntityExecutor {
    /// Create the executor
    pub fn new(
        user_id: impl Into<String>,
        entity: NewEntity,
        preferred: Option<String>,
        accumulator: Arc<MaintenanceAccumulator<EntityDetail>>,
    ) -> Self {
        AddEntityExecutor {
            user_id: user_id.into(),
            entity,
            preferred,
            accumulator,
        }
    }
}

impl RepositoryExecutor for AddEntityExecutor {
    fn operation(&self) -> &'static str {
        "add_entity"
    }

    fn preferred_repository(&self) -> Option<&str> {
        self.preferred.as_deref()
    }

    fn base(&self) -> &AccumulatorBase {
        self.accumulator.base()
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        let result = collection.add_entity(&self.user_id, &self.entity);
        match captured(self.base(), member, result) {
            Some(entity) => self.accumulator.record_result(member, entity),
            None => false,
        }
    }
}

/// Create a relationship, first making sure the member can see both ends
///
/// The driver supplies proxies for both ends. Before the relationship is
/// created each end is checked with `is_entity_known`; an unknown end is
/// added as a proxy. A proxy that cannot be added is logged and the
/// relationship request proceeds anyway.
#[derive(Debug, Clone)]
pub struct AddRelationshipExecutor {
    user_id: String,
    relationship: NewRelationship,
    entity_one_proxy: EntityProxy,
    entity_two_proxy: EntityProxy,
    preferred: Option<String>,
    accumulator: Arc<MaintenanceAccumulator<Relationship>>,
}

impl AddRelationshipExecutor {
    /// Create the executor
    pub fn new(
        user_id: impl Into<String>,
        relationship: NewRelationship,
        entity_one_proxy: EntityProxy,
        entity_two_proxy: EntityProxy,
        preferred: Option<String>,
        accumulator: Arc<MaintenanceAccumulator<Relationship>>,
    ) -> Self {
        AddRelationshipExecutor {
            user_id: user_id.into(),
            relationship,
            entity_one_proxy,
            entity_two_proxy,
            preferred,
            accumulator,
        }
    }

    fn ensure_end(&self, member: &str, collection: &dyn MetadataCollection, proxy: &EntityProxy) {
        let missing = match collection.is_entity_known(&self.user_id, proxy.guid()) {
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(CohortError::EntityNotKnown { .. }) => true,
            Err(CohortError::EntityProxyOnly { .. }) => false,
            Err(error) => {
                debug!(member, guid = %proxy.guid(), "could not check relationship end: {}", error);
                false
            }
        };
        if !missing {
            return;
        }
        match collection.add_entity_proxy(&self.user_id, proxy) {
            Ok(()) => debug!(member, guid = %proxy.guid(), "added entity proxy"),
            Err(error) => warn!(
                member,
                guid = %proxy.guid(),
                "could not add entity proxy for relationship end: {}",
                error
            ),
        }
    }
}

impl RepositoryExecutor for AddRelationshipExecutor {
    fn operation(&self) -> &'static str {
        "add_relationship"
    }

    fn preferred_repository(&self) -> Option<&str> {
        self.preferred.as_deref()
    }

    fn base(&self) -> &AccumulatorBase {
        self.accumulator.base()
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        self.ensure_end(member, collection, &self.entity_one_proxy);
        self.ensure_end(member, collection, &self.entity_two_proxy);
        let result = collection.add_relationship(&self.user_id, &self.relationship);
        match captured(self.base(), member, result) {
            Some(relationship) => self.accumulator.record_result(member, relationship),
            None => false,
        }
    }
}

// =============================================================================
// Changes to existing instances
// =============================================================================

/// A change to an existing entity
#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange {
    /// Set the status
    UpdateStatus(InstanceStatus),
    /// Replace the properties
    UpdateProperties(InstanceProperties),
    /// Soft-delete
    Delete,
    /// Undo a soft delete
    Restore,
    /// Add or update a classification
    Classify {
        /// Classification name
        name: String,
        /// Classification properties
        properties: InstanceProperties,
    },
    /// Remove a classification
    Declassify {
        /// Classification name
        name: String,
    },
}

impl EntityChange {
    /// Member operation this change maps to
    pub fn operation(&self) -> &'static str {
        match self {
            EntityChange::UpdateStatus(_) => "update_entity_status",
            EntityChange::UpdateProperties(_) => "update_entity_properties",
            EntityChange::Delete => "delete_entity",
            EntityChange::Restore => "restore_entity",
            EntityChange::Classify { .. } => "classify_entity",
            EntityChange::Declassify { .. } => "declassify_entity",
        }
    }
}

/// Apply an [`EntityChange`] in the first member that accepts it
#[derive(Debug, Clone)]
pub struct EntityMaintenanceExecutor {
    user_id: String,
    guid: Guid,
    change: EntityChange,
    preferred: Option<String>,
    accumulator: Arc<MaintenanceAccumulator<EntityDetail>>,
}

impl EntityMaintenanceExecutor {
    /// Create the executor
    pub fn new(
        user_id: impl Into<String>,
        guid: Guid,
        change: EntityChange,
        preferred: Option<String>,
        accumulator: Arc<MaintenanceAccumulator<EntityDetail>>,
    ) -> Self {
        EntityMaintenanceExecutor {
            user_id: user_id.into(),
            guid,
            change,
            preferred,
            accumulator,
        }
    }
}

impl RepositoryExecutor for EntityMaintenanceExecutor {
    fn operation(&self) -> &'static str {
        self.change.operation()
    }

    fn preferred_repository(&self) -> Option<&str> {
        self.preferred.as_deref()
    }

    fn base(&self) -> &AccumulatorBase {
        self.accumulator.base()
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        let user = self.user_id.as_str();
        let result = match &self.change {
            EntityChange::UpdateStatus(status) => {
                collection.update_entity_status(user, &self.guid, *status)
            }
            EntityChange::UpdateProperties(properties) => {
                collection.update_entity_properties(user, &self.guid, properties)
            }
            EntityChange::Delete => collection.delete_entity(user, &self.guid),
            EntityChange::Restore => collection.restore_entity(user, &self.guid),
            EntityChange::Classify { name, properties } => {
                collection.classify_entity(user, &self.guid, name, properties)
            }
            EntityChange::Declassify { name } => {
                collection.declassify_entity(user, &self.guid, name)
            }
        };
        match captured(self.base(), member, result) {
            Some(entity) => self.accumulator.record_result(member, entity),
            None => false,
        }
    }
}

/// A change to an existing relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipChange {
    /// Soft-delete
    Delete,
    /// Undo a soft delete
    Restore,
}

/// Apply a [`RelationshipChange`] in the first member that accepts it
#[derive(Debug, Clone)]
pub struct RelationshipMaintenanceExecutor {
    user_id: String,
    guid: Guid,
    change: RelationshipChange,
    preferred: Option<String>,
    accumulator: Arc<MaintenanceAccumulator<Relationship>>,
}

impl RelationshipMaintenanceExecutor {
    /// Create the executor
    pub fn new(
        user_id: impl Into<String>,
        guid: Guid,
        change: RelationshipChange,
        preferred: Option<String>,
        accumulator: Arc<MaintenanceAccumulator<Relationship>>,
    ) -> Self {
        RelationshipMaintenanceExecutor {
            user_id: user_id.into(),
            guid,
            change,
            preferred,
            accumulator,
        }
    }
}

impl RepositoryExecutor for RelationshipMaintenanceExecutor {
    fn operation(&self) -> &'static str {
        match self.change {
            RelationshipChange::Delete => "delete_relationship",
            RelationshipChange::Restore => "restore_relationship",
        }
    }

    fn preferred_repository(&self) -> Option<&str> {
        self.preferred.as_deref()
    }

    fn base(&self) -> &AccumulatorBase {
        self.accumulator.base()
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        let result = match self.change {
            RelationshipChange::Delete => collection.delete_relationship(&self.user_id, &self.guid),
            RelationshipChange::Restore => collection.restore_relationship(&self.user_id, &self.guid),
        };
        match captured(self.base(), member, result) {
            Some(relationship) => self.accumulator.record_result(member, relationship),
            None => false,
        }
    }
}

/// What to purge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeTarget {
    /// A soft-deleted entity
    Entity(Guid),
    /// A soft-deleted relationship
    Relationship(Guid),
}

/// Permanently remove a soft-deleted instance
#[derive(Debug, Clone)]
pub struct PurgeExecutor {
    user_id: String,
    target: PurgeTarget,
    preferred: Option<String>,
    accumulator: Arc<MaintenanceAccumulator<()>>,
}

impl PurgeExecutor {
    /// Create the executor
    pub fn new(
        user_id: impl Into<String>,
        target: PurgeTarget,
        preferred: Option<String>,
        accumulator: Arc<MaintenanceAccumulator<()>>,
    ) -> Self {
        PurgeExecutor {
            user_id: user_id.into(),
            target,
            preferred,
            accumulator,
        }
    }
}

impl RepositoryExecutor for PurgeExecutor {
    fn operation(&self) -> &'static str {
        match self.target {
            PurgeTarget::Entity(_) => "purge_entity",
            PurgeTarget::Relationship(_) => "purge_relationship",
        }
    }

    fn preferred_repository(&self) -> Option<&str> {
        self.preferred.as_deref()
    }

    fn base(&self) -> &AccumulatorBase {
        self.accumulator.base()
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        let result = match &self.target {
            PurgeTarget::Entity(guid) => collection.purge_entity(&self.user_id, guid),
            PurgeTarget::Relationship(guid) => collection.purge_relationship(&self.user_id, guid),
        };
        match captured(self.base(), member, result) {
            Some(()) => self.accumulator.record_result(member, ()),
            None => false,
        }
    }
}

// =============================================================================
// Type verification
// =============================================================================

/// A definition to verify
#[derive(Debug, Clone, PartialEq)]
pub enum TypeVerification {
    /// An entity, relationship or classification type
    TypeDef(TypeDef),
    /// A primitive, enum or collection type
    AttributeTypeDef(AttributeTypeDef),
}

/// Ask members whether they hold a compatible definition
#[derive(Debug, Clone)]
pub struct VerifyTypeExecutor {
    user_id: String,
    definition: TypeVerification,
    accumulator: Arc<VerificationAccumulator>,
}

impl VerifyTypeExecutor {
    /// Create the executor
    pub fn new(
        user_id: impl Into<String>,
        definition: TypeVerification,
        accumulator: Arc<VerificationAccumulator>,
    ) -> Self {
        VerifyTypeExecutor {
            user_id: user_id.into(),
            definition,
            accumulator,
        }
    }
}

impl RepositoryExecutor for VerifyTypeExecutor {
    fn operation(&self) -> &'static str {
        match self.definition {
            TypeVerification::TypeDef(_) => "verify_type_def",
            TypeVerification::AttributeTypeDef(_) => "verify_attribute_type_def",
        }
    }

    fn base(&self) -> &AccumulatorBase {
        self.accumulator.base()
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        let result = match &self.definition {
            TypeVerification::TypeDef(def) => collection.verify_type_def(&self.user_id, def),
            TypeVerification::AttributeTypeDef(def) => {
                collection.verify_attribute_type_def(&self.user_id, def)
            }
        };
        match captured(self.base(), member, result) {
            Some(verified) => self.accumulator.record_verdict(member, verified),
            None => false,
        }
    }
}
