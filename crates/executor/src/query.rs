//! Multi-contributor query executors
//!
//! Every member is asked with the same parameters, widened so that each
//! returns enough of its own ordering for the merged page. No executor here
//! ever satisfies a request early.

use std::sync::Arc;

use cohort_concurrency::{AccumulatorBase, HistoryAccumulator, InstancesAccumulator};
use cohort_core::{
    CohortError, EntityDetail, Guid, HistoryParams, MetadataCollection, PropertyMatch,
    Relationship,
};

use crate::executor::{captured, RepositoryExecutor};

// =============================================================================
// Entity queries
// =============================================================================

/// Criteria of an entity search
#[derive(Debug, Clone, PartialEq)]
pub enum EntityQuery {
    /// Match on entity properties
    ByProperty {
        /// Restrict to one entity type
        type_guid: Option<Guid>,
        /// Properties to match
        match_properties: Option<PropertyMatch>,
        /// Only entities carrying all of these classifications
        limit_by_classifications: Vec<String>,
    },
    /// Match on one classification and its properties
    ByClassification {
        /// Restrict to one entity type
        type_guid: Option<Guid>,
        /// Classification name
        classification_name: String,
        /// Classification properties to match
        match_properties: Option<PropertyMatch>,
    },
}

/// Run an [`EntityQuery`] against every member
#[derive(Debug, Clone)]
pub struct FindEntitiesExecutor {
    user_id: String,
    query: EntityQuery,
    accumulator: Arc<InstancesAccumulator<EntityDetail>>,
}

impl FindEntitiesExecutor {
    /// Create the executor; paging comes from the accumulator
    pub fn new(
        user_id: impl Into<String>,
        query: EntityQuery,
        accumulator: Arc<InstancesAccumulator<EntityDetail>>,
    ) -> Self {
        FindEntitiesExecutor {
            user_id: user_id.into(),
            query,
            accumulator,
        }
    }
}

impl RepositoryExecutor for FindEntitiesExecutor {
    fn operation(&self) -> &'static str {
        match self.query {
            EntityQuery::ByProperty { .. } => "find_entities_by_property",
            EntityQuery::ByClassification { .. } => "find_entities_by_classification",
        }
    }

    fn base(&self) -> &AccumulatorBase {
        self.accumulator.base()
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        let paging = self.accumulator.member_paging().clone();
        let result = match &self.query {
            EntityQuery::ByProperty {
                type_guid,
                match_properties,
                limit_by_classifications,
            } => collection.find_entities_by_property(
                &self.user_id,
                type_guid.as_ref(),
                match_properties.as_ref(),
                limit_by_classifications,
                &paging,
            ),
            EntityQuery::ByClassification {
                type_guid,
                classification_name,
                match_properties,
            } => collection.find_entities_by_classification(
                &self.user_id,
                type_guid.as_ref(),
                classification_name,
                match_properties.as_ref(),
                &paging,
            ),
        };
        if let Some(entities) = captured(self.base(), member, result) {
            self.accumulator.record_instances(member, entities);
        }
        false
    }
}

// =============================================================================
// Relationship queries
// =============================================================================

/// Criteria of a relationship search
#[derive(Debug, Clone, PartialEq)]
pub enum RelationshipQuery {
    /// Relationships with one entity at either end
    ForEntity {
        /// The entity
        entity_guid: Guid,
        /// Restrict to one relationship type
        type_guid: Option<Guid>,
    },
    /// Match on relationship properties
    ByProperty {
        /// Restrict to one relationship type
        type_guid: Option<Guid>,
        /// Properties to match
        match_properties: Option<PropertyMatch>,
    },
}

/// Run a [`RelationshipQuery`] against every member
#[derive(Debug, Clone)]
pub struct FindRelationshipsExecutor {
    user_id: String,
    query: RelationshipQuery,
    accumulator: Arc<InstancesAccumulator<Relationship>>,
}

impl FindRelationshipsExecutor {
    /// Create the executor; paging comes from the accumulator
    pub fn new(
        user_id: impl Into<String>,
        query: RelationshipQuery,
        accumulator: Arc<InstancesAccumulator<Relationship>>,
    ) -> Self {
        FindRelationshipsExecutor {
            user_id: user_id.into(),
            query,
            accumulator,
        }
    }
}

impl RepositoryExecutor for FindRelationshipsExecutor {
    fn operation(&self) -> &'static str {
        match self.query {
            RelationshipQuery::ForEntity { .. } => "get_relationships_for_entity",
            RelationshipQuery::ByProperty { .. } => "find_relationships_by_property",
        }
    }

    fn base(&self) -> &AccumulatorBase {
        self.accumulator.base()
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        let paging = self.accumulator.member_paging().clone();
        match &self.query {
            RelationshipQuery::ForEntity {
                entity_guid,
                type_guid,
            } => {
                match collection.get_relationships_for_entity(
                    &self.user_id,
                    entity_guid,
                    type_guid.as_ref(),
                    &paging,
                ) {
                    Ok(relationships) => self.accumulator.record_instances(member, relationships),
                    // A member that has never seen the entity has no relationships for it
                    Err(CohortError::EntityNotKnown { .. }) => {
                        self.accumulator.record_no_instances(member)
                    }
                    Err(error) => self.base().capture_error(member, error),
                }
            }
            RelationshipQuery::ByProperty {
                type_guid,
                match_properties,
            } => {
                let result = collection.find_relationships_by_property(
                    &self.user_id,
                    type_guid.as_ref(),
                    match_properties.as_ref(),
                    &paging,
                );
                if let Some(relationships) = captured(self.base(), member, result) {
                    self.accumulator.record_instances(member, relationships);
                }
            }
        }
        false
    }
}

// =============================================================================
// History
// =============================================================================

/// Version history of one entity
#[derive(Debug, Clone)]
pub struct GetEntityHistoryExecutor {
    user_id: String,
    guid: Guid,
    params: HistoryParams,
    accumulator: Arc<HistoryAccumulator<EntityDetail>>,
}

impl GetEntityHistoryExecutor {
    /// Create the executor
    pub fn new(
        user_id: impl Into<String>,
        guid: Guid,
        params: HistoryParams,
        accumulator: Arc<HistoryAccumulator<EntityDetail>>,
    ) -> Self {
        GetEntityHistoryExecutor {
            user_id: user_id.into(),
            guid,
            params,
            accumulator,
        }
    }
}

impl RepositoryExecutor for GetEntityHistoryExecutor {
    fn operation(&self) -> &'static str {
        "get_entity_detail_history"
    }

    fn base(&self) -> &AccumulatorBase {
        self.accumulator.base()
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        let result =
            collection.get_entity_detail_history(&self.user_id, &self.guid, &self.params.for_member());
        if let Some(versions) = captured(self.base(), member, result) {
            self.accumulator.record_versions(member, versions);
        }
        false
    }
}

/// Version history of one relationship
#[derive(Debug, Clone)]
pub struct GetRelationshipHistoryExecutor {
    user_id: String,
    guid: Guid,
    params: HistoryParams,
    accumulator: Arc<HistoryAccumulator<Relationship>>,
}

impl GetRelationshipHistoryExecutor {
    /// Create the executor
    pub fn new(
        user_id: impl Into<String>,
        guid: Guid,
        params: HistoryParams,
        accumulator: Arc<HistoryAccumulator<Relationship>>,
    ) -> Self {
        GetRelationshipHistoryExecutor {
            user_id: user_id.into(),
            guid,
            params,
            accumulator,
        }
    }
}

impl RepositoryExecutor for GetRelationshipHistoryExecutor {
    fn operation(&self) -> &'static str {
        "get_relationship_history"
    }

    fn base(&self) -> &AccumulatorBase {
        self.accumulator.base()
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        let result =
            collection.get_relationship_history(&self.user_id, &self.guid, &self.params.for_member());
        if let Some(versions) = captured(self.base(), member, result) {
            self.accumulator.record_versions(member, versions);
        }
        false
    }
}
