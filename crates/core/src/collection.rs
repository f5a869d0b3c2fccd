//! The member repository capability
//!
//! [`MetadataCollection`] is everything the federation layer needs from one
//! member: its identity plus a query and maintenance surface. Implementations
//! are treated as reentrant black boxes; the federation layer calls them from
//! several worker threads at once and holds no lock while doing so.
//!
//! Every method has a default body that fails with
//! [`CohortError::FunctionNotSupported`], so a member only implements what it
//! actually offers.

use crate::error::{CohortError, CohortResult};
use crate::instance::{
    Classification, EntityDetail, EntityProxy, InstanceProperties, InstanceStatus, Relationship,
};
use crate::paging::{HistoryParams, PagingParams, PropertyMatch};
use crate::typedef::{AttributeTypeDef, TypeDef, TypeDefCategory, TypeDefGallery};
use crate::types::Guid;
use chrono::{DateTime, Utc};

/// Arguments for creating an entity
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    /// Type of the new entity
    pub type_def_guid: Guid,
    /// Initial properties
    pub properties: InstanceProperties,
    /// Initial classifications
    pub classifications: Vec<Classification>,
    /// Initial status
    pub status: InstanceStatus,
}

/// Arguments for creating a relationship
#[derive(Debug, Clone, PartialEq)]
pub struct NewRelationship {
    /// Type of the new relationship
    pub type_def_guid: Guid,
    /// Initial properties
    pub properties: InstanceProperties,
    /// First end
    pub entity_one_guid: Guid,
    /// Second end
    pub entity_two_guid: Guid,
    /// Initial status
    pub status: InstanceStatus,
}

/// One member repository's query and maintenance surface
#[allow(unused_variables)]
pub trait MetadataCollection: Send + Sync {
    /// Identity of this member's metadata collection
    fn metadata_collection_id(&self) -> &str;

    // ==================== Types ====================

    /// Every type definition the member knows
    fn get_all_types(&self, user_id: &str) -> CohortResult<TypeDefGallery> {
        Err(CohortError::function_not_supported("get_all_types"))
    }

    /// Type definitions of one category
    fn find_type_defs_by_category(
        &self,
        user_id: &str,
        category: TypeDefCategory,
    ) -> CohortResult<Vec<TypeDef>> {
        Err(CohortError::function_not_supported("find_type_defs_by_category"))
    }

    /// Look up a type definition by GUID
    fn get_type_def_by_guid(&self, user_id: &str, guid: &Guid) -> CohortResult<TypeDef> {
        Err(CohortError::function_not_supported("get_type_def_by_guid"))
    }

    /// Look up a type definition by name
    fn get_type_def_by_name(&self, user_id: &str, name: &str) -> CohortResult<TypeDef> {
        Err(CohortError::function_not_supported("get_type_def_by_name"))
    }

    /// True if the member holds an identical definition
    fn verify_type_def(&self, user_id: &str, type_def: &TypeDef) -> CohortResult<bool> {
        Err(CohortError::function_not_supported("verify_type_def"))
    }

    /// True if the member holds an identical attribute definition
    fn verify_attribute_type_def(
        &self,
        user_id: &str,
        attribute_type_def: &AttributeTypeDef,
    ) -> CohortResult<bool> {
        Err(CohortError::function_not_supported("verify_attribute_type_def"))
    }

    // ==================== Entity queries ====================

    /// The entity if the member holds it, `None` otherwise
    fn is_entity_known(&self, user_id: &str, guid: &Guid) -> CohortResult<Option<EntityDetail>> {
        Err(CohortError::function_not_supported("is_entity_known"))
    }

    /// The entity, optionally as it was at `as_of_time`.
    ///
    /// Fails with `EntityNotKnown` if absent, `EntityProxyOnly` if only a proxy
    /// is held.
    fn get_entity_detail(
        &self,
        user_id: &str,
        guid: &Guid,
        as_of_time: Option<DateTime<Utc>>,
    ) -> CohortResult<EntityDetail> {
        Err(CohortError::function_not_supported("get_entity_detail"))
    }

    /// Classifications homed at this member for an entity it may not hold
    fn get_home_classifications(
        &self,
        user_id: &str,
        entity_guid: &Guid,
        as_of_time: Option<DateTime<Utc>>,
    ) -> CohortResult<Vec<Classification>> {
        Err(CohortError::function_not_supported("get_home_classifications"))
    }

    /// Past versions of an entity
    fn get_entity_detail_history(
        &self,
        user_id: &str,
        guid: &Guid,
        history: &HistoryParams,
    ) -> CohortResult<Vec<EntityDetail>> {
        Err(CohortError::function_not_supported("get_entity_detail_history"))
    }

    /// Entities matching property values
    fn find_entities_by_property(
        &self,
        user_id: &str,
        entity_type_guid: Option<&Guid>,
        match_properties: Option<&PropertyMatch>,
        limit_by_classifications: &[String],
        paging: &PagingParams,
    ) -> CohortResult<Vec<EntityDetail>> {
        Err(CohortError::function_not_supported("find_entities_by_property"))
    }

    /// Entities carrying a classification
    fn find_entities_by_classification(
        &self,
        user_id: &str,
        entity_type_guid: Option<&Guid>,
        classification_name: &str,
        match_classification_properties: Option<&PropertyMatch>,
        paging: &PagingParams,
    ) -> CohortResult<Vec<EntityDetail>> {
        Err(CohortError::function_not_supported("find_entities_by_classification"))
    }

    // ==================== Relationship queries ====================

    /// Relationships with the entity at either end
    fn get_relationships_for_entity(
        &self,
        user_id: &str,
        entity_guid: &Guid,
        relationship_type_guid: Option<&Guid>,
        paging: &PagingParams,
    ) -> CohortResult<Vec<Relationship>> {
        Err(CohortError::function_not_supported("get_relationships_for_entity"))
    }

    /// Relationships matching property values
    fn find_relationships_by_property(
        &self,
        user_id: &str,
        relationship_type_guid: Option<&Guid>,
        match_properties: Option<&PropertyMatch>,
        paging: &PagingParams,
    ) -> CohortResult<Vec<Relationship>> {
        Err(CohortError::function_not_supported("find_relationships_by_property"))
    }

    /// The relationship if the member holds it, `None` otherwise
    fn is_relationship_known(&self, user_id: &str, guid: &Guid) -> CohortResult<Option<Relationship>> {
        Err(CohortError::function_not_supported("is_relationship_known"))
    }

    /// The relationship; fails with `RelationshipNotKnown` if absent
    fn get_relationship(
        &self,
        user_id: &str,
        guid: &Guid,
        as_of_time: Option<DateTime<Utc>>,
    ) -> CohortResult<Relationship> {
        Err(CohortError::function_not_supported("get_relationship"))
    }

    /// Past versions of a relationship
    fn get_relationship_history(
        &self,
        user_id: &str,
        guid: &Guid,
        history: &HistoryParams,
    ) -> CohortResult<Vec<Relationship>> {
        Err(CohortError::function_not_supported("get_relationship_history"))
    }

    // ==================== Entity maintenance ====================

    /// Create an entity homed at this member
    fn add_entity(&self, user_id: &str, entity: &NewEntity) -> CohortResult<EntityDetail> {
        Err(CohortError::function_not_supported("add_entity"))
    }

    /// Store a proxy for an entity homed elsewhere
    fn add_entity_proxy(&self, user_id: &str, proxy: &EntityProxy) -> CohortResult<()> {
        Err(CohortError::function_not_supported("add_entity_proxy"))
    }

    /// Change an entity's status
    fn update_entity_status(
        &self,
        user_id: &str,
        guid: &Guid,
        status: InstanceStatus,
    ) -> CohortResult<EntityDetail> {
        Err(CohortError::function_not_supported("update_entity_status"))
    }

    /// Replace an entity's properties
    fn update_entity_properties(
        &self,
        user_id: &str,
        guid: &Guid,
        properties: &InstanceProperties,
    ) -> CohortResult<EntityDetail> {
        Err(CohortError::function_not_supported("update_entity_properties"))
    }

    /// Soft-delete an entity
    fn delete_entity(&self, user_id: &str, guid: &Guid) -> CohortResult<EntityDetail> {
        Err(CohortError::function_not_supported("delete_entity"))
    }

    /// Undo a soft delete
    fn restore_entity(&self, user_id: &str, guid: &Guid) -> CohortResult<EntityDetail> {
        Err(CohortError::function_not_supported("restore_entity"))
    }

    /// Remove a soft-deleted entity permanently
    fn purge_entity(&self, user_id: &str, guid: &Guid) -> CohortResult<()> {
        Err(CohortError::function_not_supported("purge_entity"))
    }

    /// Attach a classification to an entity
    fn classify_entity(
        &self,
        user_id: &str,
        entity_guid: &Guid,
        classification_name: &str,
        properties: &InstanceProperties,
    ) -> CohortResult<EntityDetail> {
        Err(CohortError::function_not_supported("classify_entity"))
    }

    /// Remove a classification from an entity
    fn declassify_entity(
        &self,
        user_id: &str,
        entity_guid: &Guid,
        classification_name: &str,
    ) -> CohortResult<EntityDetail> {
        Err(CohortError::function_not_supported("declassify_entity"))
    }

    // ==================== Relationship maintenance ====================

    /// Create a relationship homed at this member
    fn add_relationship(
        &self,
        user_id: &str,
        relationship: &NewRelationship,
    ) -> CohortResult<Relationship> {
        Err(CohortError::function_not_supported("add_relationship"))
    }

    /// Soft-delete a relationship
    fn delete_relationship(&self, user_id: &str, guid: &Guid) -> CohortResult<Relationship> {
        Err(CohortError::function_not_supported("delete_relationship"))
    }

    /// Undo a soft delete
    fn restore_relationship(&self, user_id: &str, guid: &Guid) -> CohortResult<Relationship> {
        Err(CohortError::function_not_supported("restore_relationship"))
    }

    /// Remove a soft-deleted relationship permanently
    fn purge_relationship(&self, user_id: &str, guid: &Guid) -> CohortResult<()> {
        Err(CohortError::function_not_supported("purge_relationship"))
    }
}
