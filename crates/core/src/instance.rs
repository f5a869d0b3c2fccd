//! Instance model: entities, relationships, classifications and proxies
//!
//! Every instance is owned by exactly one *home* member (its
//! `metadata_collection_id`). Other members may hold reference copies, and
//! classifications may be homed somewhere other than the entity they decorate.
//! The federation layer only reads and merges these values; it never edits
//! one in place.

use crate::typedef::TypeDefCategory;
use crate::types::{Guid, MetadataCollectionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Lifecycle state of a stored instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Status not recorded
    Unknown,
    /// Work in progress, not yet visible to consumers
    Draft,
    /// Complete but not yet proposed
    Prepared,
    /// Awaiting approval
    Proposed,
    /// Approved for use
    Approved,
    /// Rejected by a reviewer
    Rejected,
    /// Approved as a concept only
    ApprovedConcept,
    /// In use
    Active,
    /// Soft-deleted; may be restored or purged
    Deleted,
    /// Member-specific status
    Other,
}

/// How an instance came to be stored in the cohort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceProvenanceType {
    /// Not recorded
    #[default]
    Unknown,
    /// Created by a cohort member
    LocalCohort,
    /// Loaded from an export archive
    ExportArchive,
    /// Loaded from a content pack
    ContentPack,
    /// Home member has left the cohort
    DeregisteredRepository,
    /// Defined by configuration
    Configuration,
    /// Mastered outside the cohort
    ExternalSource,
}

/// The type of an instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceType {
    /// GUID of the type definition
    pub type_def_guid: Guid,
    /// Unique name of the type definition
    pub type_def_name: String,
    /// Version of the type definition the instance was written against
    pub type_def_version: u64,
    /// Entity, relationship or classification
    pub category: TypeDefCategory,
}

impl InstanceType {
    /// Create an instance type at version 1
    pub fn new(
        type_def_guid: impl Into<Guid>,
        type_def_name: impl Into<String>,
        category: TypeDefCategory,
    ) -> Self {
        InstanceType {
            type_def_guid: type_def_guid.into(),
            type_def_name: type_def_name.into(),
            type_def_version: 1,
            category,
        }
    }
}

/// A single property value
///
/// Values of the same variant are totally ordered (floats via `total_cmp`);
/// different variants order by variant position. This makes sequencing by
/// property deterministic across members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// Boolean
    Boolean(bool),
    /// Signed integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    String(String),
    /// Timestamp
    Date(DateTime<Utc>),
    /// Enumeration value
    Enum {
        /// Position in the enum definition
        ordinal: i32,
        /// Display name
        symbolic_name: String,
    },
    /// Ordered collection
    Array(Vec<PropertyValue>),
    /// Keyed collection
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    fn variant_rank(&self) -> u8 {
        match self {
            PropertyValue::Boolean(_) => 0,
            PropertyValue::Int(_) => 1,
            PropertyValue::Float(_) => 2,
            PropertyValue::String(_) => 3,
            PropertyValue::Date(_) => 4,
            PropertyValue::Enum { .. } => 5,
            PropertyValue::Array(_) => 6,
            PropertyValue::Map(_) => 7,
        }
    }

    /// Total order used for sequencing
    pub fn total_cmp(&self, other: &PropertyValue) -> Ordering {
        match (self, other) {
            (PropertyValue::Boolean(a), PropertyValue::Boolean(b)) => a.cmp(b),
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a.cmp(b),
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.total_cmp(b),
            (PropertyValue::String(a), PropertyValue::String(b)) => a.cmp(b),
            (PropertyValue::Date(a), PropertyValue::Date(b)) => a.cmp(b),
            (
                PropertyValue::Enum { ordinal: a, .. },
                PropertyValue::Enum { ordinal: b, .. },
            ) => a.cmp(b),
            (PropertyValue::Array(a), PropertyValue::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (PropertyValue::Map(a), PropertyValue::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.variant_rank().cmp(&other.variant_rank()),
        }
    }

    /// Text form used for value searches
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            PropertyValue::Enum { symbolic_name, .. } => Some(symbolic_name),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

/// Named property values of an instance
pub type InstanceProperties = BTreeMap<String, PropertyValue>;

/// Fields shared by every stored instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHeader {
    /// Identity of the instance
    pub guid: Guid,
    /// Type of the instance
    pub instance_type: InstanceType,
    /// Current lifecycle state
    pub status: InstanceStatus,
    /// Status to return to when a soft delete is undone
    pub status_on_delete: Option<InstanceStatus>,
    /// Home member
    pub metadata_collection_id: MetadataCollectionId,
    /// Display name of the home member
    pub metadata_collection_name: Option<String>,
    /// Member that replicates an externally mastered instance
    pub replicated_by: Option<MetadataCollectionId>,
    /// Provenance
    pub provenance: InstanceProvenanceType,
    /// Monotonic version, incremented on every update
    pub version: u64,
    /// User that created the instance
    pub created_by: Option<String>,
    /// User that last updated the instance
    pub updated_by: Option<String>,
    /// Creation time
    pub create_time: Option<DateTime<Utc>>,
    /// Last update time
    pub update_time: Option<DateTime<Utc>>,
}

impl InstanceHeader {
    /// Create an active, version-1 header homed at `home`
    pub fn new(
        guid: impl Into<Guid>,
        instance_type: InstanceType,
        home: impl Into<MetadataCollectionId>,
    ) -> Self {
        InstanceHeader {
            guid: guid.into(),
            instance_type,
            status: InstanceStatus::Active,
            status_on_delete: None,
            metadata_collection_id: home.into(),
            metadata_collection_name: None,
            replicated_by: None,
            provenance: InstanceProvenanceType::LocalCohort,
            version: 1,
            created_by: None,
            updated_by: None,
            create_time: None,
            update_time: None,
        }
    }

    /// Time of the latest change, falling back to creation time
    pub fn last_changed(&self) -> Option<DateTime<Utc>> {
        self.update_time.or(self.create_time)
    }
}

/// Common accessors the accumulators merge and sequence on
pub trait Instance {
    /// The instance header
    fn header(&self) -> &InstanceHeader;

    /// The instance properties
    fn properties(&self) -> &InstanceProperties;

    /// Identity
    fn guid(&self) -> &Guid {
        &self.header().guid
    }

    /// Version
    fn version(&self) -> u64 {
        self.header().version
    }

    /// Home member
    fn home_metadata_collection_id(&self) -> &str {
        &self.header().metadata_collection_id
    }
}

/// Whether a classification was assigned directly or propagated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationOrigin {
    /// Assigned directly to the entity
    #[default]
    Assigned,
    /// Propagated from a classification on another entity
    Propagated,
}

/// A typed tag attached to an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Name of the classification type; unique per entity
    pub name: String,
    /// Type of the classification
    pub instance_type: InstanceType,
    /// Lifecycle state
    pub status: InstanceStatus,
    /// Home member of the classification (may differ from the entity's)
    pub metadata_collection_id: MetadataCollectionId,
    /// Version of the classification
    pub version: u64,
    /// Creation time
    pub create_time: Option<DateTime<Utc>>,
    /// Last update time
    pub update_time: Option<DateTime<Utc>>,
    /// Classification properties
    pub properties: InstanceProperties,
    /// Assigned or propagated
    pub origin: ClassificationOrigin,
    /// Entity the classification propagated from
    pub origin_guid: Option<Guid>,
}

impl Classification {
    /// Create an assigned, version-1 classification homed at `home`
    pub fn new(name: impl Into<String>, home: impl Into<MetadataCollectionId>) -> Self {
        let name = name.into();
        Classification {
            instance_type: InstanceType::new(
                Guid::new(format!("classification:{}", name)),
                name.clone(),
                TypeDefCategory::Classification,
            ),
            name,
            status: InstanceStatus::Active,
            metadata_collection_id: home.into(),
            version: 1,
            create_time: None,
            update_time: None,
            properties: InstanceProperties::new(),
            origin: ClassificationOrigin::Assigned,
            origin_guid: None,
        }
    }

    /// Set a property, returning the updated classification
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set the version, returning the updated classification
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

/// Minimal stand-in for an entity whose full detail is held elsewhere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityProxy {
    /// Header copied from the entity
    pub header: InstanceHeader,
    /// Properties that identify the entity uniquely
    pub unique_properties: InstanceProperties,
}

impl EntityProxy {
    /// Identity of the proxied entity
    pub fn guid(&self) -> &Guid {
        &self.header.guid
    }
}

impl From<&EntityDetail> for EntityProxy {
    fn from(entity: &EntityDetail) -> Self {
        EntityProxy {
            header: entity.header.clone(),
            unique_properties: InstanceProperties::new(),
        }
    }
}

/// A full entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDetail {
    /// Header
    pub header: InstanceHeader,
    /// Entity properties
    pub properties: InstanceProperties,
    /// Classifications attached to the entity
    pub classifications: Vec<Classification>,
}

impl EntityDetail {
    /// Create an active, version-1 entity homed at `home`
    pub fn new(guid: impl Into<Guid>, instance_type: InstanceType, home: impl Into<String>) -> Self {
        EntityDetail {
            header: InstanceHeader::new(guid, instance_type, home),
            properties: InstanceProperties::new(),
            classifications: Vec::new(),
        }
    }

    /// Set a property, returning the updated entity
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set the version, returning the updated entity
    pub fn with_version(mut self, version: u64) -> Self {
        self.header.version = version;
        self
    }

    /// Attach a classification, returning the updated entity
    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classifications.push(classification);
        self
    }

    /// Look up a classification by name
    pub fn classification(&self, name: &str) -> Option<&Classification> {
        self.classifications.iter().find(|c| c.name == name)
    }
}

impl Instance for EntityDetail {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }

    fn properties(&self) -> &InstanceProperties {
        &self.properties
    }
}

/// A typed, directed link between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Header
    pub header: InstanceHeader,
    /// Relationship properties
    pub properties: InstanceProperties,
    /// First end
    pub entity_one_proxy: EntityProxy,
    /// Second end
    pub entity_two_proxy: EntityProxy,
}

impl Relationship {
    /// Create an active, version-1 relationship homed at `home`
    pub fn new(
        guid: impl Into<Guid>,
        instance_type: InstanceType,
        home: impl Into<String>,
        entity_one_proxy: EntityProxy,
        entity_two_proxy: EntityProxy,
    ) -> Self {
        Relationship {
            header: InstanceHeader::new(guid, instance_type, home),
            properties: InstanceProperties::new(),
            entity_one_proxy,
            entity_two_proxy,
        }
    }

    /// Set the version, returning the updated relationship
    pub fn with_version(mut self, version: u64) -> Self {
        self.header.version = version;
        self
    }

    /// True if either end is the given entity
    pub fn touches(&self, entity_guid: &Guid) -> bool {
        self.entity_one_proxy.guid() == entity_guid || self.entity_two_proxy.guid() == entity_guid
    }
}

impl Instance for Relationship {
    fn header(&self) -> &InstanceHeader {
        &self.header
    }

    fn properties(&self) -> &InstanceProperties {
        &self.properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> InstanceType {
        InstanceType::new("t-person", "Person", TypeDefCategory::Entity)
    }

    #[test]
    fn test_property_values_order_within_variant() {
        assert_eq!(
            PropertyValue::Int(3).total_cmp(&PropertyValue::Int(10)),
            Ordering::Less
        );
        assert_eq!(
            PropertyValue::from("b").total_cmp(&PropertyValue::from("a")),
            Ordering::Greater
        );
        assert_eq!(
            PropertyValue::Float(f64::NAN).total_cmp(&PropertyValue::Float(f64::NAN)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_property_values_order_across_variants() {
        assert_eq!(
            PropertyValue::Boolean(true).total_cmp(&PropertyValue::Int(0)),
            Ordering::Less
        );
    }

    #[test]
    fn test_proxy_from_entity_keeps_header() {
        let entity = EntityDetail::new("e-1", person(), "repo-a").with_version(4);
        let proxy = EntityProxy::from(&entity);
        assert_eq!(proxy.guid(), &Guid::from("e-1"));
        assert_eq!(proxy.header.version, 4);
        assert_eq!(proxy.header.metadata_collection_id, "repo-a");
    }

    #[test]
    fn test_entity_classification_lookup() {
        let entity = EntityDetail::new("e-1", person(), "repo-a")
            .with_classification(Classification::new("Confidential", "repo-b"));
        assert!(entity.classification("Confidential").is_some());
        assert!(entity.classification("Retention").is_none());
    }

    #[test]
    fn test_relationship_touches_both_ends() {
        let one = EntityDetail::new("e-1", person(), "repo-a");
        let two = EntityDetail::new("e-2", person(), "repo-a");
        let rel = Relationship::new(
            "r-1",
            InstanceType::new("t-knows", "Knows", TypeDefCategory::Relationship),
            "repo-a",
            EntityProxy::from(&one),
            EntityProxy::from(&two),
        );
        assert!(rel.touches(&Guid::from("e-1")));
        assert!(rel.touches(&Guid::from("e-2")));
        assert!(!rel.touches(&Guid::from("e-3")));
    }

    #[test]
    fn test_last_changed_falls_back_to_create_time() {
        let mut header = InstanceHeader::new("e-1", person(), "repo-a");
        let created = Utc::now();
        header.create_time = Some(created);
        assert_eq!(header.last_changed(), Some(created));
    }
}
