//! Type definitions
//!
//! TypeDefs describe the shape of entities, relationships and classifications.
//! Members may return different versions of the same definition, or two
//! definitions that disagree; reconciling them is the accumulators' job.

use crate::instance::InstanceStatus;
use crate::types::Guid;
use serde::{Deserialize, Serialize};

/// What kind of instance a TypeDef describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeDefCategory {
    /// Entity type
    Entity,
    /// Relationship type
    Relationship,
    /// Classification type
    Classification,
}

/// Kind of an attribute type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttributeTypeDefCategory {
    /// Built-in primitive (string, int, date...)
    Primitive,
    /// Enumeration
    Enum,
    /// Array or map
    Collection,
}

/// An attribute declared by a TypeDef
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefAttribute {
    /// Attribute name
    pub name: String,
    /// Name of the attribute's type
    pub attribute_type: String,
    /// Whether the attribute must be present
    pub required: bool,
    /// Whether the value identifies the instance uniquely
    pub unique: bool,
}

/// Definition of an entity, relationship or classification type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Identity
    pub guid: Guid,
    /// Unique name
    pub name: String,
    /// Version; higher wins when members disagree
    pub version: u64,
    /// Category
    pub category: TypeDefCategory,
    /// Super type, if any
    pub super_type: Option<Guid>,
    /// Declared attributes
    pub attributes: Vec<TypeDefAttribute>,
    /// Statuses instances of this type may take; empty means all
    pub valid_statuses: Vec<InstanceStatus>,
    /// Description
    pub description: Option<String>,
}

impl TypeDef {
    /// Create a version-1 TypeDef with no attributes
    pub fn new(guid: impl Into<Guid>, name: impl Into<String>, category: TypeDefCategory) -> Self {
        TypeDef {
            guid: guid.into(),
            name: name.into(),
            version: 1,
            category,
            super_type: None,
            attributes: Vec::new(),
            valid_statuses: Vec::new(),
            description: None,
        }
    }

    /// Set the version, returning the updated TypeDef
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

/// Definition of an attribute type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeTypeDef {
    /// Identity
    pub guid: Guid,
    /// Unique name
    pub name: String,
    /// Version
    pub version: u64,
    /// Category
    pub category: AttributeTypeDefCategory,
    /// Description
    pub description: Option<String>,
}

impl AttributeTypeDef {
    /// Create a version-1 attribute type
    pub fn new(
        guid: impl Into<Guid>,
        name: impl Into<String>,
        category: AttributeTypeDefCategory,
    ) -> Self {
        AttributeTypeDef {
            guid: guid.into(),
            name: name.into(),
            version: 1,
            category,
            description: None,
        }
    }
}

/// All type definitions known to a member (or the merged cohort)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeDefGallery {
    /// Attribute types
    pub attribute_type_defs: Vec<AttributeTypeDef>,
    /// Instance types
    pub type_defs: Vec<TypeDef>,
}

impl TypeDefGallery {
    /// True if the gallery holds nothing
    pub fn is_empty(&self) -> bool {
        self.attribute_type_defs.is_empty() && self.type_defs.is_empty()
    }

    /// Look up a TypeDef by name
    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.type_defs.iter().find(|t| t.name == name)
    }
}
