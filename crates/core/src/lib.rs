//! Core types and traits for the cohort federation engine
//!
//! This crate defines what every other crate speaks:
//! - Guid: opaque identity of instances and type definitions
//! - Instances: EntityDetail, EntityProxy, Relationship, Classification
//! - TypeDefs: TypeDef, AttributeTypeDef, TypeDefGallery
//! - Paging: PagingParams, HistoryParams, Page, sequencing helpers
//! - Error: CohortError and its ErrorKind discriminant
//! - MetadataCollection: the capability each cohort member exposes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod collection;
pub mod error;
pub mod instance;
pub mod paging;
pub mod typedef;
pub mod types;

pub use collection::{MetadataCollection, NewEntity, NewRelationship};
pub use error::{CohortError, CohortResult, ErrorKind};
pub use instance::{
    Classification, ClassificationOrigin, EntityDetail, EntityProxy, Instance, InstanceHeader,
    InstanceProperties, InstanceProvenanceType, InstanceStatus, InstanceType, PropertyValue,
    Relationship,
};
pub use paging::{
    compare_instances, sort_history, sort_instances, HistoryParams, HistorySequencingOrder,
    MatchCriteria, Page, PagingParams, PropertyMatch, SequencingOrder,
};
pub use typedef::{
    AttributeTypeDef, AttributeTypeDefCategory, TypeDef, TypeDefAttribute, TypeDefCategory,
    TypeDefGallery,
};
pub use types::{Guid, MetadataCollectionId};
