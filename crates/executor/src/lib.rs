//! # Cohort Executor
//!
//! Request descriptors for every federated operation.
//!
//! An executor knows how to issue one request to one member and where to put
//! the outcome. The engine decides which members to ask, in what order and
//! on which threads.
//!
//! ## Executor Families
//!
//! | Family | Executors | Accumulator |
//! |--------|-----------|-------------|
//! | **Maintenance** | add, update, classify, delete, restore, purge | single winner |
//! | **Verification** | verify type / attribute type | any true wins |
//! | **Retrieval** | entity detail (two phases), relationship | identity merge |
//! | **Query** | find by property / classification, relationships for entity, history | union and page |
//! | **Types** | gallery, by category, by guid, by name | union by guid |

#![warn(missing_docs)]
#![warn(clippy::all)]

mod executor;
mod maintenance;
mod query;
mod retrieval;
mod typedefs;

#[cfg(test)]
mod tests;

pub use executor::RepositoryExecutor;
pub use maintenance::{
    AddEntityExecutor, AddRelationshipExecutor, EntityChange, EntityMaintenanceExecutor,
    PurgeExecutor, PurgeTarget, RelationshipChange, RelationshipMaintenanceExecutor,
    TypeVerification, VerifyTypeExecutor,
};
pub use query::{
    EntityQuery, FindEntitiesExecutor, FindRelationshipsExecutor, GetEntityHistoryExecutor,
    GetRelationshipHistoryExecutor, RelationshipQuery,
};
pub use retrieval::{
    GetEntityDetailExecutor, GetHomeClassificationsExecutor, GetRelationshipExecutor,
    RetrievalMode,
};
pub use typedefs::{TypeDefQuery, TypeDefQueryExecutor};
