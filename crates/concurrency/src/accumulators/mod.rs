//! Per-request result sinks
//!
//! One accumulator is created per federated request and shared by every
//! executor dispatch. Each embeds an [`AccumulatorBase`](crate::AccumulatorBase)
//! and keeps its own merge state behind a mutex.
//!
//! | Accumulator | Pattern |
//! |-------------|---------|
//! | [`MaintenanceAccumulator`] | single winner |
//! | [`VerificationAccumulator`] | any true wins |
//! | [`EntityDetailAccumulator`] | merge copies plus two-phase classifications |
//! | [`RetrievalAccumulator`] | merge copies |
//! | [`InstancesAccumulator`] | union, sort, page |
//! | [`HistoryAccumulator`] | union by version, sort, page |
//! | [`TypeDefAccumulator`] | union by GUID, resolve name conflicts |

mod entity_detail;
mod instances;
mod maintenance;
mod retrieval;
mod typedefs;

pub use entity_detail::EntityDetailAccumulator;
pub use instances::{HistoryAccumulator, InstancesAccumulator};
pub use maintenance::{MaintenanceAccumulator, VerificationAccumulator};
pub use retrieval::{RelationshipAccumulator, RetrievalAccumulator};
pub use typedefs::{TypeDefAccumulator, TypeDefNameConflict};
