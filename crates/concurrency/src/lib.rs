//! Result accumulation for cohort federation
//!
//! This crate holds everything that happens between "a member answered" and
//! "the caller gets one answer":
//! - CompletionTracker: dispatched versus reported members, wait with timeout
//! - PrecedenceTable: which captured error surfaces when nothing succeeded
//! - AccumulatorBase: captured errors plus progress for one request
//! - Merge rules: identity and classification supersession
//! - Accumulators: one per operation pattern
//!
//! Accumulators are shared between worker threads through `Arc` and guard
//! their state with `parking_lot` mutexes. Member calls never run while an
//! accumulator lock is held.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accumulators;
pub mod base;
pub mod completion;
pub mod merge;
pub mod precedence;

pub use accumulators::{
    EntityDetailAccumulator, HistoryAccumulator, InstancesAccumulator, MaintenanceAccumulator,
    RelationshipAccumulator, RetrievalAccumulator, TypeDefAccumulator, TypeDefNameConflict,
    VerificationAccumulator,
};
pub use base::{AccumulatorBase, CapturedError};
pub use completion::{Admission, AccumulatorState, CompletionTracker, Refusal, WaitOutcome};
pub use merge::{classification_supersedes, supersedes, InstanceMerge, Reported};
pub use precedence::PrecedenceTable;
