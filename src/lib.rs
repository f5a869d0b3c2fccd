//! Cohort - one logical metadata repository over many
//!
//! A cohort is a set of member repositories that each hold part of a shared
//! metadata graph. Cohort fans every request out to the members, merges what
//! comes back and answers as if a single repository had been asked.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use cohort::{FederatedMetadataCollection, FederationConfig, Guid};
//!
//! let federation = FederatedMetadataCollection::new(FederationConfig::default())?;
//! federation.register(Arc::new(my_member));
//!
//! let entity = federation.get_entity_detail("alice", &Guid::from("e1"), None)?;
//! ```
//!
//! # Architecture
//!
//! | Crate | Role |
//! |-------|------|
//! | `cohort-core` | instances, type definitions, paging, errors, the member trait |
//! | `cohort-concurrency` | accumulators, merge rules, error precedence, completion tracking |
//! | `cohort-executor` | one executor per operation, issuing a request to one member |
//! | `cohort-engine` | registry, worker pool, dispatch and the federated facade |

pub use cohort_core::*;
pub use cohort_engine::{
    testing, CohortMember, CohortRegistry, ControlMetrics, FederatedMetadataCollection,
    FederationConfig, FederationControl, FederationScheduler, SchedulerStats, SubmitError,
    CONFIG_FILE_NAME,
};

/// Accumulators and merge rules
pub use cohort_concurrency as concurrency;
/// Per-operation executors
pub use cohort_executor as executor;
