//! Federation engine for cohort
//!
//! This crate turns executors and accumulators into a working federation:
//! - FederationConfig: `cohort.toml` settings
//! - CohortRegistry: the members a request fans out to
//! - FederationScheduler: worker pool issuing member requests
//! - FederationControl: parallel and in-turn dispatch, timeouts, panics
//! - FederatedMetadataCollection: one logical repository over the cohort
//! - testing::InMemoryCollection: a complete in-memory member
//!
//! The engine is the only component that knows which members exist and on
//! which threads they are called.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod control;
pub mod federated;
pub mod registry;
pub mod scheduler;
pub mod testing;

pub use config::{FederationConfig, CONFIG_FILE_NAME};
pub use control::{ControlMetrics, FederationControl};
pub use federated::FederatedMetadataCollection;
pub use registry::{CohortMember, CohortRegistry};
pub use scheduler::{FederationScheduler, SchedulerStats, SubmitError};
