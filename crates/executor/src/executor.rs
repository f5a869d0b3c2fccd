//! The RepositoryExecutor contract
//!
//! An executor is an immutable request descriptor plus an `Arc` to the
//! request's accumulator. The control layer hands one executor to every
//! member dispatch; the executor issues its request against that member and
//! routes the outcome into the accumulator.
//!
//! Executors never block on each other and never hold a lock while calling a
//! member.

use cohort_concurrency::{AccumulatorBase, CompletionTracker};
use cohort_core::{CohortError, CohortResult, MetadataCollection};

/// A federated request that can be issued to any member
///
/// # Thread Safety
///
/// Executors are `Send + Sync` and are shared across worker threads through
/// `Arc`. All mutable state lives in the accumulator.
pub trait RepositoryExecutor: Send + Sync {
    /// Name of the member operation, used in logs and error origins
    fn operation(&self) -> &'static str;

    /// Member to try first when members are tried one at a time
    fn preferred_repository(&self) -> Option<&str> {
        None
    }

    /// Errors and progress of the shared accumulator
    fn base(&self) -> &AccumulatorBase;

    /// Tracker the driver dispatches against and waits on
    fn tracker(&self) -> &CompletionTracker {
        self.base().tracker()
    }

    /// Record a failure the member call itself could not report, such as a
    /// panic or a timeout
    fn capture_failure(&self, member: &str, error: CohortError) {
        self.base().capture_error(member, error);
    }

    /// Issue the request to one member and record its outcome.
    ///
    /// Returns true when the request is satisfied and no further member
    /// needs to be asked.
    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection)
        -> bool;
}

/// Route a member result: capture the error, or hand back the value
pub(crate) fn captured<T>(base: &AccumulatorBase, member: &str, result: CohortResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            base.capture_error(member, error);
            None
        }
    }
}
