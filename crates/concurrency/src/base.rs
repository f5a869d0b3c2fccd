//! Shared accumulator plumbing
//!
//! Every accumulator embeds an [`AccumulatorBase`]: the operation name, the
//! family's precedence table, the per-member captured errors and the
//! completion tracker. Merge state lives in each accumulator behind its own
//! mutex; the base only knows about errors and progress.

use crate::completion::{Admission, AccumulatorState, CompletionTracker, Refusal};
use crate::precedence::PrecedenceTable;
use cohort_core::CohortError;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Error captured from one member
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedError {
    /// Member that raised the error
    pub member: String,
    /// The error, with origin attached if it was unclassified
    pub error: CohortError,
}

/// Errors and progress for one request
#[derive(Debug)]
pub struct AccumulatorBase {
    operation: &'static str,
    precedence: PrecedenceTable,
    captured: Mutex<Vec<CapturedError>>,
    tracker: CompletionTracker,
}

impl AccumulatorBase {
    /// Create the base for one request of `operation`
    pub fn new(operation: &'static str, precedence: PrecedenceTable) -> Self {
        AccumulatorBase {
            operation,
            precedence,
            captured: Mutex::new(Vec::new()),
            tracker: CompletionTracker::new(),
        }
    }

    /// Name of the operation being federated
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Precedence table for this operation's family
    pub fn precedence(&self) -> PrecedenceTable {
        self.precedence
    }

    /// Progress tracker
    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    /// Admit one outcome from `member`, or `None` if it arrived too late.
    ///
    /// The check and the merge that follows are atomic with respect to
    /// sealing and abandonment: keep the admission alive until the outcome
    /// is recorded.
    pub fn admit(&self, member: &str) -> Option<Admission<'_>> {
        match self.tracker.admit(member) {
            Ok(admission) => Some(admission),
            Err(Refusal::Sealed) => {
                debug!(
                    operation = self.operation,
                    member, "dropping outcome that arrived after the answer was formed"
                );
                None
            }
            Err(Refusal::Abandoned) => {
                debug!(
                    operation = self.operation,
                    member, "dropping outcome from a member that is no longer awaited"
                );
                None
            }
        }
    }

    /// Capture a member's failure.
    ///
    /// Unclassified errors are tagged with the member and operation so the
    /// root cause stays diagnosable even when another error takes precedence.
    pub fn capture_error(&self, member: &str, error: CohortError) {
        let Some(_admitted) = self.admit(member) else {
            return;
        };
        let error = error.with_origin(member, self.operation);
        warn!(
            operation = self.operation,
            member,
            kind = %error.kind(),
            "member request failed: {}",
            error
        );
        self.captured.lock().push(CapturedError {
            member: member.to_string(),
            error,
        });
    }

    /// Count a usable result from `member`
    pub fn record_success(&self, member: &str) {
        debug!(operation = self.operation, member, "member contributed a result");
        self.tracker.succeeded();
    }

    /// True if at least one error was captured
    pub fn has_errors(&self) -> bool {
        !self.captured.lock().is_empty()
    }

    /// Copy of every captured error, in capture order
    pub fn captured_errors(&self) -> Vec<CapturedError> {
        self.captured.lock().clone()
    }

    /// The highest-precedence captured error, if any
    pub fn best_error(&self) -> Option<CohortError> {
        let captured = self.captured.lock();
        self.precedence
            .select(captured.iter().map(|c| (c.member.as_str(), &c.error)))
            .cloned()
    }

    /// Current state of the request
    pub fn state(&self) -> AccumulatorState {
        self.tracker.state(self.has_errors())
    }
}
