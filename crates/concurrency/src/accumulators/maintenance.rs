//! Single-winner accumulators for maintenance requests
//!
//! The first member to accept a write wins and satisfies the request; every
//! other member's failure only matters if nobody wins.

use crate::base::AccumulatorBase;
use crate::merge::Reported;
use crate::precedence::PrecedenceTable;
use cohort_core::CohortResult;
use parking_lot::Mutex;
use tracing::debug;

/// Result sink for add, update, classify, delete, restore and purge requests
#[derive(Debug)]
pub struct MaintenanceAccumulator<T> {
    base: AccumulatorBase,
    winner: Mutex<Option<Reported<T>>>,
}

impl<T: Clone> MaintenanceAccumulator<T> {
    /// Create an accumulator using the maintenance precedence table
    pub fn new(operation: &'static str) -> Self {
        Self::with_precedence(operation, PrecedenceTable::MAINTENANCE)
    }

    /// Create an accumulator with an explicit precedence table
    pub fn with_precedence(operation: &'static str, precedence: PrecedenceTable) -> Self {
        MaintenanceAccumulator {
            base: AccumulatorBase::new(operation, precedence),
            winner: Mutex::new(None),
        }
    }

    /// Errors and progress
    pub fn base(&self) -> &AccumulatorBase {
        &self.base
    }

    /// Record a member's success.
    ///
    /// Returns true if this success is the winner; later successes are
    /// ignored.
    pub fn record_result(&self, member: &str, value: T) -> bool {
        let Some(_admitted) = self.base.admit(member) else {
            return false;
        };
        let mut winner = self.winner.lock();
        if let Some(existing) = winner.as_ref() {
            debug!(
                operation = self.base.operation(),
                member,
                winner = existing.reported_by.as_str(),
                "ignoring success after a winner was recorded"
            );
            return false;
        }
        *winner = Some(Reported::new(value, member));
        drop(winner);
        self.base.record_success(member);
        self.base.tracker().satisfy();
        true
    }

    /// Member whose success won, if any
    pub fn winner(&self) -> Option<String> {
        self.winner.lock().as_ref().map(|r| r.reported_by.clone())
    }

    /// The winning value, the best captured error, or `None` if neither
    pub fn result(&self) -> CohortResult<Option<T>> {
        if let Some(winner) = self.winner.lock().as_ref() {
            return Ok(Some(winner.value.clone()));
        }
        match self.base.best_error() {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }
}

/// Verdicts from type verification requests
///
/// Any member confirming the definition wins; otherwise a definite "no"
/// beats captured errors.
#[derive(Debug)]
pub struct VerificationAccumulator {
    base: AccumulatorBase,
    verdicts: Mutex<Vec<Reported<bool>>>,
}

impl VerificationAccumulator {
    /// Create an accumulator using the type management precedence table
    pub fn new(operation: &'static str) -> Self {
        VerificationAccumulator {
            base: AccumulatorBase::new(operation, PrecedenceTable::TYPE_MANAGEMENT),
            verdicts: Mutex::new(Vec::new()),
        }
    }

    /// Errors and progress
    pub fn base(&self) -> &AccumulatorBase {
        &self.base
    }

    /// Record a member's verdict; returns true if it confirmed the definition
    pub fn record_verdict(&self, member: &str, verified: bool) -> bool {
        let Some(_admitted) = self.base.admit(member) else {
            return false;
        };
        self.verdicts.lock().push(Reported::new(verified, member));
        self.base.record_success(member);
        if verified {
            self.base.tracker().satisfy();
        }
        verified
    }

    /// True if any member confirmed, false if members only denied
    pub fn result(&self) -> CohortResult<Option<bool>> {
        let verdicts = self.verdicts.lock();
        if verdicts.iter().any(|v| v.value) {
            return Ok(Some(true));
        }
        if !verdicts.is_empty() {
            return Ok(Some(false));
        }
        match self.base.best_error() {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }
}
