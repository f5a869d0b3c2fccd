//! Single-instance retrieval without classifications

use crate::base::AccumulatorBase;
use crate::merge::{supersedes, Reported};
use crate::precedence::PrecedenceTable;
use cohort_core::{CohortError, CohortResult, Guid, Instance, Relationship};
use parking_lot::Mutex;

/// Merges the copies of one instance returned by different members
#[derive(Debug)]
pub struct RetrievalAccumulator<I> {
    base: AccumulatorBase,
    guid: Guid,
    best: Mutex<Option<Reported<I>>>,
}

/// Relationship retrieval
pub type RelationshipAccumulator = RetrievalAccumulator<Relationship>;

impl<I: Instance + Clone> RetrievalAccumulator<I> {
    /// Create an accumulator for `guid`
    pub fn new(operation: &'static str, guid: Guid) -> Self {
        RetrievalAccumulator {
            base: AccumulatorBase::new(operation, PrecedenceTable::RETRIEVAL),
            guid,
            best: Mutex::new(None),
        }
    }

    /// Errors and progress
    pub fn base(&self) -> &AccumulatorBase {
        &self.base
    }

    /// Record a copy; returns true if it came from its home member
    pub fn record_instance(&self, member: &str, instance: I) -> bool {
        let Some(_admitted) = self.base.admit(member) else {
            return false;
        };
        if instance.guid() != &self.guid {
            self.base.capture_error(
                member,
                CohortError::repository_error(format!(
                    "asked for {} but received {}",
                    self.guid,
                    instance.guid()
                )),
            );
            return false;
        }
        let authoritative = instance.home_metadata_collection_id() == member;
        {
            let mut best = self.best.lock();
            let candidate = Reported::new(instance, member);
            let replace = match best.as_ref() {
                Some(current) => supersedes(&candidate, current),
                None => true,
            };
            if replace {
                *best = Some(candidate);
            }
        }
        self.base.record_success(member);
        if authoritative {
            self.base.tracker().satisfy();
        }
        authoritative
    }

    /// Surviving copy, the best error, or `None`
    pub fn result(&self) -> CohortResult<Option<I>> {
        if let Some(best) = self.best.lock().as_ref() {
            return Ok(Some(best.value.clone()));
        }
        match self.base.best_error() {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }
}
