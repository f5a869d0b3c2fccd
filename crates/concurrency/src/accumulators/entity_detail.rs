//! Two-phase entity retrieval
//!
//! Phase one asks every member for the entity. Copies are merged by the
//! identity rules; classifications are kept from three sources:
//!
//! ```text
//! winning copy's classifications          (as reported)
//! classifications homed at the reporter   (from any copy)
//! get_home_classifications results        (phase two, or proxy-only members)
//! ```
//!
//! and merged by name. A member that answered with a proxy only, or that has
//! not contributed a copy at all, may still hold classifications homed there;
//! phase two asks those members for them once an entity is known to exist.

use crate::base::AccumulatorBase;
use crate::merge::{classification_supersedes, supersedes, Reported};
use crate::precedence::PrecedenceTable;
use cohort_core::{Classification, CohortError, CohortResult, EntityDetail, Guid, Instance};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct RetrievalState {
    entity: Option<Reported<EntityDetail>>,
    contributing: BTreeSet<String>,
    classification_checked: BTreeSet<String>,
    classifications: FxHashMap<String, Reported<Classification>>,
}

impl RetrievalState {
    fn offer_classification(&mut self, member: &str, classification: Classification) {
        let candidate = Reported::new(classification, member);
        match self.classifications.get(&candidate.value.name) {
            Some(current) if !classification_supersedes(&candidate, current) => {}
            _ => {
                self.classifications
                    .insert(candidate.value.name.clone(), candidate);
            }
        }
    }
}

/// Accumulates one entity's copies and classifications
#[derive(Debug)]
pub struct EntityDetailAccumulator {
    base: AccumulatorBase,
    guid: Guid,
    state: Mutex<RetrievalState>,
}

impl EntityDetailAccumulator {
    /// Create an accumulator for `guid`
    pub fn new(operation: &'static str, guid: Guid) -> Self {
        EntityDetailAccumulator {
            base: AccumulatorBase::new(operation, PrecedenceTable::RETRIEVAL),
            guid,
            state: Mutex::new(RetrievalState::default()),
        }
    }

    /// Create an accumulator already holding a merged copy.
    ///
    /// Used to top up query results with classifications homed at members
    /// other than the ones that returned the entity.
    pub fn seeded(
        operation: &'static str,
        entity: EntityDetail,
        reported_by: &str,
        contributors: BTreeSet<String>,
    ) -> Self {
        let acc = Self::new(operation, entity.guid().clone());
        {
            let mut state = acc.state.lock();
            for classification in &entity.classifications {
                if classification.metadata_collection_id == reported_by {
                    state.offer_classification(reported_by, classification.clone());
                }
            }
            state.contributing = contributors;
            state.entity = Some(Reported::new(entity, reported_by));
        }
        acc
    }

    /// Errors and progress
    pub fn base(&self) -> &AccumulatorBase {
        &self.base
    }

    /// Entity being retrieved
    pub fn guid(&self) -> &Guid {
        &self.guid
    }

    /// Record a full copy from `member`.
    ///
    /// Returns true if the copy came from its home member, which makes the
    /// request satisfied.
    pub fn record_entity(&self, member: &str, entity: EntityDetail) -> bool {
        let Some(_admitted) = self.base.admit(member) else {
            return false;
        };
        if entity.guid() != &self.guid {
            self.base.capture_error(
                member,
                CohortError::repository_error(format!(
                    "asked for entity {} but received {}",
                    self.guid,
                    entity.guid()
                )),
            );
            return false;
        }
        let authoritative = entity.home_metadata_collection_id() == member;
        {
            let mut state = self.state.lock();
            state.contributing.insert(member.to_string());
            for classification in &entity.classifications {
                if classification.metadata_collection_id == member {
                    state.offer_classification(member, classification.clone());
                }
            }
            let candidate = Reported::new(entity, member);
            let replace = match state.entity.as_ref() {
                Some(current) => supersedes(&candidate, current),
                None => true,
            };
            if replace {
                state.entity = Some(candidate);
            }
        }
        self.base.record_success(member);
        if authoritative {
            debug!(
                operation = self.base.operation(),
                member,
                guid = %self.guid,
                "home copy received"
            );
            self.base.tracker().satisfy();
        }
        authoritative
    }

    /// Record that `member` only holds a proxy for the entity
    pub fn record_proxy_only(&self, member: &str, error: CohortError) {
        self.base.capture_error(member, error);
    }

    /// Record classifications homed at `member`.
    ///
    /// Accepted until the result is sealed, so members that were not awaited
    /// in phase one can still contribute in phase two.
    pub fn record_home_classifications(&self, member: &str, classifications: Vec<Classification>) {
        if self.base.tracker().is_sealed() {
            return;
        }
        let mut state = self.state.lock();
        state.classification_checked.insert(member.to_string());
        for classification in classifications {
            if classification.metadata_collection_id != member {
                debug!(
                    member,
                    classification = classification.name.as_str(),
                    home = classification.metadata_collection_id.as_str(),
                    "ignoring classification not homed at the reporting member"
                );
                continue;
            }
            state.offer_classification(member, classification);
        }
    }

    /// Note a failed classification lookup; never surfaced to the caller
    pub fn record_classification_failure(&self, member: &str, error: CohortError) {
        let mut state = self.state.lock();
        state.classification_checked.insert(member.to_string());
        warn!(
            operation = self.base.operation(),
            member,
            guid = %self.guid,
            "home classification lookup failed: {}",
            error
        );
    }

    /// True if some member returned a copy
    pub fn has_entity(&self) -> bool {
        self.state.lock().entity.is_some()
    }

    /// Members that returned a copy
    pub fn contributing(&self) -> BTreeSet<String> {
        self.state.lock().contributing.clone()
    }

    /// True if a copy was found and `member` neither returned it nor was
    /// already asked for home classifications
    pub fn needs_classifications_from(&self, member: &str) -> bool {
        let state = self.state.lock();
        state.entity.is_some()
            && !state.contributing.contains(member)
            && !state.classification_checked.contains(member)
    }

    /// Members from `members` that still need a home classification lookup.
    ///
    /// Empty when no copy was found.
    pub fn phase_two_members(&self, members: &[String]) -> Vec<String> {
        let state = self.state.lock();
        if state.entity.is_none() {
            return Vec::new();
        }
        members
            .iter()
            .filter(|m| !state.contributing.contains(*m))
            .filter(|m| !state.classification_checked.contains(*m))
            .cloned()
            .collect()
    }

    /// Merged entity, the best error, or `None` if nothing was reported
    pub fn result(&self) -> CohortResult<Option<EntityDetail>> {
        let state = self.state.lock();
        let winner = match state.entity.as_ref() {
            Some(winner) => winner,
            None => {
                return match self.base.best_error() {
                    Some(error) => Err(error),
                    None => Ok(None),
                }
            }
        };
        let mut merged = state.classifications.clone();
        for classification in &winner.value.classifications {
            let candidate = Reported::new(classification.clone(), winner.reported_by.as_str());
            match merged.get(&classification.name) {
                Some(current) if !classification_supersedes(&candidate, current) => {}
                _ => {
                    merged.insert(classification.name.clone(), candidate);
                }
            }
        }
        let mut entity = winner.value.clone();
        let mut classifications: Vec<Classification> =
            merged.into_values().map(|r| r.value).collect();
        classifications.sort_by(|a, b| a.name.cmp(&b.name));
        entity.classifications = classifications;
        Ok(Some(entity))
    }
}
