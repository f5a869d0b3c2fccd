//! Multi-contributor query accumulators
//!
//! Each member returns up to `from + size + 1` elements of its own ordering.
//! The accumulator merges them by identity, sorts the union by the caller's
//! sequencing order and cuts the caller's page out of it. A query only fails
//! if no member succeeded.
//!
//! A member's window is cut on its own copies. A reference copy that sorts
//! differently from its home copy can therefore reach the window while the
//! home copy stayed behind the home member's cut.
//! A stale copy can also take a slot in a member's window and push that
//! member's own copies out. The merged order is only trusted up to the
//! earliest cut any member made.
//! [`InstancesAccumulator::needs_full_merge`] checks both; the caller then
//! repeats the query with [`InstancesAccumulator::full_merge`].

use crate::base::AccumulatorBase;
use crate::merge::{supersedes, InstanceMerge, Reported};
use crate::precedence::PrecedenceTable;
use cohort_core::{
    compare_instances, sort_history, CohortResult, Guid, HistoryParams, Instance, Page, PagingParams,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Merged results of an entity or relationship query
#[derive(Debug)]
pub struct InstancesAccumulator<I> {
    base: AccumulatorBase,
    paging: PagingParams,
    member_paging: PagingParams,
    merge: Mutex<InstanceMerge<I>>,
    // Earliest last element of any member that filled its whole window
    cut: Mutex<Option<I>>,
}

impl<I: Instance + Clone> InstancesAccumulator<I> {
    /// Create an accumulator for one query page
    pub fn new(operation: &'static str, paging: PagingParams) -> Self {
        let member_paging = paging.for_member();
        Self::with_member_paging(operation, paging, member_paging)
    }

    /// Create an accumulator that asks every member for its whole matching set
    pub fn full_merge(operation: &'static str, paging: PagingParams) -> Self {
        let member_paging = paging.for_full_merge();
        Self::with_member_paging(operation, paging, member_paging)
    }

    fn with_member_paging(
        operation: &'static str,
        paging: PagingParams,
        member_paging: PagingParams,
    ) -> Self {
        InstancesAccumulator {
            base: AccumulatorBase::new(operation, PrecedenceTable::QUERY),
            paging,
            member_paging,
            merge: Mutex::new(InstanceMerge::new()),
            cut: Mutex::new(None),
        }
    }

    /// Errors and progress
    pub fn base(&self) -> &AccumulatorBase {
        &self.base
    }

    /// The caller's paging parameters
    pub fn paging(&self) -> &PagingParams {
        &self.paging
    }

    /// Paging parameters sent to each member
    pub fn member_paging(&self) -> &PagingParams {
        &self.member_paging
    }

    /// Record one member's results.
    ///
    /// Instances outside the caller's status filter are dropped.
    pub fn record_instances(&self, member: &str, instances: Vec<I>) {
        let Some(_admitted) = self.base.admit(member) else {
            return;
        };
        if let Some(reach) = self.member_paging.reach() {
            if instances.len() >= reach {
                if let Some(last) = instances.last() {
                    self.note_cut(last);
                }
            }
        }
        {
            let mut merge = self.merge.lock();
            for instance in instances {
                if self.paging.admits(instance.header().status) {
                    merge.offer(member, instance);
                }
            }
        }
        self.base.record_success(member);
    }

    fn note_cut(&self, last: &I) {
        let mut cut = self.cut.lock();
        let earlier = match cut.as_ref() {
            Some(current) => self.compare(last, current) == Ordering::Less,
            None => true,
        };
        if earlier {
            *cut = Some(last.clone());
        }
    }

    fn compare(&self, a: &I, b: &I) -> Ordering {
        compare_instances(
            a,
            b,
            self.paging.sequencing_order,
            self.paging.sequencing_property.as_deref(),
        )
    }

    /// Record a member that succeeded with nothing to contribute
    pub fn record_no_instances(&self, member: &str) {
        self.record_instances(member, Vec::new());
    }

    /// Members that returned `guid`
    pub fn contributors_of(&self, guid: &Guid) -> BTreeSet<String> {
        self.merge.lock().contributors(guid)
    }

    /// Member whose copy of `guid` survived the merge
    pub fn reporter_of(&self, guid: &Guid) -> Option<String> {
        self.merge.lock().get(guid).map(|r| r.reported_by.clone())
    }

    /// Identities in the part of the merged order that decides the caller's
    /// page whose surviving copy did not come from their home member,
    /// although the home member answered this query.
    ///
    /// Always empty when members already returned their whole sets.
    pub fn unconfirmed_in_window(&self) -> Vec<Guid> {
        let reach = match self.member_paging.reach() {
            Some(reach) => reach,
            None => return Vec::new(),
        };
        let failed: BTreeSet<String> = self
            .base
            .captured_errors()
            .into_iter()
            .map(|c| c.member)
            .collect();
        let answered: BTreeSet<String> = self
            .base
            .tracker()
            .reported()
            .into_iter()
            .filter(|m| !failed.contains(m))
            .collect();
        let merge = self.merge.lock();
        merge
            .sequenced(&self.paging)
            .iter()
            .take(reach)
            .filter(|instance| {
                let home = instance.home_metadata_collection_id();
                answered.contains(home) && !merge.contributors(instance.guid()).contains(home)
            })
            .map(|instance| instance.guid().clone())
            .collect()
    }

    /// Whether the merged windows may differ from merging every member's
    /// whole set.
    ///
    /// True when a reference copy in the deciding part of the order is
    /// unconfirmed, or when fewer than `from + size + 1` merged elements sort
    /// at or before the earliest member cut.
    pub fn needs_full_merge(&self) -> bool {
        let Some(reach) = self.member_paging.reach() else {
            return false;
        };
        if !self.unconfirmed_in_window().is_empty() {
            return true;
        }
        let Some(cut) = self.cut.lock().clone() else {
            return false;
        };
        let settled = self
            .merge
            .lock()
            .sequenced(&self.paging)
            .iter()
            .take_while(|instance| self.compare(instance, &cut) != Ordering::Greater)
            .count();
        settled < reach
    }

    /// The caller's page, or the best error if no member succeeded
    pub fn results(&self) -> CohortResult<Page<I>> {
        if self.base.tracker().successes() == 0 {
            if let Some(error) = self.base.best_error() {
                return Err(error);
            }
        }
        let sequenced = self.merge.lock().sequenced(&self.paging);
        Ok(self.paging.window(sequenced))
    }
}

/// Merged version history of one instance
///
/// Versions are keyed by `(guid, version)`; the same version reported by
/// several members collapses into one.
#[derive(Debug)]
pub struct HistoryAccumulator<I> {
    base: AccumulatorBase,
    params: HistoryParams,
    versions: Mutex<FxHashMap<u64, Reported<I>>>,
}

impl<I: Instance + Clone> HistoryAccumulator<I> {
    /// Create an accumulator for one history page
    pub fn new(operation: &'static str, params: HistoryParams) -> Self {
        HistoryAccumulator {
            base: AccumulatorBase::new(operation, PrecedenceTable::QUERY),
            params,
            versions: Mutex::new(FxHashMap::default()),
        }
    }

    /// Errors and progress
    pub fn base(&self) -> &AccumulatorBase {
        &self.base
    }

    /// Record the versions one member holds
    pub fn record_versions(&self, member: &str, versions: Vec<I>) {
        let Some(_admitted) = self.base.admit(member) else {
            return;
        };
        {
            let mut merged = self.versions.lock();
            for version in versions {
                let key = version.version();
                let candidate = Reported::new(version, member);
                let replace = match merged.get(&key) {
                    Some(current) => supersedes(&candidate, current),
                    None => true,
                };
                if replace {
                    merged.insert(key, candidate);
                }
            }
        }
        self.base.record_success(member);
    }

    /// The caller's page of history, or the best error
    pub fn results(&self) -> CohortResult<Page<I>> {
        if self.base.tracker().successes() == 0 {
            if let Some(error) = self.base.best_error() {
                return Err(error);
            }
        }
        let mut sequenced: Vec<I> = self
            .versions
            .lock()
            .values()
            .map(|r| r.value.clone())
            .collect();
        sort_history(&mut sequenced, self.params.order);
        Ok(self.params.window(sequenced))
    }
}
