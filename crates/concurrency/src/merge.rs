//! Identity merge rules
//!
//! When several members return the same identity (home copy plus reference
//! copies) exactly one copy survives:
//!
//! 1. higher version wins
//! 2. equal version: later update time wins
//! 3. still equal: the copy reported by its home member wins
//! 4. still equal: the copy reported by the smallest member id wins
//!
//! Rule 4 makes the outcome independent of arrival order. Identical copies
//! collapse into one.

use chrono::{DateTime, Utc};
use cohort_core::{Classification, Guid, Instance, PagingParams};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// A value together with the member that reported it
#[derive(Debug, Clone, PartialEq)]
pub struct Reported<T> {
    /// The reported value
    pub value: T,
    /// Member that returned it
    pub reported_by: String,
}

impl<T> Reported<T> {
    /// Pair a value with its reporter
    pub fn new(value: T, reported_by: impl Into<String>) -> Self {
        Reported {
            value,
            reported_by: reported_by.into(),
        }
    }
}

fn merge_order(
    version: (u64, u64),
    changed: (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
    from_home: (bool, bool),
    member: (&str, &str),
) -> Ordering {
    version
        .0
        .cmp(&version.1)
        .then_with(|| changed.0.cmp(&changed.1))
        .then_with(|| from_home.0.cmp(&from_home.1))
        // Smaller member id wins, so reverse the natural order
        .then_with(|| member.1.cmp(member.0))
}

/// True if `candidate` should replace `current`
pub fn supersedes<I: Instance>(candidate: &Reported<I>, current: &Reported<I>) -> bool {
    let a = candidate.value.header();
    let b = current.value.header();
    merge_order(
        (a.version, b.version),
        (a.last_changed(), b.last_changed()),
        (
            candidate.reported_by == a.metadata_collection_id,
            current.reported_by == b.metadata_collection_id,
        ),
        (candidate.reported_by.as_str(), current.reported_by.as_str()),
    ) == Ordering::Greater
}

/// True if `candidate` should replace `current` for the same classification name
pub fn classification_supersedes(
    candidate: &Reported<Classification>,
    current: &Reported<Classification>,
) -> bool {
    let a = &candidate.value;
    let b = &current.value;
    merge_order(
        (a.version, b.version),
        (a.update_time.or(a.create_time), b.update_time.or(b.create_time)),
        (
            candidate.reported_by == a.metadata_collection_id,
            current.reported_by == b.metadata_collection_id,
        ),
        (candidate.reported_by.as_str(), current.reported_by.as_str()),
    ) == Ordering::Greater
}

/// Identity-keyed merge of instances from many members
#[derive(Debug)]
pub struct InstanceMerge<I> {
    merged: FxHashMap<Guid, Reported<I>>,
    contributors: FxHashMap<Guid, BTreeSet<String>>,
}

impl<I> Default for InstanceMerge<I> {
    fn default() -> Self {
        InstanceMerge {
            merged: FxHashMap::default(),
            contributors: FxHashMap::default(),
        }
    }
}

impl<I: Instance + Clone> InstanceMerge<I> {
    /// Create an empty merge
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer one member's copy; returns true if it is now the surviving copy
    pub fn offer(&mut self, member: &str, instance: I) -> bool {
        let guid = instance.guid().clone();
        self.contributors
            .entry(guid.clone())
            .or_default()
            .insert(member.to_string());
        let candidate = Reported::new(instance, member);
        match self.merged.get(&guid) {
            Some(current) if !supersedes(&candidate, current) => false,
            _ => {
                self.merged.insert(guid, candidate);
                true
            }
        }
    }

    /// Number of distinct identities
    pub fn len(&self) -> usize {
        self.merged.len()
    }

    /// True if nothing has been merged
    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    /// The surviving copy of one identity
    pub fn get(&self, guid: &Guid) -> Option<&Reported<I>> {
        self.merged.get(guid)
    }

    /// Members that returned the identity
    pub fn contributors(&self, guid: &Guid) -> BTreeSet<String> {
        self.contributors.get(guid).cloned().unwrap_or_default()
    }

    /// Surviving copies in the requested order
    pub fn sequenced(&self, paging: &PagingParams) -> Vec<I> {
        let mut items: Vec<I> = self.merged.values().map(|r| r.value.clone()).collect();
        cohort_core::sort_instances(&mut items, paging);
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{EntityDetail, InstanceType, TypeDefCategory};

    fn entity(guid: &str, home: &str, version: u64) -> EntityDetail {
        EntityDetail::new(
            guid,
            InstanceType::new("t", "Thing", TypeDefCategory::Entity),
            home,
        )
        .with_version(version)
    }

    #[test]
    fn test_higher_version_wins_either_order() {
        let mut merge = InstanceMerge::new();
        merge.offer("ref", entity("e", "home", 7));
        merge.offer("home", entity("e", "home", 3));
        assert_eq!(merge.get(&Guid::from("e")).unwrap().value.version(), 7);

        let mut merge = InstanceMerge::new();
        merge.offer("home", entity("e", "home", 3));
        merge.offer("ref", entity("e", "home", 7));
        assert_eq!(merge.get(&Guid::from("e")).unwrap().value.version(), 7);
    }

    #[test]
    fn test_equal_version_prefers_home_copy() {
        let mut merge = InstanceMerge::new();
        merge.offer("a-ref", entity("e", "z-home", 2));
        merge.offer("z-home", entity("e", "z-home", 2));
        assert_eq!(merge.get(&Guid::from("e")).unwrap().reported_by, "z-home");

        let mut merge = InstanceMerge::new();
        merge.offer("z-home", entity("e", "z-home", 2));
        merge.offer("a-ref", entity("e", "z-home", 2));
        assert_eq!(merge.get(&Guid::from("e")).unwrap().reported_by, "z-home");
    }

    #[test]
    fn test_identical_copies_collapse() {
        let mut merge = InstanceMerge::new();
        merge.offer("r1", entity("e", "elsewhere", 1));
        merge.offer("r2", entity("e", "elsewhere", 1));
        assert_eq!(merge.len(), 1);
        assert_eq!(merge.get(&Guid::from("e")).unwrap().reported_by, "r1");
        assert_eq!(merge.contributors(&Guid::from("e")).len(), 2);
    }

    #[test]
    fn test_classification_home_copy_wins_tie() {
        let at_home = Reported::new(Classification::new("Confidential", "r3"), "r3");
        let copied = Reported::new(Classification::new("Confidential", "r3"), "r1");
        assert!(classification_supersedes(&at_home, &copied));
        assert!(!classification_supersedes(&copied, &at_home));
    }
}
