//! Paging, sequencing and matching parameters
//!
//! Members paginate independently, so their local page boundaries never line
//! up. The federation layer forwards one widened window to every member
//! ([`PagingParams::for_member`]), merges what comes back, re-sorts the merged
//! set with [`sort_instances`] and cuts the caller's page with
//! [`PagingParams::window`].
//!
//! The widened window is exact only while every copy of an instance sorts
//! the same way on every member. When a reference copy has drifted from its
//! home copy the federation layer repeats the query with
//! [`PagingParams::for_full_merge`].
//!
//! The comparison used here is exported so members sequence their local
//! results exactly the way the merge does.

use crate::error::{CohortError, CohortResult};
use crate::instance::{Instance, InstanceProperties, InstanceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Requested ordering of a result set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SequencingOrder {
    /// Caller does not care; results come back in GUID order
    #[default]
    Any,
    /// GUID ascending
    Guid,
    /// Newest creation time first
    CreationDateRecent,
    /// Oldest creation time first
    CreationDateOldest,
    /// Most recently updated first
    LastUpdateRecent,
    /// Least recently updated first
    LastUpdateOldest,
    /// Named property ascending
    PropertyAscending,
    /// Named property descending
    PropertyDescending,
}

/// Paging and filtering parameters for instance queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PagingParams {
    /// Index of the first element of the page
    pub from_element: usize,
    /// Maximum number of elements; 0 means unbounded
    pub page_size: usize,
    /// Property to sequence on for the property orders
    pub sequencing_property: Option<String>,
    /// Ordering of results
    pub sequencing_order: SequencingOrder,
    /// Query historical state at this time
    pub as_of_time: Option<DateTime<Utc>>,
    /// Only return instances in one of these statuses; empty means any
    pub limit_results_by_status: Vec<InstanceStatus>,
}

impl PagingParams {
    /// A page of `page_size` elements starting at `from_element`
    pub fn page(from_element: usize, page_size: usize) -> Self {
        PagingParams {
            from_element,
            page_size,
            ..PagingParams::default()
        }
    }

    /// Everything, in GUID order
    pub fn unbounded() -> Self {
        PagingParams::default()
    }

    /// Set the ordering
    pub fn ordered_by(mut self, order: SequencingOrder) -> Self {
        self.sequencing_order = order;
        self
    }

    /// Order by a named property
    pub fn ordered_by_property(mut self, property: impl Into<String>, descending: bool) -> Self {
        self.sequencing_property = Some(property.into());
        self.sequencing_order = if descending {
            SequencingOrder::PropertyDescending
        } else {
            SequencingOrder::PropertyAscending
        };
        self
    }

    /// Query state as of a point in time
    pub fn as_of(mut self, time: DateTime<Utc>) -> Self {
        self.as_of_time = Some(time);
        self
    }

    /// Restrict results to the given statuses
    pub fn with_statuses(mut self, statuses: Vec<InstanceStatus>) -> Self {
        self.limit_results_by_status = statuses;
        self
    }

    /// Reject combinations no member could honour.
    ///
    /// # Errors
    ///
    /// `PagingError` if a property order has no sequencing property.
    pub fn validate(&self) -> CohortResult<()> {
        match self.sequencing_order {
            SequencingOrder::PropertyAscending | SequencingOrder::PropertyDescending
                if self
                    .sequencing_property
                    .as_deref()
                    .map_or(true, str::is_empty) =>
            {
                Err(CohortError::PagingError {
                    reason: "property sequencing requested without a sequencing property"
                        .to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Parameters forwarded to every member.
    ///
    /// Each member must return its first `from + size` elements so that the
    /// merged set contains every element of the global page, plus one more
    /// so the merge can tell whether anything lies past the page.
    pub fn for_member(&self) -> PagingParams {
        PagingParams {
            from_element: 0,
            page_size: self.reach().unwrap_or(0),
            ..self.clone()
        }
    }

    /// Parameters forwarded to every member when the widened window cannot
    /// be trusted: each member returns its whole matching set
    pub fn for_full_merge(&self) -> PagingParams {
        PagingParams {
            from_element: 0,
            page_size: 0,
            ..self.clone()
        }
    }

    /// Number of leading merged elements that decide the caller's page,
    /// the lookahead element included; `None` when unbounded
    pub fn reach(&self) -> Option<usize> {
        if self.page_size == 0 {
            None
        } else {
            Some(
                self.from_element
                    .saturating_add(self.page_size)
                    .saturating_add(1),
            )
        }
    }

    /// True if `status` passes the status filter
    pub fn admits(&self, status: InstanceStatus) -> bool {
        self.limit_results_by_status.is_empty() || self.limit_results_by_status.contains(&status)
    }

    /// Cut the caller's page out of an already sequenced set
    pub fn window<T>(&self, sequenced: Vec<T>) -> Page<T> {
        window(sequenced, self.from_element, self.page_size)
    }
}

/// Ordering of history results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistorySequencingOrder {
    /// Newest version first
    #[default]
    BackwardsInTime,
    /// Oldest version first
    ForwardsInTime,
}

/// Parameters for history queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HistoryParams {
    /// Earliest change to include
    pub from_time: Option<DateTime<Utc>>,
    /// Latest change to include
    pub to_time: Option<DateTime<Utc>>,
    /// Index of the first element of the page
    pub from_element: usize,
    /// Maximum number of elements; 0 means unbounded
    pub page_size: usize,
    /// Ordering of versions
    pub order: HistorySequencingOrder,
}

impl HistoryParams {
    /// Full history, newest first
    pub fn all() -> Self {
        HistoryParams::default()
    }

    /// Parameters forwarded to every member, widened like
    /// [`PagingParams::for_member`]
    pub fn for_member(&self) -> HistoryParams {
        HistoryParams {
            from_element: 0,
            page_size: if self.page_size == 0 {
                0
            } else {
                self.from_element
                    .saturating_add(self.page_size)
                    .saturating_add(1)
            },
            ..self.clone()
        }
    }

    /// Cut the caller's page out of an already sequenced set
    pub fn window<T>(&self, sequenced: Vec<T>) -> Page<T> {
        window(sequenced, self.from_element, self.page_size)
    }
}

/// One page of a merged result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Elements of the page, in requested order
    pub items: Vec<T>,
    /// True when the merged set extends past this page
    pub more_available: bool,
}

impl<T> Page<T> {
    /// An empty, final page
    pub fn empty() -> Self {
        Page {
            items: Vec::new(),
            more_available: false,
        }
    }

    /// Number of elements on the page
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if the page has no elements
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Consume the page, returning its elements
    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

fn window<T>(sequenced: Vec<T>, from_element: usize, page_size: usize) -> Page<T> {
    let total = sequenced.len();
    if from_element >= total {
        return Page::empty();
    }
    let end = if page_size == 0 {
        total
    } else {
        from_element.saturating_add(page_size).min(total)
    };
    let items: Vec<T> = sequenced
        .into_iter()
        .skip(from_element)
        .take(end - from_element)
        .collect();
    Page {
        items,
        more_available: end < total,
    }
}

/// Compare two instances under the requested ordering.
///
/// Ties always fall back to GUID and then version, so the order is total.
pub fn compare_instances<I: Instance>(
    a: &I,
    b: &I,
    order: SequencingOrder,
    property: Option<&str>,
) -> Ordering {
    let primary = match order {
        SequencingOrder::Any | SequencingOrder::Guid => Ordering::Equal,
        SequencingOrder::CreationDateRecent => b.header().create_time.cmp(&a.header().create_time),
        SequencingOrder::CreationDateOldest => a.header().create_time.cmp(&b.header().create_time),
        SequencingOrder::LastUpdateRecent => b.header().last_changed().cmp(&a.header().last_changed()),
        SequencingOrder::LastUpdateOldest => a.header().last_changed().cmp(&b.header().last_changed()),
        SequencingOrder::PropertyAscending => compare_property(a, b, property, false),
        SequencingOrder::PropertyDescending => compare_property(a, b, property, true),
    };
    primary
        .then_with(|| a.guid().cmp(b.guid()))
        .then_with(|| a.version().cmp(&b.version()))
}

// Instances without the property sort last in both directions
fn compare_property<I: Instance>(a: &I, b: &I, property: Option<&str>, descending: bool) -> Ordering {
    let Some(name) = property else {
        return Ordering::Equal;
    };
    match (a.properties().get(name), b.properties().get(name)) {
        (Some(x), Some(y)) if descending => y.total_cmp(x),
        (Some(x), Some(y)) => x.total_cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sort instances in place under the paging parameters' ordering
pub fn sort_instances<I: Instance>(items: &mut [I], paging: &PagingParams) {
    let property = paging.sequencing_property.as_deref();
    items.sort_by(|a, b| compare_instances(a, b, paging.sequencing_order, property));
}

/// Sort history versions in place
pub fn sort_history<I: Instance>(items: &mut [I], order: HistorySequencingOrder) {
    items.sort_by(|a, b| {
        let ord = a
            .version()
            .cmp(&b.version())
            .then_with(|| a.header().last_changed().cmp(&b.header().last_changed()))
            .then_with(|| a.guid().cmp(b.guid()));
        match order {
            HistorySequencingOrder::ForwardsInTime => ord,
            HistorySequencingOrder::BackwardsInTime => ord.reverse(),
        }
    });
}

/// How the properties of a [`PropertyMatch`] combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchCriteria {
    /// Every property must match
    #[default]
    All,
    /// At least one property must match
    Any,
    /// No property may match
    None,
}

/// Property values to match instances against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PropertyMatch {
    /// Values to match
    pub properties: InstanceProperties,
    /// How the values combine
    pub criteria: MatchCriteria,
}

impl PropertyMatch {
    /// Match every given property exactly
    pub fn all(properties: InstanceProperties) -> Self {
        PropertyMatch {
            properties,
            criteria: MatchCriteria::All,
        }
    }

    /// Evaluate the match against a property bag.
    ///
    /// String values match on substring, others on equality.
    pub fn matches(&self, candidate: &InstanceProperties) -> bool {
        let mut hits = self.properties.iter().map(|(name, wanted)| {
            candidate.get(name).map_or(false, |actual| {
                match (wanted.as_text(), actual.as_text()) {
                    (Some(w), Some(a)) => a.contains(w),
                    _ => wanted == actual,
                }
            })
        });
        match self.criteria {
            MatchCriteria::All => hits.all(|hit| hit),
            MatchCriteria::Any => hits.any(|hit| hit),
            MatchCriteria::None => !hits.any(|hit| hit),
        }
    }
}
