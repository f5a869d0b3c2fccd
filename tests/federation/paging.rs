//! Cross-Member Paging Tests
//!
//! Every member pages its own share of the result set. The federated page
//! must equal the page cut from the globally merged and sorted set.

use crate::common::*;
use proptest::prelude::*;
use std::cmp::Ordering;
use std::sync::Arc;

const MEMBER_IDS: [&str; 3] = ["r1", "r2", "r3"];

/// One generated entity: its `rank` property and which members hold a copy
#[derive(Debug, Clone)]
struct Placement {
    rank: i64,
    holders: u8,
}

fn placement_strategy() -> impl Strategy<Value = Placement> {
    (0i64..12, 1u8..8).prop_map(|(rank, holders)| Placement { rank, holders })
}

fn order_strategy() -> impl Strategy<Value = SequencingOrder> {
    prop_oneof![
        Just(SequencingOrder::Any),
        Just(SequencingOrder::Guid),
        Just(SequencingOrder::PropertyAscending),
        Just(SequencingOrder::PropertyDescending),
    ]
}

fn guid_of(index: usize) -> String {
    format!("e{:03}", index)
}

/// Seed the members; every copy of an entity is identical and homed at its
/// first holder
fn seed(placements: &[Placement]) -> Vec<Arc<InMemoryCollection>> {
    let members: Vec<Arc<InMemoryCollection>> = MEMBER_IDS.iter().map(|id| member(id)).collect();
    for (index, placement) in placements.iter().enumerate() {
        let holders: Vec<usize> = (0..MEMBER_IDS.len())
            .filter(|bit| placement.holders & (1 << bit) != 0)
            .collect();
        let home = MEMBER_IDS[holders[0]];
        let entity = asset(&guid_of(index), home).with_property("rank", placement.rank);
        for holder in holders {
            members[holder].save_entity(entity.clone());
        }
    }
    members
}

/// Seed the members with drifted reference copies: the home copy is at
/// version 2 with the placement's rank, every other holder keeps version 1
/// with `stale_ranks[index]`
fn seed_drifted(placements: &[Placement], stale_ranks: &[i64]) -> Vec<Arc<InMemoryCollection>> {
    let members: Vec<Arc<InMemoryCollection>> = MEMBER_IDS.iter().map(|id| member(id)).collect();
    for (index, placement) in placements.iter().enumerate() {
        let holders: Vec<usize> = (0..MEMBER_IDS.len())
            .filter(|bit| placement.holders & (1 << bit) != 0)
            .collect();
        let home = MEMBER_IDS[holders[0]];
        let guid = guid_of(index);
        members[holders[0]].save_entity(
            asset(&guid, home)
                .with_property("rank", placement.rank)
                .with_version(2),
        );
        for &holder in &holders[1..] {
            members[holder].save_entity(
                asset(&guid, home)
                    .with_property("rank", stale_ranks[index])
                    .with_version(1),
            );
        }
    }
    members
}

fn paging_for(order: SequencingOrder, from: usize, size: usize) -> PagingParams {
    let paging = PagingParams::page(from, size);
    match order {
        SequencingOrder::PropertyAscending => paging.ordered_by_property("rank", false),
        SequencingOrder::PropertyDescending => paging.ordered_by_property("rank", true),
        other => paging.ordered_by(other),
    }
}

/// The page computed without any federation: sort everything, then slice
fn expected_page(
    placements: &[Placement],
    order: SequencingOrder,
    from: usize,
    size: usize,
) -> (Vec<String>, bool) {
    let mut all: Vec<(i64, String)> = placements
        .iter()
        .enumerate()
        .map(|(index, p)| (p.rank, guid_of(index)))
        .collect();
    all.sort_by(|a, b| {
        let primary = match order {
            SequencingOrder::PropertyAscending => a.0.cmp(&b.0),
            SequencingOrder::PropertyDescending => b.0.cmp(&a.0),
            _ => Ordering::Equal,
        };
        primary.then_with(|| a.1.cmp(&b.1))
    });
    let total = all.len();
    if from >= total {
        return (Vec::new(), false);
    }
    let end = if size == 0 { total } else { (from + size).min(total) };
    let page = all[from..end].iter().map(|(_, guid)| guid.clone()).collect();
    (page, end < total)
}

// ============================================================================
// Merged paging equals global paging
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Test: for any spread of copies, order, offset and page size the
    /// federated page matches the globally sorted slice
    #[test]
    fn prop_federated_page_matches_global_slice(
        placements in prop::collection::vec(placement_strategy(), 0..20),
        order in order_strategy(),
        from in 0usize..24,
        size in 0usize..8,
        parallel in any::<bool>(),
    ) {
        let members = seed(&placements);
        let federation = federation(
            FederationConfig {
                parallel_queries: parallel,
                augment_query_classifications: false,
                ..test_config()
            },
            &members,
        );
        let page = federation
            .find_entities_by_property(USER, None, None, &[], &paging_for(order, from, size))
            .unwrap();
        let (expected, more) = expected_page(&placements, order, from, size);
        prop_assert_eq!(guids(&page.items), expected);
        prop_assert_eq!(page.more_available, more);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Test: reference copies that sort differently from their home copy
    /// never change which entities land on the page
    #[test]
    fn prop_drifted_copies_match_global_slice(
        drifted in prop::collection::vec((placement_strategy(), 0i64..12), 0..20),
        descending in any::<bool>(),
        from in 0usize..12,
        size in 1usize..6,
    ) {
        let (placements, stale_ranks): (Vec<Placement>, Vec<i64>) = drifted.into_iter().unzip();
        let members = seed_drifted(&placements, &stale_ranks);
        let federation = federation(
            FederationConfig {
                augment_query_classifications: false,
                ..test_config()
            },
            &members,
        );
        let order = if descending {
            SequencingOrder::PropertyDescending
        } else {
            SequencingOrder::PropertyAscending
        };
        let page = federation
            .find_entities_by_property(USER, None, None, &[], &paging_for(order, from, size))
            .unwrap();
        let (expected, more) = expected_page(&placements, order, from, size);
        prop_assert_eq!(guids(&page.items), expected);
        prop_assert_eq!(page.more_available, more);
    }
}

// ============================================================================
// Boundaries
// ============================================================================

fn five_spread() -> Vec<Arc<InMemoryCollection>> {
    seed(&[
        Placement { rank: 3, holders: 0b001 },
        Placement { rank: 1, holders: 0b010 },
        Placement { rank: 4, holders: 0b100 },
        Placement { rank: 1, holders: 0b011 },
        Placement { rank: 5, holders: 0b111 },
    ])
}

/// Test: an offset past the end gives an empty page, not an error
#[test]
fn test_offset_beyond_end_is_empty() {
    let federation = federation(test_config(), &five_spread());
    let page = federation
        .find_entities_by_property(USER, None, None, &[], &PagingParams::page(50, 10))
        .unwrap();
    assert!(page.is_empty());
    assert!(!page.more_available);
}

/// Test: page size zero returns the whole merged set once
#[test]
fn test_unbounded_page_returns_each_entity_once() {
    let federation = federation(test_config(), &five_spread());
    let page = federation
        .find_entities_by_property(USER, None, None, &[], &PagingParams::page(0, 0))
        .unwrap();
    assert_eq!(guids(&page.items), vec!["e000", "e001", "e002", "e003", "e004"]);
    assert!(!page.more_available);
}

/// Test: the last partial page reports nothing more
#[test]
fn test_last_partial_page() {
    let federation = federation(test_config(), &five_spread());
    let page = federation
        .find_entities_by_property(
            USER,
            None,
            None,
            &[],
            &paging_for(SequencingOrder::PropertyDescending, 3, 5),
        )
        .unwrap();
    // ranks: e004=5, e002=4, e000=3, e001=1, e003=1
    assert_eq!(guids(&page.items), vec!["e001", "e003"]);
    assert!(!page.more_available);
}

/// Test: deleted instances appear only when the status filter asks for them
#[test]
fn test_status_filter() {
    let members = five_spread();
    let mut deleted = asset("e005", "r1");
    deleted.header.status = InstanceStatus::Deleted;
    members[0].save_entity(deleted);
    let federation = federation(test_config(), &members);

    let live = federation
        .find_entities_by_property(USER, None, None, &[], &PagingParams::unbounded())
        .unwrap();
    assert_eq!(live.len(), 5);

    let only_deleted = federation
        .find_entities_by_property(
            USER,
            None,
            None,
            &[],
            &PagingParams::unbounded().with_statuses(vec![InstanceStatus::Deleted]),
        )
        .unwrap();
    assert_eq!(guids(&only_deleted.items), vec!["e005"]);
}

/// Test: a stale reference copy sorting first does not displace the home
/// copy's true position
#[test]
fn test_drifted_reference_copy_does_not_displace_home_copy() {
    let placements = [
        Placement { rank: 9, holders: 0b011 },
        Placement { rank: 2, holders: 0b001 },
        Placement { rank: 3, holders: 0b001 },
    ];
    let members = seed_drifted(&placements, &[0, 0, 0]);
    let federation = federation(test_config(), &members);
    let paging = paging_for(SequencingOrder::PropertyAscending, 0, 1);
    let page = federation
        .find_entities_by_property(USER, None, None, &[], &paging)
        .unwrap();
    assert_eq!(guids(&page.items), vec!["e001"]);
    assert!(page.more_available);

    let everything = federation
        .find_entities_by_property(USER, None, None, &[], &PagingParams::unbounded())
        .unwrap();
    let home_copy = everything.items.iter().find(|e| e.guid().as_str() == "e000");
    assert_eq!(home_copy.map(|e| e.version()), Some(2));
}
