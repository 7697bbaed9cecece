// SPDX-License-Identifier: MIT
//! Property checks over randomized relation edits.
#![allow(clippy::unwrap_used)]

mod common;

use common::nid;
use grove_core::cmd;
use grove_core::{snapshot, Config, FixedClock, Hierarchy, NodeId};
use proptest::prelude::*;

const POOL: [&str; 6] = ["n1", "n2", "n3", "n4", "n5", "n6"];

#[derive(Debug, Clone)]
enum Edit {
    Add(usize, usize),
    Del(usize, usize),
    DelNode(usize),
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0..POOL.len(), 0..POOL.len()).prop_map(|(p, c)| Edit::Add(p, c)),
        (0..POOL.len(), 0..POOL.len()).prop_map(|(p, c)| Edit::Del(p, c)),
        (0..POOL.len()).prop_map(Edit::DelNode),
    ]
}

fn apply(h: &mut Hierarchy, edits: &[Edit]) {
    for edit in edits {
        match edit {
            Edit::Add(p, c) => {
                if p != c {
                    let _ = h.add_hierarchy(nid(POOL[*c]), &[nid(POOL[*p])], &[], true);
                }
            }
            Edit::Del(p, c) => {
                let _ = h.del_hierarchy(nid(POOL[*c]), &[nid(POOL[*p])], &[]);
            }
            Edit::DelNode(n) => {
                let _ = h.del_node(nid(POOL[*n]), grove_core::DelFlags::empty());
            }
        }
    }
}

fn fresh() -> Hierarchy {
    Hierarchy::with_clock(Config::default(), Box::new(FixedClock::new(42)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_under_random_edits(edits in proptest::collection::vec(edit_strategy(), 0..40)) {
        let mut h = fresh();
        apply(&mut h, &edits);
        let problems = h.check_invariants();
        prop_assert!(problems.is_empty(), "violations: {problems:?}");
    }

    #[test]
    fn snapshots_round_trip_any_graph(edits in proptest::collection::vec(edit_strategy(), 0..40)) {
        let mut h = fresh();
        apply(&mut h, &edits);

        let bytes = snapshot::save(&mut h).unwrap();
        let mut loaded = fresh();
        snapshot::load(&mut loaded, &bytes).unwrap();

        prop_assert!(loaded.check_invariants().is_empty());
        prop_assert_eq!(cmd::heads(&h), cmd::heads(&loaded));
        let all: Vec<NodeId> = POOL.iter().map(|s| nid(s)).collect();
        for id in all {
            let a = h.node(&id).map(|n| n.children().collect::<Vec<_>>());
            let b = loaded.node(&id).map(|n| n.children().collect::<Vec<_>>());
            prop_assert_eq!(a, b, "children of {}", id);
        }

        // Loading the same bytes again is stable.
        let bytes2 = snapshot::save(&mut loaded).unwrap();
        prop_assert_eq!(bytes, bytes2);
    }
}
