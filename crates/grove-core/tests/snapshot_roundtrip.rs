// SPDX-License-Identifier: MIT
//! Snapshot codec round trips.
#![allow(clippy::unwrap_used)]

mod common;

use common::{fresh, nid};
use grove_core::cmd::{self, ModifyFlags, ModifyOp, SetItem, SetOp};
use grove_core::{snapshot, ConstraintId, DetachedKind, GroveError, Hierarchy};

fn build(h: &mut Hierarchy) {
    let flags = ModifyFlags::parse("N").unwrap();
    cmd::modify(
        &mut *h,
        nid("a"),
        flags,
        &[
            ("title".to_owned(), ModifyOp::SetString("hello".to_owned())),
            ("score".to_owned(), ModifyOp::SetDouble(2.5)),
            ("count".to_owned(), ModifyOp::SetLong(7)),
        ],
    )
    .unwrap();
    cmd::modify(
        &mut *h,
        nid("b"),
        ModifyFlags::default(),
        &[(
            "tags".to_owned(),
            ModifyOp::Set(SetOp {
                add: vec![SetItem::Str("x".into()), SetItem::Str("y".into())],
                ..SetOp::default()
            }),
        )],
    )
    .unwrap();
    h.add_hierarchy(nid("b"), &[nid("a")], &[], true).unwrap();
    cmd::modify(&mut *h, nid("c"), ModifyFlags::default(), &[]).unwrap();

    cmd::edge_add_constraint(&mut *h, "aa", "likes", 0x00, 0, "", "").unwrap();
    h.edge_add(nid("a"), "refs", ConstraintId::DEFAULT, nid("c"))
        .unwrap();
    h.edge_metadata_mut(nid("a"), "refs", nid("c"))
        .unwrap()
        .set_long("w", 3)
        .unwrap();
}

fn assert_equivalent(a: &mut Hierarchy, b: &mut Hierarchy) {
    assert_eq!(cmd::heads(a), cmd::heads(b));
    let ids: Vec<_> = cmd::heads(a);
    for id in ids {
        assert_eq!(
            cmd::children(a, id).unwrap(),
            cmd::children(b, id).unwrap(),
            "children of {id}"
        );
    }
    for id in [nid("a"), nid("b"), nid("c")] {
        let an = a.node(&id).unwrap();
        let bn = b.node(&id).unwrap();
        assert_eq!(an.object(), bn.object(), "object of {id}");
        assert_eq!(
            an.parents().collect::<Vec<_>>(),
            bn.parents().collect::<Vec<_>>(),
            "parents of {id}"
        );
        assert_eq!(
            an.children().collect::<Vec<_>>(),
            bn.children().collect::<Vec<_>>(),
            "children of {id}"
        );
    }
}

#[test]
fn full_round_trip() {
    let mut h = fresh();
    build(&mut h);

    let bytes = snapshot::save(&mut h).unwrap();
    let mut loaded = fresh();
    snapshot::load(&mut loaded, &bytes).unwrap();

    assert_equivalent(&mut h, &mut loaded);
    assert!(loaded.check_invariants().is_empty());

    // Edges and constraints survive.
    let (constraint, ids) = cmd::edge_get(&mut loaded, nid("a"), "refs")
        .unwrap()
        .unwrap();
    assert_eq!(constraint, ConstraintId::DEFAULT);
    assert_eq!(ids, vec![nid("c")]);
    let meta = cmd::edge_get_metadata(&mut loaded, nid("a"), "refs", nid("c"))
        .unwrap()
        .unwrap();
    assert_eq!(meta.get_long("w").unwrap(), 3);
    assert_eq!(loaded.constraints().dynamic_len(), 1);
}

#[test]
fn detached_roots_stay_detached_across_save() {
    let mut h = fresh();
    build(&mut h);
    // A small detachable subtree without edges.
    cmd::modify(&mut h, nid("d"), ModifyFlags::default(), &[]).unwrap();
    cmd::modify(&mut h, nid("d1"), ModifyFlags::parse("N").unwrap(), &[]).unwrap();
    h.add_hierarchy(nid("d1"), &[nid("d")], &[], true).unwrap();
    h.detach_subtree(nid("d"), DetachedKind::Mem).unwrap();

    let bytes = snapshot::save(&mut h).unwrap();
    let mut loaded = fresh();
    snapshot::load(&mut loaded, &bytes).unwrap();

    // Still detached after the load, with member indexing intact.
    let compressed = loaded.list_compressed();
    assert!(compressed.contains(&nid("d")));
    assert!(compressed.contains(&nid("d1")));
    assert!(loaded.node(&nid("d")).unwrap().is_detached());

    // And still restorable.
    assert_eq!(cmd::children(&mut loaded, nid("d")).unwrap(), vec![nid("d1")]);
    assert!(loaded.check_invariants().is_empty());
}

#[test]
fn alias_index_is_rebuilt_on_load() {
    let mut h = fresh();
    cmd::modify(
        &mut h,
        nid("x"),
        ModifyFlags::default(),
        &[(
            "aliases".to_owned(),
            ModifyOp::Set(SetOp {
                add: vec![SetItem::Str("nick".into())],
                ..SetOp::default()
            }),
        )],
    )
    .unwrap();

    let bytes = snapshot::save(&mut h).unwrap();
    let mut loaded = fresh();
    snapshot::load(&mut loaded, &bytes).unwrap();
    assert_eq!(loaded.resolve_alias("nick"), Some(nid("x")));
    assert_eq!(
        cmd::resolve_node_id(&loaded, &["nick".to_owned()]).unwrap(),
        nid("x")
    );
}

#[test]
fn garbage_input_is_rejected() {
    let mut h = fresh();
    assert_eq!(
        snapshot::load(&mut h, b"not a snapshot"),
        Err(GroveError::InvalidArgument)
    );
    assert_eq!(snapshot::load(&mut h, &[]), Err(GroveError::InvalidArgument));
}

#[test]
fn newer_versions_are_rejected() {
    let mut h = fresh();
    let mut bytes = snapshot::save(&mut h).unwrap();
    // Bump the version field past the current encoding.
    bytes[4] = 0xff;
    let mut loaded = fresh();
    assert_eq!(
        snapshot::load(&mut loaded, &bytes),
        Err(GroveError::InvalidArgument)
    );
}

#[test]
fn save_is_deterministic() {
    let mut h1 = fresh();
    build(&mut h1);
    let mut h2 = fresh();
    build(&mut h2);
    assert_eq!(
        snapshot::save(&mut h1).unwrap(),
        snapshot::save(&mut h2).unwrap()
    );
}
