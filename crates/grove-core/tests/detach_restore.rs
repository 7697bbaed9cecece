// SPDX-License-Identifier: MIT
//! Detached subtrees: compression, transparent restore, auto-compression.
#![allow(clippy::unwrap_used)]

mod common;

use common::{fresh, nid};
use grove_core::cmd::{self, ModifyFlags, ModifyOp};
use grove_core::{
    Config, ConstraintId, DetachedKind, FixedClock, GroveError, Hierarchy, MarkerId,
    TraversalDir, ROOT_NODE_ID,
};

/// Builds root -> t0000001 -> {t0000002, t0000003 -> t0000004}.
fn build_subtree(h: &mut Hierarchy) {
    let flags = ModifyFlags::default();
    cmd::modify(
        &mut *h,
        nid("t0000001"),
        flags,
        &[("title".to_owned(), ModifyOp::SetString("top".to_owned()))],
    )
    .unwrap();
    for (id, parent) in [
        ("t0000002", "t0000001"),
        ("t0000003", "t0000001"),
        ("t0000004", "t0000003"),
    ] {
        cmd::modify(&mut *h, nid(id), ModifyFlags::parse("N").unwrap(), &[]).unwrap();
        h.add_hierarchy(nid(id), &[nid(parent)], &[], true).unwrap();
    }
}

#[test]
fn detach_restore_round_trip_scenario() {
    let mut h = fresh();
    build_subtree(&mut h);

    cmd::compress(&mut h, nid("t0000001"), DetachedKind::Mem).unwrap();
    let compressed = cmd::list_compressed(&h);
    assert_eq!(
        compressed,
        vec![nid("t0000001"), nid("t0000002"), nid("t0000003"), nid("t0000004")]
    );

    // The stub is flagged and empty.
    let stub = h.node(&nid("t0000001")).unwrap();
    assert!(stub.is_detached());
    assert_eq!(stub.children().count(), 0);
    assert_eq!(stub.parents().collect::<Vec<_>>(), vec![ROOT_NODE_ID]);

    // Accessing the subtree transparently restores it.
    let children = cmd::children(&mut h, nid("t0000001")).unwrap();
    assert_eq!(children, vec![nid("t0000002"), nid("t0000003")]);
    assert!(cmd::list_compressed(&h).is_empty());

    let top = h.node(&nid("t0000001")).unwrap();
    assert!(!top.is_detached());
    assert_eq!(top.object().get_string("title").unwrap(), "top");
    assert_eq!(
        cmd::children(&mut h, nid("t0000003")).unwrap(),
        vec![nid("t0000004")]
    );
    assert!(h.check_invariants().is_empty());
}

#[test]
fn restore_via_member_access() {
    let mut h = fresh();
    build_subtree(&mut h);
    cmd::compress(&mut h, nid("t0000001"), DetachedKind::Mem).unwrap();

    // A deep member is enough to bring the subtree back.
    assert_eq!(
        cmd::parents(&mut h, nid("t0000004")).unwrap(),
        vec![nid("t0000003")]
    );
    assert!(cmd::list_compressed(&h).is_empty());
}

#[test]
fn disk_detach_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default().with_detached_dir(dir.path());
    let mut h = Hierarchy::with_clock(config, Box::new(FixedClock::new(1_000)));
    build_subtree(&mut h);

    cmd::compress(&mut h, nid("t0000001"), DetachedKind::Disk).unwrap();
    let blobs: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(blobs.len(), 1);

    let children = cmd::children(&mut h, nid("t0000001")).unwrap();
    assert_eq!(children, vec![nid("t0000002"), nid("t0000003")]);
    // The blob file is consumed by the restore.
    let blobs: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(blobs.is_empty());
}

#[test]
fn compress_refuses_markers_and_edges() {
    let mut h = fresh();
    build_subtree(&mut h);
    cmd::modify(&mut h, nid("out"), ModifyFlags::default(), &[]).unwrap();
    h.edge_add(nid("out"), "refs", ConstraintId::DEFAULT, nid("t0000004"))
        .unwrap();
    assert_eq!(
        cmd::compress(&mut h, nid("t0000001"), DetachedKind::Mem),
        Err(GroveError::NotSupported)
    );

    h.edge_delete(nid("out"), "refs", nid("t0000004")).unwrap();
    cmd::subscriptions_add(
        &mut h,
        common::sid(1),
        MarkerId(1),
        TraversalDir::BfsDescendants,
        nid("t0000001"),
        grove_core::cmd::SubscribeArgs::default(),
    )
    .unwrap();
    cmd::subscriptions_refresh(&mut h, common::sid(1)).unwrap();
    assert_eq!(
        cmd::compress(&mut h, nid("t0000001"), DetachedKind::Mem),
        Err(GroveError::NotSupported)
    );
}

#[test]
fn compress_refuses_external_parents() {
    let mut h = fresh();
    build_subtree(&mut h);
    cmd::modify(&mut h, nid("out"), ModifyFlags::default(), &[]).unwrap();
    // t0000004 gains a parent outside the subtree.
    h.add_hierarchy(nid("t0000004"), &[nid("out")], &[], true)
        .unwrap();
    assert_eq!(
        cmd::compress(&mut h, nid("t0000001"), DetachedKind::Mem),
        Err(GroveError::InvalidArgument)
    );
}

#[test]
fn root_node_is_never_detachable() {
    let mut h = fresh();
    assert_eq!(
        cmd::compress(&mut h, ROOT_NODE_ID, DetachedKind::Mem),
        Err(GroveError::NotSupported)
    );
}

#[test]
fn writes_to_detached_stubs_are_rejected() {
    let mut h = fresh();
    build_subtree(&mut h);
    cmd::compress(&mut h, nid("t0000001"), DetachedKind::Mem).unwrap();
    assert_eq!(
        h.set_hierarchy(nid("t0000001"), &[], &[nid("zz")], true),
        Err(GroveError::NotSupported)
    );
}

#[test]
fn auto_compression_detaches_idle_chains() {
    let config = Config::default().with_idle_generations(2);
    let mut h = Hierarchy::with_clock(config, Box::new(FixedClock::new(1_000)));
    build_subtree(&mut h);

    // Age the subtree: every traversal bumps the generation counter.
    for _ in 0..8 {
        let _ = cmd::children(&mut h, ROOT_NODE_ID).unwrap();
    }

    // First tick buffers candidates, second tick detaches them. The hot
    // node t0000001 is re-stamped by every listing, so only its idle
    // children qualify.
    assert_eq!(h.auto_compress_tick(), 0);
    let detached = h.auto_compress_tick();
    assert!(detached >= 1, "expected at least one detached subtree");
    let compressed = h.list_compressed();
    assert!(compressed.contains(&nid("t0000002")));
    assert!(compressed.contains(&nid("t0000003")));
    assert!(compressed.contains(&nid("t0000004")));

    // Transparent restore still works afterwards.
    assert_eq!(
        cmd::children(&mut h, nid("t0000003")).unwrap(),
        vec![nid("t0000004")]
    );
    assert!(!h.list_compressed().contains(&nid("t0000003")));
}

#[test]
fn compression_ratio_is_recorded() {
    let mut h = fresh();
    build_subtree(&mut h);
    cmd::compress(&mut h, nid("t0000001"), DetachedKind::Mem).unwrap();
    let ratio = h.compression_ratio(&nid("t0000001")).unwrap();
    assert!(ratio >= 1.0);
}
