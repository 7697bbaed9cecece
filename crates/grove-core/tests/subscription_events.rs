// SPDX-License-Identifier: MIT
//! Subscription engine behavior: placement, filter history, dedup, triggers,
//! missing accessors.
#![allow(clippy::unwrap_used)]

mod common;

use common::{fresh, nid, sid};
use grove_core::cmd::{self, ModifyFlags, ModifyOp, SetItem, SetOp, SubscribeArgs};
use grove_core::{
    Event, Hierarchy, MarkerId, TraversalDir, TriggerType, VecSink, ROOT_NODE_ID,
};

fn title_op(v: &str) -> (String, ModifyOp) {
    ("title".to_owned(), ModifyOp::SetString(v.to_owned()))
}

fn drain(h: &mut Hierarchy) -> Vec<Event> {
    let mut sink = VecSink::default();
    h.send_deferred_events(&mut sink);
    sink.0
}

fn subscribe_descendants(h: &mut Hierarchy, sub: u8, fields: &[&str], filter: Option<&str>) {
    cmd::subscriptions_add(
        h,
        sid(sub),
        MarkerId(1),
        TraversalDir::BfsDescendants,
        ROOT_NODE_ID,
        SubscribeArgs {
            fields: Some(fields.iter().map(|s| (*s).to_owned()).collect()),
            filter: filter.map(str::to_owned),
            ..SubscribeArgs::default()
        },
    )
    .unwrap();
    cmd::subscriptions_refresh(h, sid(sub)).unwrap();
}

#[test]
fn field_change_fires_one_update() {
    let mut h = fresh();
    cmd::modify(&mut h, nid("x000000001"), ModifyFlags::default(), &[]).unwrap();
    let _ = drain(&mut h);

    subscribe_descendants(&mut h, 1, &["title"], Some("#1"));

    cmd::modify(
        &mut h,
        nid("x000000001"),
        ModifyFlags::default(),
        &[title_op("hello")],
    )
    .unwrap();
    let events = drain(&mut h);
    assert_eq!(events, vec![Event::Update { sub: sid(1) }]);
}

#[test]
fn unrelated_field_does_not_fire() {
    let mut h = fresh();
    cmd::modify(&mut h, nid("x"), ModifyFlags::default(), &[]).unwrap();
    let _ = drain(&mut h);

    subscribe_descendants(&mut h, 1, &["title"], None);
    cmd::modify(
        &mut h,
        nid("x"),
        ModifyFlags::default(),
        &[("other".to_owned(), ModifyOp::SetLong(1))],
    )
    .unwrap();
    assert!(drain(&mut h).is_empty());
}

#[test]
fn multiple_markers_coalesce_per_subscription() {
    let mut h = fresh();
    cmd::modify(&mut h, nid("x"), ModifyFlags::default(), &[]).unwrap();
    let _ = drain(&mut h);

    for marker in 1..=3 {
        cmd::subscriptions_add(
            &mut h,
            sid(9),
            MarkerId(marker),
            TraversalDir::BfsDescendants,
            ROOT_NODE_ID,
            SubscribeArgs {
                fields: Some(vec!["title".to_owned()]),
                ..SubscribeArgs::default()
            },
        )
        .unwrap();
    }
    cmd::subscriptions_refresh(&mut h, sid(9)).unwrap();

    cmd::modify(&mut h, nid("x"), ModifyFlags::default(), &[title_op("t")]).unwrap();
    let events = drain(&mut h);
    assert_eq!(events, vec![Event::Update { sub: sid(9) }]);
}

#[test]
fn refresh_is_idempotent() {
    let mut h = fresh();
    cmd::modify(&mut h, nid("x"), ModifyFlags::default(), &[]).unwrap();
    subscribe_descendants(&mut h, 1, &["title"], None);

    let before = h.node(&nid("x")).unwrap().marker_set().len();
    cmd::subscriptions_refresh(&mut h, sid(1)).unwrap();
    cmd::subscriptions_refresh(&mut h, sid(1)).unwrap();
    let after = h.node(&nid("x")).unwrap().marker_set().len();
    assert_eq!(before, 1);
    assert_eq!(before, after);
}

#[test]
fn filter_fires_on_became_true_and_became_false() {
    let mut h = fresh();
    cmd::modify(&mut h, nid("x"), ModifyFlags::default(), &[]).unwrap();
    let _ = drain(&mut h);

    // Filter: title == "on".
    subscribe_descendants(&mut h, 1, &["title"], Some(r#""on" "title" f c"#));

    // false -> false: no event.
    cmd::modify(&mut h, nid("x"), ModifyFlags::default(), &[title_op("off")]).unwrap();
    assert!(drain(&mut h).is_empty());

    // false -> true: fires.
    cmd::modify(&mut h, nid("x"), ModifyFlags::default(), &[title_op("on")]).unwrap();
    assert_eq!(drain(&mut h).len(), 1);

    // true -> false: fires (the filter matched the pre-image).
    cmd::modify(&mut h, nid("x"), ModifyFlags::default(), &[title_op("off")]).unwrap();
    assert_eq!(drain(&mut h).len(), 1);
}

#[test]
fn new_descendants_inherit_anchored_markers() {
    let mut h = fresh();
    subscribe_descendants(&mut h, 1, &["title"], None);
    let _ = drain(&mut h);

    // A node created under the root after the refresh still gets the marker.
    cmd::modify(&mut h, nid("late"), ModifyFlags::default(), &[]).unwrap();
    let _ = drain(&mut h);
    assert_eq!(h.node(&nid("late")).unwrap().marker_set().len(), 1);

    cmd::modify(&mut h, nid("late"), ModifyFlags::default(), &[title_op("t")]).unwrap();
    assert_eq!(drain(&mut h), vec![Event::Update { sub: sid(1) }]);
}

#[test]
fn hierarchy_change_fires_without_field_match() {
    let mut h = fresh();
    cmd::modify(&mut h, nid("p"), ModifyFlags::default(), &[]).unwrap();
    cmd::modify(&mut h, nid("c"), ModifyFlags::default(), &[]).unwrap();
    subscribe_descendants(&mut h, 1, &["title"], None);
    let _ = drain(&mut h);

    h.add_hierarchy(nid("c"), &[nid("p")], &[], true).unwrap();
    let events = drain(&mut h);
    assert!(events.contains(&Event::Update { sub: sid(1) }));
}

#[test]
fn created_trigger_fires_per_node() {
    let mut h = fresh();
    cmd::subscriptions_add_trigger(&mut h, sid(2), MarkerId(1), TriggerType::Created, None, vec![])
        .unwrap();
    cmd::subscriptions_refresh(&mut h, sid(2)).unwrap();
    let _ = drain(&mut h);

    cmd::modify(&mut h, nid("n1"), ModifyFlags::default(), &[]).unwrap();
    cmd::modify(&mut h, nid("n2"), ModifyFlags::default(), &[]).unwrap();
    let events = drain(&mut h);
    let triggers: Vec<&Event> = events
        .iter()
        .filter(|e| matches!(e, Event::Trigger { .. }))
        .collect();
    assert_eq!(triggers.len(), 2);
    assert_eq!(
        triggers[0],
        &Event::Trigger {
            sub: sid(2),
            node: nid("n1")
        }
    );
}

#[test]
fn deleted_trigger_fires() {
    let mut h = fresh();
    cmd::modify(&mut h, nid("x"), ModifyFlags::default(), &[]).unwrap();
    cmd::subscriptions_add_trigger(&mut h, sid(3), MarkerId(1), TriggerType::Deleted, None, vec![])
        .unwrap();
    cmd::subscriptions_refresh(&mut h, sid(3)).unwrap();
    let _ = drain(&mut h);

    cmd::del_nodes(&mut h, "F", &[nid("x")]).unwrap();
    let events = drain(&mut h);
    assert!(events.contains(&Event::Trigger {
        sub: sid(3),
        node: nid("x")
    }));
}

#[test]
fn missing_accessor_fires_once_on_creation() {
    let mut h = fresh();
    cmd::subscriptions_add_missing(&mut h, sid(4), "wish");
    let _ = drain(&mut h);

    cmd::modify(&mut h, nid("wish"), ModifyFlags::default(), &[]).unwrap();
    let events = drain(&mut h);
    assert!(events.contains(&Event::Update { sub: sid(4) }));

    // Re-creating does not fire again; the armed entry is consumed.
    cmd::del_nodes(&mut h, "F", &[nid("wish")]).unwrap();
    let _ = drain(&mut h);
    cmd::modify(&mut h, nid("wish"), ModifyFlags::default(), &[]).unwrap();
    let events = drain(&mut h);
    assert!(!events.contains(&Event::Update { sub: sid(4) }));
}

#[test]
fn missing_accessor_fires_on_alias_assignment() {
    let mut h = fresh();
    cmd::subscriptions_add_missing(&mut h, sid(5), "nickname");
    cmd::modify(&mut h, nid("x"), ModifyFlags::default(), &[]).unwrap();
    let _ = drain(&mut h);

    cmd::modify(
        &mut h,
        nid("x"),
        ModifyFlags::default(),
        &[(
            "aliases".to_owned(),
            ModifyOp::Set(SetOp {
                add: vec![SetItem::Str("nickname".to_owned())],
                ..SetOp::default()
            }),
        )],
    )
    .unwrap();
    let events = drain(&mut h);
    assert!(events.contains(&Event::Update { sub: sid(5) }));
}

#[test]
fn alias_move_clears_subscription_markers() {
    let mut h = fresh();
    cmd::modify(&mut h, nid("a"), ModifyFlags::default(), &[]).unwrap();
    cmd::modify(&mut h, nid("b"), ModifyFlags::default(), &[]).unwrap();
    h.set_alias("nick", nid("a"));
    let _ = drain(&mut h);

    cmd::subscriptions_add_alias(&mut h, sid(6), MarkerId(1), "nick", nid("a")).unwrap();
    cmd::subscriptions_refresh(&mut h, sid(6)).unwrap();
    let _ = drain(&mut h);

    // Moving the alias fires and clears the subscription's markers.
    h.set_alias("nick", nid("b"));
    let events = drain(&mut h);
    assert!(events.contains(&Event::Update { sub: sid(6) }));
    assert!(h
        .subscriptions()
        .get(&sid(6))
        .is_some_and(|s| s.markers.is_empty()));
}

#[test]
fn unsubscribe_detaches_markers() {
    let mut h = fresh();
    cmd::modify(&mut h, nid("x"), ModifyFlags::default(), &[]).unwrap();
    subscribe_descendants(&mut h, 7, &["title"], None);
    assert_eq!(h.node(&nid("x")).unwrap().marker_set().len(), 1);

    assert!(cmd::subscriptions_del(&mut h, sid(7)));
    assert_eq!(h.node(&nid("x")).unwrap().marker_set().len(), 0);
    assert!(!cmd::subscriptions_del(&mut h, sid(7)));
}

#[test]
fn debug_dump_lists_markers() {
    let mut h = fresh();
    subscribe_descendants(&mut h, 8, &["title"], Some("#1"));
    let dump = cmd::subscriptions_debug(&h, sid(8)).unwrap();
    assert!(dump.contains("marker 1"));
    assert!(dump.contains("bfs_descendants"));
    assert!(dump.contains("filter:true"));
    assert!(dump.contains("title"));
    assert_eq!(cmd::subscriptions_list(&h), vec![sid(8)]);
}
