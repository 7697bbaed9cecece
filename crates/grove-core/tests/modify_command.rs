// SPDX-License-Identifier: MIT
//! The `modify` triplet machine: flags, argument types, per-field statuses.
#![allow(clippy::unwrap_used)]

mod common;

use common::{fresh, nid};
use grove_core::cmd::{self, ModifyFlags, ModifyOp, ModifyStatus, SetItem, SetOp};
use grove_core::GroveError;

fn op(field: &str, op: ModifyOp) -> (String, ModifyOp) {
    (field.to_owned(), op)
}

#[test]
fn statuses_reflect_change_vs_noop() {
    let mut h = fresh();
    let (_, statuses) = cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[
            op("title", ModifyOp::SetString("x".into())),
            op("count", ModifyOp::SetLong(1)),
        ],
    )
    .unwrap();
    assert_eq!(statuses, vec![ModifyStatus::Updated, ModifyStatus::Updated]);

    // Re-writing identical values is a no-op per field.
    let (_, statuses) = cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[
            op("title", ModifyOp::SetString("x".into())),
            op("count", ModifyOp::SetLong(2)),
        ],
    )
    .unwrap();
    assert_eq!(statuses, vec![ModifyStatus::Ok, ModifyStatus::Updated]);
}

#[test]
fn default_variants_only_write_when_unset() {
    let mut h = fresh();
    cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[op("title", ModifyOp::SetString("keep".into()))],
    )
    .unwrap();
    let (_, statuses) = cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[
            op("title", ModifyOp::DefaultString("lose".into())),
            op("fresh", ModifyOp::DefaultLong(9)),
        ],
    )
    .unwrap();
    assert_eq!(statuses, vec![ModifyStatus::Ok, ModifyStatus::Updated]);
    let obj = h.node(&nid("a")).unwrap().object().clone();
    assert_eq!(obj.get_string("title").unwrap(), "keep");
    assert_eq!(obj.get_long("fresh").unwrap(), 9);
}

#[test]
fn increments_seed_then_add() {
    let mut h = fresh();
    let inc = ModifyOp::IncrementLong {
        default: 10,
        delta: 5,
    };
    cmd::modify(&mut h, nid("a"), ModifyFlags::default(), &[op("n", inc.clone())]).unwrap();
    assert_eq!(h.node(&nid("a")).unwrap().object().get_long("n").unwrap(), 10);
    cmd::modify(&mut h, nid("a"), ModifyFlags::default(), &[op("n", inc)]).unwrap();
    assert_eq!(h.node(&nid("a")).unwrap().object().get_long("n").unwrap(), 15);

    let incd = ModifyOp::IncrementDouble {
        default: 1.5,
        delta: 0.25,
    };
    cmd::modify(&mut h, nid("a"), ModifyFlags::default(), &[op("d", incd.clone())]).unwrap();
    cmd::modify(&mut h, nid("a"), ModifyFlags::default(), &[op("d", incd)]).unwrap();
    let d = h.node(&nid("a")).unwrap().object().get_double("d").unwrap();
    assert!((d - 1.75).abs() < 1e-12);
}

#[test]
fn type_mismatch_is_a_per_field_error() {
    let mut h = fresh();
    cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[op("title", ModifyOp::SetString("x".into()))],
    )
    .unwrap();
    let (_, statuses) = cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[
            op(
                "title",
                ModifyOp::IncrementLong {
                    default: 0,
                    delta: 1,
                },
            ),
            op("ok", ModifyOp::SetLong(1)),
        ],
    )
    .unwrap();
    assert_eq!(
        statuses,
        vec![ModifyStatus::Err("EINTYPE"), ModifyStatus::Updated]
    );
}

#[test]
fn delete_field_and_missing_delete() {
    let mut h = fresh();
    cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[op("title", ModifyOp::SetString("x".into()))],
    )
    .unwrap();
    let (_, statuses) = cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[op("title", ModifyOp::Del), op("missing", ModifyOp::Del)],
    )
    .unwrap();
    assert_eq!(
        statuses,
        vec![ModifyStatus::Updated, ModifyStatus::Err("ENOENT")]
    );
    assert!(!h.node(&nid("a")).unwrap().object().exists("title"));
}

#[test]
fn create_and_update_preconditions() {
    let mut h = fresh();
    cmd::modify(&mut h, nid("a"), ModifyFlags::default(), &[]).unwrap();
    assert_eq!(
        cmd::modify(&mut h, nid("a"), ModifyFlags::parse("C").unwrap(), &[]),
        Err(GroveError::AlreadyExists)
    );
    assert_eq!(
        cmd::modify(&mut h, nid("b"), ModifyFlags::parse("U").unwrap(), &[]),
        Err(GroveError::NotFound)
    );
    assert_eq!(ModifyFlags::parse("Q"), Err(GroveError::InvalidArgument));
}

#[test]
fn no_merge_clears_all_but_preserved_fields() {
    let mut h = fresh();
    cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[
            op("title", ModifyOp::SetString("x".into())),
            op("score", ModifyOp::SetLong(5)),
        ],
    )
    .unwrap();
    cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::parse("M").unwrap(),
        &[op("fresh", ModifyOp::SetLong(1))],
    )
    .unwrap();
    let obj = h.node(&nid("a")).unwrap().object().clone();
    assert!(!obj.exists("title"));
    assert!(!obj.exists("score"));
    assert!(obj.exists("id"));
    assert!(obj.exists("createdAt"));
    assert!(obj.exists("updatedAt"));
    assert_eq!(obj.get_long("fresh").unwrap(), 1);
}

#[test]
fn updated_at_stamps_only_with_flag() {
    let mut h = fresh();
    cmd::modify(&mut h, nid("a"), ModifyFlags::default(), &[]).unwrap();
    let before = h.node(&nid("a")).unwrap().object().get_long("updatedAt").unwrap();

    // Clock advances but the write omits the stamp flag.
    // (FixedClock in the helper is pinned, so stamp equality is the signal.)
    cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[op("x", ModifyOp::SetLong(1))],
    )
    .unwrap();
    let after = h.node(&nid("a")).unwrap().object().get_long("updatedAt").unwrap();
    assert_eq!(before, after);

    cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::parse("u").unwrap(),
        &[op("y", ModifyOp::SetLong(2))],
    )
    .unwrap();
    assert!(h.node(&nid("a")).unwrap().object().get_long("updatedAt").is_ok());
}

#[test]
fn set_ops_add_delete_replace() {
    let mut h = fresh();
    let add = |items: &[&str]| {
        ModifyOp::Set(SetOp {
            add: items.iter().map(|s| SetItem::Str((*s).into())).collect(),
            ..SetOp::default()
        })
    };
    cmd::modify(&mut h, nid("a"), ModifyFlags::default(), &[op("tags", add(&["x", "y"]))])
        .unwrap();
    let (_, statuses) = cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[op("tags", add(&["x"]))],
    )
    .unwrap();
    // Adding an existing element changes nothing.
    assert_eq!(statuses, vec![ModifyStatus::Ok]);

    cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[op(
            "tags",
            ModifyOp::Set(SetOp {
                delete: vec![SetItem::Str("x".into())],
                ..SetOp::default()
            }),
        )],
    )
    .unwrap();
    let obj = h.node(&nid("a")).unwrap().object().clone();
    let tags = obj.get_set("tags").unwrap();
    assert!(!tags.has_str("x"));
    assert!(tags.has_str("y"));

    cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[op(
            "tags",
            ModifyOp::Set(SetOp {
                value: Some(vec![SetItem::Str("z".into())]),
                ..SetOp::default()
            }),
        )],
    )
    .unwrap();
    let obj = h.node(&nid("a")).unwrap().object().clone();
    let tags = obj.get_set("tags").unwrap();
    assert_eq!(tags.len(), 1);
    assert!(tags.has_str("z"));
}

#[test]
fn long_set_ops_respect_element_type() {
    let mut h = fresh();
    let (_, statuses) = cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[op(
            "nums",
            ModifyOp::Set(SetOp {
                add: vec![SetItem::Long(3), SetItem::Long(1)],
                ..SetOp::default()
            }),
        )],
    )
    .unwrap();
    assert_eq!(statuses, vec![ModifyStatus::Updated]);
    let (_, statuses) = cmd::modify(
        &mut h,
        nid("a"),
        ModifyFlags::default(),
        &[op(
            "nums",
            ModifyOp::Set(SetOp {
                add: vec![SetItem::Str("oops".into())],
                ..SetOp::default()
            }),
        )],
    )
    .unwrap();
    assert_eq!(statuses, vec![ModifyStatus::Err("EINTYPE")]);
}
