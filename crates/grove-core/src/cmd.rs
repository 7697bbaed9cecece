// SPDX-License-Identifier: MIT
//! Command facade.
//!
//! Pure functions over a hierarchy mirroring the host command surface. The
//! embedding's dispatcher parses transport arguments, calls one of these,
//! and drains deferred events afterwards; the functions themselves never
//! publish.

use crate::edge::{ConstraintFlags, ConstraintId, DynConstraintParams};
use crate::error::{GroveError, Result};
use crate::expr::Expression;
use crate::hierarchy::{DelFlags, DelOutcome, Hierarchy, TraversalDir};
use crate::ident::{MarkerId, NodeId, NodeType, SubscriptionId, ROOT_NODE_ID};
use crate::object::{Object, SetType, SetValue, Value};
use crate::subs::{Marker, MarkerAnchor, MarkerFlags, TriggerType};

/// Parsed `modify` behavior flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifyFlags {
    /// `N`: do not attach created orphans to the root.
    pub no_root: bool,
    /// `M`: clear existing data fields before applying (preserved keys kept).
    pub no_merge: bool,
    /// `C`: fail when the node already exists.
    pub create_only: bool,
    /// `U`: fail when the node does not exist.
    pub update_only: bool,
    /// `c`: stamp `createdAt` on create.
    pub stamp_created: bool,
    /// `u`: stamp `updatedAt` on change.
    pub stamp_updated: bool,
}

impl ModifyFlags {
    /// Parses the flag-character string.
    ///
    /// # Errors
    /// [`GroveError::InvalidArgument`] on unknown characters.
    pub fn parse(s: &str) -> Result<Self> {
        let mut flags = Self::default();
        for c in s.chars() {
            match c {
                'N' => flags.no_root = true,
                'M' => flags.no_merge = true,
                'C' => flags.create_only = true,
                'U' => flags.update_only = true,
                'c' => flags.stamp_created = true,
                'u' => flags.stamp_updated = true,
                _ => return Err(GroveError::InvalidArgument),
            }
        }
        Ok(flags)
    }
}

/// One element of a set operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SetItem {
    /// String (or node id reference) element.
    Str(String),
    /// Double element.
    Double(f64),
    /// Integer element.
    Long(i64),
}

impl SetItem {
    fn to_set_value(&self) -> SetValue {
        match self {
            Self::Str(s) => SetValue::Str(s.clone()),
            Self::Double(d) => SetValue::Double(*d),
            Self::Long(l) => SetValue::Long(*l),
        }
    }

    fn set_type(&self) -> SetType {
        match self {
            Self::Str(_) => SetType::String,
            Self::Double(_) => SetType::Double,
            Self::Long(_) => SetType::Long,
        }
    }
}

/// A set mutation: additions, removals, or wholesale replacement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOp {
    /// Treat string elements as node id references (`parents`/`children`
    /// write through to the hierarchy).
    pub reference: bool,
    /// Clear the set before applying the rest.
    pub delete_all: bool,
    /// Elements to add.
    pub add: Vec<SetItem>,
    /// Elements to remove.
    pub delete: Vec<SetItem>,
    /// Replacement element list; wins over add/delete when present.
    pub value: Option<Vec<SetItem>>,
}

/// One `modify` field operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ModifyOp {
    /// Set a string value.
    SetString(String),
    /// Set a string value only when the field is unset.
    DefaultString(String),
    /// Set an integer value.
    SetLong(i64),
    /// Set an integer value only when the field is unset.
    DefaultLong(i64),
    /// Set a double value.
    SetDouble(f64),
    /// Set a double value only when the field is unset.
    DefaultDouble(f64),
    /// Increment an integer field, seeding it with a default when unset.
    IncrementLong {
        /// Seed value for an unset field.
        default: i64,
        /// Added to an existing value.
        delta: i64,
    },
    /// Increment a double field, seeding it with a default when unset.
    IncrementDouble {
        /// Seed value for an unset field.
        default: f64,
        /// Added to an existing value.
        delta: f64,
    },
    /// Apply a set operation.
    Set(SetOp),
    /// Delete the field.
    Del,
}

/// Per-field outcome of a `modify` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModifyStatus {
    /// The write was a no-op.
    Ok,
    /// The field changed.
    Updated,
    /// The field operation failed; the remaining fields still ran.
    Err(&'static str),
}

/// Applies field operations to a node, creating it on demand.
///
/// Returns the node id and one status per operation. Per-field failures are
/// reported in the statuses; only argument-shape and existence-precondition
/// errors fail the whole call.
///
/// # Errors
/// [`GroveError::AlreadyExists`] under create-only, [`GroveError::NotFound`]
/// under update-only, [`GroveError::NotSupported`] for detached stubs.
pub fn modify(
    h: &mut Hierarchy,
    id: NodeId,
    flags: ModifyFlags,
    ops: &[(String, ModifyOp)],
) -> Result<(NodeId, Vec<ModifyStatus>)> {
    let existed = h.node(&id).is_some();
    if flags.create_only && existed {
        return Err(GroveError::AlreadyExists);
    }
    if flags.update_only && !existed {
        return Err(GroveError::NotFound);
    }
    h.ensure_writable(id)?;

    if existed {
        if flags.no_merge {
            h.field_change_precheck(id);
            clear_data_fields(h, id);
        }
    } else {
        // Creation attaches to the root unless suppressed.
        h.add_hierarchy(id, &[], &[], flags.no_root)?;
    }

    let mut statuses = Vec::with_capacity(ops.len());
    let mut any_change = false;
    for (field, op) in ops {
        h.field_change_precheck(id);
        let status = apply_op(h, id, field, op);
        if status == ModifyStatus::Updated {
            any_change = true;
            h.defer_field_change(id, field);
        }
        statuses.push(status);
    }

    if any_change {
        if flags.stamp_updated {
            h.stamp_updated(id);
            h.defer_field_change(id, "updatedAt");
        }
        if existed {
            h.defer_trigger(id, TriggerType::Updated);
        }
    }
    Ok((id, statuses))
}

/// Clears data fields in the no-merge path, keeping the preserved key set.
fn clear_data_fields(h: &mut Hierarchy, id: NodeId) {
    const KEEP: [&str; 5] = ["id", "type", "createdAt", "aliases", "updatedAt"];
    if let Some(node) = h.node_object_mut(&id) {
        node.retain_keys(|k| KEEP.contains(&k));
    }
}

fn apply_op(h: &mut Hierarchy, id: NodeId, field: &str, op: &ModifyOp) -> ModifyStatus {
    match op {
        ModifyOp::SetString(v) => set_scalar(h, id, field, Value::String(v.clone()), false),
        ModifyOp::DefaultString(v) => set_scalar(h, id, field, Value::String(v.clone()), true),
        ModifyOp::SetLong(v) => set_scalar(h, id, field, Value::Long(*v), false),
        ModifyOp::DefaultLong(v) => set_scalar(h, id, field, Value::Long(*v), true),
        ModifyOp::SetDouble(v) => set_scalar(h, id, field, Value::Double(*v), false),
        ModifyOp::DefaultDouble(v) => set_scalar(h, id, field, Value::Double(*v), true),
        ModifyOp::IncrementLong { default, delta } => {
            let Some(obj) = h.node_object_mut(&id) else {
                return ModifyStatus::Err(GroveError::NotFound.code());
            };
            match obj.get_long(field) {
                Ok(cur) => match obj.set_long(field, cur + delta) {
                    Ok(()) => ModifyStatus::Updated,
                    Err(e) => ModifyStatus::Err(e.code()),
                },
                Err(GroveError::NotFound) => match obj.set_long(field, *default) {
                    Ok(()) => ModifyStatus::Updated,
                    Err(e) => ModifyStatus::Err(e.code()),
                },
                Err(e) => ModifyStatus::Err(e.code()),
            }
        }
        ModifyOp::IncrementDouble { default, delta } => {
            let Some(obj) = h.node_object_mut(&id) else {
                return ModifyStatus::Err(GroveError::NotFound.code());
            };
            match obj.get_double(field) {
                Ok(cur) => match obj.set_double(field, cur + delta) {
                    Ok(()) => ModifyStatus::Updated,
                    Err(e) => ModifyStatus::Err(e.code()),
                },
                Err(GroveError::NotFound) => match obj.set_double(field, *default) {
                    Ok(()) => ModifyStatus::Updated,
                    Err(e) => ModifyStatus::Err(e.code()),
                },
                Err(e) => ModifyStatus::Err(e.code()),
            }
        }
        ModifyOp::Set(setop) => apply_set_op(h, id, field, setop),
        ModifyOp::Del => {
            if field == "aliases" {
                drop_all_aliases(h, id);
            }
            let Some(obj) = h.node_object_mut(&id) else {
                return ModifyStatus::Err(GroveError::NotFound.code());
            };
            match obj.del_path(field) {
                Ok(()) => ModifyStatus::Updated,
                Err(e) => ModifyStatus::Err(e.code()),
            }
        }
    }
}

fn set_scalar(
    h: &mut Hierarchy,
    id: NodeId,
    field: &str,
    value: Value,
    only_if_unset: bool,
) -> ModifyStatus {
    let Some(obj) = h.node_object_mut(&id) else {
        return ModifyStatus::Err(GroveError::NotFound.code());
    };
    match obj.get_path(field) {
        Ok(existing) => {
            if only_if_unset || *existing == value {
                return ModifyStatus::Ok;
            }
        }
        Err(GroveError::NotFound) => {}
        Err(_) => {}
    }
    match obj.set_path(field, value, true) {
        Ok(()) => ModifyStatus::Updated,
        Err(e) => ModifyStatus::Err(e.code()),
    }
}

/// Reference set ops against `parents`/`children` write through to the
/// hierarchy relation instead of the data object.
fn apply_set_op(h: &mut Hierarchy, id: NodeId, field: &str, op: &SetOp) -> ModifyStatus {
    if op.reference && (field == "parents" || field == "children") {
        return apply_hierarchy_set_op(h, id, field, op);
    }

    let is_aliases = field == "aliases";
    let elem_type = op
        .value
        .as_ref()
        .and_then(|v| v.first())
        .or_else(|| op.add.first())
        .or_else(|| op.delete.first())
        .map_or(SetType::String, SetItem::set_type);

    let mut added: Vec<String> = Vec::new();
    let mut removed: Vec<String> = Vec::new();
    let outcome = {
        let Some(obj) = h.node_object_mut(&id) else {
            return ModifyStatus::Err(GroveError::NotFound.code());
        };
        let set = match obj.get_set_mut(field, elem_type) {
            Ok(set) => set,
            Err(e) => return ModifyStatus::Err(e.code()),
        };
        let mut changed = false;
        let mut fail: Option<GroveError> = None;
        if op.delete_all && !set.is_empty() {
            for v in set.iter() {
                if let SetValue::Str(s) = v {
                    removed.push(s);
                }
            }
            *set = crate::object::TypedSet::new(elem_type);
            changed = true;
        }
        if let Some(value) = &op.value {
            let replacement: Vec<SetValue> = value.iter().map(SetItem::to_set_value).collect();
            let mut fresh = crate::object::TypedSet::new(elem_type);
            for v in replacement {
                match fresh.add(v.clone()) {
                    Ok(_) => {}
                    Err(e) => {
                        fail = Some(e);
                        break;
                    }
                }
            }
            if fail.is_none() && *set != fresh {
                for v in set.iter() {
                    if let SetValue::Str(s) = v {
                        removed.push(s);
                    }
                }
                for v in fresh.iter() {
                    if let SetValue::Str(s) = v {
                        added.push(s);
                    }
                }
                *set = fresh;
                changed = true;
            }
        } else {
            for item in &op.add {
                match set.add(item.to_set_value()) {
                    Ok(true) => {
                        if let SetItem::Str(s) = item {
                            added.push(s.clone());
                        }
                        changed = true;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        fail = Some(e);
                        break;
                    }
                }
            }
            if fail.is_none() {
                for item in &op.delete {
                    if set.remove(&item.to_set_value()) {
                        if let SetItem::Str(s) = item {
                            removed.push(s.clone());
                        }
                        changed = true;
                    }
                }
            }
        }
        match fail {
            Some(e) => Err(e),
            None => Ok(changed),
        }
    };

    match outcome {
        Err(e) => ModifyStatus::Err(e.code()),
        Ok(changed) => {
            if is_aliases {
                for alias in &removed {
                    h.del_alias(alias);
                }
                for alias in &added {
                    h.set_alias(alias, id);
                }
            }
            if changed {
                ModifyStatus::Updated
            } else {
                ModifyStatus::Ok
            }
        }
    }
}

fn apply_hierarchy_set_op(
    h: &mut Hierarchy,
    id: NodeId,
    field: &str,
    op: &SetOp,
) -> ModifyStatus {
    let ids = |items: &[SetItem]| -> Result<Vec<NodeId>> {
        items
            .iter()
            .map(|i| match i {
                SetItem::Str(s) => Ok(NodeId::from_bytes(s.as_bytes())),
                _ => Err(GroveError::WrongType),
            })
            .collect()
    };
    let mut run = || -> Result<usize> {
        let mut changes = 0;
        if let Some(value) = &op.value {
            let targets = ids(value)?;
            changes += if field == "parents" {
                h.set_parents(id, &targets)?
            } else {
                h.set_children(id, &targets)?
            };
        } else {
            if op.delete_all {
                let current = if field == "parents" {
                    h.parents_of(id)?
                } else {
                    h.children_of(id)?
                };
                changes += if field == "parents" {
                    h.del_hierarchy(id, &current, &[])?
                } else {
                    h.del_hierarchy(id, &[], &current)?
                };
            }
            let add = ids(&op.add)?;
            if !add.is_empty() {
                changes += if field == "parents" {
                    h.add_hierarchy(id, &add, &[], true)?
                } else {
                    h.add_hierarchy(id, &[], &add, true)?
                };
            }
            let del = ids(&op.delete)?;
            if !del.is_empty() {
                changes += if field == "parents" {
                    h.del_hierarchy(id, &del, &[])?
                } else {
                    h.del_hierarchy(id, &[], &del)?
                };
            }
        }
        Ok(changes)
    };
    match run() {
        Ok(0) => ModifyStatus::Ok,
        Ok(_) => ModifyStatus::Updated,
        Err(e) => ModifyStatus::Err(e.code()),
    }
}

fn drop_all_aliases(h: &mut Hierarchy, id: NodeId) {
    let owned: Vec<String> = h
        .node(&id)
        .and_then(|n| n.object().get_set("aliases").ok().cloned())
        .map(|set| set.iter_str().map(str::to_owned).collect())
        .unwrap_or_default();
    for alias in owned {
        h.del_alias(&alias);
    }
}

/// `hierarchy.del`: deletes the listed nodes. Missing ids are skipped.
///
/// Flag characters: `F` force, `I` collect deleted ids.
///
/// # Errors
/// [`GroveError::InvalidArgument`] for unknown flag characters.
pub fn del_nodes(h: &mut Hierarchy, flags: &str, ids: &[NodeId]) -> Result<DelOutcome> {
    let mut del_flags = DelFlags::empty();
    for c in flags.chars() {
        match c {
            'F' => del_flags |= DelFlags::FORCE,
            'I' => del_flags |= DelFlags::REPLY_IDS,
            _ => return Err(GroveError::InvalidArgument),
        }
    }
    let mut total = DelOutcome::default();
    for id in ids {
        match h.del_node(*id, del_flags) {
            Ok(outcome) => {
                total.count += outcome.count;
                total.ids.extend(outcome.ids);
            }
            Err(GroveError::NotFound) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// `hierarchy.heads`: orphan node ids in order.
#[must_use]
pub fn heads(h: &Hierarchy) -> Vec<NodeId> {
    h.heads().collect()
}

/// `hierarchy.parents`.
///
/// # Errors
/// [`GroveError::NotFound`] for a missing node.
pub fn parents(h: &mut Hierarchy, id: NodeId) -> Result<Vec<NodeId>> {
    h.parents_of(id)
}

/// `hierarchy.children`.
///
/// # Errors
/// [`GroveError::NotFound`] for a missing node.
pub fn children(h: &mut Hierarchy, id: NodeId) -> Result<Vec<NodeId>> {
    h.children_of(id)
}

/// `hierarchy.edgelist`: edge fields of a node (optionally one field), as
/// `(field_name, constraint_id, destinations)` rows in name order.
///
/// # Errors
/// [`GroveError::NotFound`] for a missing node or named field.
pub fn edge_list(
    h: &mut Hierarchy,
    id: NodeId,
    field: Option<&str>,
) -> Result<Vec<(String, ConstraintId, Vec<NodeId>)>> {
    let node = h.find(id).ok_or(GroveError::NotFound)?;
    let mut out = Vec::new();
    for (name, edge) in node.edge_fields() {
        if field.is_some_and(|f| f != name) {
            continue;
        }
        out.push((
            name.to_owned(),
            edge.constraint_id,
            edge.arcs.iter().copied().collect(),
        ));
    }
    if field.is_some() && out.is_empty() {
        return Err(GroveError::NotFound);
    }
    Ok(out)
}

/// `hierarchy.edgeget`: constraint id and destinations of one edge field, or
/// `None` when the field does not exist.
///
/// # Errors
/// [`GroveError::NotFound`] for a missing node.
pub fn edge_get(
    h: &mut Hierarchy,
    id: NodeId,
    field: &str,
) -> Result<Option<(ConstraintId, Vec<NodeId>)>> {
    let node = h.find(id).ok_or(GroveError::NotFound)?;
    Ok(node
        .edge_field(field)
        .map(|e| (e.constraint_id, e.arcs.iter().copied().collect())))
}

/// `hierarchy.edgegetmetadata`.
///
/// # Errors
/// [`GroveError::NotFound`] for a missing node.
pub fn edge_get_metadata(
    h: &mut Hierarchy,
    id: NodeId,
    field: &str,
    dst: NodeId,
) -> Result<Option<Object>> {
    if h.find(id).is_none() {
        return Err(GroveError::NotFound);
    }
    Ok(h.edge_metadata(id, field, dst).cloned())
}

/// `hierarchy.compress`.
///
/// # Errors
/// Verification errors per [`Hierarchy::verify_detachable`].
pub fn compress(h: &mut Hierarchy, id: NodeId, kind: crate::hierarchy::DetachedKind) -> Result<()> {
    h.detach_subtree(id, kind)
}

/// `hierarchy.listcompressed`.
#[must_use]
pub fn list_compressed(h: &Hierarchy) -> Vec<NodeId> {
    h.list_compressed()
}

/// `edge.addconstraint`.
///
/// # Errors
/// [`GroveError::InvalidArgument`] for unknown flag bits or malformed types.
pub fn edge_add_constraint(
    h: &mut Hierarchy,
    fwd_type: &str,
    fwd_field: &str,
    flags: u8,
    bck_constraint_id: u16,
    bck_type: &str,
    bck_field: &str,
) -> Result<()> {
    let flags = ConstraintFlags::from_bits(flags).ok_or(GroveError::InvalidArgument)?;
    let params = DynConstraintParams {
        flags,
        fwd_node_type: NodeType::from_str(fwd_type)?,
        fwd_field: fwd_field.to_owned(),
        bck_constraint_id: ConstraintId(bck_constraint_id),
        bck_node_type: if bck_type.is_empty() {
            None
        } else {
            Some(NodeType::from_str(bck_type)?)
        },
        bck_field: if bck_field.is_empty() {
            None
        } else {
            Some(bck_field.to_owned())
        },
    };
    h.add_edge_constraint(params)
}

/// Arguments of `subscriptions.add` for an observing marker.
#[derive(Debug, Clone, Default)]
pub struct SubscribeArgs {
    /// Marker field-name list; `None` observes every field.
    pub fields: Option<Vec<String>>,
    /// Postfix filter source.
    pub filter: Option<String>,
    /// Filter arguments, loaded into registers 1…n.
    pub filter_args: Vec<String>,
    /// Field for `ref`-style traversals.
    pub ref_field: Option<String>,
    /// Traversal expression source for expression-driven directions.
    pub traversal: Option<String>,
}

/// `subscriptions.add`: creates a change-observing marker.
///
/// # Errors
/// [`GroveError::ExprCompile`] for a filter that does not compile;
/// [`GroveError::AlreadyExists`] for a duplicate marker id;
/// [`GroveError::InvalidArgument`] when the direction needs a field or
/// expression that was not supplied.
pub fn subscriptions_add(
    h: &mut Hierarchy,
    sub_id: SubscriptionId,
    marker_id: MarkerId,
    dir: TraversalDir,
    node_id: NodeId,
    args: SubscribeArgs,
) -> Result<()> {
    if dir.needs_field() && args.ref_field.is_none() {
        return Err(GroveError::InvalidArgument);
    }
    if dir.needs_expression() && args.traversal.is_none() {
        return Err(GroveError::InvalidArgument);
    }
    let filter = match &args.filter {
        Some(src) => Some(Expression::compile(src).map_err(|_| GroveError::ExprCompile)?),
        None => None,
    };
    let traversal_expr = match &args.traversal {
        Some(src) => Some(Expression::compile(src).map_err(|_| GroveError::ExprCompile)?),
        None => None,
    };

    let mut flags = MarkerFlags::CH_HIERARCHY | MarkerFlags::CH_FIELD;
    if matches!(
        dir,
        TraversalDir::Ref
            | TraversalDir::EdgeField
            | TraversalDir::BfsEdgeField
            | TraversalDir::BfsExpression
            | TraversalDir::Expression
    ) {
        flags |= MarkerFlags::REF;
    }
    if dir == TraversalDir::None {
        flags |= MarkerFlags::DETACH;
    }

    h.subscribe(Marker {
        marker_id,
        sub_id,
        flags,
        dir,
        anchor: MarkerAnchor::Node(node_id),
        ref_field: args.ref_field,
        traversal_expr,
        filter,
        filter_args: args.filter_args,
        fields: args.fields.unwrap_or_default(),
        alias: None,
        filter_history: crate::subs::FilterHistory::default(),
    })
}

/// `subscriptions.addTrigger`: creates a trigger marker.
///
/// # Errors
/// As [`subscriptions_add`].
pub fn subscriptions_add_trigger(
    h: &mut Hierarchy,
    sub_id: SubscriptionId,
    marker_id: MarkerId,
    event_type: TriggerType,
    filter: Option<&str>,
    filter_args: Vec<String>,
) -> Result<()> {
    let filter = match filter {
        Some(src) => Some(Expression::compile(src).map_err(|_| GroveError::ExprCompile)?),
        None => None,
    };
    h.subscribe(Marker {
        marker_id,
        sub_id,
        flags: MarkerFlags::TRIGGER | MarkerFlags::DETACH,
        dir: TraversalDir::None,
        anchor: MarkerAnchor::Trigger(event_type),
        ref_field: None,
        traversal_expr: None,
        filter,
        filter_args,
        fields: Vec::new(),
        alias: None,
        filter_history: crate::subs::FilterHistory::default(),
    })
}

/// `subscriptions.addAlias`: fires when `alias` moves or is deleted, then
/// clears the subscription's markers.
///
/// # Errors
/// [`GroveError::AlreadyExists`] for a duplicate marker id.
pub fn subscriptions_add_alias(
    h: &mut Hierarchy,
    sub_id: SubscriptionId,
    marker_id: MarkerId,
    alias: &str,
    node_id: NodeId,
) -> Result<()> {
    h.subscribe(Marker {
        marker_id,
        sub_id,
        flags: MarkerFlags::CH_ALIAS | MarkerFlags::DETACH,
        dir: TraversalDir::None,
        anchor: MarkerAnchor::Node(node_id),
        ref_field: None,
        traversal_expr: None,
        filter: None,
        filter_args: Vec::new(),
        fields: Vec::new(),
        alias: Some(alias.to_owned()),
        filter_history: crate::subs::FilterHistory::default(),
    })
}

/// `subscriptions.addMissing`: arms a missing-accessor notification.
pub fn subscriptions_add_missing(h: &mut Hierarchy, sub_id: SubscriptionId, accessor: &str) {
    h.subscribe_missing(sub_id, accessor);
}

/// `subscriptions.addMarkerFields`.
///
/// # Errors
/// [`GroveError::NotFound`] for an unknown marker.
pub fn subscriptions_add_marker_fields(
    h: &mut Hierarchy,
    sub_id: SubscriptionId,
    marker_id: MarkerId,
    fields: &[String],
) -> Result<()> {
    h.add_marker_fields(sub_id, marker_id, fields)
}

/// `subscriptions.refresh`.
///
/// # Errors
/// [`GroveError::NotFound`] for an unknown subscription.
pub fn subscriptions_refresh(h: &mut Hierarchy, sub_id: SubscriptionId) -> Result<()> {
    h.refresh_subscription(sub_id)
}

/// `subscriptions.list`.
#[must_use]
pub fn subscriptions_list(h: &Hierarchy) -> Vec<SubscriptionId> {
    h.subscriptions().ids().collect()
}

/// `subscriptions.debug`.
///
/// # Errors
/// [`GroveError::NotFound`] for an unknown subscription.
pub fn subscriptions_debug(h: &Hierarchy, sub_id: SubscriptionId) -> Result<String> {
    h.debug_subscription(sub_id)
}

/// `subscriptions.del`. Returns `true` when the subscription existed.
pub fn subscriptions_del(h: &mut Hierarchy, sub_id: SubscriptionId) -> bool {
    h.unsubscribe(sub_id)
}

/// `hierarchy.types.add`.
///
/// # Errors
/// [`GroveError::InvalidArgument`] for a malformed type token.
pub fn types_add(h: &mut Hierarchy, ty: &str, name: &str) -> Result<()> {
    h.add_type(NodeType::from_str(ty)?, name);
    Ok(())
}

/// `hierarchy.types.clear`.
pub fn types_clear(h: &mut Hierarchy) {
    h.clear_types();
}

/// `hierarchy.types.list`.
#[must_use]
pub fn types_list(h: &Hierarchy) -> Vec<(NodeType, String)> {
    h.list_types()
}

/// `resolve.nodeid`: resolves candidate strings to the first existing node.
/// Ids win over aliases; an empty candidate list resolves to the root.
///
/// # Errors
/// [`GroveError::NotFound`] when nothing resolves.
pub fn resolve_node_id(h: &Hierarchy, candidates: &[String]) -> Result<NodeId> {
    if candidates.is_empty() {
        return Ok(ROOT_NODE_ID);
    }
    for cand in candidates {
        if cand.len() <= crate::ident::NODE_ID_SIZE {
            let id = NodeId::from_bytes(cand.as_bytes());
            if id.is_root() || h.node(&id).is_some() || h.exists(&id) {
                return Ok(id);
            }
        }
        if let Some(id) = h.resolve_alias(cand) {
            if h.exists(&id) {
                return Ok(id);
            }
        }
    }
    Err(GroveError::NotFound)
}
