// SPDX-License-Identifier: MIT
//! Subscriptions, markers, and deferred event computation.
//!
//! A subscription groups markers under one externally delivered id. Markers
//! bind a traversal, an optional filter expression, and a field list; refresh
//! attaches them to every node their traversal reaches. Mutation paths call
//! the precheck/defer entry points on the hierarchy; outbound notifications
//! are produced only by `send_deferred_events`.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::error::{GroveError, Result};
use crate::events::{Event, EventSink};
use crate::expr::vm::Bindings;
use crate::expr::{Expression, RegisterFile};
use crate::hierarchy::traversal::{TraversalDir, TraverseSpec};
use crate::hierarchy::Hierarchy;
use crate::ident::{MarkerId, NodeId, SubscriptionId};

bitflags! {
    /// Marker flags.
    ///
    /// The low byte holds matcher flags which participate in each node's
    /// cached `flags_filter`; the high byte holds modifier flags which never
    /// enter the cache.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MarkerFlags: u16 {
        /// Fires on any change to `parents`/`children` at the node.
        const CH_HIERARCHY = 0x0002;
        /// Fires on a change to a field listed in the marker's field list.
        const CH_FIELD = 0x0004;
        /// Fires on alias reassignment/deletion; clears the subscription's
        /// markers after delivery.
        const CH_ALIAS = 0x0008;
        /// Only fire for referenced nodes, not the marker's own start node.
        const REF = 0x0100;
        /// The marker lives in the hierarchy's detached marker set.
        const DETACH = 0x0200;
        /// The marker is a trigger (created/updated/deleted).
        const TRIGGER = 0x0400;
    }
}

impl MarkerFlags {
    /// The matcher subset that enters per-node `flags_filter` caches.
    #[must_use]
    pub fn matcher(self) -> Self {
        self & Self::from_bits_truncate(0x00ff)
    }
}

/// Trigger event discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerType {
    /// Node creation.
    Created,
    /// Node data mutation.
    Updated,
    /// Node deletion.
    Deleted,
}

impl TriggerType {
    /// Parses the external token form.
    ///
    /// # Errors
    /// [`GroveError::InvalidArgument`] for unknown tokens.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            _ => Err(GroveError::InvalidArgument),
        }
    }

    /// The external token form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

/// What a marker is anchored to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerAnchor {
    /// Traversal start node.
    Node(NodeId),
    /// Trigger event type (trigger markers carry no start node).
    Trigger(TriggerType),
}

/// Pre-mutation filter outcome for the node currently being changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterHistory {
    node_id: Option<NodeId>,
    res: bool,
}

/// A reactive observer bound to a traversal and optional filter.
#[derive(Debug, Clone)]
pub struct Marker {
    /// Marker id, unique within the owning subscription.
    pub marker_id: MarkerId,
    /// Owning subscription.
    pub sub_id: SubscriptionId,
    /// Flag set.
    pub flags: MarkerFlags,
    /// Traversal direction.
    pub dir: TraversalDir,
    /// Anchor: start node or trigger type.
    pub anchor: MarkerAnchor,
    /// Field followed by `ref`/`edge_field`-style traversals.
    pub ref_field: Option<String>,
    /// Compiled traversal expression for expression-driven traversals.
    pub traversal_expr: Option<Expression>,
    /// Compiled filter expression.
    pub filter: Option<Expression>,
    /// Query parameters loaded into filter registers 1…n.
    pub filter_args: Vec<String>,
    /// Field names the marker is sensitive to; empty means any field.
    pub fields: Vec<String>,
    /// Alias this marker watches (alias markers only).
    pub alias: Option<String>,
    /// Pre-mutation filter outcome capture.
    pub filter_history: FilterHistory,
}

impl Marker {
    /// Returns `true` when `field` matches the marker's field list.
    ///
    /// An empty list matches any field. A listed name also matches deeper
    /// paths under it (`"a"` matches a change to `"a.b"`).
    #[must_use]
    pub fn field_match(&self, field: &str) -> bool {
        if self.fields.is_empty() {
            return true;
        }
        self.fields.iter().any(|f| {
            field == f
                || (field.len() > f.len()
                    && field.starts_with(f.as_str())
                    && field.as_bytes()[f.len()] == b'.')
        })
    }

    /// The start node for traversing markers.
    #[must_use]
    pub fn start_node(&self) -> Option<NodeId> {
        match &self.anchor {
            MarkerAnchor::Node(id) => Some(*id),
            MarkerAnchor::Trigger(_) => None,
        }
    }

    fn traverse_spec(&self) -> TraverseSpec<'_> {
        TraverseSpec {
            dir: self.dir,
            field: self.ref_field.as_deref(),
            expr: self.traversal_expr.as_ref(),
            edge_filter: None,
            inhibit_restore: false,
        }
    }
}

/// Key referencing a marker from a node.
pub type MarkerKey = (SubscriptionId, MarkerId);

/// An ordered marker reference set with a cached OR of matcher flags.
#[derive(Debug, Clone, Default)]
pub struct MarkerSet {
    refs: BTreeMap<MarkerKey, MarkerFlags>,
    flags_filter: MarkerFlags,
}

impl MarkerSet {
    /// Inserts a marker reference; idempotent.
    pub fn insert(&mut self, key: MarkerKey, flags: MarkerFlags) {
        self.refs.insert(key, flags);
        self.flags_filter |= flags.matcher();
    }

    /// Removes a marker reference and recomputes the flag cache.
    pub fn remove(&mut self, key: &MarkerKey) -> bool {
        let present = self.refs.remove(key).is_some();
        if present {
            self.recompute();
        }
        present
    }

    /// Drops every reference.
    pub fn clear(&mut self) {
        self.refs.clear();
        self.flags_filter = MarkerFlags::empty();
    }

    fn recompute(&mut self) {
        self.flags_filter = self
            .refs
            .values()
            .fold(MarkerFlags::empty(), |acc, f| acc | f.matcher());
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, key: &MarkerKey) -> bool {
        self.refs.contains_key(key)
    }

    /// Number of references.
    #[must_use]
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    /// Returns `true` when no markers are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Fast test against the cached matcher flags.
    #[must_use]
    pub fn could_match(&self, flags: MarkerFlags) -> bool {
        self.flags_filter.intersects(flags)
    }

    /// Iterates marker keys in `(subscription, marker)` order.
    pub fn keys(&self) -> impl Iterator<Item = MarkerKey> + '_ {
        self.refs.keys().copied()
    }
}

/// A set of markers delivered on one external channel.
#[derive(Debug, Clone, Default)]
pub struct Subscription {
    /// Markers by id.
    pub markers: BTreeMap<MarkerId, Marker>,
}

/// Registry of subscriptions plus the hierarchy-global detached marker set.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subs: BTreeMap<SubscriptionId, Subscription>,
    /// Markers applying globally rather than via node attachment.
    pub(crate) detached: MarkerSet,
}

impl SubscriptionRegistry {
    /// Looks up a subscription.
    #[must_use]
    pub fn get(&self, sub_id: &SubscriptionId) -> Option<&Subscription> {
        self.subs.get(sub_id)
    }

    pub(crate) fn get_mut(&mut self, sub_id: &SubscriptionId) -> Option<&mut Subscription> {
        self.subs.get_mut(sub_id)
    }

    /// Looks up a marker.
    #[must_use]
    pub fn marker(&self, key: &MarkerKey) -> Option<&Marker> {
        self.subs.get(&key.0).and_then(|s| s.markers.get(&key.1))
    }

    pub(crate) fn marker_mut(&mut self, key: &MarkerKey) -> Option<&mut Marker> {
        self.subs
            .get_mut(&key.0)
            .and_then(|s| s.markers.get_mut(&key.1))
    }

    /// Adds a marker, creating the subscription on first use.
    ///
    /// # Errors
    /// [`GroveError::AlreadyExists`] when the marker id is taken within the
    /// subscription.
    pub fn add_marker(&mut self, marker: Marker) -> Result<()> {
        let sub = self.subs.entry(marker.sub_id).or_default();
        if sub.markers.contains_key(&marker.marker_id) {
            return Err(GroveError::AlreadyExists);
        }
        sub.markers.insert(marker.marker_id, marker);
        Ok(())
    }

    /// Iterates subscription ids in order.
    pub fn ids(&self) -> impl Iterator<Item = SubscriptionId> + '_ {
        self.subs.keys().copied()
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subs.len()
    }

    /// Returns `true` when no subscriptions exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    pub(crate) fn remove(&mut self, sub_id: &SubscriptionId) -> Option<Subscription> {
        self.subs.remove(sub_id)
    }

    /// Every marker key across all subscriptions.
    pub(crate) fn all_keys(&self) -> Vec<MarkerKey> {
        self.subs
            .iter()
            .flat_map(|(sid, s)| s.markers.keys().map(move |m| (*sid, *m)))
            .collect()
    }
}

/// Deferred event queues drained by `send_deferred_events`.
#[derive(Debug, Default)]
pub struct DeferredEvents {
    /// Subscriptions with a pending update notification (deduplicated).
    pub(crate) updates: BTreeSet<SubscriptionId>,
    /// Fired trigger markers; not deduplicated.
    pub(crate) triggers: Vec<(SubscriptionId, MarkerId, NodeId)>,
    /// Subscriptions whose markers are cleared after delivery (alias rule).
    pub(crate) pending_clear: BTreeSet<SubscriptionId>,
}

impl DeferredEvents {
    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.triggers.is_empty()
    }
}

impl Hierarchy {
    /// Adds a change-observing marker to a subscription.
    ///
    /// # Errors
    /// [`GroveError::AlreadyExists`] on a duplicate marker id.
    pub fn subscribe(&mut self, marker: Marker) -> Result<()> {
        self.subs.add_marker(marker)
    }

    /// Arms a missing-accessor marker: the subscription fires once when the
    /// node id or alias named by `accessor` becomes present.
    pub fn subscribe_missing(&mut self, sub_id: SubscriptionId, accessor: &str) {
        self.missing
            .entry(accessor.to_owned())
            .or_default()
            .push(sub_id);
    }

    /// Looks up a marker.
    #[must_use]
    pub fn get_marker(&self, sub_id: SubscriptionId, marker_id: MarkerId) -> Option<&Marker> {
        self.subs.marker(&(sub_id, marker_id))
    }

    /// Appends field names to an existing marker's field list.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] when the marker does not exist.
    pub fn add_marker_fields(
        &mut self,
        sub_id: SubscriptionId,
        marker_id: MarkerId,
        fields: &[String],
    ) -> Result<()> {
        let marker = self
            .subs
            .marker_mut(&(sub_id, marker_id))
            .ok_or(GroveError::NotFound)?;
        for f in fields {
            if !marker.fields.contains(f) {
                marker.fields.push(f.clone());
            }
        }
        Ok(())
    }

    /// Attaches every marker of a subscription along its traversal.
    /// Idempotent: re-refresh never double-inserts.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] for an unknown subscription; traversal errors
    /// are reported after refreshing the remaining markers.
    pub fn refresh_subscription(&mut self, sub_id: SubscriptionId) -> Result<()> {
        let keys: Vec<MarkerKey> = self
            .subs
            .get(&sub_id)
            .ok_or(GroveError::NotFound)?
            .markers
            .keys()
            .map(|m| (sub_id, *m))
            .collect();
        self.refresh_markers(&keys)
    }

    /// Re-places a set of markers by key.
    pub(crate) fn refresh_markers(&mut self, keys: &[MarkerKey]) -> Result<()> {
        let mut res = Ok(());
        for key in keys {
            let Some(marker) = self.subs.marker(key) else {
                continue;
            };
            let flags = marker.flags;
            let dir = marker.dir;
            if dir == TraversalDir::None || flags.contains(MarkerFlags::DETACH) {
                self.subs.detached.insert(*key, flags);
                continue;
            }
            let Some(start) = marker.start_node() else {
                self.subs.detached.insert(*key, flags);
                continue;
            };
            let marker = marker.clone();
            let nodes = match self.traverse_collect(start, &marker.traverse_spec()) {
                Ok(nodes) => nodes,
                Err(e) => {
                    warn!(sub = %key.0, marker = %key.1, error = %e,
                          "could not fully apply a subscription marker");
                    res = Err(e);
                    continue;
                }
            };
            for id in nodes {
                if let Some(node) = self.node_mut_raw(&id) {
                    node.markers.insert(*key, flags);
                }
            }
            debug!(sub = %key.0, marker = %key.1, "marker refreshed");
        }
        res
    }

    /// Removes a subscription and detaches all of its markers.
    ///
    /// Returns `true` when the subscription existed.
    pub fn unsubscribe(&mut self, sub_id: SubscriptionId) -> bool {
        let Some(sub) = self.subs.get(&sub_id) else {
            return false;
        };
        let keys: Vec<MarkerKey> = sub.markers.keys().map(|m| (sub_id, *m)).collect();
        for key in &keys {
            self.clear_marker_placement(key);
        }
        self.missing.retain(|_, subs| {
            subs.retain(|s| *s != sub_id);
            !subs.is_empty()
        });
        self.subs.remove(&sub_id).is_some()
    }

    /// Detaches one marker from every node it is placed on.
    pub(crate) fn clear_marker_placement(&mut self, key: &MarkerKey) {
        self.subs.detached.remove(key);
        let Some(marker) = self.subs.marker(key) else {
            return;
        };
        if let Some(start) = marker.start_node() {
            let marker = marker.clone();
            if let Ok(nodes) = self.traverse_collect(start, &marker.traverse_spec()) {
                for id in nodes {
                    if let Some(node) = self.node_mut_raw(&id) {
                        node.markers.remove(key);
                    }
                }
            }
        }
        // The traversal may no longer reach every node the marker was placed
        // on (the graph has changed); sweep stragglers.
        let stale: Vec<NodeId> = self
            .nodes_iter()
            .filter(|(_, n)| n.markers.contains(key))
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(node) = self.node_mut_raw(&id) {
                node.markers.remove(key);
            }
        }
    }

    /// Collects the markers on a node and clears each of their placements
    /// entirely. The returned keys are re-refreshed after the mutation.
    pub(crate) fn clear_node_markers_for_refresh(&mut self, node_id: NodeId) -> Vec<MarkerKey> {
        let keys: Vec<MarkerKey> = match self.node(&node_id) {
            Some(node) => node.markers.keys().collect(),
            None => return Vec::new(),
        };
        if !keys.is_empty() {
            debug!(node = %node_id, count = keys.len(), "clearing markers for re-refresh");
        }
        for key in &keys {
            self.clear_marker_placement(key);
        }
        keys
    }

    /// Propagates descendant-subsuming markers from `parent` onto the newly
    /// linked `child` (and symmetrically ancestor-subsuming markers from
    /// `child` onto `parent`).
    pub(crate) fn inherit_markers(&mut self, parent: NodeId, child: NodeId) {
        let descends = |d: TraversalDir| {
            matches!(
                d,
                TraversalDir::BfsDescendants | TraversalDir::DfsDescendants
            )
        };
        let ascends = |d: TraversalDir| {
            matches!(d, TraversalDir::BfsAncestors | TraversalDir::DfsAncestors)
        };

        let mut to_refresh: Vec<MarkerKey> = Vec::new();
        // Markers carried by the endpoints.
        if let Some(p) = self.node(&parent) {
            for key in p.markers.keys() {
                if self.subs.marker(&key).is_some_and(|m| descends(m.dir)) {
                    to_refresh.push(key);
                }
            }
        }
        if let Some(c) = self.node(&child) {
            for key in c.markers.keys() {
                if self.subs.marker(&key).is_some_and(|m| ascends(m.dir)) {
                    to_refresh.push(key);
                }
            }
        }
        // Markers anchored at an endpoint. The anchor is skipped by its own
        // traversal, so it never carries the marker itself.
        for key in self.subs.all_keys() {
            let Some(m) = self.subs.marker(&key) else {
                continue;
            };
            match m.start_node() {
                Some(s)
                    if s == parent && (descends(m.dir) || m.dir == TraversalDir::Children) =>
                {
                    to_refresh.push(key);
                }
                Some(s) if s == child && (ascends(m.dir) || m.dir == TraversalDir::Parents) => {
                    to_refresh.push(key);
                }
                _ => {}
            }
        }
        to_refresh.sort_unstable();
        to_refresh.dedup();
        let _ = self.refresh_markers(&to_refresh);
    }

    /// Evaluates a marker's filter against a node; a marker without a filter
    /// always matches. Evaluation failures are logged and count as no match.
    fn filter_match(&self, marker: &Marker, node_id: NodeId) -> bool {
        let Some(filter) = &marker.filter else {
            return true;
        };
        let Some(node) = self.node_raw(&node_id) else {
            return false;
        };
        let mut regs = RegisterFile::new(marker.filter_args.len() + 1);
        if regs.set_id(0, node_id).is_err() {
            return false;
        }
        for (i, arg) in marker.filter_args.iter().enumerate() {
            if regs.set_str(i + 1, arg).is_err() {
                return false;
            }
        }
        let b = Bindings {
            node: Some(node),
            obj: Some(node.object()),
            now_ms: self.now_ms(),
        };
        match filter.eval_bool(&regs, &b) {
            Ok(res) => res,
            Err(e) => {
                warn!(node = %node_id, error = %e, "subscription filter failed");
                false
            }
        }
    }

    /// Snapshots pre-mutation filter outcomes for markers that could fire on
    /// a field change of `node_id`.
    pub fn field_change_precheck(&mut self, node_id: NodeId) {
        let mut keys: Vec<MarkerKey> = Vec::new();
        if self.subs.detached.could_match(MarkerFlags::CH_FIELD) {
            keys.extend(self.subs.detached.keys());
        }
        if let Some(node) = self.node_raw(&node_id) {
            if node.markers.could_match(MarkerFlags::CH_FIELD) {
                keys.extend(node.markers.keys());
            }
        }
        let mut outcomes: Vec<(MarkerKey, bool)> = Vec::new();
        for key in keys {
            let Some(marker) = self.subs.marker(&key) else {
                continue;
            };
            if !marker.flags.contains(MarkerFlags::CH_FIELD) {
                continue;
            }
            let res = self.filter_match(marker, node_id);
            outcomes.push((key, res));
        }
        for (key, res) in outcomes {
            if let Some(marker) = self.subs.marker_mut(&key) {
                marker.filter_history = FilterHistory {
                    node_id: Some(node_id),
                    res,
                };
            }
        }
    }

    /// Defers update events for markers sensitive to a change of `field` on
    /// `node_id`.
    pub fn defer_field_change(&mut self, node_id: NodeId, field: &str) {
        let mut keys: Vec<MarkerKey> = Vec::new();
        if self.subs.detached.could_match(MarkerFlags::CH_FIELD) {
            keys.extend(self.subs.detached.keys());
        }
        if let Some(node) = self.node_raw(&node_id) {
            if node.markers.could_match(MarkerFlags::CH_FIELD) {
                keys.extend(node.markers.keys());
            }
        }
        for key in keys {
            let Some(marker) = self.subs.marker(&key) else {
                continue;
            };
            if !marker.flags.contains(MarkerFlags::CH_FIELD) {
                continue;
            }
            if marker.flags.contains(MarkerFlags::REF)
                && marker.start_node() == Some(node_id)
            {
                continue;
            }
            if !marker.field_match(field) {
                continue;
            }
            let after = self.filter_match(marker, node_id);
            let before = marker.filter_history.res
                && marker.filter_history.node_id == Some(node_id);
            if after || before {
                self.deferred.updates.insert(key.0);
            }
        }
    }

    /// Defers update events for hierarchy-change markers on `node_id`.
    ///
    /// Unlike field changes, no filter or `REF` suppression applies: clients
    /// need the notification to re-apply markers to new relatives.
    pub fn defer_hierarchy_change(&mut self, node_id: NodeId) {
        let mut keys: Vec<MarkerKey> = Vec::new();
        if self.subs.detached.could_match(MarkerFlags::CH_HIERARCHY) {
            keys.extend(self.subs.detached.keys());
        }
        if let Some(node) = self.node_raw(&node_id) {
            if node.markers.could_match(MarkerFlags::CH_HIERARCHY) {
                keys.extend(node.markers.keys());
            }
        }
        for key in keys {
            if self
                .subs
                .marker(&key)
                .is_some_and(|m| m.flags.contains(MarkerFlags::CH_HIERARCHY))
            {
                self.deferred.updates.insert(key.0);
            }
        }
    }

    /// Defers trigger events of `event_type` for `node_id`.
    pub fn defer_trigger(&mut self, node_id: NodeId, event_type: TriggerType) {
        let keys: Vec<MarkerKey> = self.subs.detached.keys().collect();
        for key in keys {
            let Some(marker) = self.subs.marker(&key) else {
                continue;
            };
            if !marker.flags.contains(MarkerFlags::TRIGGER) {
                continue;
            }
            if marker.anchor != MarkerAnchor::Trigger(event_type) {
                continue;
            }
            if !self.filter_match(marker, node_id) {
                continue;
            }
            self.deferred.triggers.push((key.0, key.1, node_id));
        }
    }

    /// Defers alias-change events for `alias`; the owning subscriptions'
    /// markers are cleared after delivery.
    pub fn defer_alias_change(&mut self, alias: &str) {
        let mut hits: Vec<SubscriptionId> = Vec::new();
        for sub_id in self.subs.ids().collect::<Vec<_>>() {
            let Some(sub) = self.subs.get(&sub_id) else {
                continue;
            };
            let fired = sub.markers.values().any(|m| {
                m.flags.contains(MarkerFlags::CH_ALIAS) && m.alias.as_deref() == Some(alias)
            });
            if fired {
                hits.push(sub_id);
            }
        }
        for sub_id in hits {
            self.deferred.updates.insert(sub_id);
            self.deferred.pending_clear.insert(sub_id);
        }
    }

    /// Fires missing-accessor subscriptions waiting for `accessor`, removing
    /// the armed entries.
    pub fn defer_missing_accessor(&mut self, accessor: &str) {
        if let Some(subs) = self.missing.remove(accessor) {
            for sub_id in subs {
                self.deferred.updates.insert(sub_id);
            }
        }
    }

    /// Drains the deferred queues into the sink.
    ///
    /// Updates are deduplicated per subscription; triggers are not. This is
    /// the only place outbound notifications are produced.
    pub fn send_deferred_events(&mut self, sink: &mut dyn EventSink) {
        let updates = std::mem::take(&mut self.deferred.updates);
        for sub_id in updates {
            sink.publish(Event::Update { sub: sub_id });
        }
        let triggers = std::mem::take(&mut self.deferred.triggers);
        for (sub_id, _marker_id, node_id) in triggers {
            sink.publish(Event::Trigger {
                sub: sub_id,
                node: node_id,
            });
        }
        let pending = std::mem::take(&mut self.deferred.pending_clear);
        for sub_id in pending {
            let keys: Vec<MarkerKey> = self
                .subs
                .get(&sub_id)
                .map(|s| s.markers.keys().map(|m| (sub_id, *m)).collect())
                .unwrap_or_default();
            for key in &keys {
                self.clear_marker_placement(key);
            }
            if let Some(sub) = self.subs.get_mut(&sub_id) {
                sub.markers.clear();
            }
        }
    }

    /// Renders a human-readable dump of a subscription's markers.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] for an unknown subscription.
    pub fn debug_subscription(&self, sub_id: SubscriptionId) -> Result<String> {
        use std::fmt::Write as _;

        let sub = self.subs.get(&sub_id).ok_or(GroveError::NotFound)?;
        let mut out = String::new();
        let _ = writeln!(out, "subscription {}", sub_id.to_hex());
        for marker in sub.markers.values() {
            let anchor = match &marker.anchor {
                MarkerAnchor::Node(id) => format!("node:{id}"),
                MarkerAnchor::Trigger(t) => format!("trigger:{}", t.as_str()),
            };
            let _ = writeln!(
                out,
                "  marker {} flags:{:#06x} dir:{} {} filter:{} fields:{}",
                marker.marker_id,
                marker.flags.bits(),
                marker.dir.as_str(),
                anchor,
                marker.filter.is_some(),
                if marker.fields.is_empty() {
                    "(any)".to_owned()
                } else {
                    marker.fields.join(",")
                },
            );
        }
        Ok(out)
    }
}
