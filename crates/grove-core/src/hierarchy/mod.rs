// SPDX-License-Identifier: MIT
//! Hierarchy store: nodes, parent/child relations, heads, and the engine
//! state that hangs off them.
//!
//! The store is an id-ordered map of nodes plus a set of *heads* (nodes with
//! no parents). Parent/child membership is always mirrored on both ends, and
//! head membership tracks the parent set exactly, with the root node
//! permanently a head. Mutations run under the host's single-writer
//! discipline; deferred subscription events accumulate on the hierarchy and
//! drain once per top-level command.

pub mod detached;
mod edges;
pub mod traversal;

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use tracing::warn;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::edge::{ConstraintRegistry, EdgeField};
use crate::error::{GroveError, Result};
use crate::ident::{NodeId, NodeType, SubscriptionId, ROOT_NODE_ID};
use crate::object::{Object, PointerRegistry, SetType, TypedSet, Value};
use crate::subs::{DeferredEvents, MarkerSet, SubscriptionRegistry, TriggerType};

pub use detached::{DetachedKind, DetachedRegistry, InactiveRing};
pub use traversal::{TraversalDir, TraverseSpec, Visit};

bitflags! {
    /// Node flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeFlags: u32 {
        /// The subtree rooted here is compressed; only a stub is live.
        const DETACHED = 0x01;
    }
}

bitflags! {
    /// `del_node` behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DelFlags: u32 {
        /// Delete children even when still referenced elsewhere.
        const FORCE = 0x01;
        /// The subtree is being recorded as detached; stubs may be removed.
        const DETACH = 0x02;
        /// Collect deleted ids for the caller.
        const REPLY_IDS = 0x04;
    }
}

/// Object keys preserved when a node is cleared instead of destroyed.
const PRESERVED_FIELDS: [&str; 5] = ["id", "type", "createdAt", "aliases", "updatedAt"];

/// Synthetic field names affected by a relation change, per axis.
const CHILD_AXIS_FIELDS: [&str; 2] = ["children", "descendants"];
const PARENT_AXIS_FIELDS: [&str; 2] = ["parents", "ancestors"];

/// A hierarchy node.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    pub(crate) flags: NodeFlags,
    pub(crate) object: Object,
    pub(crate) parents: BTreeSet<NodeId>,
    pub(crate) children: BTreeSet<NodeId>,
    pub(crate) markers: MarkerSet,
    pub(crate) edges: BTreeMap<String, EdgeField>,
    pub(crate) edge_origins: BTreeMap<NodeId, BTreeSet<String>>,
    pub(crate) visit_stamp: u64,
}

impl Node {
    fn new(id: NodeId) -> Self {
        Self {
            id,
            flags: NodeFlags::empty(),
            object: Object::new(),
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            markers: MarkerSet::default(),
            edges: BTreeMap::new(),
            edge_origins: BTreeMap::new(),
            visit_stamp: 0,
        }
    }

    /// The node id.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node's data object.
    #[must_use]
    pub fn object(&self) -> &Object {
        &self.object
    }

    /// Returns `true` when the subtree rooted here is compressed.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.flags.contains(NodeFlags::DETACHED)
    }

    /// Parent ids in order.
    pub fn parents(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.parents.iter().copied()
    }

    /// Child ids in order.
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().copied()
    }

    /// Looks up an edge field by name.
    #[must_use]
    pub fn edge_field(&self, name: &str) -> Option<&EdgeField> {
        self.edges.get(name)
    }

    /// Iterates `(name, field)` pairs in name order.
    pub fn edge_fields(&self) -> impl Iterator<Item = (&str, &EdgeField)> {
        self.edges.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of incoming `(origin, field)` edge references.
    #[must_use]
    pub fn edge_refcount(&self) -> usize {
        self.edge_origins.values().map(BTreeSet::len).sum()
    }

    /// Attached subscription markers.
    #[must_use]
    pub fn marker_set(&self) -> &MarkerSet {
        &self.markers
    }

    /// Returns `true` when `name` resolves to a non-empty hierarchy, edge, or
    /// data field on this node.
    #[must_use]
    pub fn is_nonempty_field(&self, name: &str) -> bool {
        match name {
            "parents" | "ancestors" => !self.parents.is_empty(),
            "children" | "descendants" => !self.children.is_empty(),
            _ => {
                if let Some(edge) = self.edges.get(name) {
                    return !edge.is_empty();
                }
                self.object
                    .get_path(name)
                    .map(|v| !v.is_empty_value())
                    .unwrap_or(false)
            }
        }
    }

    /// Resolves `name` into a string set: hierarchy relation ids, edge field
    /// destinations, or a string-set data field.
    #[must_use]
    pub fn field_string_set(&self, name: &str) -> Option<TypedSet> {
        let id_set = |ids: &BTreeSet<NodeId>| {
            let mut set = TypedSet::new(SetType::String);
            for id in ids {
                let _ = set.add(crate::object::SetValue::Str(id.to_padded_string()));
            }
            set
        };
        match name {
            "parents" => Some(id_set(&self.parents)),
            "children" => Some(id_set(&self.children)),
            _ => {
                if let Some(edge) = self.edges.get(name) {
                    return Some(id_set(&edge.arcs));
                }
                match self.object.get_path(name) {
                    Ok(Value::Set(s)) => Some(s.clone()),
                    _ => None,
                }
            }
        }
    }

    /// Keys of the record-style edge fields under `field.` on this node, in
    /// order. `None` when the node has no such record.
    #[must_use]
    pub fn edge_record_keys(&self, field: &str) -> Option<Vec<String>> {
        let prefix = format!("{field}.");
        let keys: Vec<String> = self
            .edges
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .map(str::to_owned)
            .collect();
        if keys.is_empty() {
            None
        } else {
            Some(keys)
        }
    }
}

/// Outcome of a `del_node` call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DelOutcome {
    /// Number of nodes removed.
    pub count: usize,
    /// Removed ids, populated with [`DelFlags::REPLY_IDS`].
    pub ids: Vec<NodeId>,
}

/// The hierarchy store.
pub struct Hierarchy {
    pub(crate) config: Config,
    clock: Box<dyn Clock + Send>,
    nodes: BTreeMap<NodeId, Node>,
    heads: BTreeSet<NodeId>,
    generation: u64,
    /// Edge constraint registry.
    pub(crate) constraints: ConstraintRegistry,
    /// Subscription registry.
    pub(crate) subs: SubscriptionRegistry,
    /// Deferred event queues.
    pub(crate) deferred: DeferredEvents,
    /// Missing-accessor map: accessor string to armed subscriptions.
    pub(crate) missing: BTreeMap<String, Vec<SubscriptionId>>,
    /// Minimal alias index consulted by resolve and missing accessors.
    pub(crate) aliases: BTreeMap<String, NodeId>,
    /// Advisory node type registry.
    pub(crate) types: BTreeMap<NodeType, String>,
    /// Detached subtree registry.
    pub(crate) detached: DetachedRegistry,
    /// Inactive-node ring feeding auto-compression.
    pub(crate) inactive: InactiveRing,
    /// Pointer leaf loaders for the snapshot codec.
    pub(crate) pointers: PointerRegistry,
    /// Per-root compression ratios from the latest detach.
    pub(crate) compression_ratios: BTreeMap<NodeId, f64>,
    /// True while a snapshot save is in progress.
    pub(crate) snapshot_active: bool,
    /// Nesting depth of in-progress snapshot loads; events are suppressed
    /// while nonzero.
    loading_depth: u32,
}

impl std::fmt::Debug for Hierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hierarchy")
            .field("nodes", &self.nodes.len())
            .field("heads", &self.heads.len())
            .field("subscriptions", &self.subs.len())
            .finish_non_exhaustive()
    }
}

impl Hierarchy {
    /// Creates a hierarchy with the production clock. The root node exists
    /// from the start and is permanently a head.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    /// Creates a hierarchy with an injected clock.
    #[must_use]
    pub fn with_clock(config: Config, clock: Box<dyn Clock + Send>) -> Self {
        let inactive = InactiveRing::new(config.inactive_ring_capacity);
        let mut h = Self {
            config,
            clock,
            nodes: BTreeMap::new(),
            heads: BTreeSet::new(),
            generation: 0,
            constraints: ConstraintRegistry::new(),
            subs: SubscriptionRegistry::default(),
            deferred: DeferredEvents::default(),
            missing: BTreeMap::new(),
            aliases: BTreeMap::new(),
            types: BTreeMap::new(),
            detached: DetachedRegistry::default(),
            inactive,
            pointers: PointerRegistry::new(),
            compression_ratios: BTreeMap::new(),
            snapshot_active: false,
            loading_depth: 0,
        };
        // The root always exists. Nothing can be subscribed this early, so
        // the creation events fall on the floor.
        let _ = h.upsert_node(ROOT_NODE_ID);
        h
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a pointer leaf loader for the snapshot codec.
    ///
    /// # Errors
    /// [`GroveError::AlreadyExists`] when the tag is taken.
    pub fn register_pointer_type(
        &mut self,
        type_tag: u16,
        loader: crate::object::PointerLoader,
    ) -> Result<()> {
        self.pointers.register(type_tag, loader)
    }

    /// Current clock reading.
    #[must_use]
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Number of live nodes (stubs included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when only the root exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Raw node lookup; never restores detached subtrees.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub(crate) fn node_raw(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub(crate) fn node_mut_raw(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub(crate) fn nodes_iter(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    /// Finds a node, transparently restoring its subtree when it is detached.
    pub fn find(&mut self, id: NodeId) -> Option<&Node> {
        let needs_restore = match self.nodes.get(&id) {
            Some(node) => node.is_detached(),
            None => self.detached.contains(&id),
        };
        if needs_restore {
            if let Err(e) = self.restore_subtree(id) {
                warn!(node = %id, error = %e, "subtree restore failed");
                return None;
            }
        }
        self.nodes.get(&id)
    }

    /// Returns `true` when a node exists (live or detached stub).
    #[must_use]
    pub fn exists(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id) || self.detached.contains(id)
    }

    /// Head (orphan) node ids in order.
    pub fn heads(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.heads.iter().copied()
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub(crate) fn current_generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn stamp(&mut self, id: NodeId, generation: u64) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.visit_stamp = generation;
        }
    }

    pub(crate) fn stamped(&self, id: &NodeId, generation: u64) -> bool {
        self.nodes
            .get(id)
            .is_some_and(|n| n.visit_stamp == generation)
    }

    fn mk_head(&mut self, id: NodeId) {
        self.heads.insert(id);
    }

    fn rm_head(&mut self, id: NodeId) {
        // The root is permanently a head.
        if !id.is_root() {
            self.heads.remove(&id);
        }
    }

    /// Creates a node if missing. Returns `true` when the node was created.
    ///
    /// New nodes are orphans (heads) with `id`, `type`, `createdAt`, and
    /// `updatedAt` populated; creation defers missing-accessor and CREATED
    /// trigger events unless a snapshot load is in progress.
    pub fn upsert_node(&mut self, id: NodeId) -> Result<bool> {
        if id.is_zero() {
            return Err(GroveError::InvalidArgument);
        }
        if self.nodes.contains_key(&id) {
            return Ok(false);
        }
        let mut node = Node::new(id);
        if !self.is_loading() {
            let now = self.now_ms();
            node.object.set_string("id", id.to_display_string())?;
            node.object
                .set_string("type", id.node_type().to_string())?;
            node.object.set_long("createdAt", now)?;
            node.object.set_long("updatedAt", now)?;
        }
        self.nodes.insert(id, node);
        self.mk_head(id);
        if !self.is_loading() {
            self.defer_missing_accessor(&id.to_display_string());
            self.defer_trigger(id, TriggerType::Created);
        }
        Ok(true)
    }

    /// Stamps `updatedAt` on a node after a mutation-producing write.
    pub(crate) fn stamp_updated(&mut self, id: NodeId) {
        if self.is_loading() {
            return;
        }
        let now = self.now_ms();
        if let Some(node) = self.nodes.get_mut(&id) {
            let _ = node.object.set_long("updatedAt", now);
        }
    }

    /// Inserts the relation `parent -> child`. Returns `true` when the
    /// relation was new. Both nodes must exist.
    fn link(&mut self, parent: NodeId, child: NodeId) -> bool {
        if parent == child {
            return false;
        }
        let Some(p) = self.nodes.get_mut(&parent) else {
            return false;
        };
        let inserted = p.children.insert(child);
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parents.insert(parent);
        }
        if inserted {
            self.rm_head(child);
            self.inherit_markers(parent, child);
        }
        inserted
    }

    /// Removes the relation `parent -> child`. Returns `true` when present.
    fn unlink(&mut self, parent: NodeId, child: NodeId) -> bool {
        let mut removed = false;
        if let Some(p) = self.nodes.get_mut(&parent) {
            removed = p.children.remove(&child);
        }
        let mut became_head = false;
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parents.remove(&parent);
            became_head = c.parents.is_empty();
        }
        if became_head {
            self.mk_head(child);
        }
        removed
    }

    fn defer_axis_events(&mut self, id: NodeId, child_axis: bool) {
        let fields = if child_axis {
            &CHILD_AXIS_FIELDS
        } else {
            &PARENT_AXIS_FIELDS
        };
        for f in fields {
            self.defer_field_change(id, f);
        }
        self.defer_hierarchy_change(id);
    }

    fn effective_parents(&self, id: NodeId, parents: &[NodeId], no_root: bool) -> Vec<NodeId> {
        if parents.is_empty() && !no_root && !id.is_root() {
            vec![ROOT_NODE_ID]
        } else {
            parents.to_vec()
        }
    }

    /// Destructive hierarchy write: replaces both the parent and child sets
    /// of `id`. Missing referenced nodes are upserted. Returns the number of
    /// relation changes plus created nodes.
    ///
    /// # Errors
    /// [`GroveError::NotSupported`] when `id` names a detached stub.
    pub fn set_hierarchy(
        &mut self,
        id: NodeId,
        parents: &[NodeId],
        children: &[NodeId],
        no_root: bool,
    ) -> Result<usize> {
        let mut changes = usize::from(self.upsert_node(id)?);
        self.ensure_writable(id)?;
        let parents = self.effective_parents(id, parents, no_root);

        let cur_parents: Vec<NodeId> = self.nodes[&id].parents.iter().copied().collect();
        let cur_children: Vec<NodeId> = self.nodes[&id].children.iter().copied().collect();
        let rm_parents: Vec<NodeId> = cur_parents
            .iter()
            .filter(|p| !parents.contains(p))
            .copied()
            .collect();
        let rm_children: Vec<NodeId> = cur_children
            .iter()
            .filter(|c| !children.contains(c))
            .copied()
            .collect();

        self.field_change_precheck(id);
        let saved = if rm_parents.is_empty() && rm_children.is_empty() {
            Vec::new()
        } else {
            self.clear_node_markers_for_refresh(id)
        };

        for p in &rm_parents {
            if self.unlink(*p, id) {
                changes += 1;
                self.defer_axis_events(*p, true);
            }
        }
        for c in &rm_children {
            if self.unlink(id, *c) {
                changes += 1;
                self.defer_axis_events(*c, false);
            }
        }
        for p in &parents {
            changes += usize::from(self.upsert_node(*p)?);
            if self.link(*p, id) {
                changes += 1;
                self.defer_axis_events(*p, true);
            }
        }
        for c in children {
            changes += usize::from(self.upsert_node(*c)?);
            if self.link(id, *c) {
                changes += 1;
                self.defer_axis_events(*c, false);
            }
        }

        if changes > 0 {
            self.defer_axis_events(id, true);
            self.defer_axis_events(id, false);
            self.stamp_updated(id);
        }
        self.refresh_markers(&saved)?;
        Ok(changes)
    }

    /// Destructive write on the parent axis only.
    pub fn set_parents(&mut self, id: NodeId, parents: &[NodeId]) -> Result<usize> {
        let children: Vec<NodeId> = self
            .nodes
            .get(&id)
            .ok_or(GroveError::NotFound)?
            .children
            .iter()
            .copied()
            .collect();
        self.set_hierarchy(id, parents, &children, false)
    }

    /// Destructive write on the child axis only.
    pub fn set_children(&mut self, id: NodeId, children: &[NodeId]) -> Result<usize> {
        let parents: Vec<NodeId> = self
            .nodes
            .get(&id)
            .ok_or(GroveError::NotFound)?
            .parents
            .iter()
            .copied()
            .collect();
        self.set_hierarchy(id, &parents, children, true)
    }

    /// Non-destructive union with the existing relations.
    pub fn add_hierarchy(
        &mut self,
        id: NodeId,
        parents: &[NodeId],
        children: &[NodeId],
        no_root: bool,
    ) -> Result<usize> {
        let created = self.upsert_node(id)?;
        self.ensure_writable(id)?;
        let mut changes = usize::from(created);
        let parents = if created {
            self.effective_parents(id, parents, no_root)
        } else {
            parents.to_vec()
        };
        self.field_change_precheck(id);
        for p in &parents {
            changes += usize::from(self.upsert_node(*p)?);
            if self.link(*p, id) {
                changes += 1;
                self.defer_axis_events(*p, true);
            }
        }
        for c in children {
            changes += usize::from(self.upsert_node(*c)?);
            if self.link(id, *c) {
                changes += 1;
                self.defer_axis_events(*c, false);
            }
        }
        if changes > 0 {
            self.defer_axis_events(id, true);
            self.defer_axis_events(id, false);
            self.stamp_updated(id);
        }
        Ok(changes)
    }

    /// Removes only the listed incident relations.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] when `id` does not exist.
    pub fn del_hierarchy(
        &mut self,
        id: NodeId,
        parents: &[NodeId],
        children: &[NodeId],
    ) -> Result<usize> {
        if !self.nodes.contains_key(&id) {
            return Err(GroveError::NotFound);
        }
        self.ensure_writable(id)?;
        self.field_change_precheck(id);
        let saved = self.clear_node_markers_for_refresh(id);
        let mut changes = 0;
        for p in parents {
            if self.unlink(*p, id) {
                changes += 1;
                self.defer_axis_events(*p, true);
            }
        }
        for c in children {
            if self.unlink(id, *c) {
                changes += 1;
                self.defer_axis_events(*c, false);
            }
        }
        if changes > 0 {
            self.defer_axis_events(id, true);
            self.defer_axis_events(id, false);
            self.stamp_updated(id);
        }
        self.refresh_markers(&saved)?;
        Ok(changes)
    }

    /// Rejects writes to detached stubs.
    pub(crate) fn ensure_writable(&self, id: NodeId) -> Result<()> {
        match self.nodes.get(&id) {
            Some(node) if node.is_detached() => Err(GroveError::NotSupported),
            _ => Ok(()),
        }
    }

    /// Deletes a node (and recursively its orphaned children).
    ///
    /// A child is deleted when [`DelFlags::FORCE`] is set or when it has no
    /// remaining parents and no incoming edge references. The root node is
    /// never destroyed; it is cleared instead.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] when the node does not exist;
    /// [`GroveError::NotSupported`] when deleting a detached stub without
    /// [`DelFlags::DETACH`].
    pub fn del_node(&mut self, id: NodeId, flags: DelFlags) -> Result<DelOutcome> {
        if flags.contains(DelFlags::DETACH) {
            if !self.nodes.contains_key(&id) {
                return Err(GroveError::NotFound);
            }
        } else if self.find(id).is_none() {
            return Err(GroveError::NotFound);
        }
        if id.is_root() {
            self.clear_root_fields();
            return Ok(DelOutcome {
                count: 1,
                ids: if flags.contains(DelFlags::REPLY_IDS) {
                    vec![id]
                } else {
                    Vec::new()
                },
            });
        }
        let mut outcome = DelOutcome::default();
        self.del_node_rec(id, flags, &mut outcome)?;
        Ok(outcome)
    }

    fn del_node_rec(
        &mut self,
        id: NodeId,
        flags: DelFlags,
        outcome: &mut DelOutcome,
    ) -> Result<()> {
        let Some(node) = self.nodes.get(&id) else {
            return Ok(());
        };
        if node.is_detached() && !flags.contains(DelFlags::DETACH) {
            // Should only be reachable when a restore failed earlier.
            return Err(GroveError::NotSupported);
        }

        // Markers never survive on a deleted node.
        let _ = self.clear_node_markers_for_refresh(id);

        // Drop links to parents first; a cycle back into this node must not
        // find dangling membership.
        let parents: Vec<NodeId> = self.nodes[&id].parents.iter().copied().collect();
        for p in parents {
            if self.unlink(p, id) {
                self.defer_axis_events(p, true);
            }
        }

        // Children: unlink, then recurse into the ones that became orphans.
        let children: Vec<NodeId> = self.nodes[&id].children.iter().copied().collect();
        for c in children {
            if self.unlink(id, c) {
                self.defer_axis_events(c, false);
            }
            let deletable = flags.contains(DelFlags::FORCE)
                || self.nodes.get(&c).is_some_and(|child| {
                    child.parents.is_empty() && child.edge_refcount() == 0
                });
            if deletable {
                self.del_node_rec(c, flags, outcome)?;
            }
        }

        self.drop_node_edges(id);
        self.drop_node_aliases(id);

        if !self.is_loading() && !flags.contains(DelFlags::DETACH) {
            self.defer_trigger(id, TriggerType::Deleted);
        }

        self.heads.remove(&id);
        self.nodes.remove(&id);
        outcome.count += 1;
        if flags.contains(DelFlags::REPLY_IDS) {
            outcome.ids.push(id);
        }
        Ok(())
    }

    /// Removes alias index entries owned by a node, deferring alias-change
    /// events.
    fn drop_node_aliases(&mut self, id: NodeId) {
        let owned: Vec<String> = self
            .aliases
            .iter()
            .filter(|(_, owner)| **owner == id)
            .map(|(a, _)| a.clone())
            .collect();
        for alias in owned {
            self.aliases.remove(&alias);
            self.defer_alias_change(&alias);
        }
    }

    /// Clears the root node's fields, keeping the preserved key set.
    fn clear_root_fields(&mut self) {
        self.field_change_precheck(ROOT_NODE_ID);
        if let Some(node) = self.nodes.get_mut(&ROOT_NODE_ID) {
            node.object
                .retain_keys(|k| PRESERVED_FIELDS.contains(&k));
        }
        self.stamp_updated(ROOT_NODE_ID);
        self.defer_field_change(ROOT_NODE_ID, "updatedAt");
        if !self.is_loading() {
            self.defer_trigger(ROOT_NODE_ID, TriggerType::Updated);
        }
    }

    /// Parent ids of a node, restoring a detached subtree on access.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] for a missing node.
    pub fn parents_of(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let node = self.find(id).ok_or(GroveError::NotFound)?;
        Ok(node.parents.iter().copied().collect())
    }

    /// Child ids of a node, restoring a detached subtree on access.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] for a missing node.
    pub fn children_of(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let node = self.find(id).ok_or(GroveError::NotFound)?;
        Ok(node.children.iter().copied().collect())
    }

    /// Updates the alias index: points `alias` at `node`, deferring the
    /// alias-change event when the alias moves, and satisfying any armed
    /// missing accessor.
    pub fn set_alias(&mut self, alias: &str, node: NodeId) {
        let prev = self.aliases.insert(alias.to_owned(), node);
        match prev {
            Some(old) if old != node => self.defer_alias_change(alias),
            _ => {}
        }
        self.defer_missing_accessor(alias);
    }

    /// Removes an alias from the index, deferring the alias-change event.
    pub fn del_alias(&mut self, alias: &str) {
        if self.aliases.remove(alias).is_some() {
            self.defer_alias_change(alias);
        }
    }

    /// Resolves an alias to its node id.
    #[must_use]
    pub fn resolve_alias(&self, alias: &str) -> Option<NodeId> {
        self.aliases.get(alias).copied()
    }

    /// Advisory node type registry: registers a name for a type.
    pub fn add_type(&mut self, ty: NodeType, name: &str) {
        self.types.insert(ty, name.to_owned());
    }

    /// Clears the node type registry.
    pub fn clear_types(&mut self) {
        self.types.clear();
    }

    /// Lists registered `(type, name)` pairs in type order.
    #[must_use]
    pub fn list_types(&self) -> Vec<(NodeType, String)> {
        self.types.iter().map(|(t, n)| (*t, n.clone())).collect()
    }

    /// Returns `true` while a snapshot load is in progress.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading_depth > 0
    }

    pub(crate) fn begin_load(&mut self) {
        self.loading_depth += 1;
    }

    pub(crate) fn end_load(&mut self) {
        self.loading_depth = self.loading_depth.saturating_sub(1);
        if self.loading_depth == 0 {
            self.rebuild_alias_index();
        }
    }

    pub(crate) fn begin_snapshot(&mut self) {
        self.snapshot_active = true;
    }

    pub(crate) fn end_snapshot(&mut self) {
        self.snapshot_active = false;
    }

    /// The edge constraint registry.
    #[must_use]
    pub fn constraints(&self) -> &ConstraintRegistry {
        &self.constraints
    }

    /// The subscription registry.
    #[must_use]
    pub fn subscriptions(&self) -> &crate::subs::SubscriptionRegistry {
        &self.subs
    }

    /// Mutable access to a node's data object. Callers are responsible for
    /// precheck/defer calls around the write.
    pub(crate) fn node_object_mut(&mut self, id: &NodeId) -> Option<&mut Object> {
        self.nodes.get_mut(id).map(|n| &mut n.object)
    }

    /// Inserts a prebuilt node, refreshing head membership.
    pub(crate) fn insert_node_raw(&mut self, node: Node) {
        let id = node.id();
        let orphan = node.parents.is_empty();
        self.nodes.insert(id, node);
        if orphan {
            self.mk_head(id);
        } else {
            self.rm_head(id);
        }
    }

    /// Inserts a relation without events or marker inheritance (snapshot
    /// load and stub relinking).
    pub(crate) fn link_for_load(&mut self, parent: NodeId, child: NodeId) {
        if parent == child {
            return;
        }
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.insert(child);
        } else {
            return;
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parents.insert(parent);
        }
        self.rm_head(child);
    }

    /// Clears the DETACHED flag on a rehydrated stub.
    pub(crate) fn clear_detached_flag(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.flags -= NodeFlags::DETACHED;
        }
    }

    /// Replaces a node's data object (snapshot load).
    pub(crate) fn replace_object(&mut self, id: NodeId, object: Object) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.object = object;
        }
    }

    /// Installs a fully built edge field, wiring origin back-references
    /// (snapshot load; bypasses constraint mirroring which is itself saved).
    pub(crate) fn install_edge_field(&mut self, id: NodeId, name: String, field: EdgeField) {
        let arcs: Vec<NodeId> = field.arcs.iter().copied().collect();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.edges.insert(name.clone(), field);
        } else {
            return;
        }
        for dst in arcs {
            if let Some(dst_node) = self.nodes.get_mut(&dst) {
                dst_node
                    .edge_origins
                    .entry(id)
                    .or_default()
                    .insert(name.clone());
            }
        }
    }

    /// Rebuilds the alias index from the nodes' `aliases` sets.
    fn rebuild_alias_index(&mut self) {
        let mut aliases = BTreeMap::new();
        for (id, node) in &self.nodes {
            if let Ok(set) = node.object.get_set("aliases") {
                for alias in set.iter_str() {
                    aliases.insert(alias.to_owned(), *id);
                }
            }
        }
        // Loading never drops aliases armed at runtime outside node objects.
        for (alias, id) in aliases {
            self.aliases.insert(alias, id);
        }
    }

    /// Verifies the mutual-linkage and heads invariants; returns violations.
    /// Intended for tests and debugging aids.
    #[must_use]
    pub fn check_invariants(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (id, node) in &self.nodes {
            for p in &node.parents {
                if !self
                    .nodes
                    .get(p)
                    .is_some_and(|pn| pn.children.contains(id))
                {
                    problems.push(format!("{id}: parent {p} missing mirror child link"));
                }
            }
            for c in &node.children {
                if !self.nodes.get(c).is_some_and(|cn| cn.parents.contains(id)) {
                    problems.push(format!("{id}: child {c} missing mirror parent link"));
                }
            }
            let should_be_head = node.parents.is_empty() || id.is_root();
            if should_be_head != self.heads.contains(id) {
                problems.push(format!("{id}: head membership wrong"));
            }
            for (origin, fields) in &node.edge_origins {
                for field in fields {
                    let ok = self
                        .nodes
                        .get(origin)
                        .and_then(|o| o.edges.get(field))
                        .is_some_and(|f| f.has(*id));
                    if !ok {
                        problems.push(format!("{id}: origin {origin}.{field} has no arc"));
                    }
                }
            }
        }
        problems
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn nid(s: &str) -> NodeId {
        NodeId::from_str(s).unwrap()
    }

    fn fresh() -> Hierarchy {
        Hierarchy::with_clock(
            Config::default(),
            Box::new(crate::clock::FixedClock::new(1_000)),
        )
    }

    #[test]
    fn root_exists_and_is_a_head() {
        let h = fresh();
        assert!(h.node(&ROOT_NODE_ID).is_some());
        assert!(h.heads().any(|id| id.is_root()));
    }

    #[test]
    fn upsert_creates_orphans_with_timestamps() {
        let mut h = fresh();
        assert!(h.upsert_node(nid("a")).unwrap());
        assert!(!h.upsert_node(nid("a")).unwrap());
        let node = h.node(&nid("a")).unwrap();
        assert_eq!(node.object().get_long("createdAt").unwrap(), 1_000);
        assert_eq!(node.object().get_string("id").unwrap(), "a");
        assert!(h.heads().any(|id| id == nid("a")));
    }

    #[test]
    fn set_hierarchy_defaults_to_root_parent() {
        let mut h = fresh();
        h.set_hierarchy(nid("a"), &[], &[], false).unwrap();
        let a = h.node(&nid("a")).unwrap();
        assert_eq!(a.parents().collect::<Vec<_>>(), vec![ROOT_NODE_ID]);
        assert!(!h.heads().any(|id| id == nid("a")));
    }

    #[test]
    fn no_root_flag_keeps_orphan() {
        let mut h = fresh();
        h.set_hierarchy(nid("a"), &[], &[], true).unwrap();
        assert!(h.heads().any(|id| id == nid("a")));
    }

    #[test]
    fn mutual_linkage_is_maintained() {
        let mut h = fresh();
        h.set_hierarchy(nid("a"), &[], &[], true).unwrap();
        h.set_hierarchy(nid("b"), &[nid("a")], &[], true).unwrap();
        h.set_hierarchy(nid("c"), &[nid("b")], &[], true).unwrap();
        assert!(h.check_invariants().is_empty());
        assert_eq!(h.parents_of(nid("c")).unwrap(), vec![nid("b")]);
        assert_eq!(h.children_of(nid("a")).unwrap(), vec![nid("b")]);
    }

    #[test]
    fn set_hierarchy_is_destructive() {
        let mut h = fresh();
        h.set_hierarchy(nid("p1"), &[], &[], true).unwrap();
        h.set_hierarchy(nid("p2"), &[], &[], true).unwrap();
        h.set_hierarchy(nid("c"), &[nid("p1")], &[], true).unwrap();
        h.set_hierarchy(nid("c"), &[nid("p2")], &[], true).unwrap();
        assert_eq!(h.parents_of(nid("c")).unwrap(), vec![nid("p2")]);
        assert!(h.check_invariants().is_empty());
    }

    #[test]
    fn add_hierarchy_is_union() {
        let mut h = fresh();
        h.set_hierarchy(nid("p1"), &[], &[], true).unwrap();
        h.set_hierarchy(nid("c"), &[nid("p1")], &[], true).unwrap();
        h.add_hierarchy(nid("c"), &[nid("p2")], &[], true).unwrap();
        assert_eq!(h.parents_of(nid("c")).unwrap(), vec![nid("p1"), nid("p2")]);
        assert!(h.check_invariants().is_empty());
    }

    #[test]
    fn del_hierarchy_removes_listed_relations_only() {
        let mut h = fresh();
        h.set_hierarchy(nid("c"), &[nid("p1"), nid("p2")], &[], true)
            .unwrap();
        h.del_hierarchy(nid("c"), &[nid("p1")], &[]).unwrap();
        assert_eq!(h.parents_of(nid("c")).unwrap(), vec![nid("p2")]);
        assert!(h.check_invariants().is_empty());
    }

    #[test]
    fn orphaned_children_cascade_on_delete() {
        let mut h = fresh();
        h.set_hierarchy(nid("a"), &[], &[], true).unwrap();
        h.set_hierarchy(nid("b"), &[nid("a")], &[], true).unwrap();
        h.set_hierarchy(nid("c"), &[nid("b")], &[], true).unwrap();
        let out = h.del_node(nid("a"), DelFlags::REPLY_IDS).unwrap();
        assert_eq!(out.count, 3);
        // Depth-first: the deepest orphan reports first.
        assert_eq!(out.ids, vec![nid("c"), nid("b"), nid("a")]);
        assert!(h.node(&nid("c")).is_none());
        assert!(h.check_invariants().is_empty());
    }

    #[test]
    fn shared_children_survive_non_force_delete() {
        let mut h = fresh();
        h.set_hierarchy(nid("a"), &[], &[], true).unwrap();
        h.set_hierarchy(nid("b"), &[], &[], true).unwrap();
        h.set_hierarchy(nid("c"), &[nid("a"), nid("b")], &[], true)
            .unwrap();
        let out = h.del_node(nid("a"), DelFlags::empty()).unwrap();
        assert_eq!(out.count, 1);
        assert!(h.node(&nid("c")).is_some());
        assert_eq!(h.parents_of(nid("c")).unwrap(), vec![nid("b")]);
        assert!(h.check_invariants().is_empty());
    }

    #[test]
    fn force_delete_takes_shared_children() {
        let mut h = fresh();
        h.set_hierarchy(nid("a"), &[], &[], true).unwrap();
        h.set_hierarchy(nid("b"), &[], &[], true).unwrap();
        h.set_hierarchy(nid("c"), &[nid("a"), nid("b")], &[], true)
            .unwrap();
        let out = h.del_node(nid("a"), DelFlags::FORCE).unwrap();
        assert_eq!(out.count, 2);
        assert!(h.node(&nid("c")).is_none());
        assert!(h.check_invariants().is_empty());
    }

    #[test]
    fn root_delete_clears_fields_instead() {
        let mut h = fresh();
        {
            let node = h.node_mut_raw(&ROOT_NODE_ID).unwrap();
            node.object.set_string("title", "x").unwrap();
        }
        let out = h.del_node(ROOT_NODE_ID, DelFlags::empty()).unwrap();
        assert_eq!(out.count, 1);
        let root = h.node(&ROOT_NODE_ID).unwrap();
        assert!(root.object().get_string("title").is_err());
        assert!(h.node(&ROOT_NODE_ID).is_some());
    }

    #[test]
    fn cycles_are_tolerated() {
        let mut h = fresh();
        h.set_hierarchy(nid("a"), &[], &[], true).unwrap();
        h.set_hierarchy(nid("b"), &[nid("a")], &[], true).unwrap();
        // Close a cycle: a's parent is b.
        h.add_hierarchy(nid("a"), &[nid("b")], &[], true).unwrap();
        let spec = TraverseSpec {
            dir: TraversalDir::BfsDescendants,
            ..TraverseSpec::default()
        };
        // The start node is skipped and never revisited through the cycle.
        let reached = h.traverse_collect(nid("a"), &spec).unwrap();
        assert_eq!(reached, vec![nid("b")]);
        let out = h.del_node(nid("a"), DelFlags::FORCE).unwrap();
        assert_eq!(out.count, 2);
        assert!(h.check_invariants().is_empty());
    }

    #[test]
    fn alias_index_round_trip() {
        let mut h = fresh();
        h.upsert_node(nid("a")).unwrap();
        h.set_alias("main", nid("a"));
        assert_eq!(h.resolve_alias("main"), Some(nid("a")));
        h.del_node(nid("a"), DelFlags::FORCE).unwrap();
        assert_eq!(h.resolve_alias("main"), None);
    }

    #[test]
    fn type_registry() {
        let mut h = fresh();
        h.add_type(NodeType(*b"ma"), "match");
        assert_eq!(h.list_types().len(), 1);
        h.clear_types();
        assert!(h.list_types().is_empty());
    }
}
