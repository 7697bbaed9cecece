// SPDX-License-Identifier: MIT
//! Hierarchy traversal.
//!
//! All traversals are iterative with an explicit work list and a per-run
//! generation stamp: re-entry into a node within the same traversal is a
//! no-op, which makes cyclic graphs safe. Parent/child sets iterate in
//! `NodeId` order, so expansion is deterministic across runs.

use std::collections::VecDeque;

use crate::error::{GroveError, Result};
use crate::expr::vm::Bindings;
use crate::expr::{Expression, RegisterFile};
use crate::ident::NodeId;
use crate::object::Value;

use super::{Hierarchy, Node};

/// Traversal direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDir {
    /// No traversal (detached markers).
    None,
    /// Just the starting node.
    Node,
    /// One hop along `children`.
    Children,
    /// One hop along `parents`.
    Parents,
    /// BFS along `parents`; the start node is skipped.
    BfsAncestors,
    /// BFS along `children`; the start node is skipped.
    BfsDescendants,
    /// DFS along `parents`; the start node is skipped.
    DfsAncestors,
    /// DFS along `children`; the start node is skipped.
    DfsDescendants,
    /// Every orphan head, then everything reachable from it.
    DfsFull,
    /// Follow a set-valued data field whose elements are node ids.
    Ref,
    /// Follow one named edge field one hop.
    EdgeField,
    /// BFS following one named edge field repeatedly.
    BfsEdgeField,
    /// BFS where an expression yields the set of field names to follow.
    BfsExpression,
    /// One level: the expression yields field names, each followed one hop.
    Expression,
    /// Iterate an array-valued field of node ids.
    Array,
    /// Iterate a set-valued field of node ids.
    Set,
}

impl TraversalDir {
    /// Parses the external token form.
    ///
    /// # Errors
    /// [`GroveError::InvalidArgument`] for unknown tokens.
    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "none" => Self::None,
            "node" => Self::Node,
            "children" => Self::Children,
            "parents" => Self::Parents,
            "ancestors" | "bfs_ancestors" => Self::BfsAncestors,
            "descendants" | "bfs_descendants" => Self::BfsDescendants,
            "dfs_ancestors" => Self::DfsAncestors,
            "dfs_descendants" => Self::DfsDescendants,
            "dfs_full" => Self::DfsFull,
            "ref" => Self::Ref,
            "edge_field" => Self::EdgeField,
            "bfs_edge_field" => Self::BfsEdgeField,
            "bfs_expression" => Self::BfsExpression,
            "expression" => Self::Expression,
            "array" => Self::Array,
            "set" => Self::Set,
            _ => return Err(GroveError::InvalidArgument),
        })
    }

    /// The external token form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Node => "node",
            Self::Children => "children",
            Self::Parents => "parents",
            Self::BfsAncestors => "bfs_ancestors",
            Self::BfsDescendants => "bfs_descendants",
            Self::DfsAncestors => "dfs_ancestors",
            Self::DfsDescendants => "dfs_descendants",
            Self::DfsFull => "dfs_full",
            Self::Ref => "ref",
            Self::EdgeField => "edge_field",
            Self::BfsEdgeField => "bfs_edge_field",
            Self::BfsExpression => "bfs_expression",
            Self::Expression => "expression",
            Self::Array => "array",
            Self::Set => "set",
        }
    }

    /// Directions that require a field name argument.
    #[must_use]
    pub fn needs_field(&self) -> bool {
        matches!(
            self,
            Self::Ref | Self::EdgeField | Self::BfsEdgeField | Self::Array | Self::Set
        )
    }

    /// Directions that require a traversal expression.
    #[must_use]
    pub fn needs_expression(&self) -> bool {
        matches!(self, Self::BfsExpression | Self::Expression)
    }

    /// Directions whose start node is not visited.
    fn skips_head(&self) -> bool {
        matches!(
            self,
            Self::BfsAncestors
                | Self::BfsDescendants
                | Self::DfsAncestors
                | Self::DfsDescendants
                | Self::BfsExpression
        )
    }
}

/// Traversal parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraverseSpec<'a> {
    /// Traversal direction.
    pub dir: TraversalDir,
    /// Field name for field-driven directions.
    pub field: Option<&'a str>,
    /// Expression for expression-driven directions.
    pub expr: Option<&'a Expression>,
    /// Edge filter evaluated against edge metadata; a false result skips the
    /// edge.
    pub edge_filter: Option<&'a Expression>,
    /// Do not restore detached subtrees on touch (snapshot writer only).
    pub inhibit_restore: bool,
}

impl Default for TraversalDir {
    fn default() -> Self {
        Self::Node
    }
}

/// Visitor verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Keep going.
    Continue,
    /// Abort the traversal.
    Stop,
}

enum Expand {
    Parents,
    Children,
}

impl Hierarchy {
    /// Runs a traversal, invoking `visitor` on every reached node.
    ///
    /// Returns `true` when the visitor stopped the traversal early.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] when a required start node is missing,
    /// [`GroveError::TraversalLimit`] when the expansion depth exceeds the
    /// configured bound, [`GroveError::InvalidArgument`] for a spec missing
    /// its field/expression.
    pub fn traverse(
        &mut self,
        start: NodeId,
        spec: &TraverseSpec<'_>,
        visitor: &mut dyn FnMut(&Node) -> Visit,
    ) -> Result<bool> {
        match spec.dir {
            TraversalDir::None => Ok(false),
            TraversalDir::Node => {
                self.touch(start, spec.inhibit_restore)?;
                let generation = self.next_generation();
                self.stamp(start, generation);
                let node = self.node(&start).ok_or(GroveError::NotFound)?;
                Ok(visitor(node) == Visit::Stop)
            }
            TraversalDir::Children => self.traverse_adjacent(start, Expand::Children, spec, visitor),
            TraversalDir::Parents => self.traverse_adjacent(start, Expand::Parents, spec, visitor),
            TraversalDir::BfsAncestors => {
                self.search(start, Expand::Parents, Order::Bfs, spec, visitor)
            }
            TraversalDir::BfsDescendants => {
                self.search(start, Expand::Children, Order::Bfs, spec, visitor)
            }
            TraversalDir::DfsAncestors => {
                self.search(start, Expand::Parents, Order::Dfs, spec, visitor)
            }
            TraversalDir::DfsDescendants => {
                self.search(start, Expand::Children, Order::Dfs, spec, visitor)
            }
            TraversalDir::DfsFull => self.traverse_full(spec, visitor),
            TraversalDir::Ref | TraversalDir::Set => self.traverse_field_set(start, spec, visitor),
            TraversalDir::Array => self.traverse_field_array(start, spec, visitor),
            TraversalDir::EdgeField => self.traverse_edge_field(start, spec, visitor),
            TraversalDir::BfsEdgeField => self.traverse_bfs_edge_field(start, spec, visitor),
            TraversalDir::BfsExpression => self.traverse_bfs_expression(start, spec, visitor),
            TraversalDir::Expression => self.traverse_expression(start, spec, visitor),
        }
    }

    /// Runs a traversal collecting reached node ids in visit order.
    ///
    /// # Errors
    /// As [`Hierarchy::traverse`].
    pub fn traverse_collect(
        &mut self,
        start: NodeId,
        spec: &TraverseSpec<'_>,
    ) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        self.traverse(start, spec, &mut |node| {
            out.push(node.id());
            Visit::Continue
        })?;
        Ok(out)
    }

    /// Ensures a node is live, restoring a detached subtree on touch.
    fn touch(&mut self, id: NodeId, inhibit_restore: bool) -> Result<()> {
        if inhibit_restore {
            return Ok(());
        }
        let needs_restore = match self.node(&id) {
            Some(node) => node.is_detached(),
            None => self.detached.contains(&id),
        };
        if needs_restore {
            self.restore_subtree(id)?;
        }
        Ok(())
    }

    fn adjacent_ids(&self, id: &NodeId, expand: &Expand) -> Vec<NodeId> {
        self.node(id).map_or_else(Vec::new, |node| match expand {
            Expand::Parents => node.parents.iter().copied().collect(),
            Expand::Children => node.children.iter().copied().collect(),
        })
    }

    fn traverse_adjacent(
        &mut self,
        start: NodeId,
        expand: Expand,
        spec: &TraverseSpec<'_>,
        visitor: &mut dyn FnMut(&Node) -> Visit,
    ) -> Result<bool> {
        self.touch(start, spec.inhibit_restore)?;
        if self.node(&start).is_none() {
            return Err(GroveError::NotFound);
        }
        let generation = self.next_generation();
        for id in self.adjacent_ids(&start, &expand) {
            self.touch(id, spec.inhibit_restore)?;
            self.stamp(id, generation);
            if let Some(node) = self.node(&id) {
                if visitor(node) == Visit::Stop {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn search(
        &mut self,
        start: NodeId,
        expand: Expand,
        order: Order,
        spec: &TraverseSpec<'_>,
        visitor: &mut dyn FnMut(&Node) -> Visit,
    ) -> Result<bool> {
        self.touch(start, spec.inhibit_restore)?;
        if self.node(&start).is_none() {
            return Err(GroveError::NotFound);
        }
        let generation = self.next_generation();
        self.stamp(start, generation);

        let mut work: VecDeque<(NodeId, usize)> = VecDeque::new();
        for id in self.adjacent_ids(&start, &expand) {
            work.push_back((id, 1));
        }
        while let Some((id, depth)) = pop(&mut work, order) {
            if depth > self.config.max_traversal_depth {
                return Err(GroveError::TraversalLimit);
            }
            if self.stamped(&id, generation) {
                continue;
            }
            self.touch(id, spec.inhibit_restore)?;
            self.stamp(id, generation);
            let Some(node) = self.node(&id) else {
                continue;
            };
            if visitor(node) == Visit::Stop {
                return Ok(true);
            }
            for next in self.adjacent_ids(&id, &expand) {
                if !self.stamped(&next, generation) {
                    work.push_back((next, depth + 1));
                }
            }
        }
        Ok(false)
    }

    fn traverse_full(
        &mut self,
        spec: &TraverseSpec<'_>,
        visitor: &mut dyn FnMut(&Node) -> Visit,
    ) -> Result<bool> {
        let generation = self.next_generation();
        let heads: Vec<NodeId> = self.heads().collect();
        for head in heads {
            if self.stamped(&head, generation) {
                continue;
            }
            self.stamp(head, generation);
            let mut stack: Vec<(NodeId, usize)> = vec![(head, 0)];
            while let Some((id, depth)) = stack.pop() {
                if depth > self.config.max_traversal_depth {
                    return Err(GroveError::TraversalLimit);
                }
                self.touch(id, spec.inhibit_restore)?;
                self.stamp(id, generation);
                let Some(node) = self.node(&id) else {
                    continue;
                };
                if visitor(node) == Visit::Stop {
                    return Ok(true);
                }
                for next in self.adjacent_ids(&id, &Expand::Children) {
                    if !self.stamped(&next, generation) {
                        stack.push((next, depth + 1));
                    }
                }
            }
        }
        Ok(false)
    }

    /// Reads a field of `start` as a list of node ids.
    fn field_ids(&self, start: &NodeId, field: &str, array: bool) -> Result<Vec<NodeId>> {
        let node = self.node(start).ok_or(GroveError::NotFound)?;
        let obj = node.object();
        let mut ids = Vec::new();
        if array {
            match obj.get_path(field) {
                Ok(Value::Array(items)) => {
                    for item in items {
                        if let Value::String(s) = item {
                            ids.push(NodeId::from_bytes(s.as_bytes()));
                        }
                    }
                }
                Ok(_) => return Err(GroveError::WrongType),
                Err(e) => return Err(e),
            }
        } else {
            let set = obj.get_set(field)?;
            for s in set.iter_str() {
                ids.push(NodeId::from_bytes(s.as_bytes()));
            }
        }
        Ok(ids)
    }

    fn traverse_field_set(
        &mut self,
        start: NodeId,
        spec: &TraverseSpec<'_>,
        visitor: &mut dyn FnMut(&Node) -> Visit,
    ) -> Result<bool> {
        let field = spec.field.ok_or(GroveError::InvalidArgument)?;
        self.touch(start, spec.inhibit_restore)?;
        let ids = self.field_ids(&start, field, false)?;
        self.visit_one_hop(&ids, spec, visitor)
    }

    fn traverse_field_array(
        &mut self,
        start: NodeId,
        spec: &TraverseSpec<'_>,
        visitor: &mut dyn FnMut(&Node) -> Visit,
    ) -> Result<bool> {
        let field = spec.field.ok_or(GroveError::InvalidArgument)?;
        self.touch(start, spec.inhibit_restore)?;
        let ids = self.field_ids(&start, field, true)?;
        self.visit_one_hop(&ids, spec, visitor)
    }

    fn visit_one_hop(
        &mut self,
        ids: &[NodeId],
        spec: &TraverseSpec<'_>,
        visitor: &mut dyn FnMut(&Node) -> Visit,
    ) -> Result<bool> {
        let generation = self.next_generation();
        for id in ids {
            if self.stamped(id, generation) {
                continue;
            }
            self.touch(*id, spec.inhibit_restore)?;
            self.stamp(*id, generation);
            if let Some(node) = self.node(id) {
                if visitor(node) == Visit::Stop {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn traverse_edge_field(
        &mut self,
        start: NodeId,
        spec: &TraverseSpec<'_>,
        visitor: &mut dyn FnMut(&Node) -> Visit,
    ) -> Result<bool> {
        let field = spec.field.ok_or(GroveError::InvalidArgument)?;
        self.touch(start, spec.inhibit_restore)?;
        let node = self.node(&start).ok_or(GroveError::NotFound)?;
        let ids: Vec<NodeId> = node
            .edge_field(field)
            .map(|f| f.arcs.iter().copied().collect())
            .unwrap_or_default();
        self.visit_one_hop(&ids, spec, visitor)
    }

    fn traverse_bfs_edge_field(
        &mut self,
        start: NodeId,
        spec: &TraverseSpec<'_>,
        visitor: &mut dyn FnMut(&Node) -> Visit,
    ) -> Result<bool> {
        let field = spec.field.ok_or(GroveError::InvalidArgument)?;
        self.touch(start, spec.inhibit_restore)?;
        if self.node(&start).is_none() {
            return Err(GroveError::NotFound);
        }
        let generation = self.next_generation();
        let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();
        queue.push_back((start, 0));
        self.stamp(start, generation);
        while let Some((id, depth)) = queue.pop_front() {
            if depth > self.config.max_traversal_depth {
                return Err(GroveError::TraversalLimit);
            }
            self.touch(id, spec.inhibit_restore)?;
            let Some(node) = self.node(&id) else {
                continue;
            };
            if visitor(node) == Visit::Stop {
                return Ok(true);
            }
            let next: Vec<NodeId> = node
                .edge_field(field)
                .map(|f| f.arcs.iter().copied().collect())
                .unwrap_or_default();
            for n in next {
                if !self.stamped(&n, generation) {
                    self.stamp(n, generation);
                    queue.push_back((n, depth + 1));
                }
            }
        }
        Ok(false)
    }

    /// Evaluates the traversal expression on a node, yielding field names.
    fn eval_fields(
        &self,
        expr: &Expression,
        node: &Node,
        now_ms: i64,
    ) -> Result<Vec<String>> {
        let mut regs = RegisterFile::new(1);
        regs.set_id(0, node.id()).map_err(GroveError::from)?;
        let b = Bindings {
            node: Some(node),
            obj: Some(node.object()),
            now_ms,
        };
        let set = expr.eval_set(&regs, &b).map_err(GroveError::from)?;
        Ok(set.iter_str().map(str::to_owned).collect())
    }

    /// Expands one node through expression-yielded fields, applying the edge
    /// filter to edge-field hops.
    fn expand_fields(
        &self,
        id: &NodeId,
        fields: &[String],
        spec: &TraverseSpec<'_>,
        now_ms: i64,
    ) -> Vec<NodeId> {
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for field in fields {
            match field.as_str() {
                "children" => out.extend(node.children.iter().copied()),
                "parents" => out.extend(node.parents.iter().copied()),
                _ => {
                    if let Some(edge) = node.edge_field(field) {
                        for dst in &edge.arcs {
                            if let Some(filter) = spec.edge_filter {
                                let meta = edge.metadata(*dst);
                                if !self.edge_filter_passes(filter, node, meta, now_ms) {
                                    continue;
                                }
                            }
                            out.push(*dst);
                        }
                    } else if let Ok(set) = node.object().get_set(field) {
                        for s in set.iter_str() {
                            out.push(NodeId::from_bytes(s.as_bytes()));
                        }
                    }
                }
            }
        }
        out
    }

    fn edge_filter_passes(
        &self,
        filter: &Expression,
        node: &Node,
        meta: Option<&crate::object::Object>,
        now_ms: i64,
    ) -> bool {
        static EMPTY: std::sync::OnceLock<crate::object::Object> = std::sync::OnceLock::new();
        let empty = EMPTY.get_or_init(crate::object::Object::new);
        let mut regs = RegisterFile::new(1);
        if regs.set_id(0, node.id()).is_err() {
            return false;
        }
        let b = Bindings {
            node: Some(node),
            obj: Some(meta.unwrap_or(empty)),
            now_ms,
        };
        filter.eval_bool(&regs, &b).unwrap_or(false)
    }

    fn traverse_bfs_expression(
        &mut self,
        start: NodeId,
        spec: &TraverseSpec<'_>,
        visitor: &mut dyn FnMut(&Node) -> Visit,
    ) -> Result<bool> {
        let expr = spec.expr.ok_or(GroveError::InvalidArgument)?;
        self.touch(start, spec.inhibit_restore)?;
        if self.node(&start).is_none() {
            return Err(GroveError::NotFound);
        }
        let now_ms = self.now_ms();
        let generation = self.next_generation();
        self.stamp(start, generation);

        // The head is expanded but not visited.
        let mut queue: VecDeque<(NodeId, usize)> = VecDeque::new();
        let head_fields = {
            let node = self.node(&start).ok_or(GroveError::NotFound)?;
            self.eval_fields(expr, node, now_ms)?
        };
        for id in self.expand_fields(&start, &head_fields, spec, now_ms) {
            if !self.stamped(&id, generation) {
                self.stamp(id, generation);
                queue.push_back((id, 1));
            }
        }
        while let Some((id, depth)) = queue.pop_front() {
            if depth > self.config.max_traversal_depth {
                return Err(GroveError::TraversalLimit);
            }
            self.touch(id, spec.inhibit_restore)?;
            let Some(node) = self.node(&id) else {
                continue;
            };
            if visitor(node) == Visit::Stop {
                return Ok(true);
            }
            let fields = self.eval_fields(expr, node, now_ms)?;
            for next in self.expand_fields(&id, &fields, spec, now_ms) {
                if !self.stamped(&next, generation) {
                    self.stamp(next, generation);
                    queue.push_back((next, depth + 1));
                }
            }
        }
        Ok(false)
    }

    fn traverse_expression(
        &mut self,
        start: NodeId,
        spec: &TraverseSpec<'_>,
        visitor: &mut dyn FnMut(&Node) -> Visit,
    ) -> Result<bool> {
        let expr = spec.expr.ok_or(GroveError::InvalidArgument)?;
        self.touch(start, spec.inhibit_restore)?;
        let now_ms = self.now_ms();
        let fields = {
            let node = self.node(&start).ok_or(GroveError::NotFound)?;
            self.eval_fields(expr, node, now_ms)?
        };
        let ids = self.expand_fields(&start, &fields, spec, now_ms);
        self.visit_one_hop(&ids, spec, visitor)
    }
}

#[derive(Clone, Copy)]
enum Order {
    Bfs,
    Dfs,
}

fn pop(work: &mut VecDeque<(NodeId, usize)>, order: Order) -> Option<(NodeId, usize)> {
    match order {
        Order::Bfs => work.pop_front(),
        Order::Dfs => work.pop_back(),
    }
}
