// SPDX-License-Identifier: MIT
//! Edge field mutation paths.
//!
//! These live on the hierarchy because every arc touches both endpoints: the
//! source's edge field and the destination's origin back-references. The
//! bidirectional mirror is created through the same entry points and
//! tolerates the second attempt being a no-op.

use tracing::warn;

use crate::edge::{Constraint, ConstraintId, DynConstraintParams, EdgeField};
use crate::error::{GroveError, Result};
use crate::ident::NodeId;
use crate::object::Object;

use super::Hierarchy;

impl Hierarchy {
    /// Declares a dynamic edge constraint.
    ///
    /// # Errors
    /// [`GroveError::AlreadyExists`] when the `(type, field)` pair is taken.
    pub fn add_edge_constraint(&mut self, params: DynConstraintParams) -> Result<()> {
        self.constraints.declare(params)
    }

    /// Resolves the constraint governing `(src, field, constraint_id)`.
    fn resolved_constraint(
        &self,
        src: NodeId,
        field: &str,
        constraint_id: ConstraintId,
    ) -> Result<Constraint> {
        self.constraints
            .resolve(constraint_id, src.node_type(), field)
            .cloned()
            .ok_or(GroveError::InvalidArgument)
    }

    /// Adds the edge `src.field -> dst`, creating the field with
    /// `constraint_id` when missing. Bidirectional constraints mirror the
    /// edge onto the destination's reverse field.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] for missing endpoints,
    /// [`GroveError::InvalidArgument`] when the field exists under a
    /// different constraint, [`GroveError::AlreadyExists`] when the arc is
    /// already present.
    pub fn edge_add(
        &mut self,
        src: NodeId,
        field: &str,
        constraint_id: ConstraintId,
        dst: NodeId,
    ) -> Result<()> {
        if self.find(src).is_none() || self.find(dst).is_none() {
            return Err(GroveError::NotFound);
        }
        let constraint = self.resolved_constraint(src, field, constraint_id)?;

        let evicted = {
            let src_node = self.node_mut_raw(&src).ok_or(GroveError::NotFound)?;
            let edge = src_node
                .edges
                .entry(field.to_owned())
                .or_insert_with(|| EdgeField::new(src, constraint_id));
            if edge.constraint_id != constraint_id {
                return Err(GroveError::InvalidArgument);
            }
            if edge.has(dst) {
                return Err(GroveError::AlreadyExists);
            }
            let mut evicted = Vec::new();
            if constraint.is_single_ref() {
                evicted = edge.arcs.iter().copied().collect::<Vec<_>>();
                edge.arcs.clear();
                for old in &evicted {
                    edge.metadata.remove(old);
                }
            }
            edge.arcs.insert(dst);
            evicted
        };

        // Single-ref eviction cleans the stale back-references (and the
        // mirrored reverse edges) before the new origin is recorded.
        for old in evicted {
            self.remove_origin_ref(src, field, old);
            if constraint.is_bidirectional() {
                self.remove_mirror(&constraint, src, old);
            }
        }

        self.node_mut_raw(&dst)
            .ok_or(GroveError::NotFound)?
            .edge_origins
            .entry(src)
            .or_default()
            .insert(field.to_owned());

        if constraint.is_bidirectional() {
            if let Some(bck_field) = constraint.bck_field.clone() {
                match self.edge_add(dst, &bck_field, constraint.bck_constraint_id, src) {
                    Ok(()) | Err(GroveError::AlreadyExists) => {}
                    Err(e) => {
                        warn!(src = %src, dst = %dst, field, error = %e,
                              "bidirectional mirror insert failed");
                    }
                }
            }
        }

        self.field_change_precheck(src);
        self.defer_field_change(src, field);
        self.stamp_updated(src);
        Ok(())
    }

    /// Removes the origin back-reference `dst.origins[src] -> field`.
    fn remove_origin_ref(&mut self, src: NodeId, field: &str, dst: NodeId) {
        let Some(dst_node) = self.node_mut_raw(&dst) else {
            return;
        };
        let emptied = match dst_node.edge_origins.get_mut(&src) {
            Some(fields) => {
                if !fields.remove(field) {
                    warn!(src = %src, dst = %dst, field,
                          "origin back-reference was already gone");
                }
                fields.is_empty()
            }
            None => {
                warn!(src = %src, dst = %dst, field, "origin entry missing");
                false
            }
        };
        if emptied {
            dst_node.edge_origins.remove(&src);
        }
    }

    /// Removes the mirrored reverse edge of a bidirectional constraint.
    fn remove_mirror(&mut self, constraint: &Constraint, src: NodeId, dst: NodeId) {
        let Some(bck_field) = constraint.bck_field.clone() else {
            return;
        };
        match self.edge_delete(dst, &bck_field, src) {
            Ok(()) | Err(GroveError::NotFound) => {}
            Err(e) => {
                warn!(src = %src, dst = %dst, error = %e,
                      "bidirectional mirror delete failed");
            }
        }
    }

    /// Deletes the edge `src.field -> dst` (and its bidirectional mirror).
    ///
    /// # Errors
    /// [`GroveError::NotFound`] when the field or arc does not exist.
    pub fn edge_delete(&mut self, src: NodeId, field: &str, dst: NodeId) -> Result<()> {
        let constraint_id = {
            let src_node = self.node(&src).ok_or(GroveError::NotFound)?;
            let edge = src_node.edges.get(field).ok_or(GroveError::NotFound)?;
            if !edge.has(dst) {
                return Err(GroveError::NotFound);
            }
            edge.constraint_id
        };
        let constraint = self.resolved_constraint(src, field, constraint_id)?;

        if let Some(src_node) = self.node_mut_raw(&src) {
            if let Some(edge) = src_node.edges.get_mut(field) {
                edge.arcs.remove(&dst);
                edge.metadata.remove(&dst);
            }
        }
        self.remove_origin_ref(src, field, dst);
        if constraint.is_bidirectional() {
            self.remove_mirror(&constraint, src, dst);
        }

        self.field_change_precheck(src);
        self.defer_field_change(src, field);
        self.stamp_updated(src);
        Ok(())
    }

    /// Deletes every arc of `src.field`, keeping the (empty) field.
    ///
    /// Returns the number of deleted arcs.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] when the field does not exist.
    pub fn edge_clear_field(&mut self, src: NodeId, field: &str) -> Result<usize> {
        let arcs: Vec<NodeId> = {
            let src_node = self.node(&src).ok_or(GroveError::NotFound)?;
            let edge = src_node.edges.get(field).ok_or(GroveError::NotFound)?;
            edge.arcs.iter().copied().collect()
        };
        let count = arcs.len();
        for dst in arcs {
            self.edge_delete(src, field, dst)?;
        }
        Ok(count)
    }

    /// Deletes `src.field` entirely.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] when the field does not exist.
    pub fn edge_delete_field(&mut self, src: NodeId, field: &str) -> Result<usize> {
        let count = self.edge_clear_field(src, field)?;
        if let Some(src_node) = self.node_mut_raw(&src) {
            src_node.edges.remove(field);
        }
        Ok(count)
    }

    /// Per-edge metadata object for `src.field -> dst`, created on demand.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] when the field or arc does not exist.
    pub fn edge_metadata_mut(
        &mut self,
        src: NodeId,
        field: &str,
        dst: NodeId,
    ) -> Result<&mut Object> {
        let src_node = self.node_mut_raw(&src).ok_or(GroveError::NotFound)?;
        let edge = src_node.edges.get_mut(field).ok_or(GroveError::NotFound)?;
        edge.metadata_mut(dst)
    }

    /// Per-edge metadata object for `src.field -> dst`, when set.
    #[must_use]
    pub fn edge_metadata(&self, src: NodeId, field: &str, dst: NodeId) -> Option<&Object> {
        self.node(&src)
            .and_then(|n| n.edges.get(field))
            .and_then(|e| e.metadata(dst))
    }

    /// Drops every edge field of a node and every edge pointing at it.
    /// Called from node destruction.
    pub(crate) fn drop_node_edges(&mut self, id: NodeId) {
        // Outgoing: remove the origin back-reference on each destination.
        let out: Vec<(String, Vec<NodeId>)> = self
            .node(&id)
            .map(|n| {
                n.edges
                    .iter()
                    .map(|(f, e)| (f.clone(), e.arcs.iter().copied().collect()))
                    .collect()
            })
            .unwrap_or_default();
        for (field, arcs) in out {
            for dst in arcs {
                self.remove_origin_ref(id, &field, dst);
            }
        }
        // Incoming: remove the arc from each origin's field.
        let origins: Vec<(NodeId, Vec<String>)> = self
            .node(&id)
            .map(|n| {
                n.edge_origins
                    .iter()
                    .map(|(o, fs)| (*o, fs.iter().cloned().collect()))
                    .collect()
            })
            .unwrap_or_default();
        for (origin, fields) in origins {
            for field in fields {
                if let Some(origin_node) = self.node_mut_raw(&origin) {
                    if let Some(edge) = origin_node.edges.get_mut(&field) {
                        edge.arcs.remove(&id);
                        edge.metadata.remove(&id);
                    }
                }
                self.defer_field_change(origin, &field);
            }
        }
        if let Some(node) = self.node_mut_raw(&id) {
            node.edges.clear();
            node.edge_origins.clear();
        }
    }
}
