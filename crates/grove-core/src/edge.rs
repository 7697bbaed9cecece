// SPDX-License-Identifier: MIT
//! Edge field types and the constraint registry.
//!
//! An edge field is a named, ordered collection of directed edges out of a
//! node, governed by a constraint that fixes cardinality and bidirectional
//! mirroring. The mutation paths live on the hierarchy (they touch both
//! endpoints); this module owns the data shapes and constraint resolution.

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;

use crate::error::GroveError;
use crate::ident::{NodeId, NodeType};
use crate::object::Object;

bitflags! {
    /// Constraint behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConstraintFlags: u8 {
        /// At most one arc in the field.
        const SINGLE_REF = 0x01;
        /// Every insertion mirrors into the named reverse field.
        const BIDIRECTIONAL = 0x02;
        /// User-declared at runtime (implied for registry entries).
        const DYNAMIC = 0x04;
    }
}

/// Constraint identifier: a built-in slot or the reserved dynamic selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintId(pub u16);

impl ConstraintId {
    /// Built-in unconstrained many-edge field.
    pub const DEFAULT: Self = Self(0);
    /// Built-in single-reference field.
    pub const SINGLE_REF: Self = Self(1);
    /// Reserved selector for dynamic constraints.
    pub const DYNAMIC: Self = Self(2);
}

/// A resolved constraint record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    /// Behavior flags.
    pub flags: ConstraintFlags,
    /// Forward node type (dynamic constraints only).
    pub fwd_node_type: Option<NodeType>,
    /// Forward field name (dynamic constraints only).
    pub fwd_field: Option<String>,
    /// Constraint id applied to the mirrored reverse field.
    pub bck_constraint_id: ConstraintId,
    /// Node type of the reverse side, when declared.
    pub bck_node_type: Option<NodeType>,
    /// Field name mirrored on the destination node.
    pub bck_field: Option<String>,
}

impl Constraint {
    fn builtin(flags: ConstraintFlags) -> Self {
        Self {
            flags,
            fwd_node_type: None,
            fwd_field: None,
            bck_constraint_id: ConstraintId::DEFAULT,
            bck_node_type: None,
            bck_field: None,
        }
    }

    /// Returns `true` when insertions must evict the previous arc.
    #[must_use]
    pub fn is_single_ref(&self) -> bool {
        self.flags.contains(ConstraintFlags::SINGLE_REF)
    }

    /// Returns `true` when insertions mirror into a reverse field.
    #[must_use]
    pub fn is_bidirectional(&self) -> bool {
        self.flags.contains(ConstraintFlags::BIDIRECTIONAL)
    }
}

/// Parameters declaring a dynamic constraint.
#[derive(Debug, Clone)]
pub struct DynConstraintParams {
    /// Behavior flags for the forward field.
    pub flags: ConstraintFlags,
    /// Node type the forward field attaches to.
    pub fwd_node_type: NodeType,
    /// Forward field name.
    pub fwd_field: String,
    /// Constraint id for the mirrored reverse field.
    pub bck_constraint_id: ConstraintId,
    /// Node type of the reverse side.
    pub bck_node_type: Option<NodeType>,
    /// Reverse field name.
    pub bck_field: Option<String>,
}

/// Registry resolving constraint ids to records.
///
/// The two built-in slots are fixed; dynamic constraints are keyed by
/// `node_type.field_name` with dots in the field name replaced so the key
/// stays unambiguous.
#[derive(Debug)]
pub struct ConstraintRegistry {
    hard: [Constraint; 2],
    dynamic: BTreeMap<String, Constraint>,
}

impl Default for ConstraintRegistry {
    fn default() -> Self {
        Self {
            hard: [
                Constraint::builtin(ConstraintFlags::empty()),
                Constraint::builtin(ConstraintFlags::SINGLE_REF),
            ],
            dynamic: BTreeMap::new(),
        }
    }
}

/// Builds the dynamic registry key for `(node_type, field_name)`.
fn dyn_key(node_type: NodeType, field_name: &str) -> String {
    format!("{node_type}.{}", field_name.replace('.', ":"))
}

impl ConstraintRegistry {
    /// Creates a registry holding only the built-in slots.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a dynamic constraint.
    ///
    /// # Errors
    /// [`GroveError::AlreadyExists`] when the `(type, field)` pair is taken.
    pub fn declare(&mut self, params: DynConstraintParams) -> Result<(), GroveError> {
        let key = dyn_key(params.fwd_node_type, &params.fwd_field);
        if self.dynamic.contains_key(&key) {
            return Err(GroveError::AlreadyExists);
        }
        self.dynamic.insert(
            key,
            Constraint {
                flags: params.flags | ConstraintFlags::DYNAMIC,
                fwd_node_type: Some(params.fwd_node_type),
                fwd_field: Some(params.fwd_field),
                bck_constraint_id: params.bck_constraint_id,
                bck_node_type: params.bck_node_type,
                bck_field: params.bck_field,
            },
        );
        Ok(())
    }

    /// Resolves a constraint id against a `(node_type, field_name)` context.
    #[must_use]
    pub fn resolve(
        &self,
        id: ConstraintId,
        node_type: NodeType,
        field_name: &str,
    ) -> Option<&Constraint> {
        if id == ConstraintId::DYNAMIC {
            self.dynamic.get(&dyn_key(node_type, field_name))
        } else {
            self.hard.get(id.0 as usize)
        }
    }

    /// Iterates declared dynamic constraints in key order.
    pub fn iter_dynamic(&self) -> impl Iterator<Item = (&str, &Constraint)> {
        self.dynamic.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of declared dynamic constraints.
    #[must_use]
    pub fn dynamic_len(&self) -> usize {
        self.dynamic.len()
    }
}

/// A named directed edge collection out of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeField {
    /// Constraint id this field was created with.
    pub constraint_id: ConstraintId,
    /// Owner node id.
    pub src_node_id: NodeId,
    /// Destination nodes, ordered by id.
    pub arcs: BTreeSet<NodeId>,
    /// Per-destination metadata objects.
    pub metadata: BTreeMap<NodeId, Object>,
}

impl EdgeField {
    /// Creates an empty field owned by `src`.
    #[must_use]
    pub fn new(src: NodeId, constraint_id: ConstraintId) -> Self {
        Self {
            constraint_id,
            src_node_id: src,
            arcs: BTreeSet::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Returns `true` when `dst` is an arc destination.
    #[must_use]
    pub fn has(&self, dst: NodeId) -> bool {
        self.arcs.contains(&dst)
    }

    /// Number of arcs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    /// Returns `true` when the field holds no arcs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    /// Metadata object for the arc to `dst`, when present.
    #[must_use]
    pub fn metadata(&self, dst: NodeId) -> Option<&Object> {
        self.metadata.get(&dst)
    }

    /// Mutable metadata object for the arc to `dst`, created on demand.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] when there is no arc to `dst`.
    pub fn metadata_mut(&mut self, dst: NodeId) -> Result<&mut Object, GroveError> {
        if !self.arcs.contains(&dst) {
            return Err(GroveError::NotFound);
        }
        Ok(self.metadata.entry(dst).or_default())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ty(s: &str) -> NodeType {
        NodeType::from_str(s).unwrap()
    }

    #[test]
    fn builtin_slots_resolve() {
        let reg = ConstraintRegistry::new();
        let c0 = reg.resolve(ConstraintId::DEFAULT, ty("ma"), "x").unwrap();
        assert!(!c0.is_single_ref());
        let c1 = reg.resolve(ConstraintId::SINGLE_REF, ty("ma"), "x").unwrap();
        assert!(c1.is_single_ref());
        assert!(reg.resolve(ConstraintId(9), ty("ma"), "x").is_none());
    }

    #[test]
    fn dynamic_constraints_resolve_by_type_and_field() {
        let mut reg = ConstraintRegistry::new();
        reg.declare(DynConstraintParams {
            flags: ConstraintFlags::BIDIRECTIONAL,
            fwd_node_type: ty("ma"),
            fwd_field: "authors".into(),
            bck_constraint_id: ConstraintId::DEFAULT,
            bck_node_type: Some(ty("au")),
            bck_field: Some("books".into()),
        })
        .unwrap();

        let c = reg
            .resolve(ConstraintId::DYNAMIC, ty("ma"), "authors")
            .unwrap();
        assert!(c.is_bidirectional());
        assert!(c.flags.contains(ConstraintFlags::DYNAMIC));
        assert_eq!(c.bck_field.as_deref(), Some("books"));
        assert!(reg
            .resolve(ConstraintId::DYNAMIC, ty("au"), "authors")
            .is_none());
    }

    #[test]
    fn duplicate_dynamic_declaration_is_rejected() {
        let mut reg = ConstraintRegistry::new();
        let params = DynConstraintParams {
            flags: ConstraintFlags::empty(),
            fwd_node_type: ty("ma"),
            fwd_field: "refs".into(),
            bck_constraint_id: ConstraintId::DEFAULT,
            bck_node_type: None,
            bck_field: None,
        };
        reg.declare(params.clone()).unwrap();
        assert_eq!(reg.declare(params), Err(GroveError::AlreadyExists));
    }

    #[test]
    fn dotted_field_names_resolve() {
        let mut reg = ConstraintRegistry::new();
        reg.declare(DynConstraintParams {
            flags: ConstraintFlags::empty(),
            fwd_node_type: ty("ma"),
            fwd_field: "rec.key".into(),
            bck_constraint_id: ConstraintId::DEFAULT,
            bck_node_type: None,
            bck_field: None,
        })
        .unwrap();
        assert!(reg
            .resolve(ConstraintId::DYNAMIC, ty("ma"), "rec.key")
            .is_some());
    }

    #[test]
    fn metadata_requires_an_arc() {
        let src = NodeId::from_str("ma1").unwrap();
        let dst = NodeId::from_str("au1").unwrap();
        let mut f = EdgeField::new(src, ConstraintId::DEFAULT);
        assert_eq!(f.metadata_mut(dst).unwrap_err(), GroveError::NotFound);
        f.arcs.insert(dst);
        f.metadata_mut(dst).unwrap().set_long("w", 1).unwrap();
        assert_eq!(f.metadata(dst).unwrap().get_long("w").unwrap(), 1);
    }
}
