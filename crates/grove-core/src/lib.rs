// SPDX-License-Identifier: MIT
//! grove-core: embeddable in-memory hierarchical graph database engine.
//!
//! Typed nodes in a parent/child DAG, user-declared constrained edge fields,
//! ordered-key data objects, a postfix expression VM, a reactive
//! subscription layer with deferred event delivery, compressed detached
//! subtrees, and a deterministic snapshot codec. The engine runs under a
//! single-writer discipline and is driven through the command facade in
//! [`cmd`].
#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]
#![deny(unused_must_use)]

pub mod clock;
pub mod cmd;
pub mod config;
pub mod edge;
pub mod error;
pub mod events;
pub mod expr;
pub mod hierarchy;
pub mod ident;
pub mod object;
pub mod snapshot;
pub mod subs;

// Re-exports for the stable public API.
/// Injected time sources.
pub use clock::{Clock, FixedClock, SystemClock};
/// Engine configuration.
pub use config::{Config, PUBLISHER_PORT_ENV};
/// Edge constraints and fields.
pub use edge::{Constraint, ConstraintFlags, ConstraintId, DynConstraintParams, EdgeField};
/// Engine errors.
pub use error::GroveError;
/// Outbound events and sinks.
pub use events::{Event, EventRing, EventSink, NullSink, VecSink};
/// Expression VM entry points.
pub use expr::{vm::Bindings, ExprError, Expression, Operand, RegisterFile};
/// The hierarchy store and traversal surface.
pub use hierarchy::{
    DelFlags, DelOutcome, DetachedKind, Hierarchy, Node, NodeFlags, TraversalDir, TraverseSpec,
    Visit,
};
/// Identifier types.
pub use ident::{MarkerId, NodeId, NodeType, SubscriptionId, ROOT_NODE_ID, ZERO_NODE_ID};
/// Ordered-key objects, sets, and pointer leaves.
pub use object::{Object, PointerLeaf, PointerRegistry, SetType, SetValue, TypedSet, Value};
/// Subscriptions and markers.
pub use subs::{Marker, MarkerAnchor, MarkerFlags, Subscription, TriggerType};
