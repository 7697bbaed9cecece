// SPDX-License-Identifier: MIT
//! Shared helpers for the crate behavior tests.
#![allow(dead_code, clippy::unwrap_used)]

use grove_core::{Config, FixedClock, Hierarchy, NodeId, SubscriptionId};

/// Hierarchy with a fixed clock pinned at t=1000ms.
pub fn fresh() -> Hierarchy {
    Hierarchy::with_clock(Config::default(), Box::new(FixedClock::new(1_000)))
}

/// Node id from a printable string.
pub fn nid(s: &str) -> NodeId {
    NodeId::from_str(s).unwrap()
}

/// Subscription id filled with one byte.
pub fn sid(b: u8) -> SubscriptionId {
    SubscriptionId([b; 32])
}
