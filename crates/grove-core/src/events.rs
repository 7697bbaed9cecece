// SPDX-License-Identifier: MIT
//! Outbound subscription events and the publisher hand-off ring.
//!
//! The engine never talks to subscribers itself: `send_deferred_events`
//! publishes [`Event`] values into an [`EventSink`] owned by the embedding.
//! [`EventRing`] is the bounded default sink matching the publisher worker
//! contract: when full, the event is dropped and counted (at-most-once
//! delivery).

use std::collections::VecDeque;

use tracing::error;

use crate::ident::{NodeId, SubscriptionId};

/// Channel prefix for update notifications.
pub const UPDATE_CHANNEL_PREFIX: &str = "grove.update:";

/// Channel prefix for trigger notifications.
pub const TRIGGER_CHANNEL_PREFIX: &str = "grove.trigger:";

/// An outbound subscription notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Some marker of the subscription fired; payload-free.
    Update {
        /// The subscription to notify.
        sub: SubscriptionId,
    },
    /// A trigger marker fired for a node.
    Trigger {
        /// The subscription to notify.
        sub: SubscriptionId,
        /// The affected node.
        node: NodeId,
    },
}

impl Event {
    /// The full channel name this event publishes on.
    #[must_use]
    pub fn channel(&self) -> String {
        match self {
            Self::Update { sub } => format!("{UPDATE_CHANNEL_PREFIX}{}", sub.to_hex()),
            Self::Trigger { sub, .. } => {
                format!("{TRIGGER_CHANNEL_PREFIX}{}", sub.to_hex())
            }
        }
    }

    /// The payload bytes: empty for updates, the 10-byte node id for
    /// triggers.
    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Self::Update { .. } => Vec::new(),
            Self::Trigger { node, .. } => node.as_bytes().to_vec(),
        }
    }
}

/// Consumer of outbound events.
pub trait EventSink {
    /// Accepts one event. Implementations must not call back into the
    /// hierarchy.
    fn publish(&mut self, event: Event);
}

/// A sink that drops everything; useful when the embedding has no publisher.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&mut self, _event: Event) {}
}

/// Bounded hand-off queue between the engine and the publisher worker.
///
/// When the ring is full the event is dropped and the drop counter bumped;
/// subscribers observe stale state until the next fire, never duplicates.
#[derive(Debug)]
pub struct EventRing {
    queue: VecDeque<Event>,
    cap: usize,
    dropped: u64,
}

impl EventRing {
    /// Creates a ring with the given capacity.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(cap.min(4096)),
            cap: cap.max(1),
            dropped: 0,
        }
    }

    /// Takes the next queued event.
    pub fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    /// Number of queued events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of events dropped due to a full ring.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl EventSink for EventRing {
    fn publish(&mut self, event: Event) {
        if self.queue.len() >= self.cap {
            self.dropped += 1;
            error!(dropped = self.dropped, "publisher ring full, event dropped");
            return;
        }
        self.queue.push_back(event);
    }
}

/// A sink collecting events into a vector; test and tooling aid.
#[derive(Debug, Default)]
pub struct VecSink(pub Vec<Event>);

impl EventSink for VecSink {
    fn publish(&mut self, event: Event) {
        self.0.push(event);
    }
}
