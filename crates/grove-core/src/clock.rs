// SPDX-License-Identifier: MIT
//! Injected time source.
//!
//! The engine never reads the ambient clock directly; `createdAt`/`updatedAt`
//! stamps and the expression clock opcode all go through a [`Clock`] owned by
//! the hierarchy so tests can run with a fixed or stepping time.

use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond wall-clock source.
pub trait Clock {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;
}

/// The production clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }
}

/// A clock pinned to a caller-controlled value. Test-oriented, but exposed so
/// embeddings can replay deterministic workloads.
#[derive(Debug, Clone)]
pub struct FixedClock(std::cell::Cell<i64>);

impl FixedClock {
    /// Creates a clock reporting `ms` until [`FixedClock::set`] is called.
    #[must_use]
    pub fn new(ms: i64) -> Self {
        Self(std::cell::Cell::new(ms))
    }

    /// Moves the clock to `ms`.
    pub fn set(&self, ms: i64) {
        self.0.set(ms);
    }

    /// Advances the clock by `delta` milliseconds.
    pub fn advance(&self, delta: i64) {
        self.0.set(self.0.get() + delta);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0.get()
    }
}
