// SPDX-License-Identifier: MIT
//! Engine configuration.

use std::path::PathBuf;

/// Environment variable naming the host port the publisher worker connects to.
pub const PUBLISHER_PORT_ENV: &str = "HIERARCHY_PUBLISHER_PORT";

/// Construction-time configuration for a hierarchy.
///
/// Plain data; every field has a workable default so `Config::default()` is a
/// valid production configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Auto-compression pass period in milliseconds. The embedding drives the
    /// timer; the engine only exposes the tick entry point.
    pub auto_compress_period_ms: u64,
    /// Number of traversal generations a subtree must sit untouched before it
    /// becomes an auto-compression candidate.
    pub auto_compress_idle_generations: u64,
    /// Capacity of the inactive-node ring buffer feeding auto-compression.
    pub inactive_ring_capacity: usize,
    /// Capacity of the bounded publisher event ring.
    pub publisher_ring_capacity: usize,
    /// Directory for disk-resident compressed subtree blobs.
    pub detached_dir: PathBuf,
    /// Maximum traversal expansion depth before `ETRMAX` is surfaced.
    pub max_traversal_depth: usize,
    /// Host port for the publisher worker connection, from
    /// [`PUBLISHER_PORT_ENV`] when present.
    pub publisher_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_compress_period_ms: 60_000,
            auto_compress_idle_generations: 100,
            inactive_ring_capacity: 100,
            publisher_ring_capacity: 1024,
            detached_dir: PathBuf::from("."),
            max_traversal_depth: 4096,
            publisher_port: None,
        }
    }
}

impl Config {
    /// Default configuration with the publisher port read from the
    /// environment.
    #[must_use]
    pub fn from_env() -> Self {
        let publisher_port = std::env::var(PUBLISHER_PORT_ENV)
            .ok()
            .and_then(|v| v.parse::<u16>().ok());
        Self {
            publisher_port,
            ..Self::default()
        }
    }

    /// Sets the directory used for disk-resident compressed subtrees.
    #[must_use]
    pub fn with_detached_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.detached_dir = dir.into();
        self
    }

    /// Sets the idle-age threshold for auto-compression.
    #[must_use]
    pub fn with_idle_generations(mut self, generations: u64) -> Self {
        self.auto_compress_idle_generations = generations;
        self
    }
}
