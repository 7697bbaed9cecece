// SPDX-License-Identifier: MIT
//! Detached (compressed) subtrees and auto-compression.
//!
//! A cold subtree is serialized, compressed, and removed from the live
//! store; its root survives as a stub flagged DETACHED with only its parent
//! links. The registry maps *every* member id of the compressed subtree to a
//! shared blob handle so any access can transparently restore the whole
//! subtree. Auto-compression scans for chains that have not been visited for
//! a configured number of traversal generations and queues their tops into a
//! bounded ring, detaching them on the following tick.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use crate::error::{GroveError, Result};
use crate::ident::NodeId;
use crate::snapshot;

use super::{DelFlags, Hierarchy, Node, NodeFlags};

/// Storage class of a detached subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachedKind {
    /// Compressed blob held in memory.
    Mem,
    /// Compressed blob written to disk.
    Disk,
}

impl DetachedKind {
    /// Parses the external token form (`"mem"` / `"disk"`).
    ///
    /// # Errors
    /// [`GroveError::InvalidArgument`] for unknown tokens.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "mem" => Ok(Self::Mem),
            "disk" => Ok(Self::Disk),
            _ => Err(GroveError::InvalidArgument),
        }
    }
}

/// A compressed byte buffer. `uncompressed_len` is `None` when compression
/// did not shrink the input and the bytes are stored raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBuf {
    /// Stored bytes (deflate stream, or raw input).
    pub(crate) data: Vec<u8>,
    /// Original length, or `None` for the raw sentinel.
    pub(crate) uncompressed_len: Option<usize>,
}

impl CompressedBuf {
    /// Compresses `raw`, falling back to a raw copy when deflate does not
    /// shrink it.
    #[must_use]
    pub fn compress(raw: &[u8]) -> Self {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        let compressed = encoder
            .write_all(raw)
            .and_then(|()| encoder.finish())
            .unwrap_or_default();
        if compressed.is_empty() || compressed.len() >= raw.len() {
            Self {
                data: raw.to_vec(),
                uncompressed_len: None,
            }
        } else {
            Self {
                data: compressed,
                uncompressed_len: Some(raw.len()),
            }
        }
    }

    /// Recovers the original bytes.
    ///
    /// # Errors
    /// [`GroveError::InvalidArgument`] when the deflate stream is corrupt.
    pub fn decompress(&self) -> Result<Vec<u8>> {
        match self.uncompressed_len {
            None => Ok(self.data.clone()),
            Some(n) => {
                let mut out = Vec::with_capacity(n);
                let mut decoder = ZlibDecoder::new(self.data.as_slice());
                decoder
                    .read_to_end(&mut out)
                    .map_err(|_| GroveError::InvalidArgument)?;
                Ok(out)
            }
        }
    }

    /// Achieved compression ratio (original / stored), 1.0 for raw storage.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        match self.uncompressed_len {
            #[allow(clippy::cast_precision_loss)]
            Some(n) if !self.data.is_empty() => n as f64 / self.data.len() as f64,
            _ => 1.0,
        }
    }

    fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 12);
        let len = self.uncompressed_len.map_or(u64::MAX, |n| n as u64);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&u32::try_from(self.data.len()).unwrap_or(u32::MAX).to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    fn from_wire(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 12 {
            return Err(GroveError::InvalidArgument);
        }
        let raw_len = u64::from_le_bytes(bytes[0..8].try_into().map_err(|_| GroveError::InvalidArgument)?);
        let data_len = u32::from_le_bytes(bytes[8..12].try_into().map_err(|_| GroveError::InvalidArgument)?) as usize;
        if bytes.len() < 12 + data_len {
            return Err(GroveError::InvalidArgument);
        }
        Ok(Self {
            data: bytes[12..12 + data_len].to_vec(),
            uncompressed_len: if raw_len == u64::MAX {
                None
            } else {
                Some(usize::try_from(raw_len).map_err(|_| GroveError::InvalidArgument)?)
            },
        })
    }
}

/// Where a detached subtree's bytes live.
#[derive(Debug)]
pub enum DetachedBlob {
    /// In-memory compressed buffer.
    Mem(CompressedBuf),
    /// Path of the on-disk blob file.
    Disk(PathBuf),
}

/// Registry mapping every member id of a compressed subtree to its blob.
#[derive(Debug, Default)]
pub struct DetachedRegistry {
    entries: BTreeMap<NodeId, Arc<DetachedBlob>>,
}

impl DetachedRegistry {
    /// Registers `id` as a member of `blob`'s subtree.
    pub fn insert(&mut self, id: NodeId, blob: Arc<DetachedBlob>) {
        self.entries.insert(id, blob);
    }

    /// Blob handle for `id`, when detached.
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<Arc<DetachedBlob>> {
        self.entries.get(id).cloned()
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.entries.contains_key(id)
    }

    /// Removes every entry sharing `blob`'s identity.
    pub fn remove_by_blob(&mut self, blob: &Arc<DetachedBlob>) {
        self.entries.retain(|_, b| !Arc::ptr_eq(b, blob));
    }

    /// Registered ids in order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.keys().copied()
    }

    /// Number of registered ids (members, not blobs).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is detached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fixed-capacity ring of auto-compression candidates. When full, further
/// candidates are dropped until the next drain.
#[derive(Debug)]
pub struct InactiveRing {
    ids: Vec<NodeId>,
    cap: usize,
}

impl InactiveRing {
    /// Creates a ring with the given capacity.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            ids: Vec::with_capacity(cap.min(4096)),
            cap,
        }
    }

    /// Adds a candidate; dropped silently when the ring is full.
    pub fn add(&mut self, id: NodeId) {
        if self.ids.len() < self.cap {
            self.ids.push(id);
        }
    }

    /// Takes all buffered candidates.
    pub fn drain(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.ids)
    }

    /// Number of buffered candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` when no candidates are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Hierarchy {
    /// Blob handle for a detached member id.
    #[must_use]
    pub(crate) fn detached_blob(&self, id: &NodeId) -> Option<Arc<DetachedBlob>> {
        self.detached.get(id)
    }

    /// Ids currently registered as detached, in order.
    #[must_use]
    pub fn list_compressed(&self) -> Vec<NodeId> {
        self.detached.ids().collect()
    }

    /// Compression ratio recorded for a detached root, when available.
    #[must_use]
    pub fn compression_ratio(&self, id: &NodeId) -> Option<f64> {
        self.compression_ratios.get(id).copied()
    }

    /// Collects `root` plus all of its descendants (live links only).
    fn subtree_members(&mut self, root: NodeId) -> Result<Vec<NodeId>> {
        let mut members = vec![root];
        let spec = super::TraverseSpec {
            dir: super::TraversalDir::BfsDescendants,
            inhibit_restore: true,
            ..super::TraverseSpec::default()
        };
        members.extend(self.traverse_collect(root, &spec)?);
        Ok(members)
    }

    /// Checks that the subtree rooted at `root` can be detached: a proper
    /// tree with `root` as sole entry, no live markers, and no edge-field
    /// participation anywhere in it.
    ///
    /// # Errors
    /// [`GroveError::NotSupported`] for markers, edges, or nested detached
    /// members; [`GroveError::InvalidArgument`] for external parents.
    pub fn verify_detachable(&mut self, root: NodeId) -> Result<()> {
        let members = self.subtree_members(root)?;
        let member_set: std::collections::BTreeSet<NodeId> = members.iter().copied().collect();
        for id in &members {
            let node = self.node(id).ok_or(GroveError::NotFound)?;
            if node.is_detached() {
                return Err(GroveError::NotSupported);
            }
            if !node.marker_set().is_empty() {
                return Err(GroveError::NotSupported);
            }
            if !node.edges.is_empty() || !node.edge_origins.is_empty() {
                return Err(GroveError::NotSupported);
            }
            if *id != root {
                for p in node.parents() {
                    if !member_set.contains(&p) {
                        return Err(GroveError::InvalidArgument);
                    }
                }
            }
        }
        Ok(())
    }

    fn disk_blob_path(&self, root: NodeId) -> PathBuf {
        self.config
            .detached_dir
            .join(format!("grove_{}.z", root.to_display_string()))
    }

    /// Detaches the subtree rooted at `root`: serializes and compresses it,
    /// deletes the live nodes, registers every member id, and leaves a stub
    /// carrying the root's parent links.
    ///
    /// # Errors
    /// Verification errors per [`Hierarchy::verify_detachable`];
    /// [`GroveError::NotSupported`] for the root node itself.
    pub fn detach_subtree(&mut self, root: NodeId, kind: DetachedKind) -> Result<()> {
        if root.is_root() {
            return Err(GroveError::NotSupported);
        }
        self.verify_detachable(root)?;

        let parents: Vec<NodeId> = self
            .node(&root)
            .ok_or(GroveError::NotFound)?
            .parents()
            .collect();

        let raw = snapshot::save_subtree(self, root)?;
        let compressed = CompressedBuf::compress(&raw);
        let ratio = compressed.ratio();

        let blob = match kind {
            DetachedKind::Mem => Arc::new(DetachedBlob::Mem(compressed)),
            DetachedKind::Disk => {
                let path = self.disk_blob_path(root);
                std::fs::write(&path, compressed.to_wire())?;
                Arc::new(DetachedBlob::Disk(path))
            }
        };

        let outcome = self.del_node(root, DelFlags::FORCE | DelFlags::DETACH | DelFlags::REPLY_IDS)?;
        for id in &outcome.ids {
            self.detached.insert(*id, Arc::clone(&blob));
        }

        // Stub: id only, DETACHED flag, the saved parent links.
        let mut stub = Node::new(root);
        stub.flags |= NodeFlags::DETACHED;
        stub.object
            .set_string("id", root.to_display_string())?;
        self.insert_stub(stub, &parents);
        self.compression_ratios.insert(root, ratio);
        debug!(root = %root, members = outcome.count, ratio, "subtree detached");
        Ok(())
    }

    /// Restores the detached subtree containing `id`, removing every
    /// registry entry that pointed at the same blob.
    ///
    /// # Errors
    /// [`GroveError::NotFound`] when `id` is not detached; codec errors for
    /// corrupt blobs.
    pub fn restore_subtree(&mut self, id: NodeId) -> Result<()> {
        let blob = self.detached.get(&id).ok_or(GroveError::NotFound)?;
        let raw = match &*blob {
            DetachedBlob::Mem(c) => c.decompress()?,
            DetachedBlob::Disk(path) => {
                let bytes = std::fs::read(path).map_err(|e| {
                    warn!(path = %path.display(), error = %e, "compressed subtree read failed");
                    GroveError::General
                })?;
                let c = CompressedBuf::from_wire(&bytes)?;
                let out = c.decompress()?;
                let _ = std::fs::remove_file(path);
                out
            }
        };
        let root = snapshot::load_subtree(self, &raw)?;
        self.detached.remove_by_blob(&blob);
        self.compression_ratios.remove(&root);
        debug!(root = %root, "subtree restored");
        Ok(())
    }

    /// One auto-compression tick: detaches previously buffered candidates,
    /// then scans for subtrees idle for at least the configured number of
    /// generations and buffers their tops for the next tick.
    ///
    /// Refuses to run while a snapshot save is in progress. Returns the
    /// number of subtrees detached.
    pub fn auto_compress_tick(&mut self) -> usize {
        if self.snapshot_active {
            return 0;
        }

        let mut detached = 0;
        for id in self.inactive.drain() {
            let still_live = self.node(&id).is_some_and(|n| !n.is_detached());
            if !still_live {
                continue;
            }
            match self.detach_subtree(id, DetachedKind::Mem) {
                Ok(()) => detached += 1,
                Err(e) => debug!(node = %id, error = %e, "auto-compress skipped"),
            }
        }

        self.scan_idle_chains();
        detached
    }

    /// Walks every head in full-DFS order tracking one contiguous idle chain
    /// per path. Tracking starts at the first idle non-root node, resets on
    /// any recently-visited node encountered below it, and the chain's top is
    /// buffered only once the walk bottoms out at a leaf with the chain
    /// unbroken, so a subtree with a hot node partway down never qualifies.
    ///
    /// The scan keeps its own visited set instead of stamping traversal
    /// generations; scanning must not refresh the ages it is measuring.
    fn scan_idle_chains(&mut self) {
        let threshold = self.config.auto_compress_idle_generations;
        let current = self.current_generation();
        let idle = |n: &Node| current.saturating_sub(n.visit_stamp) >= threshold;

        let mut buffered: Vec<NodeId> = Vec::new();
        let mut visited: BTreeSet<NodeId> = BTreeSet::new();
        let heads: Vec<NodeId> = self.heads().collect();
        for head in heads {
            let mut candidate: Option<NodeId> = None;
            let mut stack: Vec<NodeId> = vec![head];
            while let Some(id) = stack.pop() {
                let Some(node) = self.node(&id) else {
                    continue;
                };
                if candidate.is_none() && !id.is_root() && !node.is_detached() && idle(node) {
                    candidate = Some(id);
                }
                if candidate.is_some() && !idle(node) {
                    candidate = None;
                }
                if !visited.insert(id) {
                    continue;
                }
                if node.is_detached() {
                    // A stub has no live subtree to descend into.
                    continue;
                }
                if node.children.is_empty() {
                    if let Some(top) = candidate.take() {
                        buffered.push(top);
                    }
                    continue;
                }
                stack.extend(node.children.iter().copied());
            }
        }
        for id in buffered {
            self.inactive.add(id);
        }
    }

    pub(crate) fn insert_stub(&mut self, stub: Node, parents: &[NodeId]) {
        let id = stub.id();
        // An orphan stub stays a head like any other orphan.
        self.insert_node_raw(stub);
        for p in parents {
            self.link_for_load(*p, id);
        }
    }
}
