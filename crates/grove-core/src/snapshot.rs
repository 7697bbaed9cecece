// SPDX-License-Identifier: MIT
//! Snapshot codec.
//!
//! Deterministic byte-level save/load of a hierarchy: version header,
//! dynamic edge constraints, a full-DFS dump of every node (id, flags, edge
//! fields, data object, child ids), and an all-zero id as the EOF sentinel.
//! Detached nodes are saved as their compressed blobs inline and re-detached
//! on load. The same node-record format serializes individual subtrees for
//! the detached-subtree pipeline.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::edge::{ConstraintFlags, ConstraintId, DynConstraintParams, EdgeField};
use crate::error::{GroveError, Result};
use crate::hierarchy::detached::{CompressedBuf, DetachedBlob, DetachedKind};
use crate::hierarchy::{Hierarchy, NodeFlags, TraversalDir, TraverseSpec};
use crate::ident::{NodeId, NodeType, ZERO_NODE_ID, NODE_ID_SIZE, NODE_TYPE_SIZE};
use crate::object::{Object, SetType, SetValue, TypedSet, Value};

/// Current encoding version. Loaders accept this or lower.
pub const ENCODING_VERSION: u32 = 1;

const MAGIC: &[u8; 4] = b"GRVS";

const TAG_LONG: u8 = 0;
const TAG_DOUBLE: u8 = 1;
const TAG_STRING: u8 = 2;
const TAG_OBJECT: u8 = 3;
const TAG_SET: u8 = 4;
const TAG_ARRAY: u8 = 5;
const TAG_POINTER: u8 = 6;

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(u32::try_from(s.len()).unwrap_or(u32::MAX));
    buf.put_slice(s.as_bytes());
}

fn get_str(buf: &mut Bytes) -> Result<String> {
    if buf.remaining() < 4 {
        return Err(GroveError::InvalidArgument);
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(GroveError::InvalidArgument);
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| GroveError::InvalidArgument)
}

fn put_node_id(buf: &mut BytesMut, id: NodeId) {
    buf.put_slice(id.as_bytes());
}

fn get_node_id(buf: &mut Bytes) -> Result<NodeId> {
    if buf.remaining() < NODE_ID_SIZE {
        return Err(GroveError::InvalidArgument);
    }
    let mut raw = [0u8; NODE_ID_SIZE];
    buf.copy_to_slice(&mut raw);
    Ok(NodeId(raw))
}

fn get_node_type(buf: &mut Bytes) -> Result<NodeType> {
    if buf.remaining() < NODE_TYPE_SIZE {
        return Err(GroveError::InvalidArgument);
    }
    let mut raw = [0u8; NODE_TYPE_SIZE];
    buf.copy_to_slice(&mut raw);
    Ok(NodeType(raw))
}

fn put_value(buf: &mut BytesMut, value: &Value) {
    match value {
        Value::Long(v) => {
            buf.put_u8(TAG_LONG);
            buf.put_i64_le(*v);
        }
        Value::Double(v) => {
            buf.put_u8(TAG_DOUBLE);
            buf.put_f64_le(*v);
        }
        Value::String(v) => {
            buf.put_u8(TAG_STRING);
            put_str(buf, v);
        }
        Value::Object(v) => {
            buf.put_u8(TAG_OBJECT);
            put_object(buf, v);
        }
        Value::Set(v) => {
            buf.put_u8(TAG_SET);
            put_set(buf, v);
        }
        Value::Array(items) => {
            buf.put_u8(TAG_ARRAY);
            buf.put_u32_le(u32::try_from(items.len()).unwrap_or(u32::MAX));
            for item in items {
                put_value(buf, item);
            }
        }
        Value::Pointer(leaf) => {
            buf.put_u8(TAG_POINTER);
            buf.put_u16_le(leaf.0.type_tag());
            let bytes = leaf.0.save();
            buf.put_u32_le(u32::try_from(bytes.len()).unwrap_or(u32::MAX));
            buf.put_slice(&bytes);
        }
    }
}

fn get_value(buf: &mut Bytes, h: &Hierarchy) -> Result<Value> {
    if buf.remaining() < 1 {
        return Err(GroveError::InvalidArgument);
    }
    Ok(match buf.get_u8() {
        TAG_LONG => Value::Long(read_i64(buf)?),
        TAG_DOUBLE => Value::Double(read_f64(buf)?),
        TAG_STRING => Value::String(get_str(buf)?),
        TAG_OBJECT => Value::Object(get_object(buf, h)?),
        TAG_SET => Value::Set(get_set(buf)?),
        TAG_ARRAY => {
            let n = read_u32(buf)? as usize;
            let mut items = Vec::with_capacity(n.min(4096));
            for _ in 0..n {
                items.push(get_value(buf, h)?);
            }
            Value::Array(items)
        }
        TAG_POINTER => {
            let tag = read_u16(buf)?;
            let len = read_u32(buf)? as usize;
            if buf.remaining() < len {
                return Err(GroveError::InvalidArgument);
            }
            let bytes = buf.copy_to_bytes(len);
            Value::Pointer(h.pointers.load(tag, &bytes)?)
        }
        _ => return Err(GroveError::InvalidArgument),
    })
}

fn put_set(buf: &mut BytesMut, set: &TypedSet) {
    let tag = match set.set_type() {
        SetType::String => 0u8,
        SetType::Double => 1,
        SetType::Long => 2,
    };
    buf.put_u8(tag);
    buf.put_u32_le(u32::try_from(set.len()).unwrap_or(u32::MAX));
    for v in set.iter() {
        match v {
            SetValue::Str(s) => put_str(buf, &s),
            SetValue::Double(d) => buf.put_f64_le(d),
            SetValue::Long(l) => buf.put_i64_le(l),
        }
    }
}

fn get_set(buf: &mut Bytes) -> Result<TypedSet> {
    let ty = match read_u8(buf)? {
        0 => SetType::String,
        1 => SetType::Double,
        2 => SetType::Long,
        _ => return Err(GroveError::InvalidArgument),
    };
    let n = read_u32(buf)? as usize;
    let mut set = TypedSet::new(ty);
    for _ in 0..n {
        let v = match ty {
            SetType::String => SetValue::Str(get_str(buf)?),
            SetType::Double => SetValue::Double(read_f64(buf)?),
            SetType::Long => SetValue::Long(read_i64(buf)?),
        };
        set.add(v)?;
    }
    Ok(set)
}

fn put_object(buf: &mut BytesMut, obj: &Object) {
    buf.put_u32_le(u32::try_from(obj.len()).unwrap_or(u32::MAX));
    for (key, value) in obj.iter() {
        put_str(buf, key);
        put_value(buf, value);
    }
}

fn get_object(buf: &mut Bytes, h: &Hierarchy) -> Result<Object> {
    let n = read_u32(buf)? as usize;
    let mut obj = Object::new();
    for _ in 0..n {
        let key = get_str(buf)?;
        let value = get_value(buf, h)?;
        obj.insert_key(key, value)?;
    }
    Ok(obj)
}

fn put_compressed(buf: &mut BytesMut, blob: &CompressedBuf) {
    match blob.uncompressed_len {
        Some(n) => buf.put_u64_le(n as u64),
        None => buf.put_u64_le(u64::MAX),
    }
    buf.put_u32_le(u32::try_from(blob.data.len()).unwrap_or(u32::MAX));
    buf.put_slice(&blob.data);
}

fn get_compressed(buf: &mut Bytes) -> Result<CompressedBuf> {
    if buf.remaining() < 12 {
        return Err(GroveError::InvalidArgument);
    }
    let raw_len = buf.get_u64_le();
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(GroveError::InvalidArgument);
    }
    let data = buf.copy_to_bytes(len).to_vec();
    Ok(CompressedBuf {
        data,
        uncompressed_len: if raw_len == u64::MAX {
            None
        } else {
            Some(usize::try_from(raw_len).map_err(|_| GroveError::InvalidArgument)?)
        },
    })
}

macro_rules! reader {
    ($name:ident, $ty:ty, $get:ident, $size:expr) => {
        fn $name(buf: &mut Bytes) -> Result<$ty> {
            if buf.remaining() < $size {
                return Err(GroveError::InvalidArgument);
            }
            Ok(buf.$get())
        }
    };
}

reader!(read_u8, u8, get_u8, 1);
reader!(read_u16, u16, get_u16_le, 2);
reader!(read_u32, u32, get_u32_le, 4);
reader!(read_i64, i64, get_i64_le, 8);
reader!(read_f64, f64, get_f64_le, 8);

/// Writes one live node record.
fn put_node_record(h: &Hierarchy, buf: &mut BytesMut, id: NodeId) -> Result<()> {
    let node = h.node(&id).ok_or(GroveError::NotFound)?;
    put_node_id(buf, id);
    buf.put_u32_le(node_flags_bits(h, &id));

    if node.is_detached() {
        let blob = h.detached_blob(&id).ok_or(GroveError::General)?;
        match &*blob {
            DetachedBlob::Mem(c) => {
                buf.put_u8(0);
                put_compressed(buf, c);
            }
            DetachedBlob::Disk(path) => {
                buf.put_u8(1);
                let data = std::fs::read(path)?;
                let mut tmp = Bytes::from(data);
                let c = get_compressed(&mut tmp)?;
                put_compressed(buf, &c);
            }
        }
        return Ok(());
    }

    // Edge fields.
    buf.put_u32_le(u32::try_from(node.edge_fields().count()).unwrap_or(u32::MAX));
    for (name, field) in node.edge_fields() {
        put_str(buf, name);
        buf.put_u16_le(field.constraint_id.0);
        buf.put_u32_le(u32::try_from(field.arcs.len()).unwrap_or(u32::MAX));
        for dst in &field.arcs {
            put_node_id(buf, *dst);
        }
        buf.put_u32_le(u32::try_from(field.metadata.len()).unwrap_or(u32::MAX));
        for (dst, meta) in &field.metadata {
            put_node_id(buf, *dst);
            put_object(buf, meta);
        }
    }

    put_object(buf, node.object());

    let children: Vec<NodeId> = node.children().collect();
    buf.put_u32_le(u32::try_from(children.len()).unwrap_or(u32::MAX));
    for c in children {
        put_node_id(buf, c);
    }
    Ok(())
}

fn node_flags_bits(h: &Hierarchy, id: &NodeId) -> u32 {
    h.node(id).map_or(0, |n| {
        if n.is_detached() {
            NodeFlags::DETACHED.bits()
        } else {
            0
        }
    })
}

/// Reads one node record into the hierarchy. Returns the id, or `None` at
/// the EOF sentinel.
fn load_node_record(h: &mut Hierarchy, buf: &mut Bytes) -> Result<Option<NodeId>> {
    let id = get_node_id(buf)?;
    if id == ZERO_NODE_ID {
        return Ok(None);
    }
    h.upsert_node(id)?;
    let flags = read_u32(buf)?;

    if flags & NodeFlags::DETACHED.bits() != 0 {
        let kind = match read_u8(buf)? {
            0 => DetachedKind::Mem,
            1 => DetachedKind::Disk,
            _ => return Err(GroveError::InvalidArgument),
        };
        let compressed = get_compressed(buf)?;
        let raw = compressed.decompress()?;
        // Rehydrate, then immediately re-detach so the load preserves the
        // detached representation and member-id indexing.
        load_subtree(h, &raw)?;
        h.detach_subtree(id, kind)?;
        return Ok(Some(id));
    }

    let edge_count = read_u32(buf)? as usize;
    for _ in 0..edge_count {
        let name = get_str(buf)?;
        let constraint_id = ConstraintId(read_u16(buf)?);
        let arc_count = read_u32(buf)? as usize;
        let mut field = EdgeField::new(id, constraint_id);
        for _ in 0..arc_count {
            let dst = get_node_id(buf)?;
            h.upsert_node(dst)?;
            field.arcs.insert(dst);
        }
        let meta_count = read_u32(buf)? as usize;
        for _ in 0..meta_count {
            let dst = get_node_id(buf)?;
            let obj = get_object(buf, h)?;
            field.metadata.insert(dst, obj);
        }
        h.install_edge_field(id, name, field);
    }

    let obj = get_object(buf, h)?;
    h.replace_object(id, obj);

    let child_count = read_u32(buf)? as usize;
    for _ in 0..child_count {
        let child = get_node_id(buf)?;
        h.upsert_node(child)?;
        h.link_for_load(id, child);
    }
    Ok(Some(id))
}

fn put_constraints(h: &Hierarchy, buf: &mut BytesMut) {
    let entries: Vec<(&str, _)> = h.constraints().iter_dynamic().collect();
    buf.put_u32_le(u32::try_from(entries.len()).unwrap_or(u32::MAX));
    for (_key, c) in entries {
        buf.put_u8(c.flags.bits());
        if let Some(ty) = c.fwd_node_type {
            buf.put_slice(ty.as_bytes());
        } else {
            buf.put_slice(&[0, 0]);
        }
        put_str(buf, c.fwd_field.as_deref().unwrap_or(""));
        buf.put_u16_le(c.bck_constraint_id.0);
        if let Some(ty) = c.bck_node_type {
            buf.put_u8(1);
            buf.put_slice(ty.as_bytes());
        } else {
            buf.put_u8(0);
        }
        match &c.bck_field {
            Some(f) => {
                buf.put_u8(1);
                put_str(buf, f);
            }
            None => buf.put_u8(0),
        }
    }
}

fn load_constraints(h: &mut Hierarchy, buf: &mut Bytes) -> Result<()> {
    let n = read_u32(buf)? as usize;
    for _ in 0..n {
        let flags = ConstraintFlags::from_bits_truncate(read_u8(buf)?);
        let fwd_node_type = get_node_type(buf)?;
        let fwd_field = get_str(buf)?;
        let bck_constraint_id = ConstraintId(read_u16(buf)?);
        let bck_node_type = if read_u8(buf)? == 1 {
            Some(get_node_type(buf)?)
        } else {
            None
        };
        let bck_field = if read_u8(buf)? == 1 {
            Some(get_str(buf)?)
        } else {
            None
        };
        let res = h.add_edge_constraint(DynConstraintParams {
            flags: flags - ConstraintFlags::DYNAMIC,
            fwd_node_type,
            fwd_field,
            bck_constraint_id,
            bck_node_type,
            bck_field,
        });
        match res {
            Ok(()) | Err(GroveError::AlreadyExists) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Serializes the whole hierarchy.
///
/// # Errors
/// Propagates traversal and I/O failures; the hierarchy is left unchanged.
pub fn save(h: &mut Hierarchy) -> Result<Vec<u8>> {
    h.begin_snapshot();
    let result = save_inner(h);
    h.end_snapshot();
    result
}

fn save_inner(h: &mut Hierarchy) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    buf.put_slice(MAGIC);
    buf.put_u32_le(ENCODING_VERSION);
    put_str(&mut buf, env!("CARGO_PKG_VERSION"));
    put_str(&mut buf, env!("CARGO_PKG_VERSION"));
    put_constraints(h, &mut buf);

    let spec = TraverseSpec {
        dir: TraversalDir::DfsFull,
        inhibit_restore: true,
        ..TraverseSpec::default()
    };
    let ids = h.traverse_collect(ZERO_NODE_ID, &spec)?;
    for id in ids {
        put_node_record(h, &mut buf, id)?;
    }
    put_node_id(&mut buf, ZERO_NODE_ID);
    Ok(buf.to_vec())
}

/// Loads a snapshot produced by [`save`] into a hierarchy.
///
/// # Errors
/// [`GroveError::InvalidArgument`] for malformed or newer-versioned input.
pub fn load(h: &mut Hierarchy, bytes: &[u8]) -> Result<()> {
    let mut buf = Bytes::copy_from_slice(bytes);
    if buf.remaining() < 8 {
        return Err(GroveError::InvalidArgument);
    }
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if &magic != MAGIC {
        return Err(GroveError::InvalidArgument);
    }
    let version = buf.get_u32_le();
    if version > ENCODING_VERSION || version == 0 {
        return Err(GroveError::InvalidArgument);
    }
    let _created_with = get_str(&mut buf)?;
    let _updated_with = get_str(&mut buf)?;

    h.begin_load();
    let res = load_inner(h, &mut buf);
    h.end_load();
    res
}

fn load_inner(h: &mut Hierarchy, buf: &mut Bytes) -> Result<()> {
    load_constraints(h, buf)?;
    while load_node_record(h, buf)?.is_some() {}
    Ok(())
}

/// Serializes the subtree rooted at `root` (parents of the root excluded).
///
/// # Errors
/// Propagates traversal failures.
pub fn save_subtree(h: &mut Hierarchy, root: NodeId) -> Result<Vec<u8>> {
    let mut buf = BytesMut::new();
    buf.put_slice(MAGIC);
    buf.put_u32_le(ENCODING_VERSION);

    let mut ids = vec![root];
    let spec = TraverseSpec {
        dir: TraversalDir::BfsDescendants,
        inhibit_restore: true,
        ..TraverseSpec::default()
    };
    ids.extend(h.traverse_collect(root, &spec)?);
    for id in &ids {
        put_node_record(h, &mut buf, *id)?;
    }
    put_node_id(&mut buf, ZERO_NODE_ID);
    Ok(buf.to_vec())
}

/// Loads a subtree produced by [`save_subtree`]. The first record is the
/// root: an existing detached stub is rehydrated in place (flag cleared,
/// object replaced), keeping its live parent links.
///
/// # Errors
/// [`GroveError::InvalidArgument`] for malformed input.
pub fn load_subtree(h: &mut Hierarchy, bytes: &[u8]) -> Result<NodeId> {
    let mut buf = Bytes::copy_from_slice(bytes);
    if buf.remaining() < 8 {
        return Err(GroveError::InvalidArgument);
    }
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if &magic != MAGIC {
        return Err(GroveError::InvalidArgument);
    }
    let version = buf.get_u32_le();
    if version > ENCODING_VERSION || version == 0 {
        return Err(GroveError::InvalidArgument);
    }

    h.begin_load();
    let first = load_node_record(h, &mut buf);
    let res = match first {
        Ok(Some(root)) => {
            h.clear_detached_flag(root);
            let rest = (|| -> Result<()> {
                while load_node_record(h, &mut buf)?.is_some() {}
                Ok(())
            })();
            rest.map(|()| root)
        }
        Ok(None) => Err(GroveError::InvalidArgument),
        Err(e) => Err(e),
    };
    h.end_load();
    res
}
