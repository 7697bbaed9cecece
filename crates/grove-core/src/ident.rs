// SPDX-License-Identifier: MIT
//! Identifier types for nodes, subscriptions, and markers.

use std::fmt;

use crate::error::GroveError;

/// Byte width of a [`NodeId`].
pub const NODE_ID_SIZE: usize = 10;

/// Byte width of a [`NodeType`] (the leading bytes of a node id).
pub const NODE_TYPE_SIZE: usize = 2;

/// Byte width of a [`SubscriptionId`].
pub const SUBSCRIPTION_ID_SIZE: usize = 32;

/// Fixed 10-byte node identifier.
///
/// The first two bytes are the [`NodeType`]. Ids shorter than ten bytes are
/// padded with trailing NULs; the printable form trims that padding.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub [u8; NODE_ID_SIZE]);

/// The permanent root node id.
pub const ROOT_NODE_ID: NodeId = NodeId(*b"root\0\0\0\0\0\0");

/// The all-zero id, used as the snapshot EOF sentinel.
pub const ZERO_NODE_ID: NodeId = NodeId([0u8; NODE_ID_SIZE]);

impl NodeId {
    /// Builds an id from a printable string, padding with trailing NULs.
    ///
    /// # Errors
    /// Returns [`GroveError::NameTooLong`] when `s` exceeds ten bytes.
    pub fn from_str(s: &str) -> Result<Self, GroveError> {
        let bytes = s.as_bytes();
        if bytes.len() > NODE_ID_SIZE {
            return Err(GroveError::NameTooLong);
        }
        let mut id = [0u8; NODE_ID_SIZE];
        id[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(id))
    }

    /// Builds an id from raw bytes, truncating or padding to ten bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut id = [0u8; NODE_ID_SIZE];
        let n = bytes.len().min(NODE_ID_SIZE);
        id[..n].copy_from_slice(&bytes[..n]);
        Self(id)
    }

    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NODE_ID_SIZE] {
        &self.0
    }

    /// Returns the type prefix of this id.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        NodeType([self.0[0], self.0[1]])
    }

    /// Length of the id with trailing NULs trimmed.
    #[must_use]
    pub fn printable_len(&self) -> usize {
        let mut n = NODE_ID_SIZE;
        while n > 0 && self.0[n - 1] == 0 {
            n -= 1;
        }
        n
    }

    /// The printable form of the id (trailing NULs trimmed, lossy on
    /// non-UTF-8 bytes).
    #[must_use]
    pub fn to_display_string(&self) -> String {
        String::from_utf8_lossy(&self.0[..self.printable_len()]).into_owned()
    }

    /// The full 10-byte form as a string, trailing NULs included. This is
    /// the representation id-valued expression operands use.
    #[must_use]
    pub fn to_padded_string(&self) -> String {
        self.0.iter().map(|b| char::from(*b)).collect()
    }

    /// Returns `true` when this is [`ROOT_NODE_ID`].
    #[must_use]
    pub fn is_root(&self) -> bool {
        *self == ROOT_NODE_ID
    }

    /// Returns `true` when this is the all-zero sentinel.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        *self == ZERO_NODE_ID
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:?})", self.to_display_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

/// Two-byte node type prefix.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeType(pub [u8; NODE_TYPE_SIZE]);

impl NodeType {
    /// Parses a type from a printable string.
    ///
    /// # Errors
    /// Returns [`GroveError::InvalidArgument`] unless `s` is exactly two bytes.
    pub fn from_str(s: &str) -> Result<Self, GroveError> {
        let bytes = s.as_bytes();
        if bytes.len() != NODE_TYPE_SIZE {
            return Err(GroveError::InvalidArgument);
        }
        Ok(Self([bytes[0], bytes[1]]))
    }

    /// Returns the canonical byte representation of this type.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NODE_TYPE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeType({:?})", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// 32-byte opaque subscription identifier, rendered externally as 64-char hex.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub [u8; SUBSCRIPTION_ID_SIZE]);

impl SubscriptionId {
    /// Parses the 64-char hex form.
    ///
    /// # Errors
    /// Returns [`GroveError::InvalidArgument`] on malformed input.
    pub fn from_hex(s: &str) -> Result<Self, GroveError> {
        let mut id = [0u8; SUBSCRIPTION_ID_SIZE];
        hex::decode_to_slice(s, &mut id).map_err(|_| GroveError::InvalidArgument)?;
        Ok(Self(id))
    }

    /// Renders the 64-char lowercase hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SUBSCRIPTION_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.to_hex())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Marker identifier, unique within one subscription.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MarkerId(pub i64);

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn node_id_pads_and_trims() {
        let id = NodeId::from_str("ab1").unwrap();
        assert_eq!(id.as_bytes(), b"ab1\0\0\0\0\0\0\0");
        assert_eq!(id.printable_len(), 3);
        assert_eq!(id.to_display_string(), "ab1");
    }

    #[test]
    fn node_id_rejects_overlong() {
        assert_eq!(
            NodeId::from_str("abcdefghijk"),
            Err(GroveError::NameTooLong)
        );
    }

    #[test]
    fn node_type_is_the_prefix() {
        let id = NodeId::from_str("ma12345").unwrap();
        assert_eq!(id.node_type(), NodeType(*b"ma"));
    }

    #[test]
    fn root_is_special() {
        assert!(ROOT_NODE_ID.is_root());
        assert!(!ROOT_NODE_ID.is_zero());
        assert!(ZERO_NODE_ID.is_zero());
        assert_eq!(ROOT_NODE_ID.to_display_string(), "root");
    }

    #[test]
    fn subscription_id_hex_round_trip() {
        let mut raw = [0u8; SUBSCRIPTION_ID_SIZE];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = u8::try_from(i).unwrap();
        }
        let id = SubscriptionId(raw);
        let hx = id.to_hex();
        assert_eq!(hx.len(), 64);
        assert_eq!(SubscriptionId::from_hex(&hx).unwrap(), id);
    }

    #[test]
    fn subscription_id_rejects_bad_hex() {
        assert!(SubscriptionId::from_hex("zz").is_err());
    }
}
