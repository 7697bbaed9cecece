// SPDX-License-Identifier: MIT
//! Opaque pointer leaves.
//!
//! A pointer leaf carries a numeric type tag and a user-supplied
//! implementation of [`PointerValue`]; the tag selects the loader in a
//! [`PointerRegistry`] so pointer leaves can participate in the snapshot
//! codec.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::GroveError;

/// Behavior attached to an opaque pointer leaf.
///
/// `save` must produce bytes that the registered loader for the same type tag
/// can decode back into an equivalent value.
pub trait PointerValue: fmt::Debug + Send + Sync {
    /// Numeric type tag selecting the loader on snapshot load.
    fn type_tag(&self) -> u16;
    /// Logical length reported to hosts (element count or byte size).
    fn byte_len(&self) -> usize;
    /// Serializes the value for the snapshot codec.
    fn save(&self) -> Vec<u8>;
    /// Human-readable rendering for host replies.
    fn reply(&self) -> String {
        format!("<pointer:{}>", self.type_tag())
    }
}

/// Loader callback reconstructing a pointer value from its saved bytes.
pub type PointerLoader = fn(&[u8]) -> Result<Arc<dyn PointerValue>, GroveError>;

/// Registry mapping pointer type tags to loaders.
///
/// Extension is construction-time only; the registry is owned by the
/// hierarchy and consulted by the snapshot codec.
#[derive(Default)]
pub struct PointerRegistry {
    loaders: FxHashMap<u16, PointerLoader>,
}

impl fmt::Debug for PointerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointerRegistry")
            .field("types", &self.loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PointerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a loader for `type_tag`.
    ///
    /// # Errors
    /// Returns [`GroveError::AlreadyExists`] when the tag is taken.
    pub fn register(&mut self, type_tag: u16, loader: PointerLoader) -> Result<(), GroveError> {
        if self.loaders.contains_key(&type_tag) {
            return Err(GroveError::AlreadyExists);
        }
        self.loaders.insert(type_tag, loader);
        Ok(())
    }

    /// Loads a pointer value through the loader registered for `type_tag`.
    ///
    /// # Errors
    /// Returns [`GroveError::NotSupported`] for an unknown tag, or the
    /// loader's own error.
    pub fn load(&self, type_tag: u16, bytes: &[u8]) -> Result<PointerLeaf, GroveError> {
        let loader = self
            .loaders
            .get(&type_tag)
            .ok_or(GroveError::NotSupported)?;
        Ok(PointerLeaf(loader(bytes)?))
    }
}

/// A shared opaque pointer value stored in an object.
#[derive(Clone, Debug)]
pub struct PointerLeaf(pub Arc<dyn PointerValue>);

impl PointerLeaf {
    /// Wraps a value into a leaf.
    pub fn new(value: impl PointerValue + 'static) -> Self {
        Self(Arc::new(value))
    }
}

impl PartialEq for PointerLeaf {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
