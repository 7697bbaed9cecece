// SPDX-License-Identifier: MIT
//! Ordered sets specialized to one element type.

use std::collections::BTreeSet;

use crate::error::GroveError;

/// `f64` ordered by IEEE total order so it can live in a `BTreeSet`.
#[derive(Debug, Clone, Copy)]
pub struct TotalF64(pub f64);

impl PartialEq for TotalF64 {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == std::cmp::Ordering::Equal
    }
}

impl Eq for TotalF64 {}

impl PartialOrd for TotalF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// One element of a [`TypedSet`], borrowed or by value.
#[derive(Debug, Clone, PartialEq)]
pub enum SetValue {
    /// String element.
    Str(String),
    /// Double element.
    Double(f64),
    /// Integer element.
    Long(i64),
}

/// The element type of a [`TypedSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetType {
    /// Set of strings.
    String,
    /// Set of doubles.
    Double,
    /// Set of 64-bit integers.
    Long,
}

/// An ordered set whose elements all share one primitive type.
///
/// Iteration order is the element order (lexicographic for strings, numeric
/// for doubles and longs), which keeps set-driven traversal deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedSet {
    /// Set of strings.
    String(BTreeSet<String>),
    /// Set of doubles in total order.
    Double(BTreeSet<TotalF64>),
    /// Set of 64-bit integers.
    Long(BTreeSet<i64>),
}

impl TypedSet {
    /// Creates an empty set of the given element type.
    #[must_use]
    pub fn new(ty: SetType) -> Self {
        match ty {
            SetType::String => Self::String(BTreeSet::new()),
            SetType::Double => Self::Double(BTreeSet::new()),
            SetType::Long => Self::Long(BTreeSet::new()),
        }
    }

    /// The element type of this set.
    #[must_use]
    pub fn set_type(&self) -> SetType {
        match self {
            Self::String(_) => SetType::String,
            Self::Double(_) => SetType::Double,
            Self::Long(_) => SetType::Long,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::String(s) => s.len(),
            Self::Double(s) => s.len(),
            Self::Long(s) => s.len(),
        }
    }

    /// Returns `true` when the set has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts a value. Returns `true` when the value was not present.
    ///
    /// # Errors
    /// Returns [`GroveError::WrongType`] when the value type does not match
    /// the element type.
    pub fn add(&mut self, value: SetValue) -> Result<bool, GroveError> {
        match (self, value) {
            (Self::String(s), SetValue::Str(v)) => Ok(s.insert(v)),
            (Self::Double(s), SetValue::Double(v)) => Ok(s.insert(TotalF64(v))),
            (Self::Long(s), SetValue::Long(v)) => Ok(s.insert(v)),
            _ => Err(GroveError::WrongType),
        }
    }

    /// Removes a value. Returns `true` when the value was present.
    pub fn remove(&mut self, value: &SetValue) -> bool {
        match (self, value) {
            (Self::String(s), SetValue::Str(v)) => s.remove(v),
            (Self::Double(s), SetValue::Double(v)) => s.remove(&TotalF64(*v)),
            (Self::Long(s), SetValue::Long(v)) => s.remove(v),
            _ => false,
        }
    }

    /// Membership test. A value of the wrong type is simply not a member.
    #[must_use]
    pub fn has(&self, value: &SetValue) -> bool {
        match (self, value) {
            (Self::String(s), SetValue::Str(v)) => s.contains(v),
            (Self::Double(s), SetValue::Double(v)) => s.contains(&TotalF64(*v)),
            (Self::Long(s), SetValue::Long(v)) => s.contains(v),
            _ => false,
        }
    }

    /// Membership test for a string without allocating.
    #[must_use]
    pub fn has_str(&self, value: &str) -> bool {
        match self {
            Self::String(s) => s.contains(value),
            _ => false,
        }
    }

    /// Returns the union of `self` and `other` as a new set.
    ///
    /// # Errors
    /// Returns [`GroveError::WrongType`] when the element types differ.
    pub fn union(&self, other: &Self) -> Result<Self, GroveError> {
        match (self, other) {
            (Self::String(a), Self::String(b)) => {
                Ok(Self::String(a.union(b).cloned().collect()))
            }
            (Self::Double(a), Self::Double(b)) => {
                Ok(Self::Double(a.union(b).copied().collect()))
            }
            (Self::Long(a), Self::Long(b)) => Ok(Self::Long(a.union(b).copied().collect())),
            _ => Err(GroveError::WrongType),
        }
    }

    /// Moves every element of `other` into `self`, leaving `other` empty.
    ///
    /// # Errors
    /// Returns [`GroveError::WrongType`] when the element types differ.
    pub fn merge(&mut self, other: &mut Self) -> Result<(), GroveError> {
        match (self, other) {
            (Self::String(a), Self::String(b)) => {
                a.append(b);
                Ok(())
            }
            (Self::Double(a), Self::Double(b)) => {
                a.append(b);
                Ok(())
            }
            (Self::Long(a), Self::Long(b)) => {
                a.append(b);
                Ok(())
            }
            _ => Err(GroveError::WrongType),
        }
    }

    /// Returns `true` when every element of `self` is also in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a.is_subset(b),
            (Self::Double(a), Self::Double(b)) => a.is_subset(b),
            (Self::Long(a), Self::Long(b)) => a.is_subset(b),
            _ => false,
        }
    }

    /// Iterates the elements in set order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = SetValue> + '_> {
        match self {
            Self::String(s) => Box::new(s.iter().map(|v| SetValue::Str(v.clone()))),
            Self::Double(s) => Box::new(s.iter().map(|v| SetValue::Double(v.0))),
            Self::Long(s) => Box::new(s.iter().copied().map(SetValue::Long)),
        }
    }

    /// Iterates string elements in order; empty for non-string sets.
    pub fn iter_str(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            Self::String(s) => Box::new(s.iter().map(String::as_str)),
            _ => Box::new(std::iter::empty()),
        }
    }
}

impl FromIterator<String> for TypedSet {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        Self::String(iter.into_iter().collect())
    }
}
