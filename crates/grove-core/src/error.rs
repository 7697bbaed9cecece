// SPDX-License-Identifier: MIT
//! Engine error types.

use thiserror::Error;

/// Externally visible engine errors.
///
/// Each variant corresponds to a distinct host-facing error code, retrievable
/// via [`GroveError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GroveError {
    /// Unknown failure.
    #[error("general failure")]
    General,
    /// Operation disallowed in the current state (e.g. writing to a detached
    /// node).
    #[error("operation not supported")]
    NotSupported,
    /// Argument parse or shape error.
    #[error("invalid argument")]
    InvalidArgument,
    /// Type mismatch on a typed value retrieval.
    #[error("type mismatch")]
    WrongType,
    /// Identifier or path length exceeded.
    #[error("name too long")]
    NameTooLong,
    /// Allocation failure.
    #[error("out of memory")]
    OutOfMemory,
    /// Node, key, or marker not found.
    #[error("not found")]
    NotFound,
    /// Duplicate creation where not allowed.
    #[error("already exists")]
    AlreadyExists,
    /// An internal bounded buffer is full.
    #[error("no buffer space available")]
    BufferFull,
    /// Maximum traversal depth reached.
    #[error("maximum traversal depth reached")]
    TraversalLimit,
    /// Expression did not compile.
    #[error("expression compilation failed")]
    ExprCompile,
    /// Object key count saturated the key counter.
    #[error("object key count saturated")]
    ObjectTooBig,
}

impl GroveError {
    /// The stable host-facing error code string.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::General => "EGENERAL",
            Self::NotSupported => "ENOTSUP",
            Self::InvalidArgument => "EINVAL",
            Self::WrongType => "EINTYPE",
            Self::NameTooLong => "ENAMETOOLONG",
            Self::OutOfMemory => "ENOMEM",
            Self::NotFound => "ENOENT",
            Self::AlreadyExists => "EEXIST",
            Self::BufferFull => "ENOBUFS",
            Self::TraversalLimit => "ETRMAX",
            Self::ExprCompile => "ECOMP",
            Self::ObjectTooBig => "EOBIG",
        }
    }
}

impl From<std::io::Error> for GroveError {
    fn from(_: std::io::Error) -> Self {
        Self::General
    }
}

/// Convenient result alias for engine operations.
pub type Result<T, E = GroveError> = std::result::Result<T, E>;
