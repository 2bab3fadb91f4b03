//! Error types for contract violations.
//!
//! Every "fails with X" condition in the crate is a [`MemoryError`] returned
//! directly to the caller. Resource exhaustion is not represented here: the
//! allocators route it to [`std::alloc::handle_alloc_error`], which aborts.

use thiserror::Error;

/// A programming-contract violation reported by a container or allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// An index was outside `0..len`.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Length of the container at the time of the call.
        len: usize,
    },

    /// A range `start..start + count` was not inside `0..len`.
    #[error("range {start}..{start}+{count} out of bounds for length {len}")]
    InvalidRange {
        /// Range start.
        start: usize,
        /// Number of elements in the range.
        count: usize,
        /// Length of the container at the time of the call.
        len: usize,
    },

    /// `add` was called with a key that is already present.
    #[error("an item with the same key has already been added")]
    DuplicateKey,

    /// A lookup that requires the key to exist did not find it.
    #[error("the given key was not present")]
    KeyNotFound,

    /// A removal was attempted on an empty container.
    #[error("{container} is empty")]
    Empty {
        /// Name of the container type.
        container: &'static str,
    },

    /// An alignment that is zero or not a power of two.
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MemoryError>;
