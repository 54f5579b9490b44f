//! Error taxonomy returned by [`crate::Table`] operations.
//!
//! The variants mirror the status codes a caller needs to distinguish:
//! a bad argument, an exhausted allocator, a missing or already-present
//! prefix, a payload mismatch on an existing prefix, an internal
//! invariant violation, and an abort requested from within a walk
//! callback.

use std::fmt;

/// The outcome of a fallible [`Table`](crate::Table) operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// An argument was out of range (e.g. a mask length over 128).
    Invalid(&'static str),
    /// The allocator backing the 1-trie or m-trie could not satisfy a
    /// request. The table is left exactly as it was before the call.
    Resources,
    /// No record exists for the given (address, mask length).
    NotFound,
    /// A record for this exact prefix already exists with an identical
    /// payload.
    Exists,
    /// A record for this exact prefix already exists with a different
    /// payload.
    Conflict,
    /// An internal invariant was violated. This indicates a bug in the
    /// table implementation itself, not misuse by the caller.
    Internal(String),
    /// A walk callback requested early termination.
    Exotic,
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::Invalid(msg) => write!(f, "invalid argument: {msg}"),
            TableError::Resources => write!(f, "allocator exhausted"),
            TableError::NotFound => write!(f, "no matching prefix"),
            TableError::Exists => write!(f, "prefix already present with the same payload"),
            TableError::Conflict => {
                write!(f, "prefix already present with a different payload")
            }
            TableError::Internal(msg) => write!(f, "internal invariant violated: {msg}"),
            TableError::Exotic => write!(f, "walk aborted by callback"),
        }
    }
}

impl std::error::Error for TableError {}

/// Convenience alias used throughout the crate.
pub type TableResult<T> = Result<T, TableError>;
