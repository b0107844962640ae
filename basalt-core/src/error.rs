//! Error types for basalt-core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    /// Tuple arity does not match the table/index it was handed to
    #[error("Arity mismatch: expected {expected}, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    /// Index name not recognized by a table or registry
    #[error("Unknown index: {0}")]
    UnknownIndex(String),

    /// The same index name appears twice where uniqueness is required
    #[error("Duplicate index: {0}")]
    DuplicateIndex(String),

    /// Index name does not describe a valid column permutation
    #[error("Invalid index name: {0}")]
    InvalidIndexName(String),

    /// Triple and quad paths were configured with different node tables
    #[error("Mismatched node tables between triple and quad storage")]
    MismatchedNodeTables,

    /// Transaction used outside its valid lifecycle
    #[error("Invalid transaction state: {0}")]
    InvalidTxnState(String),

    /// Bulk-mode transaction requested outside exclusive mode
    #[error("Bulk transactions require exclusive mode")]
    BulkOutsideExclusive,
}
