//! Error types for query execution

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, QueryError>;

/// Query execution errors
///
/// These are pipeline-terminal: a query either yields a (possibly empty)
/// stream of bindings or raises exactly one of these. Per-binding
/// conditions (filter type errors, assign evaluation failures) are
/// [`ExprError`](crate::expr::ExprError) and never surface here.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Error from basalt-core
    #[error("Core error: {0}")]
    Core(#[from] basalt_core::CoreError),

    /// Query cancelled via an abort signal or timeout
    #[error("Query cancelled")]
    Cancelled,
}
