//! # Basalt Query
//!
//! The execution engine of the Basalt RDF store: lowers an algebra operator
//! tree into a lazy, pull-based stream of variable bindings by walking the
//! physical storage through the stage-generator seam.
//!
//! ## Layering (leaves first)
//!
//! - [`var_usage`] - static analysis of an operator subtree into four
//!   variable sets (definite, optional, filter-mentioned, assign-mentioned)
//! - [`classify`] - join/left-join linearity decisions built on the usage
//!   sets: can the right operand be evaluated by substituting each left
//!   solution into it, or does it need independent evaluation?
//! - [`exec`] - the evaluator: one arm per operator kind, recursing
//!   directly and chaining binding iterators
//! - [`stage`] / [`solver`] - the storage seam: a basic graph pattern plus
//!   an incoming binding stream becomes a stream of extended bindings, at
//!   the term level (generic) or the identifier level (storage-backed)
//!
//! The engine is single-threaded and cooperative: no operator spawns
//! threads, and no operator materializes unless its semantics require it
//! (distinct, group, order, top-N). Cancellation is advisory, raised at the
//! next touch of an abortable stage.

pub mod algebra;
pub mod binding;
pub mod classify;
pub mod error;
pub mod exec;
pub mod expr;
pub mod iter;
pub mod solver;
pub mod stage;
pub mod var_usage;

pub use algebra::{BasicPattern, Expr, GraphName, Op, PatternNode, TriplePattern, Var};
pub use binding::{Binding, IdBinding};
pub use error::{QueryError, Result};
pub use exec::{ExecContext, ExecInput, OpExecutor};
pub use iter::{AbortSignal, BindingIter};
pub use stage::StageGenerator;
pub use solver::{StorageStageGenerator, TupleFilter};
