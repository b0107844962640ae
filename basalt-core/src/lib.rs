//! # Basalt Core
//!
//! Shared data model and storage seam for the Basalt RDF store.
//!
//! This crate provides:
//! - Core types: [`Term`], [`NodeId`], [`Tuple`]
//! - The dictionary seam: [`NodeTable`] trait + in-memory [`MemNodeTable`]
//! - The index seam: [`TupleIndex`] trait + in-memory [`MemTupleIndex`],
//!   grouped into [`TupleTable`]s with access-path selection
//! - [`DatasetStorage`]: triple + quad tables over one shared node table
//! - [`TxnCoordinator`]: per-thread transactions and process-wide
//!   exclusive mode for bulk operations
//!
//! ## Design Principles
//!
//! 1. **Traits at the storage seam**: the query engine and loader consume
//!    `NodeTable`/`TupleIndex` only through trait objects; the on-disk
//!    implementations live elsewhere.
//! 2. **Strict total ordering**: tuples order lexicographically per index
//!    permutation, no nil-as-wildcard in stored data; probes use the
//!    explicit [`NodeId::ANY`] sentinel.
//! 3. **One transaction per worker thread**: transactions are never shared
//!    across threads; bulk work runs under exclusive mode.

pub mod dataset;
pub mod error;
pub mod index;
pub mod node_id;
pub mod node_table;
pub mod term;
pub mod tuple;
pub mod txn;

pub use dataset::DatasetStorage;
pub use error::{CoreError, Result};
pub use index::{MemTupleIndex, TupleIndex, TupleTable};
pub use node_id::NodeId;
pub use node_table::{MemNodeTable, NodeTable};
pub use term::Term;
pub use tuple::Tuple;
pub use txn::{Transaction, TxnCoordinator, TxnMode};
