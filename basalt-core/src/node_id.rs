//! Compact node identifiers
//!
//! A [`NodeId`] is a storage-local u64 standing in for an RDF term, assigned
//! densely from 0 by a [`NodeTable`](crate::NodeTable). Two reserved values
//! at the top of the range act as sentinels:
//!
//! - [`NodeId::ANY`]: wildcard slot in an index probe
//! - [`NodeId::DOES_NOT_EXIST`]: dictionary miss; a pattern slot holding
//!   this id can never match stored data
//!
//! Sentinels are never stored in an index.

use std::fmt;

/// Compact identifier for an interned RDF term
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Wildcard marker for index probes
    pub const ANY: NodeId = NodeId(u64::MAX);

    /// Marker for a term absent from the dictionary
    pub const DOES_NOT_EXIST: NodeId = NodeId(u64::MAX - 1);

    /// Largest id the dictionary may allocate
    pub const MAX_CONCRETE: u64 = u64::MAX - 2;

    /// Wrap a raw allocated id. Panics on sentinel-range values in debug
    /// builds; the node table is the only allocator.
    pub fn new(raw: u64) -> Self {
        debug_assert!(raw <= Self::MAX_CONCRETE, "sentinel range id");
        NodeId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// True for ids that refer to a stored term (not a sentinel)
    pub fn is_concrete(self) -> bool {
        self.0 <= Self::MAX_CONCRETE
    }

    pub fn is_any(self) -> bool {
        self == Self::ANY
    }

    pub fn does_not_exist(self) -> bool {
        self == Self::DOES_NOT_EXIST
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            write!(f, "NodeId(ANY)")
        } else if self.does_not_exist() {
            write!(f, "NodeId(DOES_NOT_EXIST)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            write!(f, "?")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
