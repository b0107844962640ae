//! Identifier tuples - the physical storage key
//!
//! A [`Tuple`] is a fixed-arity sequence of [`NodeId`]s in canonical slot
//! order: `S,P,O` for triples, `G,S,P,O` for quads. Indexes store tuples
//! re-ordered by their column permutation; the canonical order is what the
//! rest of the system speaks.
//!
//! Probe tuples may carry [`NodeId::ANY`] in any slot; stored tuples must
//! be fully concrete.

use crate::error::{CoreError, Result};
use crate::node_id::NodeId;
use std::fmt;

/// Fixed-arity tuple of node identifiers in canonical slot order
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tuple {
    ids: Vec<NodeId>,
}

impl Tuple {
    /// Triple tuple: S, P, O
    pub fn triple(s: NodeId, p: NodeId, o: NodeId) -> Self {
        Tuple { ids: vec![s, p, o] }
    }

    /// Quad tuple: G, S, P, O
    pub fn quad(g: NodeId, s: NodeId, p: NodeId, o: NodeId) -> Self {
        Tuple {
            ids: vec![g, s, p, o],
        }
    }

    /// Build from a slice, checking the arity is 3 or 4
    pub fn from_ids(ids: &[NodeId]) -> Result<Self> {
        if ids.len() != 3 && ids.len() != 4 {
            return Err(CoreError::ArityMismatch {
                expected: 3,
                actual: ids.len(),
            });
        }
        Ok(Tuple { ids: ids.to_vec() })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        false // arity is always 3 or 4
    }

    pub fn get(&self, slot: usize) -> NodeId {
        self.ids[slot]
    }

    pub fn set(&mut self, slot: usize, id: NodeId) {
        self.ids[slot] = id;
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    /// True if no slot is a wildcard
    pub fn is_concrete(&self) -> bool {
        self.ids.iter().all(|id| id.is_concrete())
    }

    /// True if any slot holds [`NodeId::DOES_NOT_EXIST`] - such a probe can
    /// never match stored data
    pub fn any_slot_missing(&self) -> bool {
        self.ids.iter().any(|id| id.does_not_exist())
    }

    /// Probe with every slot wildcarded, matching all stored tuples
    pub fn all_wildcard(arity: usize) -> Self {
        Tuple {
            ids: vec![NodeId::ANY; arity],
        }
    }

    /// True if `self` (a probe, possibly with ANY slots) matches `stored`
    pub fn matches(&self, stored: &Tuple) -> bool {
        debug_assert_eq!(self.len(), stored.len());
        self.ids
            .iter()
            .zip(stored.ids.iter())
            .all(|(probe, actual)| probe.is_any() || probe == actual)
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tuple[")?;
        for (i, id) in self.ids.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", id)?;
        }
        write!(f, "]")
    }
}
