//! Node table - the term/identifier dictionary seam
//!
//! The node table maps RDF terms to compact [`NodeId`]s and back. The query
//! engine and bulk loader consume it only through the [`NodeTable`] trait;
//! the persistent implementation lives with the storage engine. The
//! in-memory [`MemNodeTable`] here backs tests and small datasets.
//!
//! One node table instance must be shared between the triple and quad code
//! paths of a dataset; [`DatasetStorage`](crate::DatasetStorage) verifies
//! this at construction.

use crate::node_id::NodeId;
use crate::term::Term;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Dictionary mapping terms to compact identifiers
///
/// Implementations must be safe for concurrent use: the bulk loader calls
/// `alloc` from its conversion worker while query threads call the lookup
/// methods.
pub trait NodeTable: Send + Sync {
    /// Get the id for a term, allocating one if the term is new
    fn alloc(&self, term: &Term) -> NodeId;

    /// Get the id for a term, or [`NodeId::DOES_NOT_EXIST`] if the term
    /// was never allocated
    fn lookup_id(&self, term: &Term) -> NodeId;

    /// Resolve an id back to its term; `None` for sentinels and ids never
    /// allocated by this table
    fn lookup_term(&self, id: NodeId) -> Option<Term>;

    /// Number of allocated terms
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct MemNodeTableInner {
    ids: FxHashMap<Term, NodeId>,
    terms: Vec<Term>,
}

/// In-memory node table
///
/// Ids are allocated densely from 0 in first-seen order. Lookup by id is an
/// O(1) slot read; lookup by term a hash probe.
#[derive(Default)]
pub struct MemNodeTable {
    inner: RwLock<MemNodeTableInner>,
}

impl MemNodeTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeTable for MemNodeTable {
    fn alloc(&self, term: &Term) -> NodeId {
        {
            let inner = self.inner.read();
            if let Some(&id) = inner.ids.get(term) {
                return id;
            }
        }
        let mut inner = self.inner.write();
        // Re-check: another writer may have won the race
        if let Some(&id) = inner.ids.get(term) {
            return id;
        }
        let id = NodeId::new(inner.terms.len() as u64);
        inner.terms.push(term.clone());
        inner.ids.insert(term.clone(), id);
        id
    }

    fn lookup_id(&self, term: &Term) -> NodeId {
        self.inner
            .read()
            .ids
            .get(term)
            .copied()
            .unwrap_or(NodeId::DOES_NOT_EXIST)
    }

    fn lookup_term(&self, id: NodeId) -> Option<Term> {
        if !id.is_concrete() {
            return None;
        }
        self.inner.read().terms.get(id.as_u64() as usize).cloned()
    }

    fn len(&self) -> usize {
        self.inner.read().terms.len()
    }
}
