//! Tuple indexes and tuple tables
//!
//! A [`TupleIndex`] stores fixed-arity identifier tuples sorted by one
//! column permutation, named after that permutation ("SPO", "POS", "SPOG",
//! "GSPO", ...). A [`TupleTable`] groups the same-arity indexes of a
//! dataset and picks the access path for a probe: the index whose key order
//! puts the most concrete probe slots first.
//!
//! The persistent B-tree implementation is a storage-engine concern; the
//! in-memory [`MemTupleIndex`] here implements the same contract over a
//! `BTreeSet` and is what the tests and small datasets run on.
//!
//! ## Ordering contract
//!
//! `find` yields matches in the index's key order. Union-graph duplicate
//! suppression in the solver relies on probing a quad index whose
//! permutation places the graph column last (e.g. "SPOG"), so that the same
//! triple in different graphs comes out adjacent.

use crate::error::{CoreError, Result};
use crate::node_id::NodeId;
use crate::tuple::Tuple;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A physical index over identifier tuples
///
/// Implementations must support one writer per thread during bulk load and
/// any number of concurrent readers otherwise.
pub trait TupleIndex: Send + Sync {
    /// Index name - its column permutation, e.g. "POS"
    fn name(&self) -> &str;

    /// Tuple arity (3 or 4)
    fn tuple_len(&self) -> usize;

    /// Insert a fully concrete tuple (idempotent)
    fn add(&self, tuple: Tuple) -> Result<()>;

    /// Find stored tuples matching a probe ([`NodeId::ANY`] slots are
    /// wildcards). Results are in this index's key order and in canonical
    /// slot order within each tuple.
    fn find(&self, probe: &Tuple) -> Box<dyn Iterator<Item = Tuple> + Send>;

    fn is_empty(&self) -> bool;

    /// Number of stored tuples
    fn len(&self) -> usize;
}

/// Parse an index name into a canonical-slot permutation
///
/// `perm[i]` is the canonical slot stored at key position `i`; "POS" gives
/// `[1, 2, 0]`.
fn parse_permutation(name: &str) -> Result<Vec<usize>> {
    let slots: &[(char, usize)] = match name.len() {
        3 => &[('S', 0), ('P', 1), ('O', 2)],
        4 => &[('G', 0), ('S', 1), ('P', 2), ('O', 3)],
        _ => return Err(CoreError::InvalidIndexName(name.to_string())),
    };
    let mut perm = Vec::with_capacity(name.len());
    for c in name.chars() {
        let slot = slots
            .iter()
            .find(|(ch, _)| *ch == c)
            .map(|(_, s)| *s)
            .ok_or_else(|| CoreError::InvalidIndexName(name.to_string()))?;
        if perm.contains(&slot) {
            return Err(CoreError::InvalidIndexName(name.to_string()));
        }
        perm.push(slot);
    }
    Ok(perm)
}

/// In-memory tuple index
///
/// Tuples are stored key-ordered (permuted) in a `BTreeSet` behind an
/// `RwLock`. `find` range-scans on the concrete key prefix and filters the
/// remaining slots.
pub struct MemTupleIndex {
    name: String,
    /// `perm[i]` = canonical slot at key position i
    perm: Vec<usize>,
    tuples: RwLock<BTreeSet<Vec<NodeId>>>,
}

impl MemTupleIndex {
    /// Create an index named after its column permutation
    pub fn new(name: &str) -> Result<Self> {
        let perm = parse_permutation(name)?;
        Ok(MemTupleIndex {
            name: name.to_string(),
            perm,
            tuples: RwLock::new(BTreeSet::new()),
        })
    }

    fn to_key(&self, tuple: &Tuple) -> Vec<NodeId> {
        self.perm.iter().map(|&slot| tuple.get(slot)).collect()
    }

    fn from_key(&self, key: &[NodeId]) -> Tuple {
        let mut ids = vec![NodeId::ANY; key.len()];
        for (pos, &slot) in self.perm.iter().enumerate() {
            ids[slot] = key[pos];
        }
        Tuple::from_ids(&ids).expect("key arity matches index arity")
    }
}

impl TupleIndex for MemTupleIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn tuple_len(&self) -> usize {
        self.perm.len()
    }

    fn add(&self, tuple: Tuple) -> Result<()> {
        if tuple.len() != self.perm.len() {
            return Err(CoreError::ArityMismatch {
                expected: self.perm.len(),
                actual: tuple.len(),
            });
        }
        debug_assert!(tuple.is_concrete(), "stored tuples must be concrete");
        let key = self.to_key(&tuple);
        self.tuples.write().insert(key);
        Ok(())
    }

    fn find(&self, probe: &Tuple) -> Box<dyn Iterator<Item = Tuple> + Send> {
        debug_assert_eq!(probe.len(), self.perm.len());
        let key_probe = self.to_key(probe);
        let prefix_len = key_probe
            .iter()
            .take_while(|id| id.is_concrete())
            .count();
        let prefix: Vec<NodeId> = key_probe[..prefix_len].to_vec();

        let guard = self.tuples.read();
        let matches: Vec<Tuple> = guard
            .range(prefix.clone()..)
            .take_while(|key| key[..prefix_len] == prefix[..])
            .filter(|key| {
                key_probe[prefix_len..]
                    .iter()
                    .zip(key[prefix_len..].iter())
                    .all(|(p, k)| p.is_any() || p == k)
            })
            .map(|key| self.from_key(key))
            .collect();
        Box::new(matches.into_iter())
    }

    fn is_empty(&self) -> bool {
        self.tuples.read().is_empty()
    }

    fn len(&self) -> usize {
        self.tuples.read().len()
    }
}

/// The same-arity indexes of a dataset, with access-path selection
///
/// The first index is the primary: the one the bulk loader fills in phase
/// one and replays to build the others.
#[derive(Clone)]
pub struct TupleTable {
    arity: usize,
    indexes: Vec<Arc<dyn TupleIndex>>,
}

impl TupleTable {
    /// Build a table over a non-empty set of same-arity indexes with
    /// unique names
    pub fn new(indexes: Vec<Arc<dyn TupleIndex>>) -> Result<Self> {
        let arity = indexes
            .first()
            .map(|ix| ix.tuple_len())
            .ok_or_else(|| CoreError::UnknownIndex("<empty tuple table>".to_string()))?;
        let mut seen = Vec::new();
        for ix in &indexes {
            if ix.tuple_len() != arity {
                return Err(CoreError::ArityMismatch {
                    expected: arity,
                    actual: ix.tuple_len(),
                });
            }
            if seen.contains(&ix.name()) {
                return Err(CoreError::DuplicateIndex(ix.name().to_string()));
            }
            seen.push(ix.name());
        }
        Ok(TupleTable { arity, indexes })
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn indexes(&self) -> &[Arc<dyn TupleIndex>] {
        &self.indexes
    }

    /// The primary index (first in declaration order)
    pub fn primary(&self) -> &Arc<dyn TupleIndex> {
        &self.indexes[0]
    }

    pub fn index_by_name(&self, name: &str) -> Result<&Arc<dyn TupleIndex>> {
        self.indexes
            .iter()
            .find(|ix| ix.name() == name)
            .ok_or_else(|| CoreError::UnknownIndex(name.to_string()))
    }

    /// Insert into every index of the table
    pub fn add(&self, tuple: Tuple) -> Result<()> {
        if tuple.len() != self.arity {
            return Err(CoreError::ArityMismatch {
                expected: self.arity,
                actual: tuple.len(),
            });
        }
        for ix in &self.indexes {
            ix.add(tuple.clone())?;
        }
        Ok(())
    }

    /// Find matches for a probe via the best access path
    ///
    /// Picks the index whose key order gives the longest concrete prefix
    /// for this probe. Ties go to declaration order, so the primary wins
    /// for fully-wildcard scans.
    pub fn find(&self, probe: &Tuple) -> Box<dyn Iterator<Item = Tuple> + Send> {
        self.choose_index(probe).find(probe)
    }

    fn choose_index(&self, probe: &Tuple) -> &Arc<dyn TupleIndex> {
        let mut best = &self.indexes[0];
        let mut best_prefix = 0usize;
        for ix in &self.indexes {
            let prefix = ix
                .name()
                .chars()
                .take_while(|&c| {
                    let slot = canonical_slot(c, self.arity);
                    probe.get(slot).is_concrete()
                })
                .count();
            if prefix > best_prefix {
                best = ix;
                best_prefix = prefix;
            }
        }
        best
    }

    pub fn is_empty(&self) -> bool {
        self.primary().is_empty()
    }

    pub fn len(&self) -> usize {
        self.primary().len()
    }
}

fn canonical_slot(c: char, arity: usize) -> usize {
    match (arity, c) {
        (3, 'S') => 0,
        (3, 'P') => 1,
        (3, 'O') => 2,
        (4, 'G') => 0,
        (4, 'S') => 1,
        (4, 'P') => 2,
        (4, 'O') => 3,
        _ => unreachable!("index names are validated at construction"),
    }
}
