//! Dataset storage - triple and quad tables over one shared node table
//!
//! [`DatasetStorage`] bundles the physical side of a dataset: a triple
//! [`TupleTable`], a quad [`TupleTable`], and the node table both resolve
//! terms through. The triple and quad code paths must share one node table
//! instance - ids allocated while loading triples have to mean the same
//! thing when a quad pattern probes them. A mismatch is a configuration
//! error caught here, before any data flows.

use crate::error::{CoreError, Result};
use crate::index::TupleTable;
use crate::node_table::NodeTable;
use std::sync::Arc;

/// Physical storage of one dataset
#[derive(Clone)]
pub struct DatasetStorage {
    node_table: Arc<dyn NodeTable>,
    triples: TupleTable,
    quads: TupleTable,
}

impl DatasetStorage {
    /// Bundle tables with their shared node table
    ///
    /// `triple_node_table` and `quad_node_table` are the handles each code
    /// path was configured with; they must be the same instance.
    pub fn new(
        triple_node_table: Arc<dyn NodeTable>,
        quad_node_table: Arc<dyn NodeTable>,
        triples: TupleTable,
        quads: TupleTable,
    ) -> Result<Self> {
        if !Arc::ptr_eq(&triple_node_table, &quad_node_table) {
            return Err(CoreError::MismatchedNodeTables);
        }
        if triples.arity() != 3 {
            return Err(CoreError::ArityMismatch {
                expected: 3,
                actual: triples.arity(),
            });
        }
        if quads.arity() != 4 {
            return Err(CoreError::ArityMismatch {
                expected: 4,
                actual: quads.arity(),
            });
        }
        Ok(DatasetStorage {
            node_table: triple_node_table,
            triples,
            quads,
        })
    }

    pub fn node_table(&self) -> &Arc<dyn NodeTable> {
        &self.node_table
    }

    pub fn triples(&self) -> &TupleTable {
        &self.triples
    }

    pub fn quads(&self) -> &TupleTable {
        &self.quads
    }

    /// Tuple table for a given arity
    pub fn table(&self, arity: usize) -> Result<&TupleTable> {
        match arity {
            3 => Ok(&self.triples),
            4 => Ok(&self.quads),
            other => Err(CoreError::ArityMismatch {
                expected: 3,
                actual: other,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{MemTupleIndex, TupleIndex};
    use crate::node_table::MemNodeTable;

    fn table(names: &[&str]) -> TupleTable {
        TupleTable::new(
            names
                .iter()
                .map(|n| Arc::new(MemTupleIndex::new(n).unwrap()) as Arc<dyn TupleIndex>)
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn mismatched_node_tables_rejected() {
        let a: Arc<dyn NodeTable> = Arc::new(MemNodeTable::new());
        let b: Arc<dyn NodeTable> = Arc::new(MemNodeTable::new());
        let err = DatasetStorage::new(a.clone(), b, table(&["SPO"]), table(&["GSPO"]));
        assert!(matches!(err, Err(CoreError::MismatchedNodeTables)));
        assert!(DatasetStorage::new(a.clone(), a, table(&["SPO"]), table(&["GSPO"])).is_ok());
    }
}
