//! Identifier-level pattern solver over dataset storage
//!
//! [`StorageStageGenerator`] is the storage-backed counterpart to the
//! term-level generator: patterns are translated to [`NodeId`] probes once
//! per incoming solution and matched against the dataset's tuple indexes,
//! and only final results are materialized back to terms. Intermediate
//! solutions stay identifier-level [`IdBinding`] chains, so a stage extends
//! the incoming chain instead of copying it.
//!
//! ## Constant terms absent from the node table
//!
//! A pattern constant (or an incoming bound value) that the node table has
//! never seen maps to [`NodeId::DOES_NOT_EXIST`]; the stage yields nothing
//! for that solution without touching an index.
//!
//! ## Union graph matching
//!
//! Under the union graph, quads are probed with a wildcard graph slot and
//! results are collapsed to distinct triples. That collapse is a cheap
//! adjacent-duplicate filter: the access path chosen for a wildcard graph
//! slot keys the graph column last (e.g. "SPOG"), so the same triple
//! asserted in several graphs comes out adjacent.

use crate::algebra::{BasicPattern, GraphName, PatternNode, TriplePattern, Var};
use crate::binding::IdBinding;
use crate::error::Result;
use crate::exec::ExecContext;
use crate::iter::{Abortable, BindingIter};
use crate::stage::{ReorderFixed, ReorderTransform, StageGenerator};
use basalt_core::{DatasetStorage, NodeId, NodeTable, Term, Tuple, TupleTable};
use rustc_hash::FxHashSet;
use std::sync::Arc;

type IdIter = Box<dyn Iterator<Item = Result<Arc<IdBinding>>> + Send>;

/// Caller-supplied per-tuple predicate, applied to every matched tuple
/// after the index probe and before variables are bound from it
///
/// The tuple seen is always pattern-shaped: under a named or union graph
/// the graph slot has already been dropped. Rejected tuples simply never
/// become solutions.
pub type TupleFilter = Arc<dyn Fn(&Tuple) -> bool + Send + Sync>;

/// Where a pattern's tuples come from, resolved from the active graph once
/// per basic pattern
#[derive(Clone, Copy, PartialEq, Eq)]
enum MatchTarget {
    /// The default graph: the triple table
    Triples,
    /// One named graph: the quad table with a fixed graph id
    Graph(NodeId),
    /// The union of all named graphs: the quad table with a wildcard graph
    /// slot, collapsed to distinct triples
    Union,
}

/// Stage generator backed by [`DatasetStorage`]
pub struct StorageStageGenerator {
    dataset: Arc<DatasetStorage>,
    reorder: Arc<dyn ReorderTransform>,
    filter: Option<TupleFilter>,
}

impl StorageStageGenerator {
    pub fn new(dataset: Arc<DatasetStorage>) -> Self {
        StorageStageGenerator {
            dataset,
            reorder: Arc::new(ReorderFixed),
            filter: None,
        }
    }

    pub fn with_reorder(dataset: Arc<DatasetStorage>, reorder: Arc<dyn ReorderTransform>) -> Self {
        StorageStageGenerator {
            dataset,
            reorder,
            filter: None,
        }
    }

    /// Install a per-tuple filter applied by every pattern stage
    pub fn with_filter(mut self, filter: TupleFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    fn resolve_target(&self, graph: &GraphName) -> Option<MatchTarget> {
        match graph {
            GraphName::Default => Some(MatchTarget::Triples),
            GraphName::Union => Some(MatchTarget::Union),
            GraphName::Named(term) => {
                let id = self.dataset.node_table().lookup_id(term);
                if id.is_concrete() {
                    Some(MatchTarget::Graph(id))
                } else {
                    // Graph name never allocated: nothing can match
                    None
                }
            }
            // A variable graph name is expanded by the GRAPH operator
            // before patterns reach the solver
            GraphName::Var(_) => None,
        }
    }
}

impl StageGenerator for StorageStageGenerator {
    fn execute(
        &self,
        pattern: &BasicPattern,
        input: BindingIter,
        ctx: &ExecContext,
    ) -> Result<BindingIter> {
        let target = match self.resolve_target(ctx.active_graph()) {
            Some(t) => t,
            None => {
                drop(input);
                return Ok(crate::iter::empty_iter());
            }
        };
        let patterns = self.reorder.reorder(&pattern.patterns);
        tracing::debug!(patterns = patterns.len(), "solver stage chain");

        let table = Arc::clone(self.dataset.node_table());
        let mut chain: IdIter = {
            let table = Arc::clone(&table);
            Box::new(input.map(move |b| {
                b.map(|b| Arc::new(IdBinding::from_binding(b, table.as_ref())))
            }))
        };
        for tp in patterns {
            let stage = PatternStage {
                dataset: Arc::clone(&self.dataset),
                pattern: tp,
                target,
                filter: self.filter.clone(),
            };
            let flat = chain.flat_map(move |idb| -> IdIter {
                match idb {
                    Ok(idb) => stage.matches(&idb),
                    Err(e) => Box::new(std::iter::once(Err(e))),
                }
            });
            chain = Box::new(Abortable::new(flat, ctx.abort().clone()));
        }

        Ok(Box::new(chain.map(move |idb| {
            idb.map(|idb| idb.materialize(table.as_ref()))
        })))
    }

    fn graph_names(&self) -> Vec<Term> {
        // Distinct graph ids come straight off a graph-major index scan
        let mut names = Vec::new();
        let mut last = NodeId::ANY;
        let table = self.dataset.node_table();
        for tuple in self.dataset.quads().find(&Tuple::all_wildcard(4)) {
            let g = tuple.get(0);
            if g == last {
                continue;
            }
            last = g;
            if let Some(term) = table.lookup_term(g) {
                if !names.contains(&term) {
                    names.push(term);
                }
            }
        }
        names.sort();
        names
    }
}

/// One triple pattern matched against one target, per incoming solution
struct PatternStage {
    dataset: Arc<DatasetStorage>,
    pattern: TriplePattern,
    target: MatchTarget,
    filter: Option<TupleFilter>,
}

/// A pattern slot after substitution
enum Slot {
    Concrete(NodeId),
    /// Free variable, to be bound from the matched tuple
    Free(Var),
    /// The solution binds the variable to a term the node table has never
    /// seen; the probe cannot match
    Missing,
}

impl PatternStage {
    fn matches(&self, idb: &Arc<IdBinding>) -> IdIter {
        let slots: Vec<Slot> = self
            .pattern
            .slots()
            .iter()
            .map(|node| self.resolve(node, idb))
            .collect();
        if slots.iter().any(|s| matches!(s, Slot::Missing)) {
            return Box::new(std::iter::empty());
        }

        let probe_ids: Vec<NodeId> = slots
            .iter()
            .map(|s| match s {
                Slot::Concrete(id) => *id,
                _ => NodeId::ANY,
            })
            .collect();

        let found: Box<dyn Iterator<Item = Tuple> + Send> = match self.target {
            MatchTarget::Triples => self
                .table()
                .find(&Tuple::triple(probe_ids[0], probe_ids[1], probe_ids[2])),
            MatchTarget::Graph(g) => {
                let quads = self
                    .table()
                    .find(&Tuple::quad(g, probe_ids[0], probe_ids[1], probe_ids[2]));
                Box::new(quads.map(drop_graph_slot))
            }
            MatchTarget::Union => {
                let probe =
                    Tuple::quad(NodeId::ANY, probe_ids[0], probe_ids[1], probe_ids[2]);
                union_scan(self.dataset.quads(), &probe)
            }
        };

        let found: Box<dyn Iterator<Item = Tuple> + Send> = match &self.filter {
            Some(f) => {
                let f = Arc::clone(f);
                Box::new(found.filter(move |tuple| f(tuple)))
            }
            None => found,
        };

        let free: Vec<(usize, Var)> = slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| match s {
                Slot::Free(v) => Some((i, v.clone())),
                _ => None,
            })
            .collect();

        let idb = Arc::clone(idb);
        Box::new(found.filter_map(move |tuple| {
            let mut bound: Vec<(Var, NodeId)> = Vec::with_capacity(free.len());
            for (slot, var) in &free {
                let id = tuple.get(*slot);
                // A variable repeated within the pattern must match the
                // same id in every slot
                match bound.iter().find(|(v, _)| v == var) {
                    Some((_, prev)) if *prev != id => return None,
                    Some(_) => {}
                    None => bound.push((var.clone(), id)),
                }
            }
            Some(Ok(Arc::new(idb.extend(bound))))
        }))
    }

    fn table(&self) -> &TupleTable {
        match self.target {
            MatchTarget::Triples => self.dataset.triples(),
            MatchTarget::Graph(_) | MatchTarget::Union => self.dataset.quads(),
        }
    }

    fn resolve(&self, node: &PatternNode, idb: &IdBinding) -> Slot {
        match node {
            PatternNode::Term(term) => {
                let id = self.dataset.node_table().lookup_id(term);
                if id.is_concrete() {
                    Slot::Concrete(id)
                } else {
                    Slot::Missing
                }
            }
            PatternNode::Var(var) => match idb.get(var) {
                Some(id) => Slot::Concrete(id),
                // Bound in the enclosing solution but absent from the node
                // table: the id-level chain filtered it at the root
                None if idb.enclosing().contains(var) => Slot::Missing,
                None => Slot::Free(var.clone()),
            },
        }
    }
}

fn drop_graph_slot(quad: Tuple) -> Tuple {
    Tuple::triple(quad.get(1), quad.get(2), quad.get(3))
}

/// Scan the quad table with a wildcard graph slot and collapse to distinct
/// triples
///
/// Prefers an index keyed with the graph column last so the collapse is an
/// adjacent-duplicate filter. Without such an index it falls back to a
/// seen-set, which buffers every distinct triple of the scan.
fn union_scan(
    quads: &TupleTable,
    probe: &Tuple,
) -> Box<dyn Iterator<Item = Tuple> + Send> {
    let best = quads
        .indexes()
        .iter()
        .filter(|ix| ix.name().ends_with('G'))
        .max_by_key(|ix| {
            ix.name()
                .chars()
                .take_while(|&c| {
                    let slot = match c {
                        'G' => 0,
                        'S' => 1,
                        'P' => 2,
                        'O' => 3,
                        _ => unreachable!("index names are validated at construction"),
                    };
                    probe.get(slot).is_concrete()
                })
                .count()
        });
    match best {
        Some(ix) => {
            let mut last: Option<Tuple> = None;
            Box::new(ix.find(probe).map(drop_graph_slot).filter(move |t| {
                if last.as_ref() == Some(t) {
                    false
                } else {
                    last = Some(t.clone());
                    true
                }
            }))
        }
        None => {
            let mut seen: FxHashSet<Tuple> = FxHashSet::default();
            Box::new(
                quads
                    .find(probe)
                    .map(drop_graph_slot)
                    .filter(move |t| seen.insert(t.clone())),
            )
        }
    }
}
