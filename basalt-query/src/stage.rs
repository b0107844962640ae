//! Stage generation - evaluating a basic graph pattern against storage
//!
//! The [`StageGenerator`] is the extension seam between the executor and
//! whatever storage is active: a conjunction of triple patterns plus an
//! incoming binding stream becomes a stream of extended bindings. The
//! identifier-level implementation lives in [`solver`](crate::solver);
//! the [`GenericStageGenerator`] here works over any term-level
//! [`TermGraphSource`] and is the reference semantics the storage-specific
//! generators must agree with.
//!
//! Pattern order matters for cost, not correctness: a pluggable
//! [`ReorderTransform`] runs before evaluation.

use crate::algebra::{BasicPattern, GraphName, PatternNode, TriplePattern, Var};
use crate::binding::Binding;
use crate::error::Result;
use crate::exec::ExecContext;
use crate::iter::{Abortable, BindingIter};
use basalt_core::Term;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Storage seam for basic graph patterns
pub trait StageGenerator: Send + Sync {
    /// Evaluate `pattern` with `input` as the substitution source, under
    /// the context's active graph
    fn execute(
        &self,
        pattern: &BasicPattern,
        input: BindingIter,
        ctx: &ExecContext,
    ) -> Result<BindingIter>;

    /// The named graphs of the dataset this generator fronts; the GRAPH
    /// operator with a variable graph name iterates these
    fn graph_names(&self) -> Vec<Term>;
}

/// Pattern reordering before evaluation
pub trait ReorderTransform: Send + Sync {
    fn reorder(&self, patterns: &[TriplePattern]) -> Vec<TriplePattern>;
}

/// Fixed-weight reordering: more concrete slots first, subjects weighted
/// above objects, stable for ties
pub struct ReorderFixed;

impl ReorderTransform for ReorderFixed {
    fn reorder(&self, patterns: &[TriplePattern]) -> Vec<TriplePattern> {
        let weight = |p: &TriplePattern| {
            let concrete = |n: &PatternNode, w: i32| match n {
                PatternNode::Term(_) => w,
                PatternNode::Var(_) => 0,
            };
            // Higher is more selective
            concrete(&p.subject, 4) + concrete(&p.predicate, 1) + concrete(&p.object, 2)
        };
        let mut out: Vec<(i32, usize, TriplePattern)> = patterns
            .iter()
            .enumerate()
            .map(|(i, p)| (weight(p), i, p.clone()))
            .collect();
        out.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        out.into_iter().map(|(_, _, p)| p).collect()
    }
}

/// Identity reordering (evaluate patterns as written)
pub struct ReorderNone;

impl ReorderTransform for ReorderNone {
    fn reorder(&self, patterns: &[TriplePattern]) -> Vec<TriplePattern> {
        patterns.to_vec()
    }
}

/// Term-level view of a dataset for the generic generator
pub trait TermGraphSource: Send + Sync {
    /// Find triples in the given graph matching the concrete slots
    /// (`None` = wildcard). `GraphName::Union` means the RDF merge of all
    /// named graphs, deduplicated.
    fn find(
        &self,
        graph: &GraphName,
        s: Option<&Term>,
        p: Option<&Term>,
        o: Option<&Term>,
    ) -> Vec<[Term; 3]>;

    fn graph_names(&self) -> Vec<Term>;
}

/// Generic term-level stage generator
///
/// Evaluates triple-by-triple against the input, each triple narrowing the
/// binding stream by a storage probe. Reference implementation for
/// generator-independence: substituting another generator must not change
/// the final binding set.
pub struct GenericStageGenerator {
    source: Arc<dyn TermGraphSource>,
    reorder: Arc<dyn ReorderTransform>,
}

impl GenericStageGenerator {
    pub fn new(source: Arc<dyn TermGraphSource>) -> Self {
        GenericStageGenerator {
            source,
            reorder: Arc::new(ReorderFixed),
        }
    }

    pub fn with_reorder(
        source: Arc<dyn TermGraphSource>,
        reorder: Arc<dyn ReorderTransform>,
    ) -> Self {
        GenericStageGenerator { source, reorder }
    }
}

/// Match one triple pattern for one solution
fn match_one(
    source: &Arc<dyn TermGraphSource>,
    graph: &GraphName,
    pattern: &TriplePattern,
    binding: &Binding,
) -> Vec<Binding> {
    let resolve = |node: &PatternNode| -> Option<Term> {
        match node {
            PatternNode::Term(t) => Some(t.clone()),
            PatternNode::Var(v) => binding.get(v).cloned(),
        }
    };
    let s = resolve(&pattern.subject);
    let p = resolve(&pattern.predicate);
    let o = resolve(&pattern.object);

    source
        .find(graph, s.as_ref(), p.as_ref(), o.as_ref())
        .into_iter()
        .filter_map(|[ts, tp, to]| {
            let mut out = binding.clone();
            for (node, actual) in pattern.slots().into_iter().zip([ts, tp, to]) {
                if let PatternNode::Var(v) = node {
                    match out.get(v) {
                        Some(existing) if *existing != actual => return None,
                        Some(_) => {}
                        None => out = out.extended(v.clone(), actual),
                    }
                }
            }
            Some(out)
        })
        .collect()
}

impl StageGenerator for GenericStageGenerator {
    fn execute(
        &self,
        pattern: &BasicPattern,
        input: BindingIter,
        ctx: &ExecContext,
    ) -> Result<BindingIter> {
        let ordered = self.reorder.reorder(&pattern.patterns);
        let graph = ctx.active_graph().clone();
        let mut chain: BindingIter = input;
        for triple in ordered {
            let source = Arc::clone(&self.source);
            let graph = graph.clone();
            let stage = chain.flat_map(move |binding| -> Vec<Result<Binding>> {
                match binding {
                    Ok(b) => match_one(&source, &graph, &triple, &b)
                        .into_iter()
                        .map(Ok)
                        .collect(),
                    Err(e) => vec![Err(e)],
                }
            });
            chain = Box::new(Abortable::new(stage, ctx.abort().clone()));
        }
        Ok(chain)
    }

    fn graph_names(&self) -> Vec<Term> {
        self.source.graph_names()
    }
}

/// Simple in-memory term graph, for tests and small datasets
#[derive(Default)]
pub struct MemTermGraph {
    /// `None` = default graph
    graphs: FxHashMap<Option<Term>, Vec<[Term; 3]>>,
}

impl MemTermGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_triple(&mut self, s: Term, p: Term, o: Term) {
        self.graphs.entry(None).or_default().push([s, p, o]);
    }

    pub fn insert_quad(&mut self, g: Term, s: Term, p: Term, o: Term) {
        self.graphs.entry(Some(g)).or_default().push([s, p, o]);
    }
}

impl TermGraphSource for MemTermGraph {
    fn find(
        &self,
        graph: &GraphName,
        s: Option<&Term>,
        p: Option<&Term>,
        o: Option<&Term>,
    ) -> Vec<[Term; 3]> {
        let matches = |t: &[Term; 3]| {
            s.map_or(true, |s| *s == t[0])
                && p.map_or(true, |p| *p == t[1])
                && o.map_or(true, |o| *o == t[2])
        };
        match graph {
            GraphName::Default => self
                .graphs
                .get(&None)
                .map(|v| v.iter().filter(|t| matches(t)).cloned().collect())
                .unwrap_or_default(),
            GraphName::Named(name) => self
                .graphs
                .get(&Some(name.clone()))
                .map(|v| v.iter().filter(|t| matches(t)).cloned().collect())
                .unwrap_or_default(),
            GraphName::Union => {
                // RDF merge: the same triple in two graphs appears once
                let mut out: Vec<[Term; 3]> = Vec::new();
                for (name, triples) in &self.graphs {
                    if name.is_none() {
                        continue;
                    }
                    for t in triples.iter().filter(|t| matches(t)) {
                        if !out.contains(t) {
                            out.push(t.clone());
                        }
                    }
                }
                out
            }
            GraphName::Var(_) => Vec::new(),
        }
    }

    fn graph_names(&self) -> Vec<Term> {
        let mut names: Vec<Term> = self.graphs.keys().flatten().cloned().collect();
        names.sort();
        names
    }
}
