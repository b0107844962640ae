//! Cross-generator and cancellation behavior of the full engine

use basalt_core::{
    DatasetStorage, MemNodeTable, MemTupleIndex, NodeTable, Term, Tuple, TupleIndex, TupleTable,
};
use basalt_query::algebra::{BasicPattern, Expr, Op, PatternNode, TriplePattern};
use basalt_query::binding::Binding;
use basalt_query::iter::AbortSignal;
use basalt_query::stage::{GenericStageGenerator, MemTermGraph};
use basalt_query::{ExecContext, OpExecutor, QueryError, StorageStageGenerator, Var};
use std::sync::Arc;

fn v(name: &str) -> Var {
    Var::new(name)
}

fn iri(local: &str) -> Term {
    Term::iri(format!("http://ex/{local}"))
}

fn node(text: &str) -> PatternNode {
    if let Some(name) = text.strip_prefix('?') {
        PatternNode::var(name)
    } else {
        PatternNode::term(iri(text))
    }
}

fn bgp(patterns: &[(&str, &str, &str)]) -> Op {
    Op::Bgp(BasicPattern::new(
        patterns
            .iter()
            .map(|(s, p, o)| TriplePattern::new(node(s), node(p), node(o)))
            .collect(),
    ))
}

fn table(names: &[&str]) -> TupleTable {
    TupleTable::new(
        names
            .iter()
            .map(|n| Arc::new(MemTupleIndex::new(n).unwrap()) as Arc<dyn TupleIndex>)
            .collect(),
    )
    .unwrap()
}

/// Small social graph loaded into both generator backends
fn fixture() -> (MemTermGraph, Arc<DatasetStorage>) {
    let data: Vec<[Term; 3]> = vec![
        [iri("alice"), iri("knows"), iri("bob")],
        [iri("alice"), iri("knows"), iri("carol")],
        [iri("bob"), iri("knows"), iri("carol")],
        [iri("carol"), iri("knows"), iri("dave")],
        [iri("alice"), iri("age"), Term::integer(42)],
        [iri("bob"), iri("age"), Term::integer(17)],
        [iri("dave"), iri("age"), Term::integer(30)],
    ];

    let mut graph = MemTermGraph::new();
    for [s, p, o] in &data {
        graph.insert_triple(s.clone(), p.clone(), o.clone());
    }

    let nt: Arc<dyn NodeTable> = Arc::new(MemNodeTable::new());
    let ds = Arc::new(
        DatasetStorage::new(
            Arc::clone(&nt),
            nt,
            table(&["SPO", "POS", "OSP"]),
            table(&["GSPO", "SPOG"]),
        )
        .unwrap(),
    );
    for [s, p, o] in &data {
        let nt = ds.node_table();
        ds.triples()
            .add(Tuple::triple(nt.alloc(s), nt.alloc(p), nt.alloc(o)))
            .unwrap();
    }
    (graph, ds)
}

fn run(op: &Op, ctx: &ExecContext) -> Vec<Binding> {
    let mut rows: Vec<Binding> = OpExecutor::execute(op, ctx)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    rows.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));
    rows
}

#[test]
fn generators_agree_on_join_free_trees() {
    let (graph, ds) = fixture();
    let generic = ExecContext::new(Arc::new(GenericStageGenerator::new(Arc::new(graph))));
    let storage = ExecContext::new(Arc::new(StorageStageGenerator::new(ds)));

    let trees = vec![
        bgp(&[("?x", "knows", "?y"), ("?y", "knows", "?z")]),
        Op::filter(
            vec![Expr::Gt(
                Box::new(Expr::Var(v("a"))),
                Box::new(Expr::Const(Term::integer(20))),
            )],
            bgp(&[("?x", "age", "?a")]),
        ),
        Op::union(bgp(&[("alice", "knows", "?y")]), bgp(&[("?y", "age", "?a")])),
        Op::distinct(Op::project(bgp(&[("?x", "knows", "?y")]), vec![v("x")])),
        Op::minus(bgp(&[("?x", "knows", "?y")]), bgp(&[("?x", "age", "?a")])),
        Op::slice(bgp(&[("?x", "knows", "?y")]), 1, Some(2)),
    ];
    for tree in &trees {
        assert_eq!(run(tree, &generic), run(tree, &storage), "tree {tree:?}");
    }
}

#[test]
fn union_multisets_agree_across_generators() {
    let (graph, ds) = fixture();
    let generic = ExecContext::new(Arc::new(GenericStageGenerator::new(Arc::new(graph))));
    let storage = ExecContext::new(Arc::new(StorageStageGenerator::new(ds)));

    let a = bgp(&[("?x", "knows", "?y")]);
    let b = bgp(&[("?x", "age", "?a")]);
    let c = bgp(&[("carol", "knows", "?y")]);
    let left = Op::union(Op::union(a.clone(), b.clone()), c.clone());
    let right = Op::union(a, Op::union(b, c));

    assert_eq!(run(&left, &generic), run(&right, &generic));
    assert_eq!(run(&left, &storage), run(&right, &storage));
}

#[test]
fn id_bindings_survive_materialization() {
    let (_, ds) = fixture();
    let ctx = ExecContext::new(Arc::new(StorageStageGenerator::new(Arc::clone(&ds))));

    let rows = run(&bgp(&[("?x", "knows", "?y")]), &ctx);
    assert!(!rows.is_empty());
    // Looking the terms back up yields concrete, stable identifiers
    let nt = ds.node_table();
    for row in rows {
        for (_, term) in row.iter() {
            let id = nt.lookup_id(term);
            assert!(id.is_concrete());
            assert_eq!(nt.lookup_term(id).as_ref(), Some(term));
        }
    }
}

#[test]
fn abort_from_another_thread_cancels_the_stream() {
    // Cyclic synthetic graph: the unconstrained self-join has 200 * 200 results
    let nt: Arc<dyn NodeTable> = Arc::new(MemNodeTable::new());
    let ds = Arc::new(
        DatasetStorage::new(
            Arc::clone(&nt),
            nt,
            table(&["SPO", "POS", "OSP"]),
            table(&["GSPO"]),
        )
        .unwrap(),
    );
    for i in 0..200u64 {
        let nt = ds.node_table();
        ds.triples()
            .add(Tuple::triple(
                nt.alloc(&iri(&format!("n{i}"))),
                nt.alloc(&iri("p")),
                nt.alloc(&iri(&format!("n{}", (i + 1) % 200))),
            ))
            .unwrap();
    }

    let signal = AbortSignal::new();
    let ctx = ExecContext::new(Arc::new(StorageStageGenerator::new(ds)))
        .with_abort(signal.clone());
    let op = bgp(&[("?a", "p", "?b"), ("?c", "p", "?d")]);
    let mut stream = OpExecutor::execute(&op, &ctx).unwrap();

    for _ in 0..10 {
        assert!(stream.next().unwrap().is_ok());
    }

    let handle = std::thread::spawn(move || signal.abort());
    handle.join().unwrap();

    match stream.next() {
        Some(Err(QueryError::Cancelled)) => {}
        other => panic!("expected cancellation, got {other:?}"),
    }
    // Terminal: the stream stays closed
    assert!(stream.next().is_none());
}
