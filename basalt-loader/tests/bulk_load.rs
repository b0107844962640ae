//! End-to-end bulk load across all topologies

use basalt_core::{
    DatasetStorage, MemNodeTable, MemTupleIndex, NodeTable, Tuple, TupleIndex, TupleTable,
    TxnCoordinator,
};
use basalt_loader::{exec_loader, LoaderPlan, LoaderTopology, Statement};
use std::sync::Arc;

fn table(names: &[&str]) -> TupleTable {
    TupleTable::new(
        names
            .iter()
            .map(|n| Arc::new(MemTupleIndex::new(n).unwrap()) as Arc<dyn TupleIndex>)
            .collect(),
    )
    .unwrap()
}

fn dataset() -> Arc<DatasetStorage> {
    let nt: Arc<dyn NodeTable> = Arc::new(MemNodeTable::new());
    Arc::new(
        DatasetStorage::new(
            Arc::clone(&nt),
            nt,
            table(&["SPO", "POS", "OSP"]),
            table(&["GSPO", "GPOS", "SPOG"]),
        )
        .unwrap(),
    )
}

fn iri(text: String) -> basalt_core::Term {
    basalt_core::Term::iri(text)
}

/// 250,000 distinct triples: 500 subjects x 10 predicates x 50 objects
fn triples_250k() -> impl Iterator<Item = Statement> {
    (0..250_000usize).map(|i| {
        let s = i / 500;
        let p = (i / 50) % 10;
        let o = i % 50;
        Statement::Triple([
            iri(format!("http://ex/s{s}")),
            iri(format!("http://ex/p{p}")),
            iri(format!("http://ex/o{}-{p}-{s}", o)),
        ])
    })
}

fn plan_two_secondary_phases() -> LoaderPlan {
    LoaderPlan {
        primary_triples: vec!["SPO".to_string()],
        primary_quads: vec!["GSPO".to_string()],
        secondary_triples: vec![vec!["POS".to_string()], vec!["OSP".to_string()]],
        secondary_quads: vec![vec!["GPOS".to_string(), "SPOG".to_string()]],
    }
}

fn assert_all_triple_indexes(ds: &DatasetStorage, expected: usize) {
    for name in ["SPO", "POS", "OSP"] {
        let ix = ds.triples().index_by_name(name).unwrap();
        assert_eq!(ix.len(), expected, "count of {name}");
        assert_eq!(
            ix.find(&Tuple::all_wildcard(3)).count(),
            expected,
            "full scan of {name}"
        );
    }
}

#[test]
fn parallel_load_of_250k_triples_builds_three_indexes() {
    let ds = dataset();
    let coord = TxnCoordinator::new();
    let stats = exec_loader(
        &plan_two_secondary_phases(),
        LoaderTopology::Parallel,
        &ds,
        &coord,
        triples_250k(),
    )
    .unwrap();

    assert_eq!(stats.triples, 250_000);
    assert_eq!(stats.quads, 0);
    assert_all_triple_indexes(&ds, 250_000);
}

#[test]
fn partially_parallel_load_matches() {
    let ds = dataset();
    let coord = TxnCoordinator::new();
    exec_loader(
        &plan_two_secondary_phases(),
        LoaderTopology::PartiallyParallel,
        &ds,
        &coord,
        triples_250k(),
    )
    .unwrap();
    assert_all_triple_indexes(&ds, 250_000);
}

#[test]
fn inline_load_matches() {
    let ds = dataset();
    let coord = TxnCoordinator::new();
    exec_loader(
        &plan_two_secondary_phases(),
        LoaderTopology::Inline,
        &ds,
        &coord,
        triples_250k(),
    )
    .unwrap();
    assert_all_triple_indexes(&ds, 250_000);
}

#[test]
fn input_order_and_duplicates_do_not_change_the_indexes() {
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    // 10,000 distinct triples, each fed twice, in random order
    let mut input: Vec<Statement> = (0..20_000usize)
        .map(|i| {
            let i = i % 10_000;
            Statement::Triple([
                iri(format!("http://ex/s{}", i / 100)),
                iri(format!("http://ex/p{}", i % 7)),
                iri(format!("http://ex/o{i}")),
            ])
        })
        .collect();
    input.shuffle(&mut rand::rngs::StdRng::seed_from_u64(7));

    let ds = dataset();
    let coord = TxnCoordinator::new();
    let stats = exec_loader(
        &plan_two_secondary_phases(),
        LoaderTopology::Parallel,
        &ds,
        &coord,
        input,
    )
    .unwrap();

    // Statements are counted as fed; the indexes hold the distinct set
    assert_eq!(stats.triples, 20_000);
    assert_all_triple_indexes(&ds, 10_000);
}

#[test]
fn quads_replay_into_their_secondary_group() {
    let ds = dataset();
    let coord = TxnCoordinator::new();
    let input = (0..1_000usize).map(|i| {
        Statement::Quad([
            iri(format!("http://ex/g{}", i % 4)),
            iri(format!("http://ex/s{}", i % 100)),
            iri("http://ex/p".to_string()),
            iri(format!("http://ex/o{i}")),
        ])
    });
    let stats = exec_loader(
        &plan_two_secondary_phases(),
        LoaderTopology::Parallel,
        &ds,
        &coord,
        input,
    )
    .unwrap();

    assert_eq!(stats.quads, 1_000);
    for name in ["GSPO", "GPOS", "SPOG"] {
        assert_eq!(ds.quads().index_by_name(name).unwrap().len(), 1_000, "{name}");
    }
}

#[test]
fn normal_transactions_resume_after_load() {
    let ds = dataset();
    let coord = TxnCoordinator::new();
    exec_loader(
        &LoaderPlan::default_for(&ds),
        LoaderTopology::Parallel,
        &ds,
        &coord,
        (0..100usize).map(|i| {
            Statement::Triple([
                iri(format!("http://ex/s{i}")),
                iri("http://ex/p".to_string()),
                iri(format!("http://ex/o{i}")),
            ])
        }),
    )
    .unwrap();

    // Exclusive mode was released: a write transaction begins immediately
    let txn = coord.begin(basalt_core::TxnMode::Write).unwrap();
    txn.commit().unwrap();
}
