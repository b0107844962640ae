//! Load orchestration - phases, topology, exclusive mode
//!
//! [`exec_loader`] runs a complete bulk load: validate the plan, enter the
//! coordinator's exclusive mode, run the primary phase under the selected
//! topology, then replay the primary index through one [`Indexer`]
//! sub-pipeline per secondary group. The exclusive-mode guard releases on
//! drop, so a failing phase cannot leave the coordinator wedged.
//!
//! Phases commit independently: a failure in a secondary phase leaves the
//! primary phase's indexes committed and intact.

use crate::batcher::{BlockSink, DataBatcher, DataBlock, DEFAULT_CHUNK_SIZE};
use crate::error::{LoaderError, Result};
use crate::indexer::{Indexer, IndexerInline, QUEUE_DEPTH};
use crate::plan::LoaderPlan;
use crate::tuples::{fan_out, ConversionCounts, DataToTuples, DataToTuplesInline};
use basalt_core::{DatasetStorage, Term, Tuple, TupleTable, TxnCoordinator};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;

/// One parsed input statement
#[derive(Debug, Clone)]
pub enum Statement {
    Triple([Term; 3]),
    Quad([Term; 4]),
}

/// Threading layout of the primary phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderTopology {
    /// Conversion worker thread plus one thread per index
    Parallel,
    /// Conversion on the caller's thread, one thread per index
    PartiallyParallel,
    /// Everything on the caller's thread
    Inline,
}

/// What a finished load did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoaderStats {
    /// Triples converted in the primary phase
    pub triples: u64,
    /// Quads converted in the primary phase
    pub quads: u64,
    /// Tuple insertions across all indexes and phases
    pub indexed: u64,
}

/// Run a complete bulk load
///
/// Holds the coordinator's exclusive mode for the duration; every worker
/// transaction it spawns is `Bulk`.
pub fn exec_loader(
    plan: &LoaderPlan,
    topology: LoaderTopology,
    dataset: &Arc<DatasetStorage>,
    coordinator: &Arc<TxnCoordinator>,
    statements: impl IntoIterator<Item = Statement>,
) -> Result<LoaderStats> {
    plan.validate(dataset)?;
    let _exclusive = coordinator.exclusive_mode();
    tracing::info!(?topology, "bulk load starting");

    let (counts, mut indexed) = match topology {
        LoaderTopology::Parallel => primary_parallel(plan, dataset, coordinator, statements)?,
        LoaderTopology::PartiallyParallel => {
            primary_partial(plan, dataset, coordinator, statements)?
        }
        LoaderTopology::Inline => primary_inline(plan, dataset, coordinator, statements)?,
    };
    tracing::info!(
        triples = counts.triples,
        quads = counts.quads,
        "primary phase complete"
    );

    let inline = topology == LoaderTopology::Inline;
    if counts.triples > 0 && !plan.is_empty_for(3) {
        for group in &plan.secondary_triples {
            indexed += replay_phase(
                dataset.triples(),
                &plan.primary_triples[0],
                group,
                coordinator,
                inline,
            )?;
        }
    }
    if counts.quads > 0 && !plan.is_empty_for(4) {
        for group in &plan.secondary_quads {
            indexed += replay_phase(
                dataset.quads(),
                &plan.primary_quads[0],
                group,
                coordinator,
                inline,
            )?;
        }
    }

    let stats = LoaderStats {
        triples: counts.triples,
        quads: counts.quads,
        indexed,
    };
    tracing::info!(?stats, "bulk load finished");
    Ok(stats)
}

/// Drive the input through a batcher, returning the sink for the caller to
/// wind down
fn feed<S: BlockSink>(
    mut batcher: DataBatcher<S>,
    statements: impl IntoIterator<Item = Statement>,
) -> Result<S> {
    batcher.start()?;
    for statement in statements {
        match statement {
            Statement::Triple([s, p, o]) => batcher.triple(s, p, o)?,
            Statement::Quad([g, s, p, o]) => batcher.quad(g, s, p, o)?,
        }
    }
    batcher.finish()
}

/// Settle the joined results of a primary phase
///
/// A dead index worker closes its tuple channel, and the conversion stage
/// then fails with `DownstreamClosed`. That converter error is a symptom;
/// the worker's own failure is the cause and must surface first.
fn primary_outcome(
    conv: Result<ConversionCounts>,
    triples: Result<u64>,
    quads: Result<u64>,
) -> Result<(ConversionCounts, u64)> {
    if matches!(conv, Err(LoaderError::DownstreamClosed(_))) {
        let indexed = triples? + quads?;
        // No worker reported a failure: the closed channel stands
        let counts = conv?;
        Ok((counts, indexed))
    } else {
        let counts = conv?;
        Ok((counts, triples? + quads?))
    }
}

fn primary_parallel(
    plan: &LoaderPlan,
    dataset: &Arc<DatasetStorage>,
    coordinator: &Arc<TxnCoordinator>,
    statements: impl IntoIterator<Item = Statement>,
) -> Result<(ConversionCounts, u64)> {
    let (triple_indexer, triple_senders) =
        Indexer::start(dataset.triples(), &plan.primary_triples, coordinator)?;
    let (quad_indexer, quad_senders) =
        Indexer::start(dataset.quads(), &plan.primary_quads, coordinator)?;
    let (block_tx, block_rx) = sync_channel::<DataBlock>(QUEUE_DEPTH);
    let converter = DataToTuples::start(
        Arc::clone(dataset),
        Arc::clone(coordinator),
        block_rx,
        triple_senders,
        quad_senders,
    )?;

    // Feed on this thread. If feeding fails the batcher (and its sender)
    // is gone either way, so the workers drain and we can still join them
    // and surface the most causal error.
    let feed_result = feed(
        DataBatcher::new(block_tx, DEFAULT_CHUNK_SIZE),
        statements,
    )
    .map(drop);

    let conv_result = converter.finish();
    let triple_result = triple_indexer.finish();
    let quad_result = quad_indexer.finish();

    let outcome = primary_outcome(conv_result, triple_result, quad_result)?;
    feed_result?;
    Ok(outcome)
}

/// Sink that converts on the caller's thread and fans chunks out to the
/// indexer queues
struct ConvertingSink {
    converter: DataToTuplesInline,
    triple_senders: Vec<SyncSender<Vec<Tuple>>>,
    quad_senders: Vec<SyncSender<Vec<Tuple>>>,
}

impl BlockSink for ConvertingSink {
    fn deliver(&mut self, block: DataBlock) -> Result<()> {
        let (triples, quads) = self.converter.convert(&block)?;
        fan_out(&self.triple_senders, triples, "convert-sink")?;
        fan_out(&self.quad_senders, quads, "convert-sink")
    }
}

fn primary_partial(
    plan: &LoaderPlan,
    dataset: &Arc<DatasetStorage>,
    coordinator: &Arc<TxnCoordinator>,
    statements: impl IntoIterator<Item = Statement>,
) -> Result<(ConversionCounts, u64)> {
    let (triple_indexer, triple_senders) =
        Indexer::start(dataset.triples(), &plan.primary_triples, coordinator)?;
    let (quad_indexer, quad_senders) =
        Indexer::start(dataset.quads(), &plan.primary_quads, coordinator)?;

    let mut converter = DataToTuplesInline::new(Arc::clone(dataset));
    converter.start(coordinator)?;
    let sink = ConvertingSink {
        converter,
        triple_senders,
        quad_senders,
    };

    // On a feed failure the sink is dropped whole: the senders close (so
    // the indexer workers drain) and the inline transaction aborts on drop.
    let feed_result = feed(DataBatcher::new(sink, DEFAULT_CHUNK_SIZE), statements);
    let conv_result = match feed_result {
        Ok(sink) => {
            drop(sink.triple_senders);
            drop(sink.quad_senders);
            sink.converter.finish()
        }
        Err(e) => Err(e),
    };

    let triple_result = triple_indexer.finish();
    let quad_result = quad_indexer.finish();

    primary_outcome(conv_result, triple_result, quad_result)
}

/// Sink that does conversion and indexing on the caller's thread
struct InlineSink {
    converter: DataToTuplesInline,
    triple_indexer: IndexerInline,
    quad_indexer: IndexerInline,
}

impl BlockSink for InlineSink {
    fn deliver(&mut self, block: DataBlock) -> Result<()> {
        let (triples, quads) = self.converter.convert(&block)?;
        self.triple_indexer.deliver(&triples)?;
        self.quad_indexer.deliver(&quads)
    }
}

fn primary_inline(
    plan: &LoaderPlan,
    dataset: &Arc<DatasetStorage>,
    coordinator: &Arc<TxnCoordinator>,
    statements: impl IntoIterator<Item = Statement>,
) -> Result<(ConversionCounts, u64)> {
    let mut converter = DataToTuplesInline::new(Arc::clone(dataset));
    converter.start(coordinator)?;
    let mut triple_indexer = IndexerInline::new(dataset.triples(), &plan.primary_triples)?;
    triple_indexer.start(coordinator)?;
    let mut quad_indexer = IndexerInline::new(dataset.quads(), &plan.primary_quads)?;
    quad_indexer.start(coordinator)?;

    let sink = feed(
        DataBatcher::new(
            InlineSink {
                converter,
                triple_indexer,
                quad_indexer,
            },
            DEFAULT_CHUNK_SIZE,
        ),
        statements,
    )?;

    let counts = sink.converter.finish()?;
    let indexed = sink.triple_indexer.finish()? + sink.quad_indexer.finish()?;
    Ok((counts, indexed))
}

/// One secondary phase: replay the populated source index into a fresh
/// index group
fn replay_phase(
    table: &TupleTable,
    source_name: &str,
    group: &[String],
    coordinator: &Arc<TxnCoordinator>,
    inline: bool,
) -> Result<u64> {
    if group.is_empty() {
        return Ok(0);
    }
    let source = Arc::clone(table.index_by_name(source_name)?);
    if source.is_empty() {
        tracing::debug!(source = source_name, "replay skipped, source empty");
        return Ok(0);
    }
    tracing::info!(source = source_name, indexes = ?group, "secondary phase");
    let scan = source.find(&Tuple::all_wildcard(source.tuple_len()));

    if inline {
        let mut indexer = IndexerInline::new(table, group)?;
        indexer.start(coordinator)?;
        let mut chunk = Vec::with_capacity(DEFAULT_CHUNK_SIZE);
        for tuple in scan {
            chunk.push(tuple);
            if chunk.len() >= DEFAULT_CHUNK_SIZE {
                indexer.deliver(&chunk)?;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            indexer.deliver(&chunk)?;
        }
        return indexer.finish();
    }

    let (indexer, senders) = Indexer::start(table, group, coordinator)?;
    let send_result = (|| -> Result<()> {
        let mut chunk = Vec::with_capacity(DEFAULT_CHUNK_SIZE);
        for tuple in scan {
            chunk.push(tuple);
            if chunk.len() >= DEFAULT_CHUNK_SIZE {
                fan_out(&senders, std::mem::take(&mut chunk), "replay")?;
                chunk = Vec::with_capacity(DEFAULT_CHUNK_SIZE);
            }
        }
        fan_out(&senders, chunk, "replay")
    })();
    drop(senders);
    let finished = indexer.finish();

    let inserted = finished?;
    send_result?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_core::{MemNodeTable, MemTupleIndex, NodeTable, TupleIndex};

    fn iri(n: usize) -> Term {
        Term::iri(format!("http://ex/{n}"))
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

    fn dataset() -> Arc<DatasetStorage> {
        let nt: Arc<dyn NodeTable> = Arc::new(MemNodeTable::new());
        Arc::new(
            DatasetStorage::new(
                Arc::clone(&nt),
                nt,
                table(&["SPO", "POS", "OSP"]),
                table(&["GSPO", "SPOG"]),
            )
            .unwrap(),
        )
    }

    fn statements(n: usize) -> Vec<Statement> {
        (0..n)
            .map(|i| Statement::Triple([iri(i % 50), iri(1000 + i % 3), iri(i)]))
            .collect()
    }

    /// Index whose inserts always fail, to break a pipeline mid-load
    struct Failing;

    impl TupleIndex for Failing {
        fn name(&self) -> &str {
            "POS"
        }
        fn tuple_len(&self) -> usize {
            3
        }
        fn add(&self, _tuple: Tuple) -> basalt_core::Result<()> {
            Err(basalt_core::CoreError::InvalidTxnState(
                "injected failure".to_string(),
            ))
        }
        fn find(&self, _probe: &Tuple) -> Box<dyn Iterator<Item = Tuple> + Send> {
            Box::new(std::iter::empty())
        }
        fn is_empty(&self) -> bool {
            true
        }
        fn len(&self) -> usize {
            0
        }
    }

    fn dataset_with_failing_pos() -> Arc<DatasetStorage> {
        let nt: Arc<dyn NodeTable> = Arc::new(MemNodeTable::new());
        let triples = TupleTable::new(vec![
            Arc::new(MemTupleIndex::new("SPO").unwrap()) as Arc<dyn TupleIndex>,
            Arc::new(Failing) as Arc<dyn TupleIndex>,
        ])
        .unwrap();
        Arc::new(DatasetStorage::new(Arc::clone(&nt), nt, triples, table(&["GSPO"])).unwrap())
    }

    fn assert_counts(ds: &DatasetStorage, names: &[&str], expected: usize) {
        for name in names {
            let ix = ds.triples().index_by_name(name).unwrap();
            assert_eq!(ix.len(), expected, "index {name}");
            assert_eq!(
                ix.find(&Tuple::all_wildcard(3)).count(),
                expected,
                "scan {name}"
            );
        }
    }

    #[test]
    fn inline_topology_builds_all_indexes() {
        let ds = dataset();
        let coord = TxnCoordinator::new();
        let plan = LoaderPlan::default_for(&ds);
        let stats = exec_loader(
            &plan,
            LoaderTopology::Inline,
            &ds,
            &coord,
            statements(500),
        )
        .unwrap();
        assert_eq!(stats.triples, 500);
        assert_eq!(stats.quads, 0);
        assert_counts(&ds, &["SPO", "POS", "OSP"], 500);
    }

    #[test]
    fn partially_parallel_matches_inline() {
        let ds = dataset();
        let coord = TxnCoordinator::new();
        let plan = LoaderPlan::default_for(&ds);
        exec_loader(
            &plan,
            LoaderTopology::PartiallyParallel,
            &ds,
            &coord,
            statements(500),
        )
        .unwrap();
        assert_counts(&ds, &["SPO", "POS", "OSP"], 500);
    }

    #[test]
    fn quads_route_to_the_quad_table() {
        let ds = dataset();
        let coord = TxnCoordinator::new();
        let plan = LoaderPlan::default_for(&ds);
        let input = vec![
            Statement::Quad([iri(1), iri(2), iri(3), iri(4)]),
            Statement::Quad([iri(1), iri(2), iri(3), iri(5)]),
            Statement::Triple([iri(2), iri(3), iri(4)]),
        ];
        let stats =
            exec_loader(&plan, LoaderTopology::Parallel, &ds, &coord, input).unwrap();
        assert_eq!(stats.quads, 2);
        assert_eq!(ds.quads().index_by_name("GSPO").unwrap().len(), 2);
        assert_eq!(ds.quads().index_by_name("SPOG").unwrap().len(), 2);
        assert_eq!(ds.triples().index_by_name("SPO").unwrap().len(), 1);
    }

    #[test]
    fn exclusive_mode_released_after_worker_failure() {
        let ds = dataset_with_failing_pos();
        let coord = TxnCoordinator::new();
        let plan = LoaderPlan {
            primary_triples: vec!["SPO".to_string(), "POS".to_string()],
            primary_quads: vec!["GSPO".to_string()],
            secondary_triples: vec![],
            secondary_quads: vec![],
        };

        let result = exec_loader(
            &plan,
            LoaderTopology::Parallel,
            &ds,
            &coord,
            statements(10),
        );
        assert!(result.is_err());
        // A wedged coordinator would deadlock here
        coord.start_exclusive_mode();
        coord.finish_exclusive_mode();
    }

    #[test]
    fn worker_failure_outranks_the_closed_channel_it_causes() {
        let ds = dataset_with_failing_pos();
        let coord = TxnCoordinator::new();
        let plan = LoaderPlan {
            primary_triples: vec!["SPO".to_string(), "POS".to_string()],
            primary_quads: vec!["GSPO".to_string()],
            secondary_triples: vec![],
            secondary_quads: vec![],
        };

        // Enough blocks that conversion is still sending when the failing
        // worker dies and its channel closes behind it
        let result = exec_loader(
            &plan,
            LoaderTopology::Parallel,
            &ds,
            &coord,
            statements(800_000),
        );
        match result {
            Err(LoaderError::Core(basalt_core::CoreError::InvalidTxnState(_))) => {}
            other => panic!("expected the worker's own error, got {other:?}"),
        }
    }

    #[test]
    fn partial_topology_surfaces_the_worker_failure_too() {
        let ds = dataset_with_failing_pos();
        let coord = TxnCoordinator::new();
        let plan = LoaderPlan {
            primary_triples: vec!["SPO".to_string(), "POS".to_string()],
            primary_quads: vec!["GSPO".to_string()],
            secondary_triples: vec![],
            secondary_quads: vec![],
        };

        let result = exec_loader(
            &plan,
            LoaderTopology::PartiallyParallel,
            &ds,
            &coord,
            statements(800_000),
        );
        match result {
            Err(LoaderError::Core(basalt_core::CoreError::InvalidTxnState(_))) => {}
            other => panic!("expected the worker's own error, got {other:?}"),
        }
    }

    #[test]
    fn committed_primary_survives_secondary_failure() {
        let ds = dataset_with_failing_pos();
        let coord = TxnCoordinator::new();
        let plan = LoaderPlan {
            primary_triples: vec!["SPO".to_string()],
            primary_quads: vec!["GSPO".to_string()],
            secondary_triples: vec![vec!["POS".to_string()]],
            secondary_quads: vec![],
        };

        assert!(exec_loader(
            &plan,
            LoaderTopology::PartiallyParallel,
            &ds,
            &coord,
            statements(10),
        )
        .is_err());
        // The primary phase committed before the replay phase broke
        assert_eq!(ds.triples().index_by_name("SPO").unwrap().len(), 10);
    }

    #[test]
    fn unknown_plan_name_fails_before_any_data_flows() {
        let ds = dataset();
        let coord = TxnCoordinator::new();
        let mut plan = LoaderPlan::default_for(&ds);
        plan.secondary_triples.push(vec!["XYZ".to_string()]);
        assert!(exec_loader(
            &plan,
            LoaderTopology::Inline,
            &ds,
            &coord,
            statements(10),
        )
        .is_err());
        assert_eq!(ds.triples().index_by_name("SPO").unwrap().len(), 0);
    }
}
