//! Term-to-tuple conversion - the dictionary stage
//!
//! [`DataToTuples`] owns one named worker thread and one `Bulk`
//! transaction. It drains [`DataBlock`]s from its receiver, resolves every
//! term through the dataset's shared node table (the dataset guarantees at
//! construction that the triple and quad paths share one table), and sends
//! one identifier-tuple chunk per arity to every downstream indexer queue.
//! Within each arity, chunk order is input order.
//!
//! When the upstream channel closes the worker drops its downstream
//! senders (closing those channels in turn), commits, and returns its
//! conversion counts. [`DataToTuplesInline`] does the same work on the
//! calling thread for the single-threaded topologies.

use crate::batcher::DataBlock;
use crate::error::{LoaderError, Result};
use crate::StageState;
use basalt_core::{DatasetStorage, Term, Transaction, Tuple, TxnCoordinator, TxnMode};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Statements converted per arity
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConversionCounts {
    pub triples: u64,
    pub quads: u64,
}

fn convert_block(dataset: &DatasetStorage, block: &DataBlock) -> (Vec<Tuple>, Vec<Tuple>) {
    let nt = dataset.node_table();
    let resolve = |t: &Term| nt.alloc(t);
    let triples = block
        .triples
        .iter()
        .map(|[s, p, o]| Tuple::triple(resolve(s), resolve(p), resolve(o)))
        .collect();
    let quads = block
        .quads
        .iter()
        .map(|[g, s, p, o]| Tuple::quad(resolve(g), resolve(s), resolve(p), resolve(o)))
        .collect();
    (triples, quads)
}

pub(crate) fn fan_out(
    senders: &[SyncSender<Vec<Tuple>>],
    chunk: Vec<Tuple>,
    stage: &'static str,
) -> Result<()> {
    if chunk.is_empty() {
        return Ok(());
    }
    // Last sender takes the chunk itself, earlier ones a clone
    for tx in &senders[..senders.len().saturating_sub(1)] {
        tx.send(chunk.clone())
            .map_err(|_| LoaderError::DownstreamClosed(stage))?;
    }
    if let Some(tx) = senders.last() {
        tx.send(chunk)
            .map_err(|_| LoaderError::DownstreamClosed(stage))?;
    }
    Ok(())
}

/// Conversion worker thread
pub struct DataToTuples {
    handle: Option<JoinHandle<Result<ConversionCounts>>>,
    state: StageState,
}

impl DataToTuples {
    /// Spawn the worker; it begins its `Bulk` transaction first thing, so
    /// the caller must already hold exclusive mode
    pub fn start(
        dataset: Arc<DatasetStorage>,
        coordinator: Arc<TxnCoordinator>,
        source: Receiver<DataBlock>,
        triple_sinks: Vec<SyncSender<Vec<Tuple>>>,
        quad_sinks: Vec<SyncSender<Vec<Tuple>>>,
    ) -> Result<Self> {
        let handle = std::thread::Builder::new()
            .name("data-to-tuples".to_string())
            .spawn(move || {
                let txn = coordinator.begin(TxnMode::Bulk)?;
                match Self::run(&dataset, source, triple_sinks, quad_sinks) {
                    Ok(counts) => {
                        txn.commit()?;
                        tracing::debug!(
                            triples = counts.triples,
                            quads = counts.quads,
                            "conversion committed"
                        );
                        Ok(counts)
                    }
                    Err(e) => {
                        txn.abort();
                        Err(e)
                    }
                }
            })
            .map_err(|e| LoaderError::WorkerFailed {
                worker: "data-to-tuples".to_string(),
                message: e.to_string(),
            })?;
        Ok(DataToTuples {
            handle: Some(handle),
            state: StageState::Started,
        })
    }

    fn run(
        dataset: &DatasetStorage,
        source: Receiver<DataBlock>,
        triple_sinks: Vec<SyncSender<Vec<Tuple>>>,
        quad_sinks: Vec<SyncSender<Vec<Tuple>>>,
    ) -> Result<ConversionCounts> {
        let mut counts = ConversionCounts::default();
        for block in source.iter() {
            let (triples, quads) = convert_block(dataset, &block);
            counts.triples += triples.len() as u64;
            counts.quads += quads.len() as u64;
            fan_out(&triple_sinks, triples, "data-to-tuples")?;
            fan_out(&quad_sinks, quads, "data-to-tuples")?;
        }
        Ok(counts)
        // senders dropped here: downstream end-of-stream
    }

    /// Join the worker, surfacing its failure if it had one
    pub fn finish(mut self) -> Result<ConversionCounts> {
        self.state.end("data-to-tuples")?;
        let handle = self
            .handle
            .take()
            .ok_or(LoaderError::InvalidStageState {
                stage: "data-to-tuples",
                state: "finished",
            })?;
        handle.join().map_err(|_| LoaderError::WorkerFailed {
            worker: "data-to-tuples".to_string(),
            message: "worker panicked".to_string(),
        })?
    }
}

/// Single-threaded conversion for the inline topologies
pub struct DataToTuplesInline {
    dataset: Arc<DatasetStorage>,
    txn: Option<Transaction>,
    counts: ConversionCounts,
    state: StageState,
}

impl DataToTuplesInline {
    pub fn new(dataset: Arc<DatasetStorage>) -> Self {
        DataToTuplesInline {
            dataset,
            txn: None,
            counts: ConversionCounts::default(),
            state: StageState::Created,
        }
    }

    pub fn start(&mut self, coordinator: &Arc<TxnCoordinator>) -> Result<()> {
        self.state.begin("data-to-tuples-inline")?;
        self.txn = Some(coordinator.begin(TxnMode::Bulk)?);
        Ok(())
    }

    /// Convert one block on the calling thread
    pub fn convert(&mut self, block: &DataBlock) -> Result<(Vec<Tuple>, Vec<Tuple>)> {
        self.state.require_started("data-to-tuples-inline")?;
        let (triples, quads) = convert_block(&self.dataset, block);
        self.counts.triples += triples.len() as u64;
        self.counts.quads += quads.len() as u64;
        Ok((triples, quads))
    }

    pub fn finish(mut self) -> Result<ConversionCounts> {
        self.state.end("data-to-tuples-inline")?;
        if let Some(txn) = self.txn.take() {
            txn.commit()?;
        }
        Ok(self.counts)
    }

    /// Abort the transaction on the failure path
    pub fn abandon(mut self) {
        if let Some(txn) = self.txn.take() {
            txn.abort();
        }
    }
}
