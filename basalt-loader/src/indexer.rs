//! Index building - one worker thread per target index
//!
//! [`Indexer::start`] resolves each requested index name against the tuple
//! table eagerly (an unknown name fails before any thread spawns), then
//! spawns one named worker per index. Each worker owns its own bounded
//! receiver and its own `Bulk` transaction, and inserts every tuple of
//! every chunk it receives. Its channel closing is the termination signal.
//!
//! `finish` joins every worker before surfacing the first failure, so a
//! broken worker never leaves the others running detached. A failing
//! worker aborts its own transaction on its own thread.

use crate::error::{LoaderError, Result};
use crate::StageState;
use basalt_core::{Tuple, TupleIndex, TupleTable, TxnCoordinator, TxnMode};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Queue depth for each worker's chunk channel; producers block when a
/// slow index falls this many chunks behind
pub const QUEUE_DEPTH: usize = 4;

struct Worker {
    name: String,
    handle: JoinHandle<Result<u64>>,
}

/// Multi-threaded index building stage
pub struct Indexer {
    workers: Vec<Worker>,
    state: StageState,
}

impl Indexer {
    /// Spawn one worker per index name, returning their chunk senders in
    /// the same order as `names`
    ///
    /// Workers begin `Bulk` transactions, so the caller must hold
    /// exclusive mode.
    pub fn start(
        table: &TupleTable,
        names: &[String],
        coordinator: &Arc<TxnCoordinator>,
    ) -> Result<(Self, Vec<SyncSender<Vec<Tuple>>>)> {
        let mut indexes: Vec<Arc<dyn TupleIndex>> = Vec::with_capacity(names.len());
        for name in names {
            indexes.push(Arc::clone(table.index_by_name(name)?));
        }

        let mut workers = Vec::with_capacity(indexes.len());
        let mut senders = Vec::with_capacity(indexes.len());
        for index in indexes {
            let (tx, rx) = sync_channel::<Vec<Tuple>>(QUEUE_DEPTH);
            let name = format!("index-{}", index.name());
            let coordinator = Arc::clone(coordinator);
            let handle = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let txn = coordinator.begin(TxnMode::Bulk)?;
                    let mut inserted = 0u64;
                    for chunk in rx.iter() {
                        for tuple in chunk {
                            if let Err(e) = index.add(tuple) {
                                txn.abort();
                                return Err(e.into());
                            }
                            inserted += 1;
                        }
                    }
                    txn.commit()?;
                    tracing::debug!(index = index.name(), inserted, "index worker committed");
                    Ok(inserted)
                })
                .map_err(|e| LoaderError::WorkerFailed {
                    worker: name.clone(),
                    message: e.to_string(),
                })?;
            workers.push(Worker { name, handle });
            senders.push(tx);
        }
        Ok((
            Indexer {
                workers,
                state: StageState::Started,
            },
            senders,
        ))
    }

    /// Join every worker, then surface the first failure
    ///
    /// Callers must have dropped the chunk senders first or this blocks
    /// forever.
    pub fn finish(mut self) -> Result<u64> {
        self.state.end("indexer")?;
        let mut total = 0u64;
        let mut first_err: Option<LoaderError> = None;
        for worker in self.workers.drain(..) {
            let joined = worker.handle.join().map_err(|_| LoaderError::WorkerFailed {
                worker: worker.name.clone(),
                message: "worker panicked".to_string(),
            });
            match joined {
                Ok(Ok(inserted)) => total += inserted,
                Ok(Err(e)) | Err(e) => {
                    tracing::warn!(worker = %worker.name, error = %e, "index worker failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }
}

/// Single-threaded index building for the inline topology
pub struct IndexerInline {
    indexes: Vec<Arc<dyn TupleIndex>>,
    txn: Option<basalt_core::Transaction>,
    inserted: u64,
    state: StageState,
}

impl IndexerInline {
    pub fn new(table: &TupleTable, names: &[String]) -> Result<Self> {
        let mut indexes = Vec::with_capacity(names.len());
        for name in names {
            indexes.push(Arc::clone(table.index_by_name(name)?));
        }
        Ok(IndexerInline {
            indexes,
            txn: None,
            inserted: 0,
            state: StageState::Created,
        })
    }

    pub fn start(&mut self, coordinator: &Arc<TxnCoordinator>) -> Result<()> {
        self.state.begin("indexer-inline")?;
        self.txn = Some(coordinator.begin(TxnMode::Bulk)?);
        Ok(())
    }

    pub fn deliver(&mut self, chunk: &[Tuple]) -> Result<()> {
        self.state.require_started("indexer-inline")?;
        for index in &self.indexes {
            for tuple in chunk {
                index.add(tuple.clone())?;
            }
        }
        self.inserted += (chunk.len() * self.indexes.len()) as u64;
        Ok(())
    }

    pub fn finish(mut self) -> Result<u64> {
        self.state.end("indexer-inline")?;
        if let Some(txn) = self.txn.take() {
            txn.commit()?;
        }
        Ok(self.inserted)
    }

    /// Abort the transaction on the failure path
    pub fn abandon(mut self) {
        if let Some(txn) = self.txn.take() {
            txn.abort();
        }
    }
}
