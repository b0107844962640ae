//! # Basalt Loader
//!
//! Phased bulk loading for the Basalt RDF store. Statements flow through a
//! pipeline of stages connected by bounded channels:
//!
//! ```text
//! caller thread          worker thread        one thread per index
//! [DataBatcher] --block--> [DataToTuples] --chunk--> [Indexer]
//! ```
//!
//! The primary phase builds the first index set straight from the input;
//! each secondary phase then replays an already-built primary index through
//! a fresh [`indexer::Indexer`] sub-pipeline. Phases commit independently:
//! a failure leaves earlier phases' indexes intact.
//!
//! Every stage follows the same lifecycle: created, started, finished.
//! Delivery outside the started window is a
//! [`LoaderError::InvalidStageState`]. End-of-stream is signalled by
//! closing the channel, never by a sentinel value.
//!
//! Each worker thread owns exactly one `Bulk` transaction; bulk
//! transactions are only admitted while the caller holds the coordinator's
//! exclusive mode, which [`loader::exec_loader`] acquires for the whole
//! load (released on the failure path too, via the guard).

pub mod batcher;
pub mod error;
pub mod indexer;
pub mod loader;
pub mod plan;
pub mod tuples;

pub use batcher::{BlockSink, DataBatcher, DataBlock, DEFAULT_CHUNK_SIZE};
pub use error::{LoaderError, Result};
pub use indexer::{Indexer, IndexerInline};
pub use loader::{exec_loader, LoaderStats, LoaderTopology, Statement};
pub use plan::LoaderPlan;
pub use tuples::{DataToTuples, DataToTuplesInline};

/// Lifecycle of one pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Created,
    Started,
    Finished,
}

impl StageState {
    fn name(self) -> &'static str {
        match self {
            StageState::Created => "created",
            StageState::Started => "started",
            StageState::Finished => "finished",
        }
    }

    fn begin(&mut self, stage: &'static str) -> Result<()> {
        if *self != StageState::Created {
            return Err(LoaderError::InvalidStageState {
                stage,
                state: self.name(),
            });
        }
        *self = StageState::Started;
        Ok(())
    }

    fn require_started(self, stage: &'static str) -> Result<()> {
        if self != StageState::Started {
            return Err(LoaderError::InvalidStageState {
                stage,
                state: self.name(),
            });
        }
        Ok(())
    }

    fn end(&mut self, stage: &'static str) -> Result<()> {
        self.require_started(stage)?;
        *self = StageState::Finished;
        Ok(())
    }
}
