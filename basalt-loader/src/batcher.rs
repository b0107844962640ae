//! Data batching - the first pipeline stage
//!
//! [`DataBatcher`] runs on the caller's thread: parsed triples and quads
//! accumulate into a [`DataBlock`] until the combined count crosses the
//! chunk size, at which point the block goes to the sink and a fresh one
//! starts. `finish` flushes any partial block and drops the sink; for a
//! channel sink that closes the channel, which is the end-of-stream signal
//! (there is no sentinel value).
//!
//! The sink seam is what lets the same batcher feed a converter thread
//! (channel sink) or an inline converter (closure sink) depending on the
//! loader topology.

use crate::error::{LoaderError, Result};
use crate::StageState;
use basalt_core::Term;
use std::sync::mpsc::SyncSender;

pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Unit of transfer between loader stages
///
/// Immutable after creation; consumed exactly once by the next stage.
#[derive(Debug, Default)]
pub struct DataBlock {
    pub triples: Vec<[Term; 3]>,
    pub quads: Vec<[Term; 4]>,
}

impl DataBlock {
    pub fn len(&self) -> usize {
        self.triples.len() + self.quads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty() && self.quads.is_empty()
    }
}

/// Where finished blocks go
pub trait BlockSink {
    fn deliver(&mut self, block: DataBlock) -> Result<()>;
}

/// Channel sink: the parallel topologies' converter queue
impl BlockSink for SyncSender<DataBlock> {
    fn deliver(&mut self, block: DataBlock) -> Result<()> {
        self.send(block)
            .map_err(|_| LoaderError::DownstreamClosed("batcher"))
    }
}

/// Accumulates statements into fixed-size blocks on the caller's thread
pub struct DataBatcher<S: BlockSink> {
    sink: S,
    chunk_size: usize,
    pending: DataBlock,
    state: StageState,
    sent: u64,
}

impl<S: BlockSink> DataBatcher<S> {
    pub fn new(sink: S, chunk_size: usize) -> Self {
        DataBatcher {
            sink,
            chunk_size: chunk_size.max(1),
            pending: DataBlock::default(),
            state: StageState::Created,
            sent: 0,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.state.begin("batcher")
    }

    pub fn triple(&mut self, s: Term, p: Term, o: Term) -> Result<()> {
        self.state.require_started("batcher")?;
        self.pending.triples.push([s, p, o]);
        self.flush_if_full()
    }

    pub fn quad(&mut self, g: Term, s: Term, p: Term, o: Term) -> Result<()> {
        self.state.require_started("batcher")?;
        self.pending.quads.push([g, s, p, o]);
        self.flush_if_full()
    }

    /// Flush the partial block and hand the sink back
    ///
    /// Dropping the returned sink is what closes a channel sink; inline
    /// topologies instead recover their downstream stages from it.
    pub fn finish(mut self) -> Result<S> {
        self.state.end("batcher")?;
        if !self.pending.is_empty() {
            let block = std::mem::take(&mut self.pending);
            self.sent += 1;
            self.sink.deliver(block)?;
        }
        tracing::debug!(blocks = self.sent, "batcher finished");
        Ok(self.sink)
    }

    fn flush_if_full(&mut self) -> Result<()> {
        if self.pending.len() >= self.chunk_size {
            let block = std::mem::take(&mut self.pending);
            self.sent += 1;
            self.sink.deliver(block)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    fn iri(n: usize) -> Term {
        Term::iri(format!("http://ex/{n}"))
    }

    #[test]
    fn blocks_flush_at_chunk_size() {
        let (tx, rx) = sync_channel(16);
        let mut batcher = DataBatcher::new(tx, 3);
        batcher.start().unwrap();
        for i in 0..7 {
            batcher.triple(iri(i), iri(100), iri(i + 1)).unwrap();
        }
        batcher.finish().unwrap();

        let blocks: Vec<DataBlock> = rx.iter().collect();
        assert_eq!(
            blocks.iter().map(DataBlock::len).collect::<Vec<_>>(),
            vec![3, 3, 1]
        );
    }

    #[test]
    fn quads_and_triples_count_toward_one_threshold() {
        let (tx, rx) = sync_channel(16);
        let mut batcher = DataBatcher::new(tx, 2);
        batcher.start().unwrap();
        batcher.triple(iri(1), iri(2), iri(3)).unwrap();
        batcher.quad(iri(0), iri(1), iri(2), iri(3)).unwrap();
        batcher.finish().unwrap();

        let blocks: Vec<DataBlock> = rx.iter().collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].triples.len(), 1);
        assert_eq!(blocks[0].quads.len(), 1);
    }

    #[test]
    fn delivery_before_start_is_rejected() {
        let (tx, _rx) = sync_channel(1);
        let mut batcher = DataBatcher::new(tx, 10);
        assert!(matches!(
            batcher.triple(iri(1), iri(2), iri(3)),
            Err(LoaderError::InvalidStageState { .. })
        ));
    }

    #[test]
    fn empty_finish_sends_nothing() {
        let (tx, rx) = sync_channel(1);
        let mut batcher = DataBatcher::new(tx, 10);
        batcher.start().unwrap();
        batcher.finish().unwrap();
        assert!(rx.iter().next().is_none());
    }

    #[test]
    fn custom_sink_receives_blocks() {
        use std::cell::Cell;
        use std::rc::Rc;

        struct Counting(Rc<Cell<usize>>);
        impl BlockSink for Counting {
            fn deliver(&mut self, block: DataBlock) -> Result<()> {
                self.0.set(self.0.get() + block.len());
                Ok(())
            }
        }

        let count = Rc::new(Cell::new(0));
        let mut batcher = DataBatcher::new(Counting(Rc::clone(&count)), 2);
        batcher.start().unwrap();
        for i in 0..5 {
            batcher.triple(iri(i), iri(9), iri(i)).unwrap();
        }
        batcher.finish().unwrap();
        assert_eq!(count.get(), 5);
    }
}
