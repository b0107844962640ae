//! Transaction coordinator
//!
//! The coordinator tracks active transactions and a process-wide
//! *exclusive mode* used by bulk operations. While exclusive mode is held,
//! no new read/write transactions start and the holder may assume
//! unsynchronized single-writer-per-thread access to index structures.
//! Bulk transactions (one per loader worker thread) are only admitted
//! while exclusive mode is held.
//!
//! Transactions are owned by exactly one thread for their lifetime; a
//! transaction dropped while still active is aborted (and logged).
//!
//! The isolation algorithm itself is out of scope here - this coordinator
//! provides the lifecycle and the exclusive-mode gate the engine and
//! loader require.

use crate::error::{CoreError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Transaction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    Read,
    Write,
    /// Loader-worker transaction, admitted only under exclusive mode
    Bulk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

#[derive(Default)]
struct CoordState {
    active: usize,
    exclusive: bool,
}

/// Coordinator for transactions and exclusive mode
#[derive(Default)]
pub struct TxnCoordinator {
    state: Mutex<CoordState>,
    cond: Condvar,
}

impl TxnCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Begin a transaction
    ///
    /// Read/write transactions block while exclusive mode is held. Bulk
    /// transactions fail unless exclusive mode is held.
    pub fn begin(self: &Arc<Self>, mode: TxnMode) -> Result<Transaction> {
        let mut state = self.state.lock();
        match mode {
            TxnMode::Bulk => {
                if !state.exclusive {
                    return Err(CoreError::BulkOutsideExclusive);
                }
            }
            TxnMode::Read | TxnMode::Write => {
                while state.exclusive {
                    self.cond.wait(&mut state);
                }
            }
        }
        state.active += 1;
        Ok(Transaction {
            coord: Arc::clone(self),
            mode,
            state: TxnState::Active,
        })
    }

    /// Enter exclusive mode: block new transactions, wait for active ones
    /// to drain
    pub fn start_exclusive_mode(&self) {
        let mut state = self.state.lock();
        while state.exclusive {
            self.cond.wait(&mut state);
        }
        state.exclusive = true;
        while state.active > 0 {
            self.cond.wait(&mut state);
        }
        tracing::debug!("exclusive mode started");
    }

    /// Leave exclusive mode, waking blocked transactions
    pub fn finish_exclusive_mode(&self) {
        let mut state = self.state.lock();
        state.exclusive = false;
        tracing::debug!("exclusive mode finished");
        drop(state);
        self.cond.notify_all();
    }

    /// RAII wrapper: exclusive mode held until the guard drops
    ///
    /// This is the form the loader uses, so failures release the mode on
    /// unwind instead of deadlocking later operations.
    pub fn exclusive_mode(self: &Arc<Self>) -> ExclusiveMode {
        self.start_exclusive_mode();
        ExclusiveMode {
            coord: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.active -= 1;
        drop(state);
        self.cond.notify_all();
    }
}

/// Exclusive-mode guard; releases on drop
pub struct ExclusiveMode {
    coord: Arc<TxnCoordinator>,
}

impl Drop for ExclusiveMode {
    fn drop(&mut self) {
        self.coord.finish_exclusive_mode();
    }
}

/// One transaction, owned by one thread
pub struct Transaction {
    coord: Arc<TxnCoordinator>,
    mode: TxnMode,
    state: TxnState,
}

impl Transaction {
    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    pub fn commit(mut self) -> Result<()> {
        if self.state != TxnState::Active {
            return Err(CoreError::InvalidTxnState(format!("{:?}", self.state)));
        }
        self.state = TxnState::Committed;
        self.coord.release();
        Ok(())
    }

    pub fn abort(mut self) {
        if self.state == TxnState::Active {
            self.state = TxnState::Aborted;
            self.coord.release();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxnState::Active {
            tracing::warn!(mode = ?self.mode, "transaction dropped while active, aborting");
            self.state = TxnState::Aborted;
            self.coord.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn bulk_requires_exclusive() {
        let coord = TxnCoordinator::new();
        assert!(matches!(
            coord.begin(TxnMode::Bulk),
            Err(CoreError::BulkOutsideExclusive)
        ));
        let guard = coord.exclusive_mode();
        let txn = coord.begin(TxnMode::Bulk).unwrap();
        txn.commit().unwrap();
        drop(guard);
    }

    #[test]
    fn exclusive_waits_for_active_and_blocks_new() {
        let coord = TxnCoordinator::new();
        let txn = coord.begin(TxnMode::Write).unwrap();

        let coord2 = Arc::clone(&coord);
        let handle = std::thread::spawn(move || {
            let _guard = coord2.exclusive_mode();
            // Drain happened: the writer committed before we got here
        });

        std::thread::sleep(Duration::from_millis(50));
        txn.commit().unwrap();
        handle.join().unwrap();

        // Exclusive mode released by the guard: normal begin proceeds
        let txn = coord.begin(TxnMode::Read).unwrap();
        txn.abort();
    }

    #[test]
    fn drop_aborts() {
        let coord = TxnCoordinator::new();
        {
            let _txn = coord.begin(TxnMode::Read).unwrap();
        }
        // Active count drained: exclusive mode does not hang
        coord.start_exclusive_mode();
        coord.finish_exclusive_mode();
    }
}
