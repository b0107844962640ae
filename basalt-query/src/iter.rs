//! Binding iterators and cancellation
//!
//! The engine is pull-based: every operator lowers to an
//! `Iterator<Item = Result<Binding>>`. Errors flow in-band, so a
//! cancellation raised deep in a pattern-solve chain surfaces at the
//! consumer as the next item.
//!
//! Cancellation is advisory: [`AbortSignal::abort`] may be called from any
//! thread at any time and takes effect the next time an [`Abortable`]
//! stage is touched, not preemptively.

use crate::binding::Binding;
use crate::error::{QueryError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The operator-to-operator stream type
pub type BindingIter = Box<dyn Iterator<Item = Result<Binding>> + Send>;

/// A stream of exactly one empty binding - the canonical evaluation root
pub fn root_iter() -> BindingIter {
    Box::new(std::iter::once(Ok(Binding::root())))
}

/// An always-empty stream
pub fn empty_iter() -> BindingIter {
    Box::new(std::iter::empty())
}

/// A stream over materialized bindings
pub fn from_bindings(bindings: Vec<Binding>) -> BindingIter {
    Box::new(bindings.into_iter().map(Ok))
}

/// Shared, thread-safe, idempotent cancellation flag
#[derive(Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; safe from any thread, idempotent
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error form of the flag, for in-band propagation
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(QueryError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Iterator wrapper that raises [`QueryError::Cancelled`] at the next pull
/// after its signal fires, instead of touching its inner stage further
pub struct Abortable<I> {
    inner: I,
    signal: AbortSignal,
    /// Cancellation is terminal: once raised, the stream is done
    raised: bool,
}

impl<I> Abortable<I> {
    pub fn new(inner: I, signal: AbortSignal) -> Self {
        Abortable {
            inner,
            signal,
            raised: false,
        }
    }
}

impl<I, T> Iterator for Abortable<I>
where
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.raised {
            return None;
        }
        if self.signal.is_aborted() {
            self.raised = true;
            return Some(Err(QueryError::Cancelled));
        }
        self.inner.next()
    }
}
