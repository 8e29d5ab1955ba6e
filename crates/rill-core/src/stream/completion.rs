//! Settle-once completion cell and its future.
//!
//! The engine's internal promise: terminal aggregators and
//! `Publisher::add_stream` settle a [`Completion`] exactly once, and any
//! number of [`CompletionFuture`]s observe the settled value. Values are
//! cloned on observation, so several holders of a publisher's `done()`
//! future all resolve.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

#[derive(Debug)]
struct State<V> {
    value: Option<V>,
    wakers: Vec<Waker>,
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// A single-value cell that can be settled exactly once.
pub(crate) struct Completion<V> {
    state: Rc<RefCell<State<V>>>,
}

impl<V> Clone for Completion<V> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<V: Clone> Completion<V> {
    /// Creates an unsettled completion.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State {
                value: None,
                wakers: Vec::new(),
            })),
        }
    }

    /// Creates a completion already settled with `value`.
    pub fn settled(value: V) -> Self {
        let completion = Self::new();
        completion.settle(value);
        completion
    }

    /// Settles the completion. The first call wins; later calls are ignored.
    ///
    /// Returns `true` if this call settled it.
    pub fn settle(&self, value: V) -> bool {
        let mut state = self.state.borrow_mut();
        if state.value.is_some() {
            return false;
        }
        state.value = Some(value);
        for waker in state.wakers.drain(..) {
            waker.wake();
        }
        true
    }

    /// Returns `true` once settled.
    pub fn is_settled(&self) -> bool {
        self.state.borrow().value.is_some()
    }

    /// Returns a future resolving to a clone of the settled value.
    pub fn future(&self) -> CompletionFuture<V> {
        CompletionFuture {
            state: Rc::clone(&self.state),
        }
    }
}

// ---------------------------------------------------------------------------
// CompletionFuture
// ---------------------------------------------------------------------------

/// Future resolving once its completion is settled.
///
/// Returned by the terminal aggregators on [`EventStream`] and by
/// [`Publisher::done`]; awaited via [`Reactor::block_on`].
///
/// [`EventStream`]: super::handle::EventStream
/// [`Publisher::done`]: super::publisher::Publisher::done
/// [`Reactor::block_on`]: crate::reactor::Reactor::block_on
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct CompletionFuture<V> {
    state: Rc<RefCell<State<V>>>,
}

impl<V: Clone> Future for CompletionFuture<V> {
    type Output = V;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<V> {
        let mut state = self.state.borrow_mut();
        if let Some(value) = state.value.as_ref() {
            return Poll::Ready(value.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;

    #[test]
    fn test_settle_first_wins() {
        let completion = Completion::new();
        assert!(!completion.is_settled());
        assert!(completion.settle(1));
        assert!(!completion.settle(2));
        assert!(completion.is_settled());

        let reactor = Reactor::new();
        assert_eq!(reactor.block_on(completion.future()), 1);
    }

    #[test]
    fn test_pre_settled() {
        let completion = Completion::settled("done");
        let reactor = Reactor::new();
        assert_eq!(reactor.block_on(completion.future()), "done");
    }

    #[test]
    fn test_multiple_observers() {
        let completion = Completion::new();
        let first = completion.future();
        let second = completion.future();
        completion.settle(9);

        let reactor = Reactor::new();
        assert_eq!(reactor.block_on(first), 9);
        assert_eq!(reactor.block_on(second), 9);
    }

    #[test]
    fn test_settle_from_deferred_task() {
        let reactor = Reactor::new();
        let scheduler = reactor.handle();
        let completion = Completion::new();

        {
            let completion = completion.clone();
            scheduler.defer(move || {
                completion.settle(42);
            });
        }

        assert_eq!(reactor.block_on(completion.future()), 42);
    }
}
