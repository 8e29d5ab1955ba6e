//! Terminal stream aggregators — futures that consume a stream to
//! completion.
//!
//! Unlike combinators (which return new streams), these subscribe once and
//! return a future. Every aggregator cancels its subscription before
//! settling the future, success or failure, so no live subscription ever
//! outlasts the result.
//!
//! Panics in user callbacks are caught and routed into the future's
//! rejection (after cancelling), except for [`every`](EventStream::every)
//! where a panicking predicate resolves `false` — the same outcome as the
//! predicate failing.

use std::cell::RefCell;
use std::collections::HashSet;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use super::completion::{Completion, CompletionFuture};
use super::error::{Fault, StreamError};
use super::handle::EventStream;
use super::subscription::{ListenOptions, Subscription};

type SubscriptionSlot<T> = Rc<RefCell<Option<Subscription<T>>>>;

/// Cancels the held subscription (if any), then settles the future.
fn settle_and_cancel<T: Clone + 'static, V: Clone>(
    slot: &SubscriptionSlot<T>,
    completion: &Completion<V>,
    value: V,
) {
    if let Some(subscription) = slot.borrow_mut().take() {
        subscription.cancel();
    }
    completion.settle(value);
}

impl<T: Clone + 'static> EventStream<T> {
    /// Subscribes with the given handlers, storing the subscription in
    /// `slot`; a failed `listen` rejects the future immediately.
    fn aggregate<V: Clone>(
        &self,
        completion: &Completion<Result<V, StreamError>>,
        slot: &SubscriptionSlot<T>,
        on_data: impl FnMut(T) + 'static,
        options: ListenOptions,
    ) {
        match self.listen(on_data, options) {
            Ok(subscription) => {
                *slot.borrow_mut() = Some(subscription);
            }
            Err(error) => {
                completion.settle(Err(error));
            }
        }
    }

    /// Resolves `true` if every value matches the predicate.
    ///
    /// The first value for which the predicate returns `false` — or panics —
    /// cancels the subscription and resolves `false`. An upstream fault
    /// cancels and rejects.
    pub fn every(
        &self,
        mut predicate: impl FnMut(&T) -> bool + 'static,
    ) -> CompletionFuture<Result<bool, StreamError>> {
        let completion = Completion::new();
        let slot: SubscriptionSlot<T> = Rc::default();

        let on_data = {
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            move |value: T| {
                if completion.is_settled() {
                    return;
                }
                match catch_unwind(AssertUnwindSafe(|| predicate(&value))) {
                    Ok(true) => {}
                    Ok(false) | Err(_) => settle_and_cancel(&slot, &completion, Ok(false)),
                }
            }
        };
        let options = self.reject_on_error(&completion, &slot).on_done({
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            move || settle_and_cancel(&slot, &completion, Ok(true))
        });

        self.aggregate(&completion, &slot, on_data, options);
        completion.future()
    }

    /// Resolves the first value the stream produces.
    ///
    /// Rejects with [`StreamError::Exhausted`] if the stream completes
    /// first, or with the fault if an error arrives first.
    pub fn first(&self) -> CompletionFuture<Result<T, StreamError>> {
        let completion = Completion::new();
        let slot: SubscriptionSlot<T> = Rc::default();

        let on_data = {
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            move |value: T| settle_and_cancel(&slot, &completion, Ok(value))
        };
        let options = self.reject_on_error(&completion, &slot).on_done({
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            move || settle_and_cancel(&slot, &completion, Err(StreamError::Exhausted))
        });

        self.aggregate(&completion, &slot, on_data, options);
        completion.future()
    }

    /// Resolves the first value matching the predicate.
    ///
    /// A panicking predicate rejects with the panic message as a fault.
    /// Rejects with [`StreamError::Exhausted`] if the stream completes with
    /// no match.
    pub fn first_where(
        &self,
        mut predicate: impl FnMut(&T) -> bool + 'static,
    ) -> CompletionFuture<Result<T, StreamError>> {
        let completion = Completion::new();
        let slot: SubscriptionSlot<T> = Rc::default();

        let on_data = {
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            move |value: T| {
                if completion.is_settled() {
                    return;
                }
                match catch_unwind(AssertUnwindSafe(|| predicate(&value))) {
                    Ok(true) => settle_and_cancel(&slot, &completion, Ok(value)),
                    Ok(false) => {}
                    Err(payload) => settle_and_cancel(
                        &slot,
                        &completion,
                        Err(Fault::from_panic(payload.as_ref()).into()),
                    ),
                }
            }
        };
        let options = self.reject_on_error(&completion, &slot).on_done({
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            move || settle_and_cancel(&slot, &completion, Err(StreamError::Exhausted))
        });

        self.aggregate(&completion, &slot, on_data, options);
        completion.future()
    }

    /// Invokes `action` for every value in order, resolving on completion.
    ///
    /// A panicking action — or an upstream fault — cancels the subscription
    /// and rejects; subsequent values are not delivered.
    pub fn for_each(
        &self,
        mut action: impl FnMut(T) + 'static,
    ) -> CompletionFuture<Result<(), StreamError>> {
        let completion = Completion::new();
        let slot: SubscriptionSlot<T> = Rc::default();

        let on_data = {
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            move |value: T| {
                if completion.is_settled() {
                    return;
                }
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| action(value))) {
                    settle_and_cancel(
                        &slot,
                        &completion,
                        Err(Fault::from_panic(payload.as_ref()).into()),
                    );
                }
            }
        };
        let options = self.reject_on_error(&completion, &slot).on_done({
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            move || settle_and_cancel(&slot, &completion, Ok(()))
        });

        self.aggregate(&completion, &slot, on_data, options);
        completion.future()
    }

    /// Folds the stream into a single value, seeding the accumulator from
    /// the first value (which is not passed through `combine`).
    ///
    /// Rejects with [`StreamError::Exhausted`] on an empty stream. A
    /// panicking `combine` — or an upstream fault — cancels and rejects.
    pub fn reduce(
        &self,
        mut combine: impl FnMut(T, T) -> T + 'static,
    ) -> CompletionFuture<Result<T, StreamError>> {
        let completion = Completion::new();
        let slot: SubscriptionSlot<T> = Rc::default();
        let accumulator: Rc<RefCell<Option<T>>> = Rc::default();

        let on_data = {
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            let accumulator = Rc::clone(&accumulator);
            move |value: T| {
                if completion.is_settled() {
                    return;
                }
                let seed = accumulator.borrow_mut().take();
                match seed {
                    None => *accumulator.borrow_mut() = Some(value),
                    Some(current) => {
                        match catch_unwind(AssertUnwindSafe(|| combine(current, value))) {
                            Ok(next) => *accumulator.borrow_mut() = Some(next),
                            Err(payload) => settle_and_cancel(
                                &slot,
                                &completion,
                                Err(Fault::from_panic(payload.as_ref()).into()),
                            ),
                        }
                    }
                }
            }
        };
        let options = self.reject_on_error(&completion, &slot).on_done({
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            let accumulator = Rc::clone(&accumulator);
            move || {
                let result = accumulator
                    .borrow_mut()
                    .take()
                    .ok_or(StreamError::Exhausted);
                settle_and_cancel(&slot, &completion, result);
            }
        });

        self.aggregate(&completion, &slot, on_data, options);
        completion.future()
    }

    /// Folds the stream into a single value starting from `initial`.
    ///
    /// Resolves `initial` on an empty stream. A panicking `combine` — or an
    /// upstream fault — cancels and rejects.
    pub fn fold<A: Clone + 'static>(
        &self,
        initial: A,
        mut combine: impl FnMut(A, T) -> A + 'static,
    ) -> CompletionFuture<Result<A, StreamError>> {
        let completion = Completion::new();
        let slot: SubscriptionSlot<T> = Rc::default();
        let accumulator = Rc::new(RefCell::new(Some(initial)));

        let on_data = {
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            let accumulator = Rc::clone(&accumulator);
            move |value: T| {
                if completion.is_settled() {
                    return;
                }
                let Some(current) = accumulator.borrow_mut().take() else {
                    return;
                };
                match catch_unwind(AssertUnwindSafe(|| combine(current, value))) {
                    Ok(next) => *accumulator.borrow_mut() = Some(next),
                    Err(payload) => settle_and_cancel(
                        &slot,
                        &completion,
                        Err(Fault::from_panic(payload.as_ref()).into()),
                    ),
                }
            }
        };
        let options = self.reject_on_error(&completion, &slot).on_done({
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            let accumulator = Rc::clone(&accumulator);
            move || {
                if let Some(result) = accumulator.borrow_mut().take() {
                    settle_and_cancel(&slot, &completion, Ok(result));
                }
            }
        });

        self.aggregate(&completion, &slot, on_data, options);
        completion.future()
    }

    /// Collects every value into a `Vec`, in arrival order.
    ///
    /// An upstream fault rejects; the partial collection is discarded.
    pub fn to_vec(&self) -> CompletionFuture<Result<Vec<T>, StreamError>> {
        let completion = Completion::new();
        let slot: SubscriptionSlot<T> = Rc::default();
        let collected: Rc<RefCell<Vec<T>>> = Rc::default();

        let on_data = {
            let collected = Rc::clone(&collected);
            move |value: T| collected.borrow_mut().push(value)
        };
        let options = self.reject_on_error(&completion, &slot).on_done({
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            let collected = Rc::clone(&collected);
            move || {
                let values = std::mem::take(&mut *collected.borrow_mut());
                settle_and_cancel(&slot, &completion, Ok(values));
            }
        });

        self.aggregate(&completion, &slot, on_data, options);
        completion.future()
    }

    /// Collects the unique values into a `HashSet`.
    ///
    /// An upstream fault rejects; the partial collection is discarded.
    pub fn to_set(&self) -> CompletionFuture<Result<HashSet<T>, StreamError>>
    where
        T: Eq + Hash,
    {
        let completion = Completion::new();
        let slot: SubscriptionSlot<T> = Rc::default();
        let collected: Rc<RefCell<HashSet<T>>> = Rc::default();

        let on_data = {
            let collected = Rc::clone(&collected);
            move |value: T| {
                collected.borrow_mut().insert(value);
            }
        };
        let options = self.reject_on_error(&completion, &slot).on_done({
            let completion = completion.clone();
            let slot = Rc::clone(&slot);
            let collected = Rc::clone(&collected);
            move || {
                let values = std::mem::take(&mut *collected.borrow_mut());
                settle_and_cancel(&slot, &completion, Ok(values));
            }
        });

        self.aggregate(&completion, &slot, on_data, options);
        completion.future()
    }

    /// Listen options whose error handler cancels and rejects.
    fn reject_on_error<V: Clone + 'static>(
        &self,
        completion: &Completion<Result<V, StreamError>>,
        slot: &SubscriptionSlot<T>,
    ) -> ListenOptions {
        let completion = completion.clone();
        let slot = Rc::clone(slot);
        ListenOptions::new().on_error(move |fault| {
            settle_and_cancel(&slot, &completion, Err(fault.into()));
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use crate::stream::core::StreamKind;

    /// Helper: reactor plus a fresh single-consumer stream.
    fn make_stream() -> (Reactor, EventStream<i32>) {
        let reactor = Reactor::new();
        let stream = EventStream::new(reactor.handle(), StreamKind::Single);
        (reactor, stream)
    }

    /// Helper: stream pre-loaded with `values` and closed.
    fn closed_stream(values: &[i32]) -> (Reactor, EventStream<i32>) {
        let (reactor, stream) = make_stream();
        for &value in values {
            stream.push(value).unwrap();
        }
        stream.close_now();
        (reactor, stream)
    }

    // --- every ---

    #[test]
    fn test_every_all_match() {
        let (reactor, stream) = closed_stream(&[2, 4, 6]);
        let result = reactor.block_on(stream.every(|v| v % 2 == 0));
        assert_eq!(result, Ok(true));
    }

    #[test]
    fn test_every_short_circuits_on_mismatch() {
        let (reactor, stream) = closed_stream(&[2, 3, 4]);
        let result = reactor.block_on(stream.every(|v| v % 2 == 0));
        assert_eq!(result, Ok(false));
        // The aggregator cancelled before the stream finished flushing.
        assert!(!stream.has_subscribers());
    }

    #[test]
    fn test_every_panicking_predicate_resolves_false() {
        let (reactor, stream) = closed_stream(&[1, 2, 3]);
        let result = reactor.block_on(stream.every(|&v| {
            assert!(v != 2, "probe");
            true
        }));
        assert_eq!(result, Ok(false));
    }

    #[test]
    fn test_every_rejects_on_fault() {
        let (reactor, stream) = make_stream();
        let pending = stream.every(|_| true);
        stream.push(1).unwrap();
        stream.push_error(Fault::new("broken")).unwrap();
        stream.close_now();

        let result = reactor.block_on(pending);
        assert_eq!(result, Err(StreamError::Fault(Fault::new("broken"))));
    }

    #[test]
    fn test_every_empty_stream_is_true() {
        let (reactor, stream) = closed_stream(&[]);
        assert_eq!(reactor.block_on(stream.every(|_| false)), Ok(true));
    }

    // --- first ---

    #[test]
    fn test_first_resolves_and_cancels() {
        let (reactor, stream) = closed_stream(&[7, 8, 9]);
        assert_eq!(reactor.block_on(stream.first()), Ok(7));
        assert!(!stream.has_subscribers());
    }

    #[test]
    fn test_first_empty_stream_exhausted() {
        let (reactor, stream) = closed_stream(&[]);
        assert_eq!(reactor.block_on(stream.first()), Err(StreamError::Exhausted));
    }

    #[test]
    fn test_first_error_before_data_rejects() {
        let (reactor, stream) = make_stream();
        let pending = stream.first();
        stream.push_error(Fault::new("early")).unwrap();
        stream.push(1).unwrap();
        stream.close_now();

        let result = reactor.block_on(pending);
        assert_eq!(result, Err(StreamError::Fault(Fault::new("early"))));
    }

    // --- first_where ---

    #[test]
    fn test_first_where_finds_match() {
        let (reactor, stream) = closed_stream(&[1, 3, 4, 5]);
        let result = reactor.block_on(stream.first_where(|v| v % 2 == 0));
        assert_eq!(result, Ok(4));
    }

    #[test]
    fn test_first_where_no_match_exhausted() {
        let (reactor, stream) = closed_stream(&[1, 3, 5]);
        let result = reactor.block_on(stream.first_where(|v| v % 2 == 0));
        assert_eq!(result, Err(StreamError::Exhausted));
    }

    #[test]
    fn test_first_where_panicking_predicate_rejects() {
        let (reactor, stream) = closed_stream(&[1, 2, 3]);
        let result = reactor.block_on(stream.first_where(|&v| {
            assert!(v != 2, "boom");
            false
        }));
        let Err(StreamError::Fault(fault)) = result else {
            panic!("expected fault, got {result:?}");
        };
        assert!(fault.message().contains("callback panicked"));
    }

    // --- for_each ---

    #[test]
    fn test_for_each_visits_in_order() {
        let (reactor, stream) = closed_stream(&[1, 2, 3]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let result = {
            let seen = Rc::clone(&seen);
            reactor.block_on(stream.for_each(move |v| seen.borrow_mut().push(v)))
        };
        assert_eq!(result, Ok(()));
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_for_each_panicking_action_rejects_and_stops() {
        let (reactor, stream) = closed_stream(&[1, 2, 3]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let result = {
            let seen = Rc::clone(&seen);
            reactor.block_on(stream.for_each(move |v| {
                seen.borrow_mut().push(v);
                assert!(v != 2, "action failed");
            }))
        };
        assert!(matches!(result, Err(StreamError::Fault(_))));
        // 3 was never delivered.
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_for_each_rejects_on_fault() {
        let (reactor, stream) = make_stream();
        let pending = stream.for_each(|_| {});
        stream.push(1).unwrap();
        stream.push_error(Fault::new("mid-stream")).unwrap();
        stream.push(2).unwrap();
        stream.close_now();

        let result = reactor.block_on(pending);
        assert_eq!(result, Err(StreamError::Fault(Fault::new("mid-stream"))));
    }

    // --- reduce / fold ---

    #[test]
    fn test_reduce_seeds_from_first_value() {
        let (reactor, stream) = closed_stream(&[0, 1, 2, 3, 4]);
        assert_eq!(reactor.block_on(stream.reduce(|a, b| a + b)), Ok(10));
    }

    #[test]
    fn test_reduce_single_value() {
        let (reactor, stream) = closed_stream(&[5]);
        assert_eq!(reactor.block_on(stream.reduce(|a, b| a + b)), Ok(5));
    }

    #[test]
    fn test_reduce_empty_stream_exhausted() {
        let (reactor, stream) = closed_stream(&[]);
        assert_eq!(
            reactor.block_on(stream.reduce(|a, b| a + b)),
            Err(StreamError::Exhausted)
        );
    }

    #[test]
    fn test_fold_with_initial_value() {
        let (reactor, stream) = closed_stream(&[0, 1, 2, 3, 4]);
        assert_eq!(reactor.block_on(stream.fold(10, |a, b| a + b)), Ok(20));
    }

    #[test]
    fn test_fold_empty_stream_returns_initial() {
        let (reactor, stream) = closed_stream(&[]);
        assert_eq!(reactor.block_on(stream.fold(10, |a, b| a + b)), Ok(10));
    }

    #[test]
    fn test_fold_panicking_combine_rejects() {
        let (reactor, stream) = closed_stream(&[1, 2]);
        let result = reactor.block_on(stream.fold(0, |_, _| -> i32 { panic!("combine failed") }));
        assert!(matches!(result, Err(StreamError::Fault(_))));
        assert!(!stream.has_subscribers());
    }

    // --- to_vec / to_set ---

    #[test]
    fn test_to_vec_collects_in_order() {
        let (reactor, stream) = closed_stream(&[3, 1, 2]);
        assert_eq!(reactor.block_on(stream.to_vec()), Ok(vec![3, 1, 2]));
    }

    #[test]
    fn test_to_vec_rejects_on_fault() {
        let (reactor, stream) = make_stream();
        let pending = stream.to_vec();
        stream.push(1).unwrap();
        stream.push_error(Fault::new("lost")).unwrap();
        stream.close_now();

        assert_eq!(
            reactor.block_on(pending),
            Err(StreamError::Fault(Fault::new("lost")))
        );
    }

    #[test]
    fn test_to_set_dedupes() {
        let (reactor, stream) = closed_stream(&[1, 2, 2, 3, 1]);
        let set = reactor.block_on(stream.to_set()).unwrap();
        assert_eq!(set, HashSet::from([1, 2, 3]));
    }

    // --- listen failure ---

    #[test]
    fn test_aggregator_on_busy_stream_rejects() {
        let (reactor, stream) = make_stream();
        stream.listen(|_| {}, ListenOptions::new()).unwrap();

        let result = reactor.block_on(stream.to_vec());
        assert_eq!(result, Err(StreamError::AlreadyListening));
    }
}
