//! Derived-stream combinators.
//!
//! Every combinator produces a child stream holding a lazy link to its
//! parent: the first `listen` on the child subscribes to the parent with
//! handlers that republish a transformed subset of the parent's messages
//! into the child. Closing the child cancels the parent subscription, so a
//! bounded combinator like `take` stops upstream delivery as soon as it has
//! seen enough.
//!
//! The combinators form a closed set of variants ([`FilterOp`]) dispatched
//! through one `apply` operation; `map` is wired separately because it alone
//! changes the item type.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use super::core::{self, StreamKind, Upstream, WeakCore};
use super::error::StreamError;
use super::handle::EventStream;
use super::message::Message;
use super::subscription::{ListenOptions, Subscription};

// ---------------------------------------------------------------------------
// RelayStep / FilterOp
// ---------------------------------------------------------------------------

/// What a combinator decided to do with one inbound value.
pub(crate) enum RelayStep<T> {
    /// Republish the value.
    Emit(T),
    /// Republish the value, then close the derived stream.
    Last(T),
    /// Drop the value silently.
    Skip,
    /// Close the derived stream without republishing.
    Close,
}

/// The closed set of same-type filtering combinators, each carrying its
/// variant state.
pub(crate) enum FilterOp<T> {
    /// Republish values matching the predicate. A panicking predicate
    /// propagates — it is **not** treated as a control signal here.
    Where(Box<dyn FnMut(&T) -> bool>),
    /// Republish the first `remaining` values, then close.
    Take {
        /// Values still to republish before closing.
        remaining: usize,
    },
    /// Republish while the predicate holds; the first non-matching (or
    /// panicking) value closes the stream without being republished.
    TakeWhile(Box<dyn FnMut(&T) -> bool>),
    /// Drop the first `remaining` values, republish the rest.
    Skip {
        /// Values still to drop.
        remaining: usize,
    },
    /// Drop values while the predicate holds; the first non-matching (or
    /// panicking) value flips skipping off and is republished.
    SkipWhile {
        /// The skip predicate.
        predicate: Box<dyn FnMut(&T) -> bool>,
        /// Still in the skipping phase.
        skipping: bool,
    },
}

impl<T> FilterOp<T> {
    /// Applies this combinator to one value.
    pub(crate) fn apply(&mut self, value: T) -> RelayStep<T> {
        match self {
            Self::Where(predicate) => {
                if predicate(&value) {
                    RelayStep::Emit(value)
                } else {
                    RelayStep::Skip
                }
            }
            Self::Take { remaining } => {
                if *remaining == 0 {
                    return RelayStep::Close;
                }
                *remaining -= 1;
                if *remaining == 0 {
                    RelayStep::Last(value)
                } else {
                    RelayStep::Emit(value)
                }
            }
            Self::TakeWhile(predicate) => {
                // A panicking predicate means "stop taking", silently.
                match catch_unwind(AssertUnwindSafe(|| predicate(&value))) {
                    Ok(true) => RelayStep::Emit(value),
                    Ok(false) | Err(_) => RelayStep::Close,
                }
            }
            Self::Skip { remaining } => {
                if *remaining > 0 {
                    *remaining -= 1;
                    RelayStep::Skip
                } else {
                    RelayStep::Emit(value)
                }
            }
            Self::SkipWhile {
                predicate,
                skipping,
            } => {
                if !*skipping {
                    return RelayStep::Emit(value);
                }
                // A panicking predicate means "stop skipping".
                match catch_unwind(AssertUnwindSafe(|| predicate(&value))) {
                    Ok(true) => RelayStep::Skip,
                    Ok(false) | Err(_) => {
                        *skipping = false;
                        RelayStep::Emit(value)
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Child-side wiring helpers
// ---------------------------------------------------------------------------

/// Routes one relay decision into the child stream. No-op once the child is
/// gone or closed (in-flight parent messages after a `take`-triggered close
/// land here).
pub(crate) fn apply_step<T: Clone + 'static>(child: &WeakCore<T>, step: RelayStep<T>) {
    let Some(core_ref) = child.upgrade() else {
        return;
    };
    match step {
        RelayStep::Emit(value) => {
            let _ = core::push_message(&core_ref, Message::Data(value));
        }
        RelayStep::Last(value) => {
            let _ = core::push_message(&core_ref, Message::Data(value));
            core::close_stream(&core_ref);
        }
        RelayStep::Skip => {}
        RelayStep::Close => core::close_stream(&core_ref),
    }
}

/// Listen options forwarding parent errors and completion into the child.
pub(crate) fn relay_options<T: Clone + 'static>(child: &WeakCore<T>) -> ListenOptions {
    let error_child = child.clone();
    let done_child = child.clone();
    ListenOptions::new()
        .on_error(move |fault| {
            if let Some(core_ref) = error_child.upgrade() {
                let _ = core::push_message(&core_ref, Message::Error(fault));
            }
        })
        .on_done(move || {
            if let Some(core_ref) = done_child.upgrade() {
                core::close_stream(&core_ref);
            }
        })
}

// ---------------------------------------------------------------------------
// Upstream links
// ---------------------------------------------------------------------------

/// Lazy parent link for the same-type filtering combinators.
struct FilterLink<T> {
    parent: EventStream<T>,
    child: WeakCore<T>,
    op: Rc<RefCell<FilterOp<T>>>,
    subscription: Option<Subscription<T>>,
}

impl<T: Clone + 'static> Upstream for FilterLink<T> {
    fn attach(&mut self) -> Result<(), StreamError> {
        let child = self.child.clone();
        let op = Rc::clone(&self.op);
        let on_data = move |value: T| {
            let step = op.borrow_mut().apply(value);
            apply_step(&child, step);
        };
        self.subscription = Some(self.parent.listen(on_data, relay_options(&self.child))?);
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    fn cancel(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }
}

/// Lazy parent link for `map`, the one type-changing combinator.
struct MapLink<P, T> {
    parent: EventStream<P>,
    child: WeakCore<T>,
    transform: Rc<RefCell<dyn FnMut(P) -> T>>,
    subscription: Option<Subscription<P>>,
}

impl<P: Clone + 'static, T: Clone + 'static> Upstream for MapLink<P, T> {
    fn attach(&mut self) -> Result<(), StreamError> {
        let child = self.child.clone();
        let transform = Rc::clone(&self.transform);
        let on_data = move |value: P| {
            // A panicking transform propagates as an uncaught failure.
            let mapped = (&mut *transform.borrow_mut())(value);
            apply_step(&child, RelayStep::Emit(mapped));
        };
        self.subscription = Some(self.parent.listen(on_data, relay_options(&self.child))?);
        Ok(())
    }

    fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    fn cancel(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Combinator constructors
// ---------------------------------------------------------------------------

impl<T: Clone + 'static> EventStream<T> {
    fn derive(&self, op: FilterOp<T>) -> EventStream<T> {
        let child = EventStream::new(self.scheduler(), StreamKind::Single);
        let link = FilterLink {
            parent: self.clone(),
            child: Rc::downgrade(&child.core),
            op: Rc::new(RefCell::new(op)),
            subscription: None,
        };
        child.core.borrow_mut().upstream = Some(Box::new(link));
        child
    }

    /// Derives a stream republishing `transform(value)` for every value.
    ///
    /// Errors and completion pass through unchanged. A panicking transform
    /// propagates out of the delivery pump.
    pub fn map<U: Clone + 'static>(
        &self,
        transform: impl FnMut(T) -> U + 'static,
    ) -> EventStream<U> {
        let transform: Rc<RefCell<dyn FnMut(T) -> U>> = Rc::new(RefCell::new(transform));
        let child = EventStream::new(self.scheduler(), StreamKind::Single);
        let link = MapLink {
            parent: self.clone(),
            child: Rc::downgrade(&child.core),
            transform,
            subscription: None,
        };
        child.core.borrow_mut().upstream = Some(Box::new(link));
        child
    }

    /// Derives a stream republishing only values matching the predicate.
    ///
    /// A panicking predicate propagates — unlike
    /// [`take_while`](Self::take_while) and [`skip_while`](Self::skip_while),
    /// which treat it as a control signal.
    pub fn where_(&self, predicate: impl FnMut(&T) -> bool + 'static) -> EventStream<T> {
        self.derive(FilterOp::Where(Box::new(predicate)))
    }

    /// Derives a stream republishing the first `count` values, then closing.
    ///
    /// Closing cancels the parent subscription, bounding upstream delivery.
    #[must_use]
    pub fn take(&self, count: usize) -> EventStream<T> {
        self.derive(FilterOp::Take { remaining: count })
    }

    /// Derives a stream republishing values while the predicate holds.
    ///
    /// The first value for which the predicate returns `false` — or panics —
    /// closes the stream without being republished.
    pub fn take_while(&self, predicate: impl FnMut(&T) -> bool + 'static) -> EventStream<T> {
        self.derive(FilterOp::TakeWhile(Box::new(predicate)))
    }

    /// Derives a stream dropping the first `count` values.
    #[must_use]
    pub fn skip(&self, count: usize) -> EventStream<T> {
        self.derive(FilterOp::Skip { remaining: count })
    }

    /// Derives a stream dropping values while the predicate holds.
    ///
    /// The first value for which the predicate returns `false` — or panics —
    /// is republished, and every value after it unconditionally.
    pub fn skip_while(&self, predicate: impl FnMut(&T) -> bool + 'static) -> EventStream<T> {
        self.derive(FilterOp::SkipWhile {
            predicate: Box::new(predicate),
            skipping: true,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::reactor::Reactor;
    use crate::stream::error::Fault;

    /// Helper: reactor plus a fresh single-consumer parent stream.
    fn make_parent() -> (Reactor, EventStream<i32>) {
        let reactor = Reactor::new();
        let parent = EventStream::new(reactor.handle(), StreamKind::Single);
        (reactor, parent)
    }

    /// Helper: collect everything a derived stream produces for `values`.
    fn run_through(
        reactor: &Reactor,
        parent: &EventStream<i32>,
        derived: &EventStream<i32>,
        values: &[i32],
    ) -> Vec<i32> {
        let collected = derived.to_vec();
        for &value in values {
            parent.push(value).unwrap();
        }
        parent.close_now();
        reactor.block_on(collected).unwrap()
    }

    // --- map ---

    #[test]
    fn test_map_transforms_values() {
        let (reactor, parent) = make_parent();
        let doubled = parent.map(|v| v * 2);
        let out = run_through(&reactor, &parent, &doubled, &[1, 2, 3]);
        assert_eq!(out, vec![2, 4, 6]);
    }

    #[test]
    fn test_map_changes_type() {
        let (reactor, parent) = make_parent();
        let labels = parent.map(|v| format!("#{v}"));

        let collected = labels.to_vec();
        parent.push(7).unwrap();
        parent.close_now();
        assert_eq!(reactor.block_on(collected).unwrap(), vec!["#7"]);
    }

    #[test]
    fn test_map_forwards_errors() {
        let (reactor, parent) = make_parent();
        let mapped = parent.map(|v| v + 1);

        let collected = mapped.to_vec();
        parent.push(1).unwrap();
        parent.push_error(Fault::new("bad")).unwrap();
        parent.close_now();

        let result = reactor.block_on(collected);
        assert_eq!(result, Err(StreamError::Fault(Fault::new("bad"))));
    }

    #[test]
    #[should_panic(expected = "transform blew up")]
    fn test_map_panic_propagates() {
        let (reactor, parent) = make_parent();
        let mapped = parent.map(|_: i32| -> i32 { panic!("transform blew up") });

        let _collected = mapped.to_vec();
        parent.push(1).unwrap();
        reactor.run_until_idle();
    }

    // --- where_ ---

    #[test]
    fn test_where_filters() {
        let (reactor, parent) = make_parent();
        let evens = parent.where_(|v| v % 2 == 0);
        let out = run_through(&reactor, &parent, &evens, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(out, vec![2, 4, 6]);
    }

    #[test]
    #[should_panic(expected = "predicate blew up")]
    fn test_where_panic_propagates() {
        let (reactor, parent) = make_parent();
        let filtered = parent.where_(|_| panic!("predicate blew up"));

        let _collected = filtered.to_vec();
        parent.push(1).unwrap();
        reactor.run_until_idle();
    }

    // --- take ---

    #[test]
    fn test_take_bounds_output() {
        let (reactor, parent) = make_parent();
        let limited = parent.take(3);

        let received = Rc::new(RefCell::new(Vec::new()));
        let done = Rc::new(Cell::new(false));
        {
            let received = Rc::clone(&received);
            let done = Rc::clone(&done);
            limited
                .listen(
                    move |v| received.borrow_mut().push(v),
                    ListenOptions::new()
                        .on_done(move || done.set(true)),
                )
                .unwrap();
        }

        for i in 0..10 {
            parent.push(i).unwrap();
        }
        reactor.run_until_idle();

        assert_eq!(*received.borrow(), vec![0, 1, 2]);
        assert!(done.get());
        // The parent subscription was cancelled: upstream is unobserved
        // again even though the parent never closed.
        assert!(!parent.has_subscribers());
        assert!(!parent.is_closed());
    }

    #[test]
    fn test_take_more_than_available() {
        let (reactor, parent) = make_parent();
        let limited = parent.take(10);
        let out = run_through(&reactor, &parent, &limited, &[1, 2]);
        assert_eq!(out, vec![1, 2]);
    }

    // --- take_while ---

    #[test]
    fn test_take_while_stops_without_republishing() {
        let (reactor, parent) = make_parent();
        let prefix = parent.take_while(|&v| v < 3);
        let out = run_through(&reactor, &parent, &prefix, &[0, 1, 2, 3, 1, 0]);
        assert_eq!(out, vec![0, 1, 2]);
    }

    #[test]
    fn test_take_while_panic_is_stop_signal() {
        let (reactor, parent) = make_parent();
        let prefix = parent.take_while(|&v| {
            assert!(v < 2, "probe");
            true
        });
        // The panicking predicate closes the stream silently; 2 is dropped.
        let out = run_through(&reactor, &parent, &prefix, &[0, 1, 2, 3]);
        assert_eq!(out, vec![0, 1]);
    }

    // --- skip ---

    #[test]
    fn test_skip_drops_prefix() {
        let (reactor, parent) = make_parent();
        let rest = parent.skip(2);
        let out = run_through(&reactor, &parent, &rest, &[9, 9, 1, 2]);
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn test_skip_zero_is_identity() {
        let (reactor, parent) = make_parent();
        let all = parent.skip(0);
        let out = run_through(&reactor, &parent, &all, &[1, 2, 3]);
        assert_eq!(out, vec![1, 2, 3]);
    }

    // --- skip_while ---

    #[test]
    fn test_skip_while_drops_matching_prefix() {
        let (reactor, parent) = make_parent();
        let tail = parent.skip_while(|&v| v % 2 == 1);
        let out = run_through(
            &reactor,
            &parent,
            &tail,
            &[1, 3, 5, 7, 9, 10, 11, 12, 13],
        );
        assert_eq!(out, vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_skip_while_panic_stops_skipping() {
        let (reactor, parent) = make_parent();
        let tail = parent.skip_while(|&v| {
            assert!(v != 2, "probe");
            true
        });
        // The panicking value flips skipping off and is republished.
        let out = run_through(&reactor, &parent, &tail, &[0, 1, 2, 3]);
        assert_eq!(out, vec![2, 3]);
    }

    // --- Chains ---

    #[test]
    fn test_combinator_chain() {
        let (reactor, parent) = make_parent();
        let chained = parent.where_(|v| v % 2 == 0).map(|v| v / 2).take(2);
        let out = run_through(&reactor, &parent, &chained, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn test_derived_listen_propagates_parent_conflict() {
        let (_reactor, parent) = make_parent();
        // Someone already listens on the parent directly.
        parent
            .listen(|_| {}, ListenOptions::new())
            .unwrap();

        let derived = parent.map(|v| v);
        let error = derived
            .listen(|_| {}, ListenOptions::new())
            .unwrap_err();
        assert_eq!(error, StreamError::AlreadyListening);
    }
}
