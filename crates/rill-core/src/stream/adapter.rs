//! Constructing streams from futures.
//!
//! Bridges externally produced asynchronous values into the stream world:
//! a fulfilled future becomes `add` + `close`, a rejected one becomes
//! `add_error` + `close`. With several sources the stream closes only after
//! every one has settled, success or failure alike.

use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

use crate::reactor::Scheduler;

use super::core::StreamKind;
use super::error::Fault;
use super::handle::EventStream;

impl<T: Clone + 'static> EventStream<T> {
    /// Creates a stream producing the single settled value of `future`.
    ///
    /// On `Ok(value)` the stream delivers the value and completes; on
    /// `Err(fault)` it delivers the fault and completes.
    pub fn from_future<F>(scheduler: &Scheduler, future: F) -> EventStream<T>
    where
        F: Future<Output = Result<T, Fault>> + 'static,
    {
        let stream = EventStream::new(scheduler.clone(), StreamKind::Single);
        let producer = stream.clone();
        scheduler.spawn(async move {
            match future.await {
                Ok(value) => {
                    let _ = producer.push(value);
                }
                Err(fault) => {
                    let _ = producer.push_error(fault);
                }
            }
            producer.close_now();
        });
        stream
    }

    /// Creates a stream producing the settled value of every future, in
    /// settlement order, closing once all have settled.
    ///
    /// Rejections are delivered as faults; they count as settled, so one
    /// failing source does not hold the stream open.
    pub fn from_futures<I, F>(scheduler: &Scheduler, futures: I) -> EventStream<T>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, Fault>> + 'static,
    {
        let stream = EventStream::new(scheduler.clone(), StreamKind::Single);
        let futures: Vec<F> = futures.into_iter().collect();

        if futures.is_empty() {
            stream.close_now();
            return stream;
        }

        let remaining = Rc::new(Cell::new(futures.len()));
        for future in futures {
            let producer = stream.clone();
            let remaining = Rc::clone(&remaining);
            scheduler.spawn(async move {
                match future.await {
                    Ok(value) => {
                        let _ = producer.push(value);
                    }
                    Err(fault) => {
                        let _ = producer.push_error(fault);
                    }
                }
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    producer.close_now();
                }
            });
        }
        stream
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use crate::stream::completion::Completion;
    use crate::stream::error::StreamError;

    #[test]
    fn test_from_future_value_then_close() {
        let reactor = Reactor::new();
        let stream =
            EventStream::from_future(&reactor.handle(), async { Ok::<_, Fault>(5) });

        let values = reactor.block_on(stream.to_vec()).unwrap();
        assert_eq!(values, vec![5]);
        assert!(stream.is_closed());
    }

    #[test]
    fn test_from_future_rejection_becomes_fault() {
        let reactor = Reactor::new();
        let stream = EventStream::<i32>::from_future(&reactor.handle(), async {
            Err(Fault::new("upstream failed"))
        });

        let result = reactor.block_on(stream.to_vec());
        assert_eq!(
            result,
            Err(StreamError::Fault(Fault::new("upstream failed")))
        );
    }

    #[test]
    fn test_from_future_pending_until_settled() {
        let reactor = Reactor::new();
        let gate: Completion<Result<i32, Fault>> = Completion::new();
        let stream = EventStream::from_future(&reactor.handle(), gate.future());

        reactor.run_until_idle();
        assert!(!stream.is_closed());

        gate.settle(Ok(3));
        let values = reactor.block_on(stream.to_vec()).unwrap();
        assert_eq!(values, vec![3]);
    }

    #[test]
    fn test_from_futures_closes_after_all_settle() {
        let reactor = Reactor::new();
        let first: Completion<Result<i32, Fault>> = Completion::new();
        let second: Completion<Result<i32, Fault>> = Completion::new();
        let stream = EventStream::from_futures(
            &reactor.handle(),
            vec![first.future(), second.future()],
        );

        first.settle(Ok(1));
        reactor.run_until_idle();
        assert!(!stream.is_closed());

        second.settle(Ok(2));
        let values = reactor.block_on(stream.to_vec()).unwrap();
        assert_eq!(values, vec![1, 2]);
        assert!(stream.is_closed());
    }

    #[test]
    fn test_from_futures_mixed_settlements() {
        let reactor = Reactor::new();
        let ok: Completion<Result<i32, Fault>> = Completion::settled(Ok(1));
        let err: Completion<Result<i32, Fault>> =
            Completion::settled(Err(Fault::new("one bad source")));
        let stream =
            EventStream::from_futures(&reactor.handle(), vec![ok.future(), err.future()]);

        let faults = Rc::new(std::cell::RefCell::new(Vec::new()));
        let values = Rc::new(std::cell::RefCell::new(Vec::new()));
        let closed = Rc::new(Cell::new(false));
        {
            let values = Rc::clone(&values);
            let faults = Rc::clone(&faults);
            let closed = Rc::clone(&closed);
            stream
                .listen(
                    move |v| values.borrow_mut().push(v),
                    crate::stream::subscription::ListenOptions::new()
                        .on_error(move |fault| faults.borrow_mut().push(fault))
                        .on_done(move || closed.set(true)),
                )
                .unwrap();
        }

        reactor.run_until_idle();
        assert_eq!(*values.borrow(), vec![1]);
        assert_eq!(faults.borrow().len(), 1);
        assert!(closed.get());
    }

    #[test]
    fn test_from_futures_empty_closes_immediately() {
        let reactor = Reactor::new();
        let stream = EventStream::<i32>::from_futures(
            &reactor.handle(),
            Vec::<std::future::Ready<Result<i32, Fault>>>::new(),
        );
        assert!(stream.is_closed());
        let values = reactor.block_on(stream.to_vec()).unwrap();
        assert!(values.is_empty());
    }
}
