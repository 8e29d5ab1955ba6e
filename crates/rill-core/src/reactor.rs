//! # Reactor Module
//!
//! The deferred-task queue every stream in this crate schedules its work on,
//! implementing a single-threaded reactor pattern.
//!
//! All message delivery and hook firing in the engine is *deferred*: a
//! producer call never runs listener code synchronously. Instead the stream
//! defers a delivery task on its [`Scheduler`], and the task runs when the
//! owner of the [`Reactor`] pumps it — either explicitly with
//! [`run_until_idle`](Reactor::run_until_idle) or implicitly while awaiting a
//! future with [`block_on`](Reactor::block_on).
//!
//! Tasks run in FIFO order among all tasks scheduled before any one of them
//! runs, which is the ordering guarantee the delivery pipeline builds on.
//!
//! The scheduling capability is injectable by construction: streams receive a
//! [`Scheduler`] handle when created and never reach for an ambient global,
//! so tests can drive delivery deterministically.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

/// A unit of deferred work.
pub(crate) type Task = Box<dyn FnOnce()>;

// ---------------------------------------------------------------------------
// WakeFlag
// ---------------------------------------------------------------------------

/// Waker backing for spawned futures: waking sets a flag the reactor checks
/// on its next pump cycle.
struct WakeFlag(AtomicBool);

impl WakeFlag {
    fn new(initially_woken: bool) -> Self {
        Self(AtomicBool::new(initially_woken))
    }

    /// Clears the flag, returning whether it was set.
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl Wake for WakeFlag {
    fn wake(self: Arc<Self>) {
        self.0.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Reactor internals
// ---------------------------------------------------------------------------

/// A spawned future plus the flag its waker sets.
struct Driver {
    future: Pin<Box<dyn Future<Output = ()>>>,
    woken: Arc<WakeFlag>,
}

struct ReactorInner {
    /// FIFO deferred-task queue.
    queue: RefCell<VecDeque<Task>>,
    /// Futures spawned onto the reactor (stream adapters use these).
    drivers: RefCell<Vec<Driver>>,
}

// ---------------------------------------------------------------------------
// Reactor
// ---------------------------------------------------------------------------

/// Single-threaded deferred-task reactor.
///
/// Owns the task queue that all streams created from its [`Scheduler`] handle
/// defer their delivery work onto. The reactor makes no progress on its own;
/// the caller pumps it with [`run_until_idle`](Self::run_until_idle) or
/// [`block_on`](Self::block_on).
pub struct Reactor {
    inner: Rc<ReactorInner>,
}

impl Reactor {
    /// Creates a new reactor with an empty task queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ReactorInner {
                queue: RefCell::new(VecDeque::new()),
                drivers: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Returns a cloneable [`Scheduler`] handle for creating streams.
    #[must_use]
    pub fn handle(&self) -> Scheduler {
        Scheduler {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Returns the number of tasks currently queued.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Runs queued tasks and polls spawned futures until no runnable work
    /// remains, including work scheduled by the tasks themselves.
    ///
    /// Returns the number of work items executed (tasks run plus futures
    /// polled).
    pub fn run_until_idle(&self) -> usize {
        let mut executed = 0;
        loop {
            let mut progressed = false;

            loop {
                let task = self.inner.queue.borrow_mut().pop_front();
                let Some(task) = task else { break };
                progressed = true;
                executed += 1;
                task();
            }

            executed += self.poll_drivers(&mut progressed);

            if !progressed {
                break;
            }
        }
        tracing::trace!(executed, "reactor idle");
        executed
    }

    /// Polls every spawned future whose waker has fired since its last poll.
    fn poll_drivers(&self, progressed: &mut bool) -> usize {
        let mut polled = 0;
        let drivers: Vec<Driver> = self.inner.drivers.borrow_mut().drain(..).collect();
        let mut kept = Vec::with_capacity(drivers.len());
        for mut driver in drivers {
            if driver.woken.take() {
                *progressed = true;
                polled += 1;
                let waker = Waker::from(Arc::clone(&driver.woken));
                let mut cx = Context::from_waker(&waker);
                match driver.future.as_mut().poll(&mut cx) {
                    Poll::Ready(()) => {}
                    Poll::Pending => kept.push(driver),
                }
            } else {
                kept.push(driver);
            }
        }
        // Futures spawned while polling were pushed onto the inner list;
        // keep them and re-add the still-pending ones.
        self.inner.drivers.borrow_mut().extend(kept);
        polled
    }

    /// Drives `future` to completion, pumping the reactor between polls.
    ///
    /// This is the bridge between the engine's deferred-task world and
    /// `async`: aggregator futures resolve once the deliveries they depend on
    /// have run.
    ///
    /// # Panics
    ///
    /// Panics if the future is still pending when the reactor has no runnable
    /// work left — in a deterministic single-threaded domain that future can
    /// never complete.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let flag = Arc::new(WakeFlag::new(true));
        let waker = Waker::from(Arc::clone(&flag));
        let mut cx = Context::from_waker(&waker);
        let mut future = std::pin::pin!(future);

        loop {
            if let Poll::Ready(value) = future.as_mut().poll(&mut cx) {
                return value;
            }
            if self.run_until_idle() == 0 {
                panic!("reactor deadlock: future is pending but no runnable work remains");
            }
        }
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Cloneable handle onto a [`Reactor`]'s task queue.
///
/// Streams hold one of these and defer all delivery and hook firing through
/// it. Handles keep the queue alive independently of the `Reactor` value.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<ReactorInner>,
}

impl Scheduler {
    /// Defers `task` to run on the next pump, after every task already
    /// queued.
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.inner.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Spawns a future onto the reactor. It is polled during
    /// [`Reactor::run_until_idle`] whenever its waker has fired.
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        self.inner.drivers.borrow_mut().push(Driver {
            future: Box::pin(future),
            woken: Arc::new(WakeFlag::new(true)),
        });
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending_tasks", &self.inner.queue.borrow().len())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
