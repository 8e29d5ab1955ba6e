//! Shared stream state and the deferred delivery pipeline.
//!
//! Everything here is crate-internal. A stream is a `Rc<RefCell<StreamCore>>`
//! shared between the public handles ([`EventStream`], [`Subscription`],
//! [`Publisher`]); the free functions in this module implement the delivery
//! algorithm over that shared core.
//!
//! Two invariants shape the code:
//!
//! 1. **Deferred dispatch** — producer calls only mutate buffers and defer a
//!    task; listener callbacks run from reactor tasks, never synchronously
//!    inside the producer call.
//! 2. **Borrow discipline** — user callbacks are always invoked with the
//!    core `RefCell` released, so a listener may pause, resume, or cancel
//!    its own subscription reentrantly. Callback boxes live in their own
//!    `Rc<RefCell<_>>` cell for exactly this reason.
//!
//! [`EventStream`]: super::handle::EventStream
//! [`Subscription`]: super::subscription::Subscription
//! [`Publisher`]: super::publisher::Publisher

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use fxhash::FxHashMap;
use smallvec::SmallVec;

use crate::reactor::Scheduler;

use super::error::{Fault, StreamError};
use super::handle::{HookId, StreamEvent};
use super::message::Message;
use super::subscription::{ListenOptions, SubscriptionId};

pub(crate) type CoreRef<T> = Rc<RefCell<StreamCore<T>>>;
pub(crate) type WeakCore<T> = Weak<RefCell<StreamCore<T>>>;

// ---------------------------------------------------------------------------
// Subscriber state
// ---------------------------------------------------------------------------

/// The callback set registered by `listen`.
///
/// Kept in its own cell, separate from the core, so dispatch can call into
/// user code without holding the core borrow.
pub(crate) struct SubscriberCallbacks<T> {
    pub on_data: Box<dyn FnMut(T)>,
    pub on_error: Option<Box<dyn FnMut(Fault)>>,
    pub on_done: Option<Box<dyn FnMut()>>,
    pub on_pause: Option<Box<dyn FnMut()>>,
    pub on_resume: Option<Box<dyn FnMut()>>,
}

/// Core-side state for one live subscription.
pub(crate) struct SubscriberEntry<T> {
    callbacks: Rc<RefCell<SubscriberCallbacks<T>>>,
    /// Messages pushed by the stream, not yet handed to the callbacks.
    inbound: VecDeque<Message<T>>,
    paused: bool,
    /// Guard: a flush in progress must not be entered twice.
    flushing: bool,
    cancel_on_error: bool,
    /// Data messages handed to the listener so far.
    delivered: u64,
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

type HookSlot = (HookId, Rc<RefCell<dyn FnMut()>>);

/// Per-event hook callback lists, insertion order preserved.
pub(crate) struct HookTable {
    slots: [SmallVec<[HookSlot; 2]>; 4],
    next_id: u64,
}

impl HookTable {
    fn new() -> Self {
        Self {
            slots: [SmallVec::new(), SmallVec::new(), SmallVec::new(), SmallVec::new()],
            next_id: 1,
        }
    }

    pub(crate) fn insert(&mut self, event: StreamEvent, hook: impl FnMut() + 'static) -> HookId {
        let id = HookId(self.next_id);
        self.next_id += 1;
        let hook: Rc<RefCell<dyn FnMut()>> = Rc::new(RefCell::new(hook));
        self.slots[event.index()].push((id, hook));
        id
    }

    pub(crate) fn remove(&mut self, event: StreamEvent, id: HookId) -> bool {
        let slot = &mut self.slots[event.index()];
        let before = slot.len();
        slot.retain(|(hook_id, _)| *hook_id != id);
        slot.len() != before
    }

    fn snapshot(&self, event: StreamEvent) -> Vec<Rc<RefCell<dyn FnMut()>>> {
        self.slots[event.index()]
            .iter()
            .map(|(_, hook)| Rc::clone(hook))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// StreamCore
// ---------------------------------------------------------------------------

/// Which delivery discipline the stream follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    /// Buffered, at most one subscriber.
    Single,
    /// Unbuffered fan-out to any number of subscribers.
    Broadcast,
}

/// The lazily attached link from a derived or broadcast stream to its
/// parent. Erases the parent's item type.
pub(crate) trait Upstream {
    /// Subscribes to the parent stream. Called on the first `listen`.
    fn attach(&mut self) -> Result<(), StreamError>;
    /// Whether `attach` has already succeeded.
    fn is_attached(&self) -> bool;
    /// Cancels the parent subscription. Idempotent.
    fn cancel(&mut self);
}

/// Shared mutable state of one stream.
pub(crate) struct StreamCore<T> {
    pub(crate) scheduler: Scheduler,
    pub(crate) kind: StreamKind,
    /// Monotonic: once set it never resets.
    pub(crate) closed: bool,
    /// Single-kind only; driven by the subscription's pause/resume.
    pub(crate) paused: bool,
    /// Outbound buffer (single kind). Broadcast never buffers here.
    pub(crate) buffer: VecDeque<Message<T>>,
    subscribers: FxHashMap<SubscriptionId, SubscriberEntry<T>>,
    /// Subscriber iteration order (insertion order).
    order: Vec<SubscriptionId>,
    next_subscriber: u64,
    pub(crate) hooks: HookTable,
    /// Lazy link to the parent stream, for derived and broadcast variants.
    pub(crate) upstream: Option<Box<dyn Upstream>>,
    /// At most one delivery task queued at a time.
    flush_scheduled: bool,
}

impl<T> StreamCore<T> {
    pub(crate) fn new(scheduler: Scheduler, kind: StreamKind) -> CoreRef<T> {
        Rc::new(RefCell::new(Self {
            scheduler,
            kind,
            closed: false,
            paused: false,
            buffer: VecDeque::new(),
            subscribers: FxHashMap::default(),
            order: Vec::new(),
            next_subscriber: 1,
            hooks: HookTable::new(),
            upstream: None,
            flush_scheduled: false,
        }))
    }

    pub(crate) fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }
}

/// Defers the hook callbacks registered for `event`, in insertion order.
pub(crate) fn fire_hooks<T>(core: &mut StreamCore<T>, event: StreamEvent) {
    let hooks = core.hooks.snapshot(event);
    if hooks.is_empty() {
        return;
    }
    core.scheduler.defer(move || {
        for hook in hooks {
            (&mut *hook.borrow_mut())();
        }
    });
}

// ---------------------------------------------------------------------------
// Producer side
// ---------------------------------------------------------------------------

/// Accepts a message from the producer and routes it per the stream kind.
///
/// Single: append to the outbound buffer and defer a flush. Broadcast: defer
/// a fan-out to the subscribers present right now; nothing is buffered.
pub(crate) fn push_message<T: Clone + 'static>(
    core_ref: &CoreRef<T>,
    message: Message<T>,
) -> Result<(), StreamError> {
    let mut core = core_ref.borrow_mut();
    if core.closed {
        return Err(StreamError::Closed);
    }
    match core.kind {
        StreamKind::Single => {
            core.buffer.push_back(message);
            drop(core);
            schedule_flush(core_ref);
        }
        StreamKind::Broadcast => {
            drop(core);
            fan_out(core_ref, message);
        }
    }
    Ok(())
}

/// Closes the stream: cancels any upstream link, marks it closed, and routes
/// a final `Done` message. Idempotent.
pub(crate) fn close_stream<T: Clone + 'static>(core_ref: &CoreRef<T>) {
    let upstream = {
        let mut core = core_ref.borrow_mut();
        if core.closed {
            return;
        }
        core.closed = true;
        core.upstream.take()
    };
    if let Some(mut upstream) = upstream {
        upstream.cancel();
    }
    tracing::debug!("stream closed");
    let kind = {
        let mut core = core_ref.borrow_mut();
        if core.kind == StreamKind::Single {
            core.buffer.push_back(Message::Done);
        }
        core.kind
    };
    match kind {
        StreamKind::Single => schedule_flush(core_ref),
        StreamKind::Broadcast => fan_out(core_ref, Message::Done),
    }
}

/// Fans `message` out to the subscribers attached at this moment.
///
/// The id snapshot is taken now; delivery happens on the next tick and skips
/// ids cancelled in between. Subscribers attaching after the snapshot never
/// see the message.
fn fan_out<T: Clone + 'static>(core_ref: &CoreRef<T>, message: Message<T>) {
    let (ids, scheduler) = {
        let core = core_ref.borrow();
        (core.order.clone(), core.scheduler.clone())
    };
    if ids.is_empty() {
        return;
    }
    let weak = Rc::downgrade(core_ref);
    scheduler.defer(move || {
        let Some(core_ref) = weak.upgrade() else { return };
        for id in ids {
            enqueue_for(&core_ref, id, message.clone());
        }
    });
}

/// Pushes a message straight into one subscriber's inbound buffer and
/// flushes it. No-op if the subscriber was cancelled.
fn enqueue_for<T: Clone + 'static>(core_ref: &CoreRef<T>, id: SubscriptionId, message: Message<T>) {
    {
        let mut core = core_ref.borrow_mut();
        let Some(entry) = core.subscribers.get_mut(&id) else {
            return;
        };
        entry.inbound.push_back(message);
    }
    flush_subscriber(core_ref, id);
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Defers one flush of the outbound buffer, if none is already queued.
pub(crate) fn schedule_flush<T: Clone + 'static>(core_ref: &CoreRef<T>) {
    let scheduler = {
        let mut core = core_ref.borrow_mut();
        if core.flush_scheduled {
            return;
        }
        core.flush_scheduled = true;
        core.scheduler.clone()
    };
    let weak = Rc::downgrade(core_ref);
    scheduler.defer(move || {
        if let Some(core_ref) = weak.upgrade() {
            flush(&core_ref);
        }
    });
}

/// Drains the outbound buffer into the active subscriber and pumps it.
///
/// If the stream is paused or unobserved, the buffer is left in place. After
/// a closed stream has handed everything (including `Done`) to its
/// subscriber, the subscription is torn down so `Done` is observed exactly
/// once.
fn flush<T: Clone + 'static>(core_ref: &CoreRef<T>) {
    let id = {
        let mut core = core_ref.borrow_mut();
        core.flush_scheduled = false;
        if core.paused {
            return;
        }
        let Some(&id) = core.order.first() else {
            return;
        };
        let drained: Vec<Message<T>> = core.buffer.drain(..).collect();
        let Some(entry) = core.subscribers.get_mut(&id) else {
            return;
        };
        entry.inbound.extend(drained);
        id
    };

    flush_subscriber(core_ref, id);

    let teardown = {
        let core = core_ref.borrow();
        core.closed
            && core.buffer.is_empty()
            && core
                .subscribers
                .get(&id)
                .is_some_and(|entry| entry.inbound.is_empty() && !entry.paused)
    };
    if teardown {
        cancel_subscriber(core_ref, id);
    }
}

/// Hands a subscriber's buffered messages to its callbacks.
///
/// A flush runs to completion once started: pausing mid-flush does not
/// truncate it (it only blocks the *next* flush), but cancelling does — a
/// cancelled subscription receives nothing further.
pub(crate) fn flush_subscriber<T: Clone + 'static>(core_ref: &CoreRef<T>, id: SubscriptionId) {
    {
        let mut core = core_ref.borrow_mut();
        let Some(entry) = core.subscribers.get_mut(&id) else {
            return;
        };
        if entry.flushing || entry.paused || entry.inbound.is_empty() {
            return;
        }
        entry.flushing = true;
    }

    let mut saw_done = false;
    loop {
        let next = {
            let mut core = core_ref.borrow_mut();
            match core.subscribers.get_mut(&id) {
                // Cancelled mid-flush: stop delivering.
                None => return,
                Some(entry) => entry.inbound.pop_front(),
            }
        };
        let Some(message) = next else { break };
        saw_done |= message.is_done();
        dispatch(core_ref, id, message);
    }

    if let Some(entry) = core_ref.borrow_mut().subscribers.get_mut(&id) {
        entry.flushing = false;
    }
    // Done is terminal: once handed over, the subscription is torn down.
    if saw_done {
        cancel_subscriber(core_ref, id);
    }
}

/// Routes one message to the matching callback, with the core borrow
/// released around the user call.
fn dispatch<T: Clone + 'static>(core_ref: &CoreRef<T>, id: SubscriptionId, message: Message<T>) {
    let (callbacks, cancel_on_error) = {
        let mut core = core_ref.borrow_mut();
        let Some(entry) = core.subscribers.get_mut(&id) else {
            return;
        };
        if message.is_data() {
            entry.delivered += 1;
        }
        (Rc::clone(&entry.callbacks), entry.cancel_on_error)
    };
    match message {
        Message::Data(value) => {
            let mut callbacks = callbacks.borrow_mut();
            (callbacks.on_data)(value);
        }
        Message::Error(fault) => {
            {
                let mut callbacks = callbacks.borrow_mut();
                if let Some(on_error) = callbacks.on_error.as_mut() {
                    on_error(fault);
                }
            }
            if cancel_on_error {
                cancel_subscriber(core_ref, id);
            }
        }
        Message::Done => {
            let mut callbacks = callbacks.borrow_mut();
            if let Some(on_done) = callbacks.on_done.as_mut() {
                on_done();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription lifecycle
// ---------------------------------------------------------------------------

/// Registers a listener. Fails with `AlreadyListening` on a single-consumer
/// stream that already has one.
///
/// Fires the `Listen` hook (deferred), lazily attaches the upstream link on
/// the first subscriber, and schedules delivery of any buffered backlog.
pub(crate) fn listen_core<T: Clone + 'static>(
    core_ref: &CoreRef<T>,
    on_data: Box<dyn FnMut(T)>,
    options: ListenOptions,
) -> Result<SubscriptionId, StreamError> {
    {
        let core = core_ref.borrow();
        if core.kind == StreamKind::Single && core.has_subscribers() {
            return Err(StreamError::AlreadyListening);
        }
    }

    // Lazy upstream attach, first listener only. The box is taken out of the
    // core so `attach` can freely borrow both parent and child.
    let upstream = core_ref.borrow_mut().upstream.take();
    if let Some(mut upstream) = upstream {
        let attached = if upstream.is_attached() {
            Ok(())
        } else {
            upstream.attach()
        };
        core_ref.borrow_mut().upstream = Some(upstream);
        attached?;
    }

    let (id, kind, closed) = {
        let mut core = core_ref.borrow_mut();
        let id = SubscriptionId(core.next_subscriber);
        core.next_subscriber += 1;
        let ListenOptions {
            on_error,
            on_done,
            on_pause,
            on_resume,
            cancel_on_error,
        } = options;
        core.subscribers.insert(
            id,
            SubscriberEntry {
                callbacks: Rc::new(RefCell::new(SubscriberCallbacks {
                    on_data,
                    on_error,
                    on_done,
                    on_pause,
                    on_resume,
                })),
                inbound: VecDeque::new(),
                paused: false,
                flushing: false,
                cancel_on_error,
                delivered: 0,
            },
        );
        core.order.push(id);
        fire_hooks(&mut core, StreamEvent::Listen);
        tracing::debug!(subscription = %id, "listener attached");
        (id, core.kind, core.closed)
    };

    match kind {
        StreamKind::Single => schedule_flush(core_ref),
        StreamKind::Broadcast => {
            // No backlog ever exists, but a listener attaching after close
            // still observes the end of the stream.
            if closed {
                deliver_done_to(core_ref, id);
            }
        }
    }
    Ok(id)
}

/// Defers a `Done` delivery to one subscriber (closed-broadcast late join).
fn deliver_done_to<T: Clone + 'static>(core_ref: &CoreRef<T>, id: SubscriptionId) {
    let scheduler = core_ref.borrow().scheduler.clone();
    let weak = Rc::downgrade(core_ref);
    scheduler.defer(move || {
        if let Some(core_ref) = weak.upgrade() {
            enqueue_for(&core_ref, id, Message::Done);
        }
    });
}

/// Detaches a subscriber and fires the `Cancel` hook (deferred).
///
/// Returns `false` if the id was already detached — the hook fires exactly
/// once per subscription no matter how many times cancellation is attempted.
pub(crate) fn cancel_subscriber<T: Clone + 'static>(
    core_ref: &CoreRef<T>,
    id: SubscriptionId,
) -> bool {
    let mut core = core_ref.borrow_mut();
    if core.subscribers.remove(&id).is_none() {
        return false;
    }
    core.order.retain(|&other| other != id);
    // A cancelled subscription releases the pause it held on the stream.
    if core.kind == StreamKind::Single && core.paused {
        core.paused = false;
    }
    fire_hooks(&mut core, StreamEvent::Cancel);
    tracing::debug!(subscription = %id, "listener cancelled");
    true
}

/// Pauses one subscriber. Idempotent: a second pause fires nothing.
///
/// On a single-consumer stream the pause propagates to the stream itself
/// (stopping outbound flushes) and fires the stream's `Pause` hook; on a
/// broadcast stream only this subscriber's flushes stop.
pub(crate) fn pause_subscriber<T: Clone + 'static>(core_ref: &CoreRef<T>, id: SubscriptionId) {
    let deferred = {
        let mut core = core_ref.borrow_mut();
        let scheduler = core.scheduler.clone();
        let kind = core.kind;
        let callbacks = {
            let Some(entry) = core.subscribers.get_mut(&id) else {
                return;
            };
            if entry.paused {
                return;
            }
            entry.paused = true;
            Rc::clone(&entry.callbacks)
        };
        if kind == StreamKind::Single && !core.paused {
            core.paused = true;
            fire_hooks(&mut core, StreamEvent::Pause);
        }
        (scheduler, callbacks)
    };
    let (scheduler, callbacks) = deferred;
    scheduler.defer(move || {
        let mut callbacks = callbacks.borrow_mut();
        if let Some(on_pause) = callbacks.on_pause.as_mut() {
            on_pause();
        }
    });
}

/// Resumes one subscriber. Idempotent: resuming an unpaused subscription
/// fires nothing. Re-schedules delivery of everything buffered while paused,
/// in original arrival order.
pub(crate) fn resume_subscriber<T: Clone + 'static>(core_ref: &CoreRef<T>, id: SubscriptionId) {
    let deferred = {
        let mut core = core_ref.borrow_mut();
        let scheduler = core.scheduler.clone();
        let kind = core.kind;
        let callbacks = {
            let Some(entry) = core.subscribers.get_mut(&id) else {
                return;
            };
            if !entry.paused {
                return;
            }
            entry.paused = false;
            Rc::clone(&entry.callbacks)
        };
        if kind == StreamKind::Single && core.paused {
            core.paused = false;
            fire_hooks(&mut core, StreamEvent::Resume);
        }
        (scheduler, callbacks, kind)
    };
    let (scheduler, callbacks, kind) = deferred;
    scheduler.defer(move || {
        let mut callbacks = callbacks.borrow_mut();
        if let Some(on_resume) = callbacks.on_resume.as_mut() {
            on_resume();
        }
    });
    match kind {
        StreamKind::Single => schedule_flush(core_ref),
        StreamKind::Broadcast => {
            let scheduler = core_ref.borrow().scheduler.clone();
            let weak = Rc::downgrade(core_ref);
            scheduler.defer(move || {
                if let Some(core_ref) = weak.upgrade() {
                    flush_subscriber(&core_ref, id);
                }
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriber accessors
// ---------------------------------------------------------------------------

pub(crate) fn subscriber_is_paused<T>(core_ref: &CoreRef<T>, id: SubscriptionId) -> bool {
    core_ref
        .borrow()
        .subscribers
        .get(&id)
        .is_some_and(|entry| entry.paused)
}

pub(crate) fn subscriber_is_active<T>(core_ref: &CoreRef<T>, id: SubscriptionId) -> bool {
    core_ref.borrow().subscribers.contains_key(&id)
}

pub(crate) fn subscriber_delivered<T>(core_ref: &CoreRef<T>, id: SubscriptionId) -> u64 {
    core_ref
        .borrow()
        .subscribers
        .get(&id)
        .map_or(0, |entry| entry.delivered)
}
