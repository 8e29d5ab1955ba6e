//! The consumer-facing stream handle.
//!
//! [`EventStream`] is a cheap cloneable handle onto shared stream state.
//! Handles expose only the consumer surface — `listen`, combinators,
//! aggregators, hook registration; producer operations live on
//! [`Publisher`](super::publisher::Publisher), so holding a stream never
//! grants the ability to feed it.

use std::rc::Rc;

use crate::reactor::Scheduler;

use super::core::{self, CoreRef, StreamKind};
use super::error::{Fault, StreamError};
use super::message::Message;
use super::subscription::{ListenOptions, Subscription};

// ---------------------------------------------------------------------------
// StreamEvent / HookId
// ---------------------------------------------------------------------------

/// Lifecycle events a stream fires hooks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEvent {
    /// A listener attached.
    Listen,
    /// The stream was paused by its subscription.
    Pause,
    /// The stream was resumed by its subscription.
    Resume,
    /// A subscription was cancelled.
    Cancel,
}

impl StreamEvent {
    pub(crate) fn index(self) -> usize {
        match self {
            Self::Listen => 0,
            Self::Pause => 1,
            Self::Resume => 2,
            Self::Cancel => 3,
        }
    }
}

/// Handle identifying a registered hook callback, for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub(crate) u64);

// ---------------------------------------------------------------------------
// EventStream
// ---------------------------------------------------------------------------

/// An ordered, asynchronous sequence of data and error events terminated by
/// a done event.
///
/// Non-broadcast streams buffer while unobserved and admit at most one
/// subscription at a time; broadcast streams (see
/// [`broadcast`](Self::broadcast)) admit any number but never buffer.
///
/// Values must be `Clone` because the broadcast variant fans one message out
/// to every subscriber.
pub struct EventStream<T> {
    pub(crate) core: CoreRef<T>,
}

impl<T> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: Clone + 'static> EventStream<T> {
    pub(crate) fn new(scheduler: Scheduler, kind: StreamKind) -> Self {
        Self {
            core: core::StreamCore::new(scheduler, kind),
        }
    }

    pub(crate) fn scheduler(&self) -> Scheduler {
        self.core.borrow().scheduler.clone()
    }

    // --- Consumer surface ---

    /// Registers a listener.
    ///
    /// Fires the `Listen` hook (deferred) and schedules delivery of any
    /// buffered backlog. The returned [`Subscription`] controls pause,
    /// resume, and cancel.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::AlreadyListening`] if this is a non-broadcast
    /// stream that already has an active subscription.
    pub fn listen(
        &self,
        on_data: impl FnMut(T) + 'static,
        options: ListenOptions,
    ) -> Result<Subscription<T>, StreamError> {
        let id = core::listen_core(&self.core, Box::new(on_data), options)?;
        Ok(Subscription::new(Rc::downgrade(&self.core), id))
    }

    /// Returns `true` once the stream has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.borrow().closed
    }

    /// Returns `true` while at least one subscription is attached.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.core.borrow().has_subscribers()
    }

    /// Returns `true` if this is a broadcast (multi-consumer) stream.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.core.borrow().kind == StreamKind::Broadcast
    }

    // --- Hooks ---

    /// Registers a hook callback for a lifecycle event. Multiple callbacks
    /// per event are allowed and fire in registration order.
    pub fn add_hook(&self, event: StreamEvent, hook: impl FnMut() + 'static) -> HookId {
        self.core.borrow_mut().hooks.insert(event, hook)
    }

    /// Removes a previously registered hook. Returns `false` (and does
    /// nothing) if the hook is absent.
    pub fn remove_hook(&self, event: StreamEvent, id: HookId) -> bool {
        self.core.borrow_mut().hooks.remove(event, id)
    }

    // --- Producer internals (reached via Publisher, relays, adapters) ---

    pub(crate) fn push(&self, value: T) -> Result<(), StreamError> {
        core::push_message(&self.core, Message::Data(value))
    }

    pub(crate) fn push_error(&self, fault: Fault) -> Result<(), StreamError> {
        core::push_message(&self.core, Message::Error(fault))
    }

    pub(crate) fn close_now(&self) {
        core::close_stream(&self.core);
    }
}

impl<T> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.borrow();
        f.debug_struct("EventStream")
            .field("kind", &core.kind)
            .field("closed", &core.closed)
            .field("paused", &core.paused)
            .field("buffered", &core.buffer.len())
            .field("subscribers", &core.has_subscribers())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
