//! Broadcast (multi-consumer) stream wiring.
//!
//! A broadcast stream fans one upstream subscription out to any number of
//! downstream subscriptions with no buffering: the subscriber set is
//! snapshotted when a message is emitted, so a listener attaching afterwards
//! permanently misses it. Stream-level pause does not exist here — a
//! downstream consumer that pauses simply stops having its own subscription
//! flushed while the others keep receiving.

use std::rc::Rc;

use super::core::{StreamKind, Upstream, WeakCore};
use super::error::StreamError;
use super::handle::EventStream;
use super::relay::{apply_step, relay_options, RelayStep};
use super::subscription::Subscription;

/// Lazy parent link for a broadcast stream: attaches a single upstream
/// subscription the first time any downstream listener appears.
struct BroadcastLink<T> {
    parent: EventStream<T>,
    child: WeakCore<T>,
    subscription: Option<Subscription<T>>,
}

impl<T: Clone + 'static> Upstream for BroadcastLink<T> {
    fn attach(&mut self) -> Result<(), StreamError> {
        let child = self.child.clone();
        let on_data = move |value: T| apply_step(&child, RelayStep::Emit(value));
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

impl<T: Clone + 'static> EventStream<T> {
    /// Returns a multi-subscriber view of this stream.
    ///
    /// The broadcast stream subscribes to `self` once, on its first
    /// `listen`, and fans every message out to the subscribers present at
    /// emission time. Closing the broadcast stream cancels that upstream
    /// subscription.
    #[must_use]
    pub fn broadcast(&self) -> EventStream<T> {
        let child = EventStream::new(self.scheduler(), StreamKind::Broadcast);
        let link = BroadcastLink {
            parent: self.clone(),
            child: Rc::downgrade(&child.core),
            subscription: None,
        };
        child.core.borrow_mut().upstream = Some(Box::new(link));
        child
    }
}

// ===========================================================================
// Tests
// ===========================================================================
