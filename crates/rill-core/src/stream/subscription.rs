//! Subscription handle and listen-time options.
//!
//! A [`Subscription`] is the live registration of one listener against one
//! stream. The handle is a non-owning reference into the stream's core:
//! dropping it does **not** cancel the subscription — the stream keeps
//! delivering to the registered callbacks until [`cancel`](Subscription::cancel)
//! is called or the stream completes. Listeners outlive their handles by
//! design; teardown is always explicit or stream-driven.

use super::core::{
    cancel_subscriber, pause_subscriber, resume_subscriber, subscriber_delivered,
    subscriber_is_active, subscriber_is_paused, WeakCore,
};
use super::error::Fault;

// ---------------------------------------------------------------------------
// SubscriptionId
// ---------------------------------------------------------------------------

/// Unique id of a subscription within its stream.
///
/// Monotonically assigned by the stream core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ListenOptions
// ---------------------------------------------------------------------------

/// Optional callbacks and flags for [`EventStream::listen`].
///
/// All callbacks default to absent and `cancel_on_error` to `false`.
///
/// ```rust,ignore
/// let sub = stream.listen(
///     |value| println!("{value}"),
///     ListenOptions::new()
///         .on_error(|fault| eprintln!("{fault}"))
///         .on_done(|| println!("done"))
///         .cancel_on_error(true),
/// )?;
/// ```
///
/// [`EventStream::listen`]: super::handle::EventStream::listen
#[derive(Default)]
pub struct ListenOptions {
    pub(crate) on_error: Option<Box<dyn FnMut(Fault)>>,
    pub(crate) on_done: Option<Box<dyn FnMut()>>,
    pub(crate) on_pause: Option<Box<dyn FnMut()>>,
    pub(crate) on_resume: Option<Box<dyn FnMut()>>,
    pub(crate) cancel_on_error: bool,
}

impl ListenOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback for faults published into the stream.
    #[must_use]
    pub fn on_error(mut self, callback: impl FnMut(Fault) + 'static) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    /// Callback for the end of the stream.
    #[must_use]
    pub fn on_done(mut self, callback: impl FnMut() + 'static) -> Self {
        self.on_done = Some(Box::new(callback));
        self
    }

    /// Callback fired when this subscription is paused.
    #[must_use]
    pub fn on_pause(mut self, callback: impl FnMut() + 'static) -> Self {
        self.on_pause = Some(Box::new(callback));
        self
    }

    /// Callback fired when this subscription is resumed.
    #[must_use]
    pub fn on_resume(mut self, callback: impl FnMut() + 'static) -> Self {
        self.on_resume = Some(Box::new(callback));
        self
    }

    /// When `true`, the subscription cancels itself after the first fault is
    /// delivered.
    #[must_use]
    pub fn cancel_on_error(mut self, cancel: bool) -> Self {
        self.cancel_on_error = cancel;
        self
    }
}

impl std::fmt::Debug for ListenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenOptions")
            .field("on_error", &self.on_error.is_some())
            .field("on_done", &self.on_done.is_some())
            .field("on_pause", &self.on_pause.is_some())
            .field("on_resume", &self.on_resume.is_some())
            .field("cancel_on_error", &self.cancel_on_error)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Live registration of one listener against one stream.
///
/// Provides flow control (pause/resume) and teardown (cancel). The handle
/// holds a weak, non-owning reference to the stream; once the stream is gone
/// or the subscription cancelled, every method is a no-op.
pub struct Subscription<T> {
    core: WeakCore<T>,
    id: SubscriptionId,
}

impl<T: Clone + 'static> Subscription<T> {
    pub(crate) fn new(core: WeakCore<T>, id: SubscriptionId) -> Self {
        Self { core, id }
    }

    /// Returns this subscription's id.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Pauses delivery. While paused, messages accumulate in this
    /// subscription's buffer and nothing is handed to the callbacks.
    ///
    /// Idempotent: pausing an already-paused subscription fires no
    /// `on_pause` callback and no stream hook.
    pub fn pause(&self) {
        if let Some(core) = self.core.upgrade() {
            pause_subscriber(&core, self.id);
        }
    }

    /// Resumes delivery, flushing everything buffered while paused in its
    /// original arrival order.
    ///
    /// Idempotent: resuming an unpaused subscription fires nothing.
    pub fn resume(&self) {
        if let Some(core) = self.core.upgrade() {
            resume_subscriber(&core, self.id);
        }
    }

    /// Cancels the subscription, permanently stopping delivery.
    ///
    /// The owning stream drops its reference and fires its `Cancel` hook
    /// exactly once; repeated calls are no-ops.
    pub fn cancel(&self) {
        if let Some(core) = self.core.upgrade() {
            cancel_subscriber(&core, self.id);
        }
    }

    /// Returns `true` while delivery is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.core
            .upgrade()
            .is_some_and(|core| subscriber_is_paused(&core, self.id))
    }

    /// Returns `true` while the subscription is attached to its stream.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.core
            .upgrade()
            .is_some_and(|core| subscriber_is_active(&core, self.id))
    }

    /// Number of data values handed to the listener so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.core
            .upgrade()
            .map_or(0, |core| subscriber_delivered(&core, self.id))
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("stream_alive", &(self.core.strong_count() > 0))
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
