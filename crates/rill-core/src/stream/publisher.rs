//! The producer-facing controller for a stream.
//!
//! A [`Publisher`] owns the producer operations (`add`, `add_error`,
//! `close`, `add_stream`) for one stream and hands out the consumer-facing
//! [`EventStream`] view. External holders of the stream cannot act as
//! producers — the producer surface exists only on the publisher and its
//! minimal [`StreamSink`] facade.
//!
//! ```rust,ignore
//! let reactor = Reactor::new();
//! let publisher = Publisher::new(&reactor.handle());
//! let stream = publisher.stream();
//!
//! publisher.add(1)?;
//! publisher.close();
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use crate::reactor::Scheduler;

use super::completion::{Completion, CompletionFuture};
use super::core::StreamKind;
use super::error::{Fault, StreamError};
use super::handle::{EventStream, StreamEvent};
use super::subscription::{ListenOptions, Subscription};

// ---------------------------------------------------------------------------
// PublisherConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`Publisher`].
///
/// The four lifecycle callbacks are registered as hooks on the publisher's
/// stream; `broadcast` selects the multi-consumer variant.
#[derive(Default)]
pub struct PublisherConfig {
    pub(crate) broadcast: bool,
    pub(crate) on_listen: Option<Box<dyn FnMut()>>,
    pub(crate) on_pause: Option<Box<dyn FnMut()>>,
    pub(crate) on_resume: Option<Box<dyn FnMut()>>,
    pub(crate) on_cancel: Option<Box<dyn FnMut()>>,
}

impl PublisherConfig {
    /// Creates the default configuration: single-consumer, no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the broadcast (multi-consumer, unbuffered) variant.
    #[must_use]
    pub fn broadcast(mut self, broadcast: bool) -> Self {
        self.broadcast = broadcast;
        self
    }

    /// Callback fired when a listener attaches.
    #[must_use]
    pub fn on_listen(mut self, callback: impl FnMut() + 'static) -> Self {
        self.on_listen = Some(Box::new(callback));
        self
    }

    /// Callback fired when the stream is paused.
    #[must_use]
    pub fn on_pause(mut self, callback: impl FnMut() + 'static) -> Self {
        self.on_pause = Some(Box::new(callback));
        self
    }

    /// Callback fired when the stream is resumed.
    #[must_use]
    pub fn on_resume(mut self, callback: impl FnMut() + 'static) -> Self {
        self.on_resume = Some(Box::new(callback));
        self
    }

    /// Callback fired when a subscription is cancelled.
    #[must_use]
    pub fn on_cancel(mut self, callback: impl FnMut() + 'static) -> Self {
        self.on_cancel = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for PublisherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherConfig")
            .field("broadcast", &self.broadcast)
            .field("on_listen", &self.on_listen.is_some())
            .field("on_pause", &self.on_pause.is_some())
            .field("on_resume", &self.on_resume.is_some())
            .field("on_cancel", &self.on_cancel.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AddStreamOptions
// ---------------------------------------------------------------------------

/// Options for [`Publisher::add_stream`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AddStreamOptions {
    pub(crate) cancel_on_error: bool,
}

impl AddStreamOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When `true`, the first error from the source settles the returned
    /// future and stops forwarding (the inner subscription is cancelled).
    #[must_use]
    pub fn cancel_on_error(mut self, cancel: bool) -> Self {
        self.cancel_on_error = cancel;
        self
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

struct PublisherInner<T> {
    stream: EventStream<T>,
    /// Completion of the most recent `add_stream`; settled from the start
    /// when none has been started.
    done: RefCell<Completion<()>>,
}

impl<T: Clone + 'static> PublisherInner<T> {
    fn add_stream(
        &self,
        source: &EventStream<T>,
        options: AddStreamOptions,
    ) -> Result<CompletionFuture<()>, StreamError> {
        let completion = Completion::new();
        let slot: Rc<RefCell<Option<Subscription<T>>>> = Rc::default();

        let on_data = {
            let target = self.stream.clone();
            move |value: T| {
                let _ = target.push(value);
            }
        };
        let listen_options = ListenOptions::new()
            .on_error({
                let target = self.stream.clone();
                let completion = completion.clone();
                let slot = Rc::clone(&slot);
                let cancel_on_error = options.cancel_on_error;
                move |fault| {
                    let _ = target.push_error(fault);
                    if cancel_on_error {
                        if let Some(subscription) = slot.borrow_mut().take() {
                            subscription.cancel();
                        }
                        completion.settle(());
                    }
                }
            })
            .on_done({
                let completion = completion.clone();
                let slot = Rc::clone(&slot);
                move || {
                    if let Some(subscription) = slot.borrow_mut().take() {
                        subscription.cancel();
                    }
                    completion.settle(());
                }
            });

        let subscription = source.listen(on_data, listen_options)?;
        *slot.borrow_mut() = Some(subscription);
        *self.done.borrow_mut() = completion.clone();
        Ok(completion.future())
    }
}

/// Producer-facing controller for one stream.
///
/// Created with a [`Scheduler`] handle; all deliveries defer onto that
/// reactor. In broadcast mode the stream admits any number of subscribers
/// and never buffers; otherwise it buffers while unobserved and admits one.
pub struct Publisher<T> {
    inner: Rc<PublisherInner<T>>,
}

impl<T: Clone + 'static> Publisher<T> {
    /// Creates a single-consumer publisher with default configuration.
    #[must_use]
    pub fn new(scheduler: &Scheduler) -> Self {
        Self::with_config(scheduler, PublisherConfig::default())
    }

    /// Creates a broadcast publisher (convenience for
    /// `PublisherConfig::new().broadcast(true)`).
    #[must_use]
    pub fn broadcast(scheduler: &Scheduler) -> Self {
        Self::with_config(scheduler, PublisherConfig::new().broadcast(true))
    }

    /// Creates a publisher from a full configuration.
    #[must_use]
    pub fn with_config(scheduler: &Scheduler, config: PublisherConfig) -> Self {
        let kind = if config.broadcast {
            StreamKind::Broadcast
        } else {
            StreamKind::Single
        };
        let stream = EventStream::new(scheduler.clone(), kind);

        let PublisherConfig {
            on_listen,
            on_pause,
            on_resume,
            on_cancel,
            ..
        } = config;
        if let Some(mut hook) = on_listen {
            stream.add_hook(StreamEvent::Listen, move || hook());
        }
        if let Some(mut hook) = on_pause {
            stream.add_hook(StreamEvent::Pause, move || hook());
        }
        if let Some(mut hook) = on_resume {
            stream.add_hook(StreamEvent::Resume, move || hook());
        }
        if let Some(mut hook) = on_cancel {
            stream.add_hook(StreamEvent::Cancel, move || hook());
        }

        Self {
            inner: Rc::new(PublisherInner {
                stream,
                done: RefCell::new(Completion::settled(())),
            }),
        }
    }

    /// Publishes a value.
    ///
    /// The value is buffered (or fanned out, in broadcast mode) and
    /// delivered on the next reactor pump.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] once the stream has been closed.
    pub fn add(&self, value: T) -> Result<(), StreamError> {
        self.inner.stream.push(value)
    }

    /// Publishes a fault. A plain message is normalized into a [`Fault`].
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] once the stream has been closed.
    pub fn add_error(&self, fault: impl Into<Fault>) -> Result<(), StreamError> {
        self.inner.stream.push_error(fault.into())
    }

    /// Closes the stream: a final done message is delivered and further
    /// `add`/`add_error` calls fail. Idempotent.
    pub fn close(&self) {
        self.inner.stream.close_now();
    }

    /// Forwards every message from `source` into this publisher's stream.
    ///
    /// The returned future resolves when `source` completes — or on the
    /// first error when `cancel_on_error` is set, in which case forwarding
    /// stops as well. Also updates [`done`](Self::done).
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::AlreadyListening`] if `source` already has an
    /// active subscription.
    pub fn add_stream(
        &self,
        source: &EventStream<T>,
        options: AddStreamOptions,
    ) -> Result<CompletionFuture<()>, StreamError> {
        self.inner.add_stream(source, options)
    }

    /// Future of the most recent [`add_stream`](Self::add_stream): resolved
    /// immediately if none has been started.
    #[must_use]
    pub fn done(&self) -> CompletionFuture<()> {
        self.inner.done.borrow().future()
    }

    /// The consumer-facing stream. Carries no producer operations.
    #[must_use]
    pub fn stream(&self) -> EventStream<T> {
        self.inner.stream.clone()
    }

    /// Minimal producer-only facade.
    #[must_use]
    pub fn sink(&self) -> StreamSink<T> {
        StreamSink {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Returns `true` once the stream has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.stream.is_closed()
    }

    /// Returns `true` while at least one subscription is attached.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.inner.stream.has_subscribers()
    }
}

impl<T> std::fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("stream", &self.inner.stream)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// StreamSink
// ---------------------------------------------------------------------------

/// Producer-only facade over a [`Publisher`].
///
/// Forwards `add` / `add_error` / `close` / `add_stream` / `done`; exposes
/// nothing else.
pub struct StreamSink<T> {
    inner: Rc<PublisherInner<T>>,
}

impl<T: Clone + 'static> StreamSink<T> {
    /// Publishes a value. See [`Publisher::add`].
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] once the stream has been closed.
    pub fn add(&self, value: T) -> Result<(), StreamError> {
        self.inner.stream.push(value)
    }

    /// Publishes a fault. See [`Publisher::add_error`].
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Closed`] once the stream has been closed.
    pub fn add_error(&self, fault: impl Into<Fault>) -> Result<(), StreamError> {
        self.inner.stream.push_error(fault.into())
    }

    /// Closes the stream. See [`Publisher::close`].
    pub fn close(&self) {
        self.inner.stream.close_now();
    }

    /// Forwards a source stream. See [`Publisher::add_stream`].
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::AlreadyListening`] if `source` already has an
    /// active subscription.
    pub fn add_stream(
        &self,
        source: &EventStream<T>,
        options: AddStreamOptions,
    ) -> Result<CompletionFuture<()>, StreamError> {
        self.inner.add_stream(source, options)
    }

    /// Future of the most recent `add_stream`. See [`Publisher::done`].
    #[must_use]
    pub fn done(&self) -> CompletionFuture<()> {
        self.inner.done.borrow().future()
    }
}

impl<T> Clone for StreamSink<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for StreamSink<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSink").finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
