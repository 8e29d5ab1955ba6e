//! # Push-Based Stream System
//!
//! An ordered, asynchronous sequence of data and error events terminated by a
//! done event, delivered push-style to registered listeners.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │  Publisher  │────▶│ EventStream  │────▶│   Subscription   │
//! │             │     │              │     │                  │
//! │ add()       │     │ listen()     │     │ pause()/resume() │
//! │ add_error() │     │ map()/take() │     │ cancel()         │
//! │ close()     │     │ to_vec()/... │     │                  │
//! └─────────────┘     └──────────────┘     └──────────────────┘
//! ```
//!
//! - [`Publisher`] owns the producer side: `add` / `add_error` / `close` /
//!   `add_stream`, plus the consumer-facing [`EventStream`] view and a
//!   minimal [`StreamSink`] facade.
//! - [`EventStream`] is the consumer side: `listen` registers callbacks,
//!   combinators derive transformed child streams, terminal aggregators
//!   consume the stream into a future.
//! - [`Subscription`] is the live registration of one listener: pause,
//!   resume, cancel.
//!
//! ## Delivery model
//!
//! All delivery is deferred onto the [`Reactor`](crate::reactor::Reactor):
//! a batch of synchronous producer calls is fully buffered before any
//! listener runs, and listeners observe the batch in submission order,
//! exactly once. Single-consumer streams buffer while unobserved; broadcast
//! streams never buffer, so late subscribers permanently miss earlier
//! messages.
//!
//! ## Module Structure
//!
//! - [`error`]: [`StreamError`] and the carried [`Fault`] value
//! - [`message`]: the [`Message`] tagged union flowing through the pipeline
//! - `core`: shared stream state and the delivery pipeline (internal)
//! - [`handle`]: the [`EventStream`] handle
//! - [`subscription`]: [`Subscription`] and [`ListenOptions`]
//! - `relay`: derived-stream combinators (internal wiring)
//! - `broadcast`: multi-consumer fan-out (internal wiring)
//! - [`publisher`]: [`Publisher`], [`PublisherConfig`], [`StreamSink`]
//! - [`aggregate`]: terminal aggregators
//! - [`completion`]: the settle-once future the aggregators return
//! - [`adapter`]: constructing streams from futures

mod broadcast;
mod core;
mod relay;

pub mod adapter;
pub mod aggregate;
pub mod completion;
pub mod error;
pub mod handle;
pub mod message;
pub mod publisher;
pub mod subscription;

pub use completion::CompletionFuture;
pub use error::{Fault, StreamError};
pub use handle::{EventStream, HookId, StreamEvent};
pub use message::Message;
pub use publisher::{AddStreamOptions, Publisher, PublisherConfig, StreamSink};
pub use subscription::{ListenOptions, Subscription, SubscriptionId};
