//! # Rill Core
//!
//! The core engine for `rill`: a push-based, deterministic event-stream
//! abstraction with a single controlling producer per stream.
//!
//! This crate provides:
//! - **Reactor**: single-threaded deferred-task queue driving all delivery
//! - **Streams**: buffered single-consumer streams with pause/resume/cancel
//! - **Broadcast**: unbuffered multi-consumer fan-out
//! - **Combinators**: derived streams (`map`, `where_`, `take`, `skip`, ...)
//! - **Aggregators**: future-returning terminal consumers (`reduce`,
//!   `to_vec`, `first_where`, ...)
//!
//! ## Design Principles
//!
//! 1. **Deferred dispatch** - a producer call and its listener's reaction
//!    never interleave inside one synchronous unit
//! 2. **Single-threaded cooperative scheduling** - no locks, no blocking
//! 3. **Deterministic tests** - the reactor is injectable and pumped on
//!    demand, so every delivery order is reproducible
//!
//! ## Example
//!
//! ```rust,ignore
//! use rill_core::{Publisher, Reactor};
//!
//! let reactor = Reactor::new();
//! let publisher = Publisher::new(&reactor.handle());
//!
//! publisher.add(1)?;
//! publisher.add(2)?;
//! publisher.close();
//!
//! let values = reactor.block_on(publisher.stream().to_vec())?;
//! assert_eq!(values, vec![1, 2]);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod reactor;
pub mod stream;

pub use reactor::{Reactor, Scheduler};
pub use stream::{
    AddStreamOptions, CompletionFuture, EventStream, Fault, HookId, ListenOptions, Message,
    Publisher, PublisherConfig, StreamError, StreamEvent, StreamSink, Subscription,
    SubscriptionId,
};

/// Result type for rill-core operations.
pub type Result<T> = std::result::Result<T, StreamError>;
