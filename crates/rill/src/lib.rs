//! # Rill
//!
//! Push-based, deterministic event streams for single-threaded Rust.
//!
//! A [`Publisher`] owns the producer side of a stream; the consumer side is
//! an [`EventStream`] that buffers while unobserved, supports pause/resume
//! flow control, fans out to many listeners in broadcast mode, and offers
//! derived-stream combinators plus future-returning terminal aggregators.
//! All delivery runs deferred on a [`Reactor`] the caller pumps, so event
//! ordering is fully deterministic.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use rill::prelude::*;
//!
//! fn main() -> Result<(), StreamError> {
//!     let reactor = Reactor::new();
//!     let publisher = Publisher::new(&reactor.handle());
//!
//!     publisher.add(1)?;
//!     publisher.add(2)?;
//!     publisher.add(3)?;
//!     publisher.close();
//!
//!     let doubled = publisher.stream().map(|v| v * 2);
//!     let values = reactor.block_on(doubled.to_vec())?;
//!     assert_eq!(values, vec![2, 4, 6]);
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export the engine surface
pub use rill_core::*;

/// Commonly used types and traits.
///
/// ```rust,ignore
/// use rill::prelude::*;
/// ```
pub mod prelude {
    // Producer side
    pub use rill_core::{AddStreamOptions, Publisher, PublisherConfig, StreamSink};

    // Consumer side
    pub use rill_core::{EventStream, ListenOptions, StreamEvent, Subscription};

    // Scheduling
    pub use rill_core::{Reactor, Scheduler};

    // Errors and messages
    pub use rill_core::{CompletionFuture, Fault, Message, StreamError};

    // Standard library re-exports for convenience
    pub use std::cell::RefCell;
    pub use std::rc::Rc;
}
