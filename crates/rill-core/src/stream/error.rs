//! Stream error types.
//!
//! Two kinds of failure flow through the system and they are deliberately
//! distinct:
//!
//! - [`StreamError`] — returned synchronously from misused operations
//!   (adding to a closed stream, double-listening) and carried by the
//!   futures the terminal aggregators return.
//! - [`Fault`] — an error *value* published into a stream via `add_error`.
//!   Faults are data: they travel the same buffered pipeline as ordinary
//!   values and are handed to the subscription's error callback, never
//!   thrown into the producer's call stack.

use std::any::Any;

// ---------------------------------------------------------------------------
// Fault
// ---------------------------------------------------------------------------

/// An error value carried by a stream.
///
/// Producers publish faults with `add_error`; a plain message is normalized
/// into a `Fault` via the `From` impls. Faults are cloneable so the
/// broadcast variant can fan one out to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Fault {
    message: String,
}

impl Fault {
    /// Creates a fault from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the fault message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Converts a caught panic payload into a fault.
    ///
    /// Used where a panicking user callback is routed into an aggregator
    /// future's rejection instead of unwinding further.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("callback panicked: {s}")
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("callback panicked: {s}")
        } else {
            "callback panicked".to_string()
        };
        Self { message }
    }
}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Self { message }
    }
}

// ---------------------------------------------------------------------------
// StreamError
// ---------------------------------------------------------------------------

/// Errors from stream operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The stream is closed; no further data or errors are accepted.
    #[error("stream is closed")]
    Closed,

    /// A non-broadcast stream already has an active subscription.
    #[error("stream already has an active subscription")]
    AlreadyListening,

    /// The stream completed before producing the required element.
    #[error("stream completed without a matching element")]
    Exhausted,

    /// A fault published into the stream, surfaced by an aggregator.
    #[error(transparent)]
    Fault(#[from] Fault),
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_display() {
        let fault = Fault::new("boom");
        assert_eq!(fault.to_string(), "boom");
        assert_eq!(fault.message(), "boom");
    }

    #[test]
    fn test_fault_from_message() {
        let from_str: Fault = "bad input".into();
        let from_string: Fault = String::from("bad input").into();
        assert_eq!(from_str, from_string);
    }

    #[test]
    fn test_fault_from_panic_payload() {
        let payload: Box<dyn Any + Send> = Box::new("deliberate");
        let fault = Fault::from_panic(payload.as_ref());
        assert_eq!(fault.message(), "callback panicked: deliberate");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let fault = Fault::from_panic(payload.as_ref());
        assert_eq!(fault.message(), "callback panicked: owned");

        let payload: Box<dyn Any + Send> = Box::new(17u8);
        let fault = Fault::from_panic(payload.as_ref());
        assert_eq!(fault.message(), "callback panicked");
    }

    #[test]
    fn test_stream_error_display() {
        assert_eq!(StreamError::Closed.to_string(), "stream is closed");
        assert_eq!(
            StreamError::AlreadyListening.to_string(),
            "stream already has an active subscription"
        );
        assert_eq!(
            StreamError::Exhausted.to_string(),
            "stream completed without a matching element"
        );
        assert_eq!(
            StreamError::Fault(Fault::new("oops")).to_string(),
            "oops"
        );
    }
}
