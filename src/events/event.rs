//! # Channel events delivered to subscribers.
//!
//! An [`Event`] is the unit of fan-out: one message published to one channel.
//! It is created by the bus listener when the external bus delivers a payload
//! and is handed (cloned) to every local subscriber queue of that channel.
//!
//! ## Rules
//! - **Immutable**: fields are read-only after construction.
//! - **Structural equality**: two events are equal iff channel and message are equal.
//! - **No identity**: no sequence numbers, no timestamps; once published, events
//!   with the same content are interchangeable.
//!
//! ## Example
//! ```rust
//! use broadcaster::Event;
//!
//! let ev = Event::new("chat", "hello");
//! assert_eq!(ev.channel(), "chat");
//! assert_eq!(ev.message(), "hello");
//! assert_eq!(ev, Event::new("chat", "hello"));
//! ```

use std::fmt;
use std::sync::Arc;

/// One message published on one channel.
///
/// Cheap to clone: both fields are reference-counted, so fan-out to `N`
/// subscribers does not copy the payload `N` times.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Event {
    channel: Arc<str>,
    message: Arc<str>,
}

impl Event {
    /// Creates a new event.
    pub fn new(channel: impl Into<Arc<str>>, message: impl Into<Arc<str>>) -> Self {
        Self {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Channel the event was published on.
    #[inline]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Opaque message payload.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Consumes the event and returns `(channel, message)`.
    pub fn into_parts(self) -> (Arc<str>, Arc<str>) {
        (self.channel, self.message)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.channel, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_structural() {
        let a = Event::new("chat", "hello");
        let b = Event::new(String::from("chat"), String::from("hello"));
        assert_eq!(a, b);
        assert_ne!(a, Event::new("chat", "bye"));
        assert_ne!(a, Event::new("news", "hello"));
    }

    #[test]
    fn test_clone_shares_payload() {
        let a = Event::new("chat", "x".repeat(1024));
        let b = a.clone();
        let (_, ma) = a.into_parts();
        let (_, mb) = b.into_parts();
        assert!(Arc::ptr_eq(&ma, &mb));
    }

    #[test]
    fn test_display() {
        assert_eq!(Event::new("chat", "hi").to_string(), "[chat] hi");
    }
}
