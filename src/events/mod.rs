//! Channel events: the value type carried from the bus to subscribers.
//!
//! ## Contents
//! - [`Event`] immutable `{channel, message}` pair
//!
//! ## Quick reference
//! - **Producer**: the bus listener loop (`bus::adapter`), one event per bus payload.
//! - **Consumers**: the broadcaster driver, which clones each event into every
//!   registered queue of its channel, and finally [`Subscription`](crate::Subscription)s.
//!
//! See `core/mod.rs` for the system-level wiring diagram.

mod event;

pub use event::Event;
