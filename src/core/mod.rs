//! Runtime core: lifecycle, registry and fan-out.
//!
//! The only public API from this module is [`Broadcaster`] (and its
//! [`BroadcasterState`]), which owns the bus connection and routes every
//! delivered event to the local subscribers of its channel.
//!
//! Internal modules:
//! - [`broadcaster`]: lifecycle state machine, publish/subscribe/disconnect;
//! - [`registry`]: channel → subscriber queues, reference-counted bus subscriptions;
//! - [`driver`]: the single task applying bus commands and fanning out events.

mod broadcaster;
mod driver;
pub(crate) mod registry;

pub use broadcaster::{Broadcaster, BroadcasterState};
