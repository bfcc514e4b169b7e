//! # External bus plumbing.
//!
//! This module turns one connection to an external publish/subscribe bus into
//! a single ordered stream of [`Event`](crate::Event)s.
//!
//! ## Architecture
//! ```text
//!   publisher ──► BusAdapter::publish ──► PubSubClient ──► external bus
//!                                                             │
//!         (any process)                                       ▼
//!   PubSubClient::listen() ──► listener loop ──► delivery queue ──► BusAdapter::next_event()
//!                                   ▲
//!                             ListenerGate (parked while nothing is subscribed)
//! ```
//!
//! ## Contents
//! - [`PubSubClient`] bus-native primitives (the seam for real bus clients)
//! - [`BusMessage`], [`MessageKind`] raw messages read from the bus
//! - [`BusAdapter`] connection owner, listener loop and delivery queue
//! - [`ListenerGate`] ready/not-ready signal for the listener
//! - [`MemoryBus`], [`MemoryClient`] in-process bus (single process, tests)
//! - `RedisClient` Redis pub/sub connection (feature `redis`)

mod adapter;
mod client;
mod gate;
mod memory;
#[cfg(feature = "redis")]
mod redis_bus;

pub use adapter::BusAdapter;
pub use client::{BusMessage, MessageKind, PubSubClient};
pub use gate::ListenerGate;
pub use memory::{ChannelStats, MemoryBus, MemoryClient};
#[cfg(feature = "redis")]
pub use redis_bus::RedisClient;
