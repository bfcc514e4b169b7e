//! # broadcaster
//!
//! **Broadcaster** fans out messages from an external publish/subscribe bus
//! to in-process subscribers.
//!
//! Each process holds one bus connection. Local consumers subscribe to named
//! channels; every message the bus delivers on a channel is handed to every
//! local subscriber of that channel, in bus order. A message published by any
//! process sharing the bus reaches the subscribers of all of them.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   publish(ch, msg) ──► BusAdapter ──► PubSubClient ──► external bus ◄── other processes
//!                                                            │
//!                                         listener loop ◄────┘
//!                                              │ (delivery queue, bus order)
//!                                              ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Broadcaster                                                      │
//! │  - driver task: applies bus (un)subscribe commands, fans out      │
//! │  - Registry: channel → subscriber queues (reference counted)      │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!   Subscription       Subscription       Subscription
//!   ("chat")           ("chat")           ("news")
//! ```
//!
//! ### Subscription lifecycle
//! ```text
//! subscribe(ch)
//!   ├─► register queue under ch
//!   │     ├─ first on ch ─► bus subscribe (awaited)
//!   │     └─ otherwise   ─► confirm ch is live (awaited)
//!   ├─► recv() ... events of ch in bus order
//!   └─► drop / close()
//!         ├─ remove queue
//!         └─ last on ch ─► bus unsubscribe
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                       |
//! |-------------------|--------------------------------------------------------------|------------------------------------------|
//! | **Broadcasting**  | Connect, publish, subscribe, disconnect.                     | [`Broadcaster`], [`Subscription`]        |
//! | **Bus seam**      | Plug a real pub/sub client; in-process bus for tests.        | [`bus::PubSubClient`], [`bus::MemoryBus`]|
//! | **Errors**        | Typed errors with stable log labels.                         | [`BroadcastError`], [`BusError`]         |
//! | **Configuration** | Centralize runtime settings.                                 | [`Config`]                               |
//!
//! ## Optional features
//! - `gateway` _(default)_: chat gateway bridging text-socket clients to a channel.
//! - `redis`: `bus::RedisClient`, a [`bus::PubSubClient`] over Redis pub/sub.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use broadcaster::{Broadcaster, Config, bus::MemoryBus};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = MemoryBus::new();
//!     let broadcaster = Broadcaster::new(Arc::new(bus.client()), &Config::default());
//!     broadcaster.connect().await?;
//!
//!     let mut chat = broadcaster.subscribe("chat").await?;
//!     broadcaster.publish("chat", "hello").await?;
//!
//!     let event = chat.recv().await.ok_or("stream ended")?;
//!     assert_eq!(event.message(), "hello");
//!
//!     drop(chat);
//!     broadcaster.disconnect().await?;
//!     Ok(())
//! }
//! ```
pub mod bus;
mod config;
mod core;
mod error;
mod events;
mod subscribers;

// ---- Public re-exports ----

pub use config::Config;
pub use core::{Broadcaster, BroadcasterState};
pub use error::{BroadcastError, BusError};
pub use events::Event;
pub use subscribers::Subscription;

// Optional: chat gateway over text sockets.
// Enabled by default; disable with `--no-default-features`.
#[cfg(feature = "gateway")]
pub mod gateway;
