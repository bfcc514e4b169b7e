//! # Local subscriber handles.
//!
//! A [`Subscription`] is what [`Broadcaster::subscribe`](crate::Broadcaster::subscribe)
//! hands out: the consumer end of one queue registered under a channel.
//!
//! ```text
//!   driver ── fan_out(ev) ──► queue ──► Subscription::recv() / Stream::next()
//!                                │
//!                  Drop / close()└──► registry release ──► (last one) bus unsubscribe
//! ```
//!
//! Each subscription receives every event delivered on its channel after it
//! was created, in bus order, until it is released or the broadcaster stops.

mod subscription;

pub use subscription::Subscription;
