//! # Bus client contract
//!
//! [`PubSubClient`] is the seam between the broadcaster and a concrete external
//! publish/subscribe bus. It exposes the bus-native primitives only; everything
//! else (gating, decoding, fan-out) lives in the [`BusAdapter`](crate::bus::BusAdapter).
//!
//! ## Contract
//! - `subscribe`/`unsubscribe` may be called repeatedly for the same channel;
//!   the bus treats duplicates as no-ops.
//! - `publish` does not require the sender to be subscribed.
//! - `listen` yields every message read from the connection in bus order,
//!   including control replies (`Subscribe`/`Unsubscribe`) that the adapter
//!   filters out, and **ends** once the connection has no active subscriptions.
//!   A stream that ends without yielding anything while subscriptions remain
//!   is treated as a lost connection.
//! - `subscription_count` reflects subscriptions acknowledged so far and is
//!   read synchronously by the listener when its stream ends.
//!
//! ## Example
//! A client that accepts every command and never delivers anything:
//! ```rust
//! use async_trait::async_trait;
//! use broadcaster::BusError;
//! use broadcaster::bus::{BusMessage, PubSubClient};
//! use futures::stream::{self, BoxStream, StreamExt};
//!
//! struct NullBus;
//!
//! #[async_trait]
//! impl PubSubClient for NullBus {
//!     async fn connect(&self) -> Result<(), BusError> { Ok(()) }
//!     async fn close(&self) -> Result<(), BusError> { Ok(()) }
//!     async fn subscribe(&self, _channel: &str) -> Result<(), BusError> { Ok(()) }
//!     async fn unsubscribe(&self, _channel: &str) -> Result<(), BusError> { Ok(()) }
//!     async fn publish(&self, _channel: &str, _payload: &str) -> Result<(), BusError> { Ok(()) }
//!     fn subscription_count(&self) -> usize { 0 }
//!     fn listen(&self) -> BoxStream<'static, Result<BusMessage, BusError>> {
//!         stream::empty().boxed()
//!     }
//! }
//!
//! assert_eq!(NullBus.subscription_count(), 0);
//! ```

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BusError;

/// Type of a message read from the bus connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Acknowledgement of a channel subscription (control).
    Subscribe,
    /// Acknowledgement of a channel unsubscription (control).
    Unsubscribe,
    /// A published payload.
    Message,
}

impl MessageKind {
    /// Whether this kind carries a real payload (not protocol control noise).
    #[inline]
    pub fn is_payload(self) -> bool {
        matches!(self, MessageKind::Message)
    }

    /// Wire name, as buses usually report it.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Subscribe => "subscribe",
            MessageKind::Unsubscribe => "unsubscribe",
            MessageKind::Message => "message",
        }
    }
}

/// One raw message read from the bus.
///
/// Channel and payload are raw bytes: the bus does not promise UTF-8, and
/// decoding (and dropping what fails to decode) is the adapter's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Message type.
    pub kind: MessageKind,
    /// Channel the message refers to.
    pub channel: Vec<u8>,
    /// Payload (empty for control messages).
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Creates a payload message.
    pub fn message(channel: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: MessageKind::Message,
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Creates a control message of the given kind.
    pub fn control(kind: MessageKind, channel: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            channel: channel.into(),
            payload: Vec::new(),
        }
    }
}

/// Bus-native publish/subscribe primitives.
///
/// Implementations wrap one connection to an external bus. All methods take
/// `&self`; implementations are shared between the adapter's listener task and
/// the broadcaster's driver.
#[async_trait]
pub trait PubSubClient: Send + Sync + 'static {
    /// Establishes the connection.
    async fn connect(&self) -> Result<(), BusError>;

    /// Closes the connection and releases its resources.
    ///
    /// Must be safe to call while a `listen` stream is being read; that stream
    /// ends (or yields an error) afterwards.
    async fn close(&self) -> Result<(), BusError>;

    /// Subscribes the connection to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<(), BusError>;

    /// Unsubscribes the connection from `channel`.
    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError>;

    /// Publishes `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError>;

    /// Number of channels this connection is currently subscribed to.
    fn subscription_count(&self) -> usize;

    /// Reads messages from the connection until it has no subscriptions left.
    fn listen(&self) -> BoxStream<'static, Result<BusMessage, BusError>>;

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_message_is_payload() {
        assert!(MessageKind::Message.is_payload());
        assert!(!MessageKind::Subscribe.is_payload());
        assert!(!MessageKind::Unsubscribe.is_payload());
    }

    #[test]
    fn test_control_has_empty_payload() {
        let m = BusMessage::control(MessageKind::Subscribe, "chat");
        assert_eq!(m.kind.as_str(), "subscribe");
        assert_eq!(m.channel, b"chat".to_vec());
        assert!(m.payload.is_empty());
    }
}
