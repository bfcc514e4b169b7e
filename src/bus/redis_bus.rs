//! # Redis bus client
//!
//! [`RedisClient`] implements [`PubSubClient`] over Redis pub/sub. Each
//! client holds two connections: a pub/sub connection for SUBSCRIBE and
//! incoming messages, and a multiplexed command connection for PUBLISH (a
//! connection in subscribe mode cannot publish).
//!
//! ## Architecture
//! ```text
//!   publish ──► MultiplexedConnection ──► PUBLISH ch msg
//!
//!   subscribe ──► PubSubSink ──► SUBSCRIBE ch (ack awaited here)
//!                                      │
//!   listen() ◄── PubSubStream ◄────────┘  "message" frames only
//! ```
//!
//! ## Rules
//! - Redis acknowledges SUBSCRIBE/UNSUBSCRIBE through the sink's futures, so
//!   `listen` yields [`MessageKind::Message`] items only.
//! - `listen` ends once nothing is subscribed; the stream is parked in the
//!   client and picked up again by the next `listen` call.
//! - The pub/sub stream ending while the client is open is reported as
//!   [`BusError::ConnectionLost`]; ending after `close` is not.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ::redis::AsyncCommands;
use ::redis::aio::{MultiplexedConnection, PubSubSink};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::bus::client::{BusMessage, PubSubClient};
use crate::config::Config;
use crate::error::BusError;

type MessageStream = BoxStream<'static, ::redis::Msg>;

/// State shared between the client and its `listen` streams.
#[derive(Default)]
struct Shared {
    subscriptions: Mutex<HashSet<String>>,
    /// Pub/sub read half, parked here while no `listen` stream holds it.
    stream: Mutex<Option<MessageStream>>,
    /// Wakes a blocked `listen` stream after the last unsubscribe.
    idle: Notify,
    closed: AtomicBool,
}

impl Shared {
    fn park(&self, messages: MessageStream) {
        if !self.closed.load(Ordering::Acquire) {
            *self.stream.lock() = Some(messages);
        }
    }
}

/// One connection to a Redis server used as the external bus.
pub struct RedisClient {
    client: ::redis::Client,
    sink: tokio::sync::Mutex<Option<PubSubSink>>,
    publisher: Mutex<Option<MultiplexedConnection>>,
    shared: Arc<Shared>,
}

impl RedisClient {
    /// Creates a client for `url` (`redis://host:port/db`). Does not connect.
    pub fn open(url: &str) -> Result<Self, BusError> {
        let client = ::redis::Client::open(url).map_err(bus_error)?;
        Ok(Self {
            client,
            sink: tokio::sync::Mutex::new(None),
            publisher: Mutex::new(None),
            shared: Arc::new(Shared::default()),
        })
    }

    /// Creates a client for [`Config::broker_url`].
    pub fn from_config(config: &Config) -> Result<Self, BusError> {
        Self::open(&config.broker_url)
    }

    /// Sorted list of channels this connection is subscribed to.
    pub fn channels(&self) -> Vec<String> {
        let mut list: Vec<String> = self.shared.subscriptions.lock().iter().cloned().collect();
        list.sort_unstable();
        list
    }
}

#[async_trait]
impl PubSubClient for RedisClient {
    async fn connect(&self) -> Result<(), BusError> {
        let mut sink = self.sink.lock().await;
        if sink.is_some() {
            return Err(BusError::AlreadyConnected);
        }

        let publisher = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(bus_error)?;
        let (pubsub_sink, pubsub_stream) = self
            .client
            .get_async_pubsub()
            .await
            .map_err(bus_error)?
            .split();

        self.shared.closed.store(false, Ordering::Release);
        *self.shared.stream.lock() = Some(pubsub_stream.boxed());
        *self.publisher.lock() = Some(publisher);
        *sink = Some(pubsub_sink);

        info!(url = ?self.client.get_connection_info().addr, "redis connected");
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        let sink = self.sink.lock().await.take();
        self.shared.closed.store(true, Ordering::Release);
        self.shared.subscriptions.lock().clear();
        self.shared.stream.lock().take();
        self.publisher.lock().take();
        self.shared.idle.notify_one();

        if sink.is_some() {
            debug!("redis connection closed");
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), BusError> {
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(BusError::NotConnected)?;
        sink.subscribe(channel).await.map_err(bus_error)?;
        self.shared.subscriptions.lock().insert(channel.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(BusError::NotConnected)?;
        sink.unsubscribe(channel).await.map_err(bus_error)?;

        let idle = {
            let mut subscriptions = self.shared.subscriptions.lock();
            subscriptions.remove(channel);
            subscriptions.is_empty()
        };
        if idle {
            self.shared.idle.notify_one();
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let mut conn = self.publisher.lock().clone().ok_or(BusError::NotConnected)?;
        let receivers: i64 = conn.publish(channel, payload).await.map_err(bus_error)?;
        debug!(channel, receivers, "redis published");
        Ok(())
    }

    fn subscription_count(&self) -> usize {
        self.shared.subscriptions.lock().len()
    }

    fn listen(&self) -> BoxStream<'static, Result<BusMessage, BusError>> {
        let shared = Arc::clone(&self.shared);
        let Some(messages) = shared.stream.lock().take() else {
            return stream::once(async { Err(BusError::NotConnected) }).boxed();
        };

        stream::unfold((shared, Some(messages)), |(shared, messages)| async move {
            let mut messages = messages?;
            loop {
                if shared.subscriptions.lock().is_empty() {
                    shared.park(messages);
                    return None;
                }
                let next = tokio::select! {
                    next = messages.next() => Some(next),
                    _ = shared.idle.notified() => None,
                };
                // Woken by an unsubscribe: re-check whether anything is left.
                let Some(next) = next else {
                    continue;
                };
                return match next {
                    Some(msg) => {
                        let item = BusMessage::message(msg.get_channel_name(), msg.get_payload_bytes());
                        Some((Ok(item), (shared, Some(messages))))
                    }
                    None if shared.closed.load(Ordering::Acquire) => None,
                    None => {
                        let lost = BusError::ConnectionLost {
                            reason: "redis pub/sub stream closed".into(),
                        };
                        Some((Err(lost), (shared, None)))
                    }
                };
            }
        })
        .boxed()
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

fn bus_error(err: ::redis::RedisError) -> BusError {
    if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
        BusError::ConnectionLost {
            reason: err.to_string(),
        }
    } else {
        BusError::Io {
            reason: err.to_string(),
        }
    }
}
