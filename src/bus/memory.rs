//! # In-process bus
//!
//! [`MemoryBus`] is a broker living inside the process, and [`MemoryClient`]
//! is one connection to it implementing [`PubSubClient`]. Several clients on
//! the same broker behave like several server processes sharing one external
//! bus, which is what the tests use to check cross-process fan-out.
//!
//! ## Architecture
//! ```text
//!   MemoryClient A ──publish("chat")──► MemoryBus ──► inbox A ──► listen() A
//!                                        (channel →      │
//!                                         connections)   └──► inbox B ──► listen() B
//! ```
//!
//! ## Rules
//! - Each connection has an unbounded FIFO inbox; publish order is preserved
//!   per connection.
//! - `subscribe`/`unsubscribe` push an acknowledgement (control message) into
//!   the subscriber's own inbox, like a network bus replying on the connection.
//! - `listen` ends once the connection has no subscriptions and its inbox is drained.
//! - [`MemoryBus::sever`] drops every connection and makes each pending
//!   `listen` fail with [`BusError::ConnectionLost`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::bus::client::{BusMessage, MessageKind, PubSubClient};
use crate::error::BusError;

/// Item queued into a connection's inbox.
enum Inbound {
    Message(BusMessage),
    Failed(BusError),
    Closed,
}

type Inbox = mpsc::UnboundedSender<Inbound>;

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    /// Connected clients by id.
    connections: HashMap<u64, Inbox>,
    /// Channel → subscribed connection ids.
    channels: HashMap<String, HashSet<u64>>,
}

/// Shared in-process broker.
///
/// Cheap to clone: clones share the same broker.
#[derive(Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBus {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new (not yet connected) client on this broker.
    pub fn client(&self) -> MemoryClient {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            state.next_id
        };
        MemoryClient {
            id,
            bus: self.clone(),
            inbox_tx: tx,
            inbox_rx: Arc::new(tokio::sync::Mutex::new(rx)),
            subscriptions: Arc::new(Mutex::new(HashSet::new())),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Number of connections subscribed to `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .channels
            .get(channel)
            .map_or(0, HashSet::len)
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Delivers a raw payload to every subscriber of `channel`, bypassing UTF-8
    /// checks. Returns the number of connections reached.
    pub fn inject(&self, channel: &str, payload: impl Into<Vec<u8>>) -> usize {
        self.deliver(channel, BusMessage::message(channel, payload))
    }

    /// Drops every connection; pending and future `listen` reads fail with
    /// [`BusError::ConnectionLost`].
    pub fn sever(&self, reason: &str) {
        let mut state = self.state.lock();
        for (_, inbox) in state.connections.drain() {
            let _ = inbox.send(Inbound::Failed(BusError::ConnectionLost {
                reason: reason.to_string(),
            }));
        }
        state.channels.clear();
    }

    fn deliver(&self, channel: &str, msg: BusMessage) -> usize {
        let state = self.state.lock();
        let Some(ids) = state.channels.get(channel) else {
            return 0;
        };
        let mut reached = 0;
        for id in ids {
            if let Some(inbox) = state.connections.get(id) {
                if inbox.send(Inbound::Message(msg.clone())).is_ok() {
                    reached += 1;
                }
            }
        }
        reached
    }

    fn attach(&self, id: u64, inbox: Inbox) -> Result<(), BusError> {
        let mut state = self.state.lock();
        if state.connections.contains_key(&id) {
            return Err(BusError::AlreadyConnected);
        }
        state.connections.insert(id, inbox);
        Ok(())
    }

    fn detach(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        let was_connected = state.connections.remove(&id).is_some();
        state.channels.retain(|_, ids| {
            ids.remove(&id);
            !ids.is_empty()
        });
        was_connected
    }

    fn join(&self, id: u64, channel: &str) -> Result<(), BusError> {
        let mut state = self.state.lock();
        if !state.connections.contains_key(&id) {
            return Err(BusError::NotConnected);
        }
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(id);
        Ok(())
    }

    fn leave(&self, id: u64, channel: &str) -> Result<(), BusError> {
        let mut state = self.state.lock();
        if !state.connections.contains_key(&id) {
            return Err(BusError::NotConnected);
        }
        if let Some(ids) = state.channels.get_mut(channel) {
            ids.remove(&id);
            if ids.is_empty() {
                state.channels.remove(channel);
            }
        }
        Ok(())
    }

    fn is_connected(&self, id: u64) -> bool {
        self.state.lock().connections.contains_key(&id)
    }
}

/// Per-channel call counters recorded by a [`MemoryClient`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Bus-level subscribe calls.
    pub subscribes: usize,
    /// Bus-level unsubscribe calls.
    pub unsubscribes: usize,
}

/// One connection to a [`MemoryBus`].
pub struct MemoryClient {
    id: u64,
    bus: MemoryBus,
    inbox_tx: Inbox,
    inbox_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>>,
    subscriptions: Arc<Mutex<HashSet<String>>>,
    stats: Mutex<HashMap<String, ChannelStats>>,
}

impl MemoryClient {
    /// Subscribe/unsubscribe counters for `channel`.
    pub fn stats(&self, channel: &str) -> ChannelStats {
        self.stats.lock().get(channel).copied().unwrap_or_default()
    }

    /// Sorted list of channels this connection is subscribed to.
    pub fn channels(&self) -> Vec<String> {
        let mut list: Vec<String> = self.subscriptions.lock().iter().cloned().collect();
        list.sort_unstable();
        list
    }

    /// Whether this connection is attached to the broker.
    pub fn is_connected(&self) -> bool {
        self.bus.is_connected(self.id)
    }

    fn ack(&self, kind: MessageKind, channel: &str) {
        let _ = self
            .inbox_tx
            .send(Inbound::Message(BusMessage::control(kind, channel)));
    }
}

#[async_trait]
impl PubSubClient for MemoryClient {
    async fn connect(&self) -> Result<(), BusError> {
        self.bus.attach(self.id, self.inbox_tx.clone())
    }

    async fn close(&self) -> Result<(), BusError> {
        if self.bus.detach(self.id) {
            self.subscriptions.lock().clear();
            let _ = self.inbox_tx.send(Inbound::Closed);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<(), BusError> {
        self.bus.join(self.id, channel)?;
        self.subscriptions.lock().insert(channel.to_string());
        self.stats
            .lock()
            .entry(channel.to_string())
            .or_default()
            .subscribes += 1;
        self.ack(MessageKind::Subscribe, channel);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
        self.bus.leave(self.id, channel)?;
        self.subscriptions.lock().remove(channel);
        self.stats
            .lock()
            .entry(channel.to_string())
            .or_default()
            .unsubscribes += 1;
        self.ack(MessageKind::Unsubscribe, channel);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        if !self.bus.is_connected(self.id) {
            return Err(BusError::NotConnected);
        }
        let _ = self
            .bus
            .deliver(channel, BusMessage::message(channel, payload));
        Ok(())
    }

    fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    fn listen(&self) -> BoxStream<'static, Result<BusMessage, BusError>> {
        let inbox = Arc::clone(&self.inbox_rx);
        let subscriptions = Arc::clone(&self.subscriptions);

        stream::unfold((inbox, subscriptions), |(inbox, subscriptions)| async move {
            let next = {
                let mut rx = inbox.lock().await;
                let idle = subscriptions.lock().is_empty();
                if idle {
                    // Nothing to wait for: drain what is already queued, then end.
                    rx.try_recv().ok()
                } else {
                    rx.recv().await
                }
            };
            match next? {
                Inbound::Message(msg) => Some((Ok(msg), (inbox, subscriptions))),
                Inbound::Failed(err) => Some((Err(err), (inbox, subscriptions))),
                Inbound::Closed => None,
            }
        })
        .boxed()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
