//! # BusAdapter: one bus connection, one listener loop, one delivery queue.
//!
//! The [`BusAdapter`] owns a [`PubSubClient`] and turns whatever the bus
//! delivers into [`Event`]s, in bus order, behind a single read interface:
//! [`BusAdapter::next_event`].
//!
//! ## Architecture
//! ```text
//!   subscribe(ch) ──► client.subscribe(ch) ──► gate.open()
//!
//!   listener task:
//!   loop {
//!     ├─► gate.wait_open()                    (parked while nothing is subscribed)
//!     ├─► for msg in client.listen():
//!     │     ├─ Err(e)            ─► record failure, exit with Err(e)
//!     │     ├─ control message   ─► ignore
//!     │     ├─ non-UTF-8         ─► warn, drop
//!     │     └─ payload           ─► delivery queue ──► next_event()
//!     └─► stream ended: gate.close_if(client.subscription_count() == 0)
//!           └─ still subscribed and nothing read ─► exit with ConnectionLost
//!   }
//! ```
//!
//! ## Rules
//! - One bad message never stops the listener; only a client error does.
//! - A `listen` stream that ends empty while subscriptions remain is a dead
//!   connection (EOF without an error), not an idle one.
//! - Input already queued on the connection is read before cancellation is
//!   honoured, so a failure that happened before `disconnect` is recorded.
//! - A listener failure is recorded **before** the delivery queue closes, so
//!   `next_event` reports the original error rather than a generic close.
//! - `disconnect` always closes the client, even while the listener is mid-read,
//!   and never fails because the listener already exited.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::bus::client::{BusMessage, PubSubClient};
use crate::bus::gate::ListenerGate;
use crate::error::BusError;
use crate::events::Event;

/// Handle to the running listener task.
struct Listener {
    join: JoinHandle<Result<(), BusError>>,
    cancel: CancellationToken,
}

/// Bus connection adapter.
///
/// Created once per process (inside the [`Broadcaster`](crate::Broadcaster)),
/// connected at startup and disconnected at shutdown.
pub struct BusAdapter {
    client: Arc<dyn PubSubClient>,
    gate: Arc<ListenerGate>,
    grace: Option<Duration>,
    failure: Arc<Mutex<Option<BusError>>>,

    /// Producer side of the delivery queue, moved into the listener on connect.
    tx: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>,
    listener: Mutex<Option<Listener>>,
}

impl BusAdapter {
    /// Creates a disconnected adapter over `client`.
    ///
    /// `grace` bounds how long [`disconnect`](Self::disconnect) waits for the
    /// listener to wind down (`None` = abort immediately).
    pub fn new(client: Arc<dyn PubSubClient>, grace: Option<Duration>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            client,
            gate: Arc::new(ListenerGate::new(false)),
            grace,
            failure: Arc::new(Mutex::new(None)),
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            listener: Mutex::new(None),
        }
    }

    /// Establishes the bus connection and starts the listener loop.
    ///
    /// May be called once; a second call returns [`BusError::AlreadyConnected`].
    pub async fn connect(&self) -> Result<(), BusError> {
        if self.tx.lock().is_none() {
            return Err(BusError::AlreadyConnected);
        }
        self.client.connect().await?;

        let Some(tx) = self.tx.lock().take() else {
            return Err(BusError::AlreadyConnected);
        };
        let cancel = CancellationToken::new();
        let join = tokio::spawn(run_listener(
            Arc::clone(&self.client),
            Arc::clone(&self.gate),
            tx,
            Arc::clone(&self.failure),
            cancel.clone(),
        ));
        *self.listener.lock() = Some(Listener { join, cancel });

        info!(client = self.client.name(), "bus connected");
        Ok(())
    }

    /// Closes the bus connection and stops the listener loop.
    ///
    /// The client is closed unconditionally. The listener is cancelled and
    /// awaited up to the configured grace, then aborted. Returns only the
    /// outcome of closing the client.
    pub async fn disconnect(&self) -> Result<(), BusError> {
        let listener = self.listener.lock().take();
        if let Some(l) = &listener {
            l.cancel.cancel();
        }

        let closed = self.client.close().await;
        if let Err(e) = &closed {
            warn!(client = self.client.name(), error = %e, "bus close failed");
        }

        if let Some(Listener { mut join, .. }) = listener {
            match self.grace {
                Some(grace) => {
                    if tokio::time::timeout(grace, &mut join).await.is_err() {
                        warn!(?grace, "bus listener did not stop within grace; aborting");
                        join.abort();
                    }
                }
                None => join.abort(),
            }
        }

        info!(client = self.client.name(), "bus disconnected");
        closed
    }

    /// Subscribes the bus connection to `channel` and wakes the listener.
    pub async fn subscribe(&self, channel: &str) -> Result<(), BusError> {
        self.client.subscribe(channel).await?;
        self.gate.open();
        debug!(channel, "bus subscribed");
        Ok(())
    }

    /// Unsubscribes the bus connection from `channel`.
    pub async fn unsubscribe(&self, channel: &str) -> Result<(), BusError> {
        self.client.unsubscribe(channel).await?;
        debug!(channel, "bus unsubscribed");
        Ok(())
    }

    /// Publishes `message` on `channel`. The adapter need not be subscribed.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), BusError> {
        self.client.publish(channel, message).await
    }

    /// Returns the next event delivered by the bus, in bus order.
    ///
    /// Cancel-safe. Once the listener has stopped and the queue is drained,
    /// returns the listener's failure or [`BusError::ListenerClosed`].
    pub async fn next_event(&self) -> Result<Event, BusError> {
        if self.tx.lock().is_some() {
            return Err(BusError::NotConnected);
        }
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(ev) => Ok(ev),
            None => Err(self.failure().unwrap_or(BusError::ListenerClosed)),
        }
    }

    /// Error the listener loop terminated with, if any.
    pub fn failure(&self) -> Option<BusError> {
        self.failure.lock().clone()
    }

    /// Whether the listener is currently allowed to read (something is subscribed).
    pub fn is_listening(&self) -> bool {
        self.gate.is_open()
    }
}

impl Drop for BusAdapter {
    fn drop(&mut self) {
        if let Some(l) = self.listener.get_mut().take() {
            l.cancel.cancel();
            l.join.abort();
        }
    }
}

/// Listener task body: runs [`listen_loop`] until cancelled or failed.
///
/// Owns the delivery sender so it is dropped only after a failure is recorded.
async fn run_listener(
    client: Arc<dyn PubSubClient>,
    gate: Arc<ListenerGate>,
    tx: mpsc::UnboundedSender<Event>,
    failure: Arc<Mutex<Option<BusError>>>,
    cancel: CancellationToken,
) -> Result<(), BusError> {
    let res = tokio::select! {
        biased;
        res = listen_loop(client.as_ref(), &gate, &tx) => res,
        _ = cancel.cancelled() => Ok(()),
    };
    if let Err(e) = &res {
        error!(client = client.name(), error = %e, label = e.as_label(), "bus listener failed");
        *failure.lock() = Some(e.clone());
    }
    drop(tx);
    res
}

async fn listen_loop(
    client: &dyn PubSubClient,
    gate: &ListenerGate,
    tx: &mpsc::UnboundedSender<Event>,
) -> Result<(), BusError> {
    loop {
        gate.wait_open().await;

        let mut messages = client.listen();
        let mut received = false;
        while let Some(item) = messages.next().await {
            received = true;
            let msg = item?;
            if !msg.kind.is_payload() {
                trace!(kind = msg.kind.as_str(), "ignoring bus control message");
                continue;
            }
            match decode(msg) {
                Ok(ev) => {
                    if tx.send(ev).is_err() {
                        // Adapter dropped; nobody left to deliver to.
                        return Ok(());
                    }
                }
                Err(reason) => warn!(reason, "dropping malformed bus message"),
            }
        }

        if gate.close_if(|| client.subscription_count() == 0) {
            debug!("no active subscriptions; listener parked");
        } else if !received {
            return Err(BusError::ConnectionLost {
                reason: "listen stream ended with active subscriptions".into(),
            });
        }
    }
}

fn decode(msg: BusMessage) -> Result<Event, &'static str> {
    let channel = String::from_utf8(msg.channel).map_err(|_| "channel is not utf-8")?;
    let message = String::from_utf8(msg.payload).map_err(|_| "payload is not utf-8")?;
    Ok(Event::new(channel, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::{MemoryBus, MemoryClient};
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Connection that accepts subscriptions but whose reads hit EOF at once.
    #[derive(Default)]
    struct EofClient {
        subscriptions: AtomicUsize,
        listens: AtomicUsize,
    }

    #[async_trait]
    impl PubSubClient for EofClient {
        async fn connect(&self) -> Result<(), BusError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), BusError> {
            Ok(())
        }
        async fn subscribe(&self, _channel: &str) -> Result<(), BusError> {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn unsubscribe(&self, _channel: &str) -> Result<(), BusError> {
            self.subscriptions.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
        async fn publish(&self, _channel: &str, _payload: &str) -> Result<(), BusError> {
            Ok(())
        }
        fn subscription_count(&self) -> usize {
            self.subscriptions.load(Ordering::SeqCst)
        }
        fn listen(&self) -> BoxStream<'static, Result<BusMessage, BusError>> {
            self.listens.fetch_add(1, Ordering::SeqCst);
            stream::empty().boxed()
        }
    }

    const WAIT: Duration = Duration::from_secs(2);

    async fn connected(bus: &MemoryBus) -> (Arc<MemoryClient>, BusAdapter) {
        let client = Arc::new(bus.client());
        let adapter = BusAdapter::new(client.clone(), Some(Duration::from_secs(1)));
        adapter.connect().await.unwrap();
        (client, adapter)
    }

    async fn next(adapter: &BusAdapter) -> Result<Event, BusError> {
        tokio::time::timeout(WAIT, adapter.next_event())
            .await
            .expect("event within timeout")
    }

    #[tokio::test]
    async fn test_delivers_in_bus_order() {
        let bus = MemoryBus::new();
        let (_client, adapter) = connected(&bus).await;
        adapter.subscribe("chat").await.unwrap();

        for i in 0..5 {
            adapter.publish("chat", &format!("m{i}")).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(next(&adapter).await.unwrap(), Event::new("chat", format!("m{i}")));
        }
    }

    #[tokio::test]
    async fn test_gate_parks_and_reopens() {
        let bus = MemoryBus::new();
        let (_client, adapter) = connected(&bus).await;
        assert!(!adapter.is_listening());

        adapter.subscribe("chat").await.unwrap();
        assert!(adapter.is_listening());
        adapter.publish("chat", "one").await.unwrap();
        assert_eq!(next(&adapter).await.unwrap().message(), "one");

        adapter.unsubscribe("chat").await.unwrap();
        tokio::time::timeout(WAIT, async {
            while adapter.is_listening() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("listener parks once nothing is subscribed");

        // First message after re-subscribing is not missed.
        adapter.subscribe("chat").await.unwrap();
        adapter.publish("chat", "two").await.unwrap();
        assert_eq!(next(&adapter).await.unwrap().message(), "two");
    }

    #[tokio::test]
    async fn test_malformed_message_dropped() {
        let bus = MemoryBus::new();
        let (_client, adapter) = connected(&bus).await;
        adapter.subscribe("chat").await.unwrap();

        assert_eq!(bus.inject("chat", vec![0xff, 0xfe]), 1);
        adapter.publish("chat", "ok").await.unwrap();
        assert_eq!(next(&adapter).await.unwrap(), Event::new("chat", "ok"));
    }

    #[tokio::test]
    async fn test_listener_failure_surfaces() {
        let bus = MemoryBus::new();
        let (_client, adapter) = connected(&bus).await;
        adapter.subscribe("chat").await.unwrap();

        bus.sever("eof");
        let err = next(&adapter).await.unwrap_err();
        assert_eq!(err, BusError::ConnectionLost { reason: "eof".into() });
        assert_eq!(adapter.failure(), Some(err));

        // Already-dead listener does not make disconnect fail.
        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_eof_with_active_subscriptions_is_connection_lost() {
        let client = Arc::new(EofClient::default());
        let adapter = BusAdapter::new(client.clone(), Some(Duration::from_secs(1)));
        adapter.connect().await.unwrap();
        adapter.subscribe("chat").await.unwrap();

        let err = next(&adapter).await.unwrap_err();
        assert_eq!(
            err,
            BusError::ConnectionLost {
                reason: "listen stream ended with active subscriptions".into()
            }
        );
        assert_eq!(adapter.failure(), Some(err));
        assert_eq!(client.listens.load(Ordering::SeqCst), 1);
        adapter.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_queued_before_disconnect_is_recorded() {
        let bus = MemoryBus::new();
        let (_client, adapter) = connected(&bus).await;
        adapter.subscribe("chat").await.unwrap();

        bus.sever("gone");
        adapter.disconnect().await.unwrap();
        assert_eq!(
            adapter.failure(),
            Some(BusError::ConnectionLost {
                reason: "gone".into()
            })
        );
    }

    #[tokio::test]
    async fn test_connect_twice_rejected() {
        let bus = MemoryBus::new();
        let (_client, adapter) = connected(&bus).await;
        assert_eq!(adapter.connect().await, Err(BusError::AlreadyConnected));
    }

    #[tokio::test]
    async fn test_disconnect_releases_connection() {
        let bus = MemoryBus::new();
        let (client, adapter) = connected(&bus).await;
        adapter.subscribe("chat").await.unwrap();
        assert_eq!(bus.connection_count(), 1);

        adapter.disconnect().await.unwrap();
        assert_eq!(bus.connection_count(), 0);
        assert!(!client.is_connected());
        assert_eq!(bus.subscriber_count("chat"), 0);
        assert_eq!(next(&adapter).await, Err(BusError::ListenerClosed));
    }
}
