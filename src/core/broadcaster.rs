//! # Broadcaster: connection lifecycle, publish and subscribe.
//!
//! The [`Broadcaster`] is the public entry point. It owns the [`BusAdapter`],
//! the channel [`Registry`] and, while connected, the fan-out driver task.
//!
//! ## Lifecycle
//! ```text
//!  Uninitialized ──connect()──► Connected ──disconnect()──► Disconnecting ──► Disconnected
//!        │                          │
//!        └─ publish/subscribe ──►   └─ publish/subscribe OK
//!           InvalidState
//! ```
//!
//! ## Rules
//! - `connect` is valid once, from `Uninitialized`; a failed connect leaves the
//!   broadcaster `Uninitialized` so it may be retried.
//! - `subscribe` returns only after the channel is live on the bus, so the
//!   first message published afterwards is never missed.
//! - `disconnect` returns the listener's failure if the connection died,
//!   even when the driver had not yet observed it.
//! - Dropping a connected broadcaster cancels its driver; it does not close
//!   the bus connection cleanly. Call [`disconnect`](Broadcaster::disconnect).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{BusAdapter, PubSubClient};
use crate::config::Config;
use crate::core::driver::run_driver;
use crate::core::registry::{Command, Registered, Registry};
use crate::error::{BroadcastError, BusError};
use crate::subscribers::Subscription;

/// Observable lifecycle state of a [`Broadcaster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadcasterState {
    /// Created, not yet connected.
    Uninitialized,
    /// Connected; publish and subscribe are available.
    Connected,
    /// `disconnect` is in progress.
    Disconnecting,
    /// Terminal state.
    Disconnected,
}

impl BroadcasterState {
    /// Lowercase name, as used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcasterState::Uninitialized => "uninitialized",
            BroadcasterState::Connected => "connected",
            BroadcasterState::Disconnecting => "disconnecting",
            BroadcasterState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for BroadcasterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to the running fan-out driver.
struct Driver {
    join: JoinHandle<Result<(), BusError>>,
    cancel: CancellationToken,
}

enum Phase {
    Uninitialized,
    Connected(Driver),
    Disconnecting,
    Disconnected,
}

impl Phase {
    fn state(&self) -> BroadcasterState {
        match self {
            Phase::Uninitialized => BroadcasterState::Uninitialized,
            Phase::Connected(_) => BroadcasterState::Connected,
            Phase::Disconnecting => BroadcasterState::Disconnecting,
            Phase::Disconnected => BroadcasterState::Disconnected,
        }
    }
}

/// Fans out messages from an external bus to local subscriber queues.
///
/// One instance per process; share it behind an `Arc`.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use broadcaster::{Broadcaster, Config, bus::MemoryBus};
///
/// # async fn demo() -> Result<(), broadcaster::BroadcastError> {
/// let bus = MemoryBus::new();
/// let broadcaster = Broadcaster::new(Arc::new(bus.client()), &Config::default());
/// broadcaster.connect().await?;
///
/// let mut sub = broadcaster.subscribe("chat").await?;
/// broadcaster.publish("chat", "hello").await?;
/// assert_eq!(sub.recv().await.unwrap().message(), "hello");
///
/// drop(sub);
/// broadcaster.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct Broadcaster {
    adapter: Arc<BusAdapter>,
    registry: Arc<Registry>,
    /// Driver's command queue, taken on connect.
    commands: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    phase: Mutex<Phase>,
    grace: Option<Duration>,
}

impl Broadcaster {
    /// Creates a broadcaster over `client`. Nothing is connected yet.
    pub fn new(client: Arc<dyn PubSubClient>, config: &Config) -> Self {
        let grace = config.grace_period();
        let (registry, commands) = Registry::new();
        Self {
            adapter: Arc::new(BusAdapter::new(client, grace)),
            registry,
            commands: Mutex::new(Some(commands)),
            phase: Mutex::new(Phase::Uninitialized),
            grace,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BroadcasterState {
        self.phase.lock().state()
    }

    /// Connects to the bus and starts the fan-out driver.
    pub async fn connect(&self) -> Result<(), BroadcastError> {
        let commands = {
            let phase = self.phase.lock();
            let actual = phase.state();
            let taken = match *phase {
                Phase::Uninitialized => self.commands.lock().take(),
                _ => None,
            };
            taken.ok_or(BroadcastError::InvalidState {
                expected: BroadcasterState::Uninitialized,
                actual,
            })?
        };

        if let Err(e) = self.adapter.connect().await {
            *self.commands.lock() = Some(commands);
            return Err(e.into());
        }

        let cancel = CancellationToken::new();
        let join = tokio::spawn(run_driver(
            Arc::clone(&self.adapter),
            Arc::clone(&self.registry),
            commands,
            cancel.clone(),
        ));
        *self.phase.lock() = Phase::Connected(Driver { join, cancel });

        info!("broadcaster connected");
        Ok(())
    }

    /// Publishes `message` on `channel` through the bus.
    ///
    /// Has no local side effect: local subscribers receive it only when the
    /// bus delivers it back.
    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), BroadcastError> {
        self.ensure_connected()?;
        self.adapter.publish(channel, message).await?;
        Ok(())
    }

    /// Subscribes to `channel`, returning once the channel is live on the bus.
    ///
    /// Cancel-safe: if this future is dropped mid-wait, the queue it registered
    /// is released again.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, BroadcastError> {
        self.ensure_connected()?;

        let Registered {
            registration,
            queue,
            ack,
        } = self
            .registry
            .register(channel)
            .map_err(|e| self.adapter.failure().unwrap_or(e))?;
        let subscription = Subscription::new(registration, queue);

        match ack.await {
            Ok(Ok(())) => {
                debug!(channel, "local subscriber added");
                Ok(subscription)
            }
            Ok(Err(e)) => Err(e.into()),
            // Driver gone before applying the command.
            Err(_) => Err(self
                .adapter
                .failure()
                .unwrap_or(BusError::ListenerClosed)
                .into()),
        }
    }

    /// Waits until every bus subscribe/unsubscribe requested so far is applied.
    ///
    /// Returns immediately when the driver is not running.
    pub async fn settle(&self) {
        if self.state() != BroadcasterState::Connected {
            return;
        }
        let _ = self.registry.barrier().await;
    }

    /// Stops the driver, ends every subscription and closes the bus connection.
    ///
    /// Returns the error the connection died with, if it died. Calling it
    /// again once disconnected is a no-op.
    pub async fn disconnect(&self) -> Result<(), BroadcastError> {
        let driver = {
            let mut phase = self.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Disconnecting) {
                Phase::Connected(driver) => driver,
                Phase::Disconnected => {
                    *phase = Phase::Disconnected;
                    return Ok(());
                }
                other => {
                    let actual = other.state();
                    *phase = other;
                    return Err(BroadcastError::InvalidState {
                        expected: BroadcasterState::Connected,
                        actual,
                    });
                }
            }
        };

        let stopped = self.stop_driver(driver).await;
        let orphaned = self.registry.close();
        if !orphaned.is_empty() {
            debug!(?orphaned, "ending remaining subscriptions");
        }

        // The listener drains what the connection already delivered before it stops.
        let closed = self.adapter.disconnect().await;
        let failure = self.adapter.failure();
        *self.phase.lock() = Phase::Disconnected;
        info!("broadcaster disconnected");

        stopped?;
        if let Some(e) = failure {
            return Err(e.into());
        }
        closed.map_err(Into::into)
    }

    /// Sorted list of channels with at least one local subscriber.
    pub fn channels(&self) -> Vec<String> {
        self.registry.channels()
    }

    /// Number of local subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.registry.queue_count(channel)
    }

    fn ensure_connected(&self) -> Result<(), BroadcastError> {
        let actual = self.state();
        if actual == BroadcasterState::Connected {
            Ok(())
        } else {
            Err(BroadcastError::InvalidState {
                expected: BroadcasterState::Connected,
                actual,
            })
        }
    }

    async fn stop_driver(&self, driver: Driver) -> Result<(), BroadcastError> {
        let Driver { mut join, cancel } = driver;
        if join.is_finished() {
            return driver_outcome(join.await);
        }

        cancel.cancel();
        match self.grace {
            Some(grace) => match tokio::time::timeout(grace, &mut join).await {
                Ok(res) => driver_outcome(res),
                Err(_) => {
                    warn!(?grace, "fan-out driver did not stop within grace; aborting");
                    join.abort();
                    Ok(())
                }
            },
            None => {
                join.abort();
                Ok(())
            }
        }
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        if let Phase::Connected(driver) = self.phase.get_mut() {
            driver.cancel.cancel();
        }
    }
}

fn driver_outcome(res: Result<Result<(), BusError>, JoinError>) -> Result<(), BroadcastError> {
    match res {
        Ok(inner) => inner.map_err(Into::into),
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let info = if let Some(msg) = payload.downcast_ref::<&'static str>() {
                (*msg).to_string()
            } else if let Some(msg) = payload.downcast_ref::<String>() {
                msg.clone()
            } else {
                "unknown panic".to_string()
            };
            Err(BroadcastError::DriverPanicked { info })
        }
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;

    fn broadcaster(bus: &MemoryBus) -> Broadcaster {
        Broadcaster::new(Arc::new(bus.client()), &Config::default())
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BroadcasterState::Uninitialized.to_string(), "uninitialized");
        assert_eq!(BroadcasterState::Disconnecting.to_string(), "disconnecting");
    }

    #[tokio::test]
    async fn test_operations_require_connected() {
        let bus = MemoryBus::new();
        let b = broadcaster(&bus);

        let err = b.publish("chat", "x").await.unwrap_err();
        assert!(matches!(
            err,
            BroadcastError::InvalidState {
                expected: BroadcasterState::Connected,
                actual: BroadcasterState::Uninitialized,
            }
        ));
        assert!(b.subscribe("chat").await.is_err());
        assert!(b.disconnect().await.is_err());
        assert_eq!(b.state(), BroadcasterState::Uninitialized);
    }

    #[tokio::test]
    async fn test_connect_once_and_disconnect_idempotent() {
        let bus = MemoryBus::new();
        let b = broadcaster(&bus);
        b.connect().await.unwrap();
        assert_eq!(b.state(), BroadcasterState::Connected);

        let err = b.connect().await.unwrap_err();
        assert!(matches!(
            err,
            BroadcastError::InvalidState {
                expected: BroadcasterState::Uninitialized,
                actual: BroadcasterState::Connected,
            }
        ));

        b.disconnect().await.unwrap();
        assert_eq!(b.state(), BroadcasterState::Disconnected);
        b.disconnect().await.unwrap();
        assert!(b.publish("chat", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_connect_can_retry() {
        let bus = MemoryBus::new();
        let client = Arc::new(bus.client());
        // Occupy the connection so the broadcaster's connect fails.
        client.connect().await.unwrap();
        let b = Broadcaster::new(client.clone(), &Config::default());

        let err = b.connect().await.unwrap_err();
        assert_eq!(err.as_bus(), Some(&BusError::AlreadyConnected));
        assert_eq!(b.state(), BroadcasterState::Uninitialized);

        client.close().await.unwrap();
        b.connect().await.unwrap();
        assert_eq!(b.state(), BroadcasterState::Connected);
        b.disconnect().await.unwrap();
    }

    async fn explode() -> Result<(), BusError> {
        panic!("boom")
    }

    #[tokio::test]
    async fn test_driver_panic_payload() {
        let res = tokio::spawn(explode()).await;
        match driver_outcome(res) {
            Err(BroadcastError::DriverPanicked { info }) => assert_eq!(info, "boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
