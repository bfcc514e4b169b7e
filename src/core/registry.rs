//! # Channel registry - channel name to local subscriber queues.
//!
//! The registry is the only shared mutable state of the broadcaster. It is
//! mutated by `subscribe` (register) and by subscription release (any task,
//! from `Drop`), and read by the driver when fanning out.
//!
//! ## Architecture
//! ```text
//! Broadcaster::subscribe ──► register(ch) ──► first queue?  ─► Command::Subscribe(ch)
//!                                             otherwise     ─► Command::Confirm(ch)
//! Registration::drop    ──► release(ch, id) ─► last queue?  ─► Command::Unsubscribe(ch)
//! driver                ──► fan_out(ev)     ─► snapshot senders of ev.channel ─► push
//! ```
//!
//! ## Rules
//! - A channel key exists **iff** at least one queue is registered under it.
//! - Commands are enqueued while the registry lock is held, so the driver
//!   applies bus subscribe/unsubscribe in exactly the order the registry changed.
//! - The lock is never held across `.await`; fan-out pushes to a snapshot.
//! - After [`close`](Registry::close) every queue is dropped (subscribers see
//!   end of stream), new registrations fail and releases are no-ops.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::error;

use crate::error::BusError;
use crate::events::Event;

/// Identifier of one subscriber queue.
pub(crate) type QueueId = u64;

/// Acknowledgement of a bus-level command, sent back by the driver.
pub(crate) type Ack = oneshot::Sender<Result<(), BusError>>;

/// Ordered bus-level work for the driver.
pub(crate) enum Command {
    /// First queue registered for the channel: subscribe on the bus.
    Subscribe { channel: String, ack: Ack },
    /// Queue joined an existing channel: confirm the bus subscription is live.
    Confirm { channel: String, ack: Ack },
    /// Last queue released: unsubscribe on the bus.
    Unsubscribe { channel: String },
    /// Completes once every earlier command has been applied.
    Barrier { ack: oneshot::Sender<()> },
}

#[derive(Default)]
struct RegistryState {
    next_id: QueueId,
    channels: HashMap<String, HashMap<QueueId, mpsc::UnboundedSender<Event>>>,
    closed: bool,
}

/// Output of a successful [`Registry::register`].
pub(crate) struct Registered {
    pub registration: Registration,
    pub queue: mpsc::UnboundedReceiver<Event>,
    pub ack: oneshot::Receiver<Result<(), BusError>>,
}

/// Channel → subscriber queues, plus the command queue feeding the driver.
pub(crate) struct Registry {
    state: Mutex<RegistryState>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Registry {
    /// Creates an empty registry and the receiving end of its command queue.
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Command>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Self {
            state: Mutex::new(RegistryState::default()),
            commands,
        });
        (registry, rx)
    }

    /// Registers a new queue under `channel`.
    ///
    /// Fails with [`BusError::ListenerClosed`] once the registry is closed.
    pub(crate) fn register(self: &Arc<Self>, channel: &str) -> Result<Registered, BusError> {
        let (tx, queue) = mpsc::unbounded_channel();
        let (ack_tx, ack) = oneshot::channel();

        let mut state = self.state.lock();
        if state.closed {
            return Err(BusError::ListenerClosed);
        }
        state.next_id += 1;
        let id = state.next_id;

        let queues = state.channels.entry(channel.to_string()).or_default();
        let first = queues.is_empty();
        queues.insert(id, tx);

        let cmd = if first {
            Command::Subscribe {
                channel: channel.to_string(),
                ack: ack_tx,
            }
        } else {
            Command::Confirm {
                channel: channel.to_string(),
                ack: ack_tx,
            }
        };
        // A dead driver drops the ack; the caller observes that instead.
        let _ = self.commands.send(cmd);
        drop(state);

        Ok(Registered {
            registration: Registration {
                registry: Arc::clone(self),
                channel: channel.into(),
                id,
            },
            queue,
            ack,
        })
    }

    /// Removes queue `id` from `channel`; unsubscribes the bus if it was the last one.
    fn release(&self, channel: &str, id: QueueId) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        let Some(queues) = state.channels.get_mut(channel) else {
            error!(channel, id, "release of a queue for an unknown channel");
            debug_assert!(false, "release of a queue for unknown channel '{channel}'");
            return;
        };
        if queues.remove(&id).is_none() {
            error!(channel, id, "release of an unknown queue");
            debug_assert!(false, "release of unknown queue {id} on '{channel}'");
            return;
        }
        if queues.is_empty() {
            state.channels.remove(channel);
            let _ = self.commands.send(Command::Unsubscribe {
                channel: channel.to_string(),
            });
        }
    }

    /// Pushes `event` to every queue currently registered for its channel.
    ///
    /// Returns the number of queues reached; `0` means the event was dropped.
    pub(crate) fn fan_out(&self, event: &Event) -> usize {
        let snapshot: Vec<mpsc::UnboundedSender<Event>> = {
            let state = self.state.lock();
            match state.channels.get(event.channel()) {
                Some(queues) => queues.values().cloned().collect(),
                None => return 0,
            }
        };

        snapshot
            .iter()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Enqueues a barrier; the receiver completes once the driver reaches it.
    pub(crate) fn barrier(&self) -> oneshot::Receiver<()> {
        let (ack, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Barrier { ack });
        rx
    }

    /// Drops every queue and refuses further registrations. Idempotent.
    ///
    /// Returns the channels that still had subscribers.
    pub(crate) fn close(&self) -> Vec<String> {
        let mut state = self.state.lock();
        state.closed = true;
        let mut channels: Vec<String> = state.channels.drain().map(|(ch, _)| ch).collect();
        channels.sort_unstable();
        channels
    }

    /// Returns sorted list of channels with at least one local subscriber.
    pub(crate) fn channels(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state.channels.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Number of local queues registered for `channel`.
    pub(crate) fn queue_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .channels
            .get(channel)
            .map_or(0, HashMap::len)
    }
}

/// Guard for one registered queue; releasing it is tied to `Drop`.
///
/// Because release runs in `Drop`, it happens on every exit path of the owner:
/// normal return, `?`, panic, or the owning future being cancelled.
pub(crate) struct Registration {
    registry: Arc<Registry>,
    channel: Arc<str>,
    id: QueueId,
}

impl Registration {
    pub(crate) fn channel(&self) -> &Arc<str> {
        &self.channel
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(&self.channel, self.id);
    }
}
