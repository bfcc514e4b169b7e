//! # Listener gate
//!
//! Binary ready/not-ready signal that parks the bus listener while the
//! connection has nothing to listen to.
//!
//! ## Rules
//! - Opened by the adapter **after** a bus subscribe succeeds.
//! - Closed by the listener only when its `listen` stream ended **and** the
//!   client reports zero subscriptions; the check and the clear happen under
//!   the same lock, so a concurrent `open` can never be lost.
//! - Waiting on an open gate returns immediately.
//!
//! ```text
//!   subscribe ok ──► open() ─────────────┐
//!                                        ▼
//!   listener: wait_open() ──► listen() ... stream ends
//!                 ▲                          │
//!                 └── close_if(count == 0) ◄─┘
//! ```

use tokio::sync::watch;

/// Ready/not-ready signal for the listener loop.
#[derive(Debug)]
pub struct ListenerGate {
    tx: watch::Sender<bool>,
}

impl ListenerGate {
    /// Creates a gate in the given state.
    pub fn new(open: bool) -> Self {
        let (tx, _rx) = watch::channel(open);
        Self { tx }
    }

    /// Marks the gate ready and wakes the waiting listener.
    pub fn open(&self) {
        self.tx.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
    }

    /// Clears the gate if `idle()` holds; returns whether it was cleared.
    ///
    /// `idle` runs while the gate is locked, so it observes every `open` that
    /// happened before and none that happens after.
    pub fn close_if(&self, idle: impl FnOnce() -> bool) -> bool {
        self.tx.send_if_modified(|ready| {
            if *ready && idle() {
                *ready = false;
                true
            } else {
                false
            }
        })
    }

    /// Current state.
    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Waits until the gate is open.
    pub async fn wait_open(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the wait only ends by opening.
        let _ = rx.wait_for(|ready| *ready).await;
    }
}
