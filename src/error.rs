//! Error types used by the broadcaster and the bus adapter.
//!
//! This module defines two main error enums:
//!
//! - [`BusError`]: failures of the external bus connection or of the listener loop.
//! - [`BroadcastError`]: errors raised by the [`Broadcaster`](crate::Broadcaster) itself.
//!
//! Both types provide an `as_label` helper for logging.

use thiserror::Error;

use crate::core::BroadcasterState;

/// # Errors produced by the bus connection.
///
/// Cloneable so that a single listener failure can be recorded once and
/// reported to every caller that observes it (`next_event`, `disconnect`).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The connection to the bus dropped (mid-listen or mid-command).
    #[error("bus connection lost: {reason}")]
    ConnectionLost {
        /// Underlying reason reported by the client.
        reason: String,
    },

    /// Any other I/O failure reported by the bus client.
    #[error("bus i/o error: {reason}")]
    Io {
        /// Underlying reason reported by the client.
        reason: String,
    },

    /// The client was used before `connect` or after `close`.
    #[error("bus client not connected")]
    NotConnected,

    /// `connect` was called twice.
    #[error("bus client already connected")]
    AlreadyConnected,

    /// The listener loop ended and no failure was recorded (cancelled or aborted).
    #[error("bus listener closed")]
    ListenerClosed,

    /// A channel expected to be live on the bus is not subscribed.
    #[error("channel '{channel}' is not subscribed on the bus")]
    NotSubscribed {
        /// Channel name.
        channel: String,
    },
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use broadcaster::BusError;
    ///
    /// let err = BusError::ConnectionLost { reason: "reset by peer".into() };
    /// assert_eq!(err.as_label(), "bus_connection_lost");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::ConnectionLost { .. } => "bus_connection_lost",
            BusError::Io { .. } => "bus_io",
            BusError::NotConnected => "bus_not_connected",
            BusError::AlreadyConnected => "bus_already_connected",
            BusError::ListenerClosed => "bus_listener_closed",
            BusError::NotSubscribed { .. } => "bus_not_subscribed",
        }
    }

    /// Indicates whether the connection is gone and the broadcaster must be rebuilt.
    ///
    /// The broadcaster never reconnects on its own; restart policy belongs to the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BusError::ConnectionLost { .. } | BusError::ListenerClosed
        )
    }
}

/// # Errors produced by the broadcaster.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BroadcastError {
    /// Operation called in the wrong lifecycle state.
    ///
    /// `publish`/`subscribe` are only valid while connected; `connect` only once.
    #[error("broadcaster is {actual}, expected {expected}")]
    InvalidState {
        /// State the operation requires.
        expected: BroadcasterState,
        /// State the broadcaster was in.
        actual: BroadcasterState,
    },

    /// Failure reported by the bus connection or the listener loop.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// The fan-out driver task panicked.
    #[error("fan-out driver panicked: {info}")]
    DriverPanicked {
        /// Panic payload, when it was a string.
        info: String,
    },
}

impl BroadcastError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use broadcaster::{BroadcastError, BusError};
    ///
    /// let err = BroadcastError::from(BusError::ListenerClosed);
    /// assert_eq!(err.as_label(), "bus_listener_closed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BroadcastError::InvalidState { .. } => "broadcast_invalid_state",
            BroadcastError::Bus(e) => e.as_label(),
            BroadcastError::DriverPanicked { .. } => "broadcast_driver_panicked",
        }
    }

    /// Returns the underlying bus error, if any.
    pub fn as_bus(&self) -> Option<&BusError> {
        match self {
            BroadcastError::Bus(e) => Some(e),
            _ => None,
        }
    }
}
