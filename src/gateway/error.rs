use std::time::Duration;

use thiserror::Error;

use crate::error::BroadcastError;
use crate::gateway::auth::ClaimError;

/// # Errors produced by a gateway session.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No authorization frame arrived in time.
    #[error("authorization frame not received within {timeout:?}")]
    AuthTimeout {
        /// Configured bound.
        timeout: Duration,
    },

    /// The credential service rejected the token.
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Rejection reason.
        reason: ClaimError,
    },

    /// The peer sent a frame that is not valid at this point.
    #[error("protocol violation: {reason}")]
    Protocol {
        /// What was wrong with the frame.
        reason: String,
    },

    /// The peer went away.
    #[error("connection closed by peer")]
    Closed,

    /// The underlying socket failed.
    #[error("transport error: {reason}")]
    Transport {
        /// Underlying reason.
        reason: String,
    },

    /// Publishing or subscribing through the broadcaster failed.
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

impl GatewayError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            GatewayError::AuthTimeout { .. } => "gateway_auth_timeout",
            GatewayError::Unauthorized { .. } => "gateway_unauthorized",
            GatewayError::Protocol { .. } => "gateway_protocol",
            GatewayError::Closed => "gateway_closed",
            GatewayError::Transport { .. } => "gateway_transport",
            GatewayError::Broadcast(e) => e.as_label(),
        }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        GatewayError::Protocol {
            reason: reason.into(),
        }
    }
}
