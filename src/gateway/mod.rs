//! # Chat gateway (feature `gateway`).
//!
//! Bridges text-socket clients to a shared [`Broadcaster`](crate::Broadcaster):
//! every authorized client publishes its chat lines on one channel and
//! receives every line published there, by any process on the bus.
//!
//! ## Contents
//! - [`ClientFrame`], [`ServerFrame`] JSON wire frames
//! - [`FrameSource`], [`FrameSink`] socket halves (the seam for a WebSocket library)
//! - [`CredentialService`], [`authorize`] token handshake
//! - [`ChatSession`] receive/send loops of one client
//! - [`memory_socket`] in-process socket for tests and demos

mod auth;
mod error;
mod frame;
mod session;
mod transport;

pub use auth::{ClaimError, CredentialService, Principal, StaticCredentials, TokenKind, authorize};
pub use error::GatewayError;
pub use frame::{ClientFrame, ServerFrame};
pub use session::ChatSession;
pub use transport::{
    FrameSink, FrameSource, MemoryPeer, MemorySink, MemorySource, PeerFrame, memory_socket,
};
