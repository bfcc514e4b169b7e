//! Socket seam for gateway sessions.
//!
//! A session talks to its client through the two halves of a text socket:
//! a [`FrameSource`] it reads from and a [`FrameSink`] it writes to. Adapting a
//! concrete WebSocket library means implementing these two traits on its split
//! halves. [`memory_socket`] gives an in-process pair for tests and demos.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::gateway::error::GatewayError;

/// Receiving half of a client socket.
#[async_trait]
pub trait FrameSource: Send {
    /// Next text frame; `Ok(None)` once the peer has closed.
    async fn recv_text(&mut self) -> Result<Option<String>, GatewayError>;
}

/// Sending half of a client socket.
#[async_trait]
pub trait FrameSink: Send {
    /// Sends one text frame. Fails with [`GatewayError::Closed`] if the peer is gone.
    async fn send_text(&mut self, text: String) -> Result<(), GatewayError>;

    /// Closes the socket with `code`.
    async fn close(&mut self, code: u16) -> Result<(), GatewayError>;
}

/// What the server side wrote, as seen by a [`MemoryPeer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    /// A text frame.
    Text(String),
    /// The close frame and its code.
    Close(u16),
}

/// Client end of an in-process socket.
pub struct MemoryPeer {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    incoming: mpsc::UnboundedReceiver<PeerFrame>,
}

impl MemoryPeer {
    /// Sends a text frame to the server. Returns `false` if the server half is gone.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.outgoing
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Next frame written by the server; `None` once the server half is dropped.
    pub async fn recv(&mut self) -> Option<PeerFrame> {
        self.incoming.recv().await
    }

    /// Closes the client side: the server's next read returns `Ok(None)`.
    pub fn hang_up(&mut self) {
        self.outgoing.take();
    }
}

/// Server-side receiving half of an in-process socket.
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv_text(&mut self) -> Result<Option<String>, GatewayError> {
        Ok(self.rx.recv().await)
    }
}

/// Server-side sending half of an in-process socket.
pub struct MemorySink {
    tx: mpsc::UnboundedSender<PeerFrame>,
    closed: bool,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), GatewayError> {
        if self.closed {
            return Err(GatewayError::Closed);
        }
        self.tx
            .send(PeerFrame::Text(text))
            .map_err(|_| GatewayError::Closed)
    }

    async fn close(&mut self, code: u16) -> Result<(), GatewayError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.tx
            .send(PeerFrame::Close(code))
            .map_err(|_| GatewayError::Closed)
    }
}

/// Creates a connected in-process socket: the client end plus the two server halves.
pub fn memory_socket() -> (MemoryPeer, MemorySource, MemorySink) {
    let (to_server, from_client) = mpsc::unbounded_channel();
    let (to_client, from_server) = mpsc::unbounded_channel();
    (
        MemoryPeer {
            outgoing: Some(to_server),
            incoming: from_server,
        },
        MemorySource { rx: from_client },
        MemorySink {
            tx: to_client,
            closed: false,
        },
    )
}
