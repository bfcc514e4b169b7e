//! Chat session: one authenticated client bridged to one broadcaster channel.
//!
//! ```text
//!             ┌──────── receive loop ────────┐
//! client ────►│ message{text} ─► publish(ch) │──► bus ──┐
//!             └──────────────────────────────┘          │
//!             ┌───────── send loop ──────────┐          │
//! client ◄────│ send_text(ev.message)        │◄─ Subscription(ch)
//!             └──────────────────────────────┘
//! first loop to end ─► other dropped ─► subscription released ─► close(close_code)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::Config;
use crate::core::Broadcaster;
use crate::gateway::auth::{CredentialService, Principal, authorize};
use crate::gateway::error::GatewayError;
use crate::gateway::frame::ClientFrame;
use crate::gateway::transport::{FrameSink, FrameSource};
use crate::subscribers::Subscription;

/// Serves chat clients on one channel of a shared [`Broadcaster`].
pub struct ChatSession {
    broadcaster: Arc<Broadcaster>,
    credentials: Arc<dyn CredentialService>,
    channel: String,
    close_code: u16,
    auth_deadline: Option<Duration>,
}

impl ChatSession {
    /// Creates a session factory; settings come from `config`.
    pub fn new(
        broadcaster: Arc<Broadcaster>,
        credentials: Arc<dyn CredentialService>,
        config: &Config,
    ) -> Self {
        Self {
            broadcaster,
            credentials,
            channel: config.channel.clone(),
            close_code: config.close_code,
            auth_deadline: config.auth_deadline(),
        }
    }

    /// Channel the session publishes to and listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Authorizes the client, then runs the chat until either side stops.
    ///
    /// The socket is closed with the configured close code in every case.
    pub async fn serve<S, K>(&self, mut source: S, mut sink: K) -> Result<Principal, GatewayError>
    where
        S: FrameSource,
        K: FrameSink,
    {
        let principal = match authorize(
            &mut source,
            &mut sink,
            self.credentials.as_ref(),
            self.auth_deadline,
        )
        .await
        {
            Ok(p) => p,
            Err(e) => {
                self.close(&mut sink).await;
                return Err(e);
            }
        };

        info!(principal = %principal.id, channel = %self.channel, "chat session started");
        let res = self.run(&mut source, &mut sink).await;
        info!(principal = %principal.id, ok = res.is_ok(), "chat session ended");
        res.map(|()| principal)
    }

    /// Runs the receive and send loops of an already authorized client.
    ///
    /// A peer that simply hangs up ends the session with `Ok`.
    pub async fn run<S, K>(&self, source: &mut S, sink: &mut K) -> Result<(), GatewayError>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let subscription = match self.broadcaster.subscribe(&self.channel).await {
            Ok(sub) => sub,
            Err(e) => {
                self.close(sink).await;
                return Err(e.into());
            }
        };

        let res = tokio::select! {
            res = self.receive_loop(source) => res,
            res = send_loop(&mut *sink, subscription) => res,
        };
        if let Err(e) = &res {
            debug!(error = %e, label = e.as_label(), "chat session stopped");
        }

        self.close(sink).await;
        res
    }

    async fn receive_loop<S>(&self, source: &mut S) -> Result<(), GatewayError>
    where
        S: FrameSource + ?Sized,
    {
        while let Some(text) = source.recv_text().await? {
            match ClientFrame::parse(&text)? {
                ClientFrame::Message { message } => {
                    self.broadcaster.publish(&self.channel, &message).await?;
                }
                other => {
                    return Err(GatewayError::protocol(format!(
                        "unexpected '{}' frame",
                        other.kind()
                    )));
                }
            }
        }
        Ok(())
    }

    async fn close<K>(&self, sink: &mut K)
    where
        K: FrameSink + ?Sized,
    {
        if let Err(e) = sink.close(self.close_code).await {
            debug!(error = %e, "socket already closed");
        }
    }
}

async fn send_loop<K>(sink: &mut K, mut subscription: Subscription) -> Result<(), GatewayError>
where
    K: FrameSink + ?Sized,
{
    while let Some(event) = subscription.recv().await {
        sink.send_text(event.message().to_string()).await?;
    }
    // Broadcaster stopped.
    Ok(())
}
