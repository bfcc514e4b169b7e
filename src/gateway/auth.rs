//! Authorization handshake for gateway sessions.
//!
//! ```text
//! accept ──► wait ≤ auth_timeout for first frame
//!              ├─ timeout / peer closed / bad JSON / not "authorization" ─► Err, drop
//!              └─ authorization{token} ──► CredentialService::claim_token(token, Access)
//!                                            ├─ Ok(principal) ─► session runs
//!                                            └─ Err ─► send 401 error frame, Err
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::gateway::error::GatewayError;
use crate::gateway::frame::{ClientFrame, ServerFrame};
use crate::gateway::transport::{FrameSink, FrameSource};

/// Authenticated identity behind a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal {
    /// Stable user identifier.
    pub id: String,
}

impl Principal {
    /// Creates a principal with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Kind of token a claim expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Short-lived token presented on every connection.
    Access,
    /// Long-lived token used to mint access tokens.
    Refresh,
}

/// Why a token was rejected.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    /// Token lifetime is over.
    #[error("token expired")]
    Expired,
    /// Token is malformed, unsigned or unknown.
    #[error("token invalid")]
    Invalid,
    /// Token is valid but of another kind.
    #[error("wrong token type")]
    WrongType,
    /// Single-use token presented again.
    #[error("token already used")]
    AlreadyUsed,
}

/// Validates tokens and resolves them to a [`Principal`].
#[async_trait]
pub trait CredentialService: Send + Sync + 'static {
    /// Claims `token`, which must be of `kind`.
    async fn claim_token(&self, token: &str, kind: TokenKind) -> Result<Principal, ClaimError>;
}

/// Fixed token table; for tests, demos and single-tenant deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    tokens: HashMap<String, (TokenKind, Principal)>,
}

impl StaticCredentials {
    /// Creates an empty table: every claim fails with [`ClaimError::Invalid`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `token` of `kind` resolving to the principal `id`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, kind: TokenKind, id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), (kind, Principal::new(id)));
        self
    }
}

#[async_trait]
impl CredentialService for StaticCredentials {
    async fn claim_token(&self, token: &str, kind: TokenKind) -> Result<Principal, ClaimError> {
        match self.tokens.get(token) {
            Some((k, principal)) if *k == kind => Ok(principal.clone()),
            Some(_) => Err(ClaimError::WrongType),
            None => Err(ClaimError::Invalid),
        }
    }
}

/// Runs the authorization handshake on a freshly accepted socket.
///
/// `deadline = None` waits forever for the first frame.
pub async fn authorize<S, K>(
    source: &mut S,
    sink: &mut K,
    credentials: &dyn CredentialService,
    deadline: Option<Duration>,
) -> Result<Principal, GatewayError>
where
    S: FrameSource + ?Sized,
    K: FrameSink + ?Sized,
{
    let first = match deadline {
        Some(timeout) => tokio::time::timeout(timeout, source.recv_text())
            .await
            .map_err(|_| GatewayError::AuthTimeout { timeout })?,
        None => source.recv_text().await,
    }?;
    let text = first.ok_or(GatewayError::Closed)?;

    let token = match ClientFrame::parse(&text)? {
        ClientFrame::Authorization { token } => token,
        other => {
            return Err(GatewayError::protocol(format!(
                "expected authorization frame, got '{}'",
                other.kind()
            )));
        }
    };

    match credentials.claim_token(&token, TokenKind::Access).await {
        Ok(principal) => {
            debug!(principal = %principal.id, "session authorized");
            Ok(principal)
        }
        Err(reason) => {
            warn!(%reason, "session rejected");
            let frame = ServerFrame::unauthorized().to_text()?;
            if let Err(e) = sink.send_text(frame).await {
                debug!(error = %e, "could not deliver unauthorized frame");
            }
            Err(GatewayError::Unauthorized { reason })
        }
    }
}
