//! # Broadcaster configuration.
//!
//! Provides [`Config`], the centralized settings for the broadcaster and the gateway.
//!
//! Config is used in two ways:
//! 1. **Broadcaster creation**: `Broadcaster::new(client, config)`
//! 2. **Gateway sessions**: `ChatSession::new(broadcaster, credentials, &config)`
//! 3. **Redis bus** (feature `redis`): `RedisClient::from_config(&config)`
//!
//! ## Sentinel values
//! - `grace = 0s` → background tasks are aborted immediately on disconnect
//! - `auth_timeout = 0s` → the handshake waits forever for the authorization frame

use std::time::Duration;

/// Global configuration for the broadcaster runtime.
///
/// ## Field semantics
/// - `grace`: Maximum wait for the listener/driver tasks to stop on disconnect (`0s` = abort)
/// - `auth_timeout`: Bound on the gateway authorization handshake (`0s` = unbounded)
/// - `close_code`: Close code sent to a client when its session ends
/// - `channel`: Channel the gateway chat session publishes to and subscribes on
/// - `broker_url`: Address of the external bus (used by the Redis client)
///
/// ## Notes
/// All fields are public for flexibility. Prefer using helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for background tasks at disconnect before aborting them.
    ///
    /// On `disconnect` the driver and the listener are cancelled cooperatively;
    /// tasks still running after `grace` are aborted.
    pub grace: Duration,

    /// Maximum wait for the client's authorization frame.
    ///
    /// - `Duration::ZERO` = no bound
    /// - `> 0` = the handshake fails with `AuthTimeout` after this long
    pub auth_timeout: Duration,

    /// WebSocket close code used when a chat session ends (1001 = going away).
    pub close_code: u16,

    /// Channel used by the gateway chat session.
    pub channel: String,

    /// URL of the external bus, e.g. `redis://127.0.0.1:6379/0`.
    pub broker_url: String,
}

impl Config {
    /// Returns the shutdown grace as an `Option`.
    ///
    /// - `None` → abort background tasks immediately
    /// - `Some(d)` → wait up to `d`
    #[inline]
    pub fn grace_period(&self) -> Option<Duration> {
        if self.grace == Duration::ZERO {
            None
        } else {
            Some(self.grace)
        }
    }

    /// Returns the authorization timeout as an `Option`.
    ///
    /// - `None` → wait forever
    /// - `Some(d)` → handshake bounded by `d`
    #[inline]
    pub fn auth_deadline(&self) -> Option<Duration> {
        if self.auth_timeout == Duration::ZERO {
            None
        } else {
            Some(self.auth_timeout)
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 5s`
    /// - `auth_timeout = 12s`
    /// - `close_code = 1001`
    /// - `channel = "chat"`
    /// - `broker_url = "redis://127.0.0.1:6379"`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(12),
            close_code: 1001,
            channel: "chat".to_string(),
            broker_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}
