//! Client configuration

use std::time::Duration;

/// Endpoint descriptor for the subscription socket.
///
/// Immutable once constructed. The scheme is derived from the `secure`
/// flag: `wss://` when true, `ws://` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    host: String,
    secure: bool,
    path: String,
}

impl EndpointConfig {
    /// Default path of the subscription route.
    pub const DEFAULT_PATH: &str = "/graphql-ws";

    /// Creates a plain (`ws://`) endpoint for the given host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            secure: false,
            path: Self::DEFAULT_PATH.to_string(),
        }
    }

    /// Chooses `wss://` instead of `ws://`.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Overrides the subscription route path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Renders the endpoint URL.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}{}", scheme, self.host, self.path)
    }
}

/// Reconnect and timing policy for the connection supervisor.
///
/// Delays follow exponential doubling from `initial_delay` up to
/// `max_delay`. `max_attempts` bounds consecutive failed attempts;
/// 0 means retry forever. A successful handshake resets the counter.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Whether to reconnect after a dropped connection
    pub enabled: bool,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for the backoff delay
    pub max_delay: Duration,
    /// Maximum consecutive failed attempts (0 = unbounded)
    pub max_attempts: u32,
    /// How long to wait for the server's connection ack
    pub handshake_timeout: Duration,
    /// Default timeout for one-shot operations (queries/mutations)
    pub request_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
            handshake_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    /// Creates the default policy (unbounded exponential backoff).
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables reconnection entirely; the first drop is terminal.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets whether to reconnect after a drop.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the delay before the first retry.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the backoff upper bound.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the maximum consecutive failed attempts (0 = unbounded).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the default one-shot operation timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Backoff delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .initial_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        doubled.min(self.max_delay)
    }

    /// True once `attempt` consecutive failures exceed the budget.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt >= self.max_attempts
    }
}
