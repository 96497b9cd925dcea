//! Client configuration.

use std::time::Duration;

use crate::Backoff;

/// Settings for a [`ConnectionManager`](crate::ConnectionManager).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server endpoint, e.g. `ws://127.0.0.1:8080/ws`.
    pub url: String,

    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,

    /// Ceiling for the reconnect delay.
    pub max_delay: Duration,

    /// Reconnect attempts before the manager gives up and reports
    /// [`ConnectionState::Disconnected`](crate::ConnectionState::Disconnected).
    pub max_attempts: u32,

    /// How long opening the socket may take.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        let backoff = Backoff::default();
        Self {
            url: url.into(),
            base_delay: backoff.base,
            max_delay: backoff.max,
            max_attempts: backoff.max_attempts,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration, max_attempts: u32) -> Self {
        self.base_delay = base;
        self.max_delay = max.max(base);
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: self.base_delay,
            max: self.max_delay,
            max_attempts: self.max_attempts,
        }
    }
}
