//! Session configuration

use luvo_protocol::transport::{DEFAULT_STALE_GRACE, DEFAULT_TIMEOUT};
use std::time::Duration;

/// Timing knobs for a [`crate::LampSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long to wait for the reply to each request
    pub request_timeout: Duration,
    /// How long after abandoning a request its reply is still awaited
    pub stale_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_TIMEOUT,
            stale_grace: DEFAULT_STALE_GRACE,
        }
    }
}

impl SessionConfig {
    /// Read `LUVO_TIMEOUT_MS` and `LUVO_STALE_GRACE_MS`, falling back to defaults
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            request_timeout: env_millis("LUVO_TIMEOUT_MS").unwrap_or(defaults.request_timeout),
            stale_grace: env_millis("LUVO_STALE_GRACE_MS").unwrap_or(defaults.stale_grace),
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_stale_grace(mut self, grace: Duration) -> Self {
        self.stale_grace = grace;
        self
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    let value = std::env::var(key).ok()?;
    match parse_millis(&value) {
        Some(duration) => Some(duration),
        None => {
            tracing::warn!("Ignoring invalid {}={:?}", key, value);
            None
        }
    }
}

/// Parse a positive millisecond count. Zero is rejected so timeouts stay finite and non-trivial.
fn parse_millis(value: &str) -> Option<Duration> {
    match value.trim().parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(ms) => Some(Duration::from_millis(ms)),
    }
}
