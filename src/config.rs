//! Client configuration: stream endpoint, headers, heartbeat, retry policy.
//!
//! `RetryPolicy` is the shape shared with the request-response API helper;
//! the stream engine evaluates it independently.

use std::collections::HashMap;
use std::time::Duration;

use crate::auth::AuthProvider;

/// Retry timing configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum consecutive failed attempts before the connection is
    /// declared dead.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied per attempt. Must be greater than 1.
    pub backoff_factor: f64,
    /// Ceiling on any computed delay.
    pub max_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    #[must_use]
    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }
}

/// Configuration for one logical event-stream subscription.
///
/// All fields can be changed after construction via
/// [`SseClient::reconfigure`](crate::client::SseClient::reconfigure); changes
/// apply from the next connection attempt onward and never alter a reconnect
/// delay that has already been computed.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Stream endpoint producing `text/event-stream`.
    pub url: String,
    /// Extra request headers sent on every attempt.
    pub headers: HashMap<String, String>,
    /// Idle interval after which the heartbeat watchdog declares the
    /// connection dead. Zero disables the watchdog entirely.
    pub heartbeat_interval: Duration,
    /// Reconnect timing.
    pub retry: RetryPolicy,
    /// Bearer-token source for the `Authorization` header.
    pub auth: Option<AuthProvider>,
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            heartbeat_interval: Duration::ZERO,
            retry: RetryPolicy::default(),
            auth: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthProvider) -> Self {
        self.auth = Some(auth);
        self
    }
}
