//! Reconnection timing: exponential backoff with jitter, one-shot
//! server-directed retry hints, and the connection state machine.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryPolicy;

/// Symmetric jitter applied to computed backoff delays (±5%).
const JITTER: f64 = 0.05;

/// Connection lifecycle states, broadcast over a `watch` channel.
///
/// `Idle → Connecting → Open → Scheduling → Connecting → …`, with `Closed`
/// terminal: reached only by explicit close or by exhausting the retry
/// ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnState {
    Idle,
    Connecting,
    Open,
    Scheduling { attempt: u32 },
    Closed,
}

/// Retry-count state and delay computation for one logical session.
///
/// Owned by the connection worker; `attempts` strictly increases across
/// consecutive failures and resets only on explicit connect or on reaching
/// the open state.
#[derive(Debug, Default)]
pub struct Backoff {
    attempts: u32,
    server_retry: Option<u64>,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a `retry:` hint from the stream. Only the very next delay
    /// honors it; it is cleared on use.
    pub fn record_server_hint(&mut self, millis: u64) {
        self.server_retry = Some(millis);
    }

    /// Reset the attempt counter: called on every explicit connect and on
    /// every successful open. A pending server hint survives, so a hint
    /// seen during a healthy connection still governs the next reconnect.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Decide the next reconnect. Returns the 1-based attempt number and
    /// the delay to sleep, or `None` when the retry ceiling is reached.
    pub fn next(&mut self, policy: &RetryPolicy) -> Option<(u32, Duration)> {
        if self.attempts >= policy.max_retries {
            return None;
        }
        let delay = match self.server_retry.take() {
            Some(millis) => Duration::from_millis(millis),
            None => jittered_delay(policy, self.attempts),
        };
        self.attempts += 1;
        Some((self.attempts, delay))
    }
}

/// `min(max_retry_delay, initial_delay * backoff_factor^attempt)` with ±5%
/// jitter so many clients do not reconnect in lockstep.
fn jittered_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.initial_delay.as_secs_f64() * policy.backoff_factor.powi(attempt as i32);
    let capped = base.min(policy.max_retry_delay.as_secs_f64());
    let factor = rand::thread_rng().gen_range(1.0 - JITTER..=1.0 + JITTER);
    Duration::from_secs_f64(capped * factor)
}
