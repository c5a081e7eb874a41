//! Heartbeat watchdog: distinguishes a quiet-but-alive stream from a dead
//! connection.
//!
//! The watchdog is a single deadline, re-armed on every received frame
//! (data or comment). The read loop bounds each chunk await with
//! [`Heartbeat::remaining`]; when that window elapses the connection is
//! torn down and routed through the normal failure path so reconnection is
//! scheduled.

use std::time::Duration;

use tokio::time::Instant;

/// Idle-timeout watchdog for one connection. A zero interval disables the
/// feature: no deadline is ever armed.
#[derive(Debug)]
pub struct Heartbeat {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Whether the watchdog is configured at all.
    pub fn enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// The configured idle interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Arm the deadline `interval` from now. No-op when disabled.
    pub fn start(&mut self) {
        if self.enabled() {
            self.deadline = Some(Instant::now() + self.interval);
        }
    }

    /// Re-arm after a frame arrived. Identical to `start`; the name marks
    /// the liveness call sites.
    pub fn reset(&mut self) {
        self.start();
    }

    /// Disarm without disabling.
    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Time left before the watchdog fires, or `None` when disarmed or
    /// disabled (the read loop then waits unbounded).
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_interval_never_arms() {
        let mut hb = Heartbeat::new(Duration::ZERO);
        assert!(!hb.enabled());
        hb.start();
        hb.reset();
        assert_eq!(hb.remaining(), None);
    }

    #[tokio::test]
    async fn test_start_arms_deadline() {
        let mut hb = Heartbeat::new(Duration::from_secs(10));
        assert_eq!(hb.remaining(), None);
        hb.start();
        let remaining = hb.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_reset_pushes_deadline_forward() {
        let mut hb = Heartbeat::new(Duration::from_millis(100));
        hb.start();
        tokio::time::sleep(Duration::from_millis(60)).await;
        hb.reset();
        // After the reset, the full window is available again.
        assert!(hb.remaining().unwrap() > Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_stop_disarms() {
        let mut hb = Heartbeat::new(Duration::from_secs(10));
        hb.start();
        hb.stop();
        assert_eq!(hb.remaining(), None);
        assert!(hb.enabled());
    }

    #[tokio::test]
    async fn test_expired_deadline_saturates_to_zero() {
        let mut hb = Heartbeat::new(Duration::from_millis(10));
        hb.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(hb.remaining(), Some(Duration::ZERO));
    }
}
