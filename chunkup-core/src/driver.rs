//! Waiting on transport readiness, and how long to wait.

use crate::{error::TransferError, transfer::Transfer};
use std::time::Duration;

/// The outcome of waiting on a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The handle can make progress.
    Ready,
    /// The timeout elapsed without any activity.
    TimedOut,
}

/// Blocks a session's driving task until its transfer can make progress.
///
/// Each session owns one driver, created by its
/// [`HandleFactory`](crate::HandleFactory) alongside the transfer. The driver
/// is the session's registration with whatever readiness mechanism the
/// transport is built on.
#[async_trait::async_trait]
pub trait EventDriver<T: Transfer>: Send + 'static {
    /// Waits until `handle` is ready for another increment of work or until
    /// `timeout` elapses.
    async fn wait_for_readiness(
        &mut self,
        handle: &mut T,
        timeout: Duration,
    ) -> Result<Readiness, TransferError>;

    /// Clears per-session state before the driver is reused.
    fn reset(&mut self) {}
}

/// Bounds on how long a session waits for readiness between increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// The first timeout, and the timeout after any successful wait.
    pub initial: Duration,
    /// The timeout never grows past this.
    pub maximum: Duration,
    /// The factor applied after every idle wait.
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1),
            maximum: Duration::from_millis(256),
            multiplier: 2,
        }
    }
}

/// Exponentially growing, capped wait timeouts.
///
/// A session grows the timeout every time a wait comes back idle and resets it
/// as soon as the handle reports activity, so a transfer stalled on the network
/// is polled less and less often without delaying a busy one.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.initial.min(policy.maximum),
            policy,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn grow(&mut self) {
        self.current = self
            .current
            .saturating_mul(self.policy.multiplier.max(1))
            .min(self.policy.maximum);
    }

    pub fn reset(&mut self) {
        self.current = self.policy.initial.min(self.policy.maximum);
    }

    /// Adjusts the next timeout after a wait finished with `readiness`.
    pub fn observe(&mut self, readiness: Readiness) {
        match readiness {
            Readiness::Ready => self.reset(),
            Readiness::TimedOut => self.grow(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_to_cap() {
        let mut backoff = Backoff::new(BackoffPolicy {
            initial: Duration::from_millis(1),
            maximum: Duration::from_millis(10),
            multiplier: 2,
        });
        let mut seen = vec![];
        for _ in 0..6 {
            seen.push(backoff.current().as_millis());
            backoff.observe(Readiness::TimedOut);
        }
        assert_eq!(seen, [1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn ready_resets() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        backoff.grow();
        backoff.grow();
        assert_eq!(backoff.current(), Duration::from_millis(4));
        backoff.observe(Readiness::Ready);
        assert_eq!(backoff.current(), Duration::from_millis(1));
    }

    #[test]
    fn degenerate_multiplier_does_not_shrink() {
        let mut backoff = Backoff::new(BackoffPolicy {
            initial: Duration::from_millis(3),
            maximum: Duration::from_millis(3),
            multiplier: 0,
        });
        backoff.grow();
        assert_eq!(backoff.current(), Duration::from_millis(3));
    }
}
