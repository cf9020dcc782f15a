//! Session configuration

use fido2_host_transport::Timeouts;

use std::time::Duration;

/// How busy channels are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles after each retry
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt number `attempt` (1-based, so attempt 2 waits
    /// `initial_backoff`)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(2).min(16);
        self.initial_backoff.saturating_mul(1 << doublings)
    }
}

/// Timeouts and policies for one device session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub transaction_timeout: Duration,
    pub user_action_timeout: Duration,
    pub cancel_drain_timeout: Duration,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    pub(crate) fn timeouts(&self) -> Timeouts {
        Timeouts {
            transaction: self.transaction_timeout,
            user_action: self.user_action_timeout,
            cancel_drain: self.cancel_drain_timeout,
            poll_interval: self.poll_interval,
        }
    }
}

/// Builder for SessionConfig
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    transaction_timeout: Duration,
    user_action_timeout: Duration,
    cancel_drain_timeout: Duration,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        let timeouts = Timeouts::default();
        Self {
            transaction_timeout: timeouts.transaction,
            user_action_timeout: timeouts.user_action,
            cancel_drain_timeout: timeouts.cancel_drain,
            poll_interval: timeouts.poll_interval,
            retry: RetryPolicy::default(),
        }
    }
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idle timeout while waiting for a reply; keepalives reset it
    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Bound on waiting for the user to touch the device
    pub fn user_action_timeout(mut self, timeout: Duration) -> Self {
        self.user_action_timeout = timeout;
        self
    }

    pub fn cancel_drain_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_drain_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts;
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.retry.initial_backoff = backoff;
        self
    }

    pub fn build(self) -> SessionConfig {
        SessionConfig {
            transaction_timeout: self.transaction_timeout,
            user_action_timeout: self.user_action_timeout,
            cancel_drain_timeout: self.cancel_drain_timeout,
            poll_interval: if self.poll_interval.is_zero() {
                Duration::from_millis(1)
            } else {
                self.poll_interval
            },
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts.max(1),
                ..self.retry
            },
        }
    }
}
