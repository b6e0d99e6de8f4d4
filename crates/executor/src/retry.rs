use configuration::OrderConfig;
use std::time::Duration;

/// Bounded re-query schedule for orders that have not settled yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total queries, including the first one. Zero behaves like one.
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// A single query with no waiting, for tests and dry runs.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&OrderConfig::default())
    }
}

impl From<&OrderConfig> for RetryPolicy {
    fn from(config: &OrderConfig) -> Self {
        Self::new(
            config.status_poll_attempts,
            Duration::from_millis(config.status_poll_delay_ms),
        )
    }
}
