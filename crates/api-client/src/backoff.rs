use configuration::StreamConfig;
use std::time::Duration;

/// Exponential reconnect schedule for the kline stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Consecutive failed attempts tolerated before the stream gives up.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (1-based):
    /// `initial_delay * factor^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }
}

impl From<&StreamConfig> for BackoffPolicy {
    fn from(config: &StreamConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.initial_backoff(),
            factor: config.backoff_factor,
            max_delay: config.max_backoff(),
        }
    }
}
