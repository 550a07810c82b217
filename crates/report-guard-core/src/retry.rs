use std::time::Duration;

/// Bounded-attempt backoff shared by the AI call path and queue redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier: multiplier.max(1),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Delay to wait after the given 1-based attempt failed, saturating at
    /// `max_delay` so a deep retry chain cannot stall a worker for minutes.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = u64::from(self.multiplier).saturating_pow(exponent);
        self.base_delay
            .saturating_mul(factor.min(u64::from(u32::MAX)) as u32)
            .min(self.max_delay)
    }

    pub fn attempts_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200), 2)
    }
}
