use std::time::Duration;

/// Configuration for retrying a lost connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Base delay added to every retry.
    pub initial_delay: Duration,
    /// Growth factor; the attempt number is used as its exponent, in milliseconds.
    pub growth: f64,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Consecutive failures allowed before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1500),
            growth: 1.5,
            max_delay: Duration::from_millis(150_000),
            max_attempts: 150,
        }
    }
}

impl ReconnectConfig {
    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.growth < 1.0 || !self.growth.is_finite() {
            return Err(anyhow::Error::msg("reconnect growth must be a finite value of at least 1"));
        }
        if self.max_delay < self.initial_delay {
            return Err(anyhow::Error::msg(
                "reconnect max delay cannot be less than the initial delay",
            ));
        }
        if self.max_attempts == 0 {
            return Err(anyhow::Error::msg("at least one reconnect attempt is required"));
        }
        Ok(())
    }
}

/// Exponential backoff over a run of consecutive failures.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Number of consecutive failures recorded since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The delay before the given 1-based attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self.config.growth.powi(attempt.min(i32::MAX as u32) as i32);
        let max_millis = self.config.max_delay.as_millis() as f64;
        let millis = (self.config.initial_delay.as_millis() as f64 + exponential).min(max_millis);
        Duration::from_millis(millis as u64)
    }

    /// Records a failure, returning how long to wait before the next attempt.
    ///
    /// Returns [`None`] once the maximum number of attempts is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(self.delay_for_attempt(self.attempts))
    }

    /// Resets the failure count after a successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
