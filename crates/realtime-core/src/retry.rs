use std::time::Duration;

/// First retry delay after a failed request.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
/// Ceiling for any single retry delay, server hints included.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Exponential backoff: `min(base * 2^attempt, max)`, raised to any server hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    /// `max_delay_ms` below `base_delay_ms` is raised to it.
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay before retry number `attempt` (zero based). A `Retry-After`
    /// hint can lengthen the wait but never past the ceiling.
    pub fn delay_for_attempt(&self, attempt: u32, retry_after_hint_ms: Option<u64>) -> Duration {
        let doubled = 2_u64
            .checked_pow(attempt)
            .map_or(u64::MAX, |factor| self.base_delay_ms.saturating_mul(factor));
        let wait_ms = match retry_after_hint_ms {
            Some(hint) => doubled.max(hint),
            None => doubled,
        };
        Duration::from_millis(wait_ms.min(self.max_delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_DELAY_MS)
    }
}

/// Consecutive-failure counter paired with a [`RetryPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Number of failures since the last success.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait after the failure being recorded now.
    pub fn next_delay(&mut self, retry_after_hint_ms: Option<u64>) -> Duration {
        let delay = self
            .policy
            .delay_for_attempt(self.attempt, retry_after_hint_ms);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
