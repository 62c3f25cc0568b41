use std::time::Duration;

/// Sleep helper with exponentially growing delays. Delays double from
/// `base` up to `ceiling`; with a limit, `next_delay` runs out after the
/// configured number of attempts.
pub struct ExponentialBackoff {
    attempt: u64,
    limit: Option<u64>,
    base: Duration,
    ceiling: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        ExponentialBackoff {
            attempt: 0,
            limit: None,
            base,
            ceiling,
        }
    }

    pub fn with_limit(base: Duration, ceiling: Duration, attempts: u64) -> Self {
        ExponentialBackoff {
            attempt: 0,
            limit: Some(attempts),
            base,
            ceiling,
        }
    }

    /// The delay before the next attempt, or `None` when the attempt
    /// budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(limit) = self.limit {
            if self.attempt >= limit {
                return None;
            }
        }
        let delay = self.delay();
        self.attempt += 1;
        Some(delay)
    }

    /// Record an attempt and sleep for the appropriate amount of time.
    pub async fn sleep_async(&mut self) {
        if let Some(delay) = self.next_delay() {
            tokio::time::sleep(delay).await
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn delay(&self) -> Duration {
        // Cap the shift so a long-running loop does not overflow.
        let delay = self.base.saturating_mul(1u32 << self.attempt.min(31));
        delay.min(self.ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_up_to_the_ceiling() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(4));

        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(4)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(4)));
    }

    #[test]
    fn limited_backoff_runs_out() {
        let mut backoff =
            ExponentialBackoff::with_limit(Duration::from_millis(1), Duration::from_secs(1), 2);

        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);

        backoff.reset();
        assert!(backoff.next_delay().is_some());
    }

    #[test]
    fn large_attempt_counts_do_not_overflow() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(45));
        backoff.attempt = 123_456;
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(45)));
    }
}
