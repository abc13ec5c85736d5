// SPDX-FileCopyrightText: 2026 Safepass Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded retry with fixed backoff for envelope reads.

use std::time::Duration;

use safepass_config::model::EnvelopeConfig;

/// Maximum attempts and the fixed pause between them.
///
/// The pause uses `tokio::time`, so tests drive it with a paused clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt, no pause.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Attempt numbers, starting at 1.
    pub fn attempts(&self) -> std::ops::RangeInclusive<u32> {
        1..=self.max_attempts.max(1)
    }

    pub fn is_last(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts.max(1)
    }

    /// Sleep for the backoff interval.
    pub async fn pause(&self) {
        tokio::time::sleep(self.backoff).await;
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl From<&EnvelopeConfig> for RetryPolicy {
    fn from(config: &EnvelopeConfig) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_three_attempts_one_second_apart() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(policy.backoff, Duration::from_secs(1));
        assert!(!policy.is_last(2));
        assert!(policy.is_last(3));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.attempts().count(), 1);
    }

    #[test]
    fn built_from_envelope_config() {
        let policy = RetryPolicy::from(&EnvelopeConfig {
            retry_attempts: 5,
            retry_backoff_ms: 250,
        });
        assert_eq!(policy, RetryPolicy::new(5, Duration::from_millis(250)));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_advances_the_clock_by_backoff() {
        let start = tokio::time::Instant::now();
        RetryPolicy::default().pause().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }
}
