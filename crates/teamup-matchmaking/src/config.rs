//! Matchmaking configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`Matchmaker`](crate::Matchmaker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakingConfig {
    /// How often every non-empty queue's snapshot is republished on its
    /// `queue:<game>` channel, on top of the per-change updates.
    pub queue_broadcast_interval: Duration,

    /// Longest chat message accepted, in characters.
    pub max_message_len: usize,

    /// Retry schedule for presence writes to the store.
    pub presence_retry: RetryPolicy,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            queue_broadcast_interval: Duration::from_secs(10),
            max_message_len: 2000,
            presence_retry: RetryPolicy::default(),
        }
    }
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Factor the delay grows by after each failure.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// The delay after `current`, clamped to `max_delay`. Jitter is added
    /// by the caller.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_delay_doubles_until_clamped() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.next_delay(Duration::from_millis(100)),
            Duration::from_millis(200)
        );
        assert_eq!(
            policy.next_delay(Duration::from_secs(4)),
            Duration::from_secs(5)
        );
    }
}
