//! Session tuning knobs.

use std::time::Duration;

/// Configuration for a live session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a typing entry stays active without a fresh signal.
    pub typing_ttl: Duration,
    /// Per-room merged-sequence cap; oldest messages are evicted past it.
    /// `None` keeps everything.
    pub retention_cap: Option<usize>,
    /// First reconnect backoff delay; doubles per attempt.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Give up reconnecting after this many attempts (`None` for infinite).
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            typing_ttl: Duration::from_secs(3),
            retention_cap: Some(500),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_reconnect_attempts: None,
        }
    }
}

impl SessionConfig {
    /// Backoff delay for the given attempt number (0-based), capped to
    /// avoid overflow and to `max_backoff`.
    pub(crate) fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.initial_backoff * 2u32.pow(attempt.min(10));
        delay.min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let config = SessionConfig::default();
        assert_eq!(config.backoff_delay(0), Duration::from_millis(500));
        assert_eq!(config.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(6), Duration::from_secs(30));
        // Large attempt counts must not overflow
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_secs(30));
    }
}
