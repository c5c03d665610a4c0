//! Bounded exponential backoff for live calls

use std::time::Duration;

use crate::config::RetryConfig;

/// Delay before retry number `attempt` (0-based): `base * 2^attempt`, capped
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let delay = config
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(config.backoff_max_ms))
}

/// Total attempts a live call gets, first try included
pub fn total_attempts(config: &RetryConfig) -> u32 {
    config.max_retries.saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig {
            max_retries: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
        };
        assert_eq!(backoff_delay(&config, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(800));
        assert_eq!(backoff_delay(&config, 4), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(&config, 60), Duration::from_millis(1_000));
    }

    #[test]
    fn test_total_attempts() {
        let config = RetryConfig {
            max_retries: 2,
            ..Default::default()
        };
        assert_eq!(total_attempts(&config), 3);
    }
}
