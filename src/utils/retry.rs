//! Retry utilities: backoff builders for storage lock contention.
//!
//! Uses `backon` for exponential backoff with jitter. Handlers retry only
//! lock contention; every other failure surfaces on the first attempt.

use backon::ExponentialBuilder;

use crate::config::RetryConfig;

/// Backoff for storage lock contention, built from configuration.
pub fn contention_backoff(config: &RetryConfig) -> ExponentialBuilder {
    let builder = ExponentialBuilder::default()
        .with_min_delay(config.min_delay())
        .with_max_delay(config.max_delay())
        .with_max_times(config.max_attempts);

    if config.jitter {
        builder.with_jitter()
    } else {
        builder
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_backoff_respects_attempt_limit() {
        let config = RetryConfig {
            min_delay_ms: 1,
            max_delay_ms: 4,
            max_attempts: 3,
            jitter: false,
        };
        let delays: Vec<Duration> = backon::BackoffBuilder::build(contention_backoff(&config)).collect();
        assert_eq!(delays.len(), 3);
        assert_eq!(delays[0], Duration::from_millis(1));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(4)));
    }

    #[test]
    fn test_disabled_backoff_yields_no_delays() {
        let delays = backon::BackoffBuilder::build(contention_backoff(&RetryConfig::disabled()));
        assert_eq!(delays.count(), 0);
    }
}
