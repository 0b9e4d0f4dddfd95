use std::time::Duration;

use rand::Rng;

use crate::options::BackoffConfig;

/// Reconnect delay state for one subchannel.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    failures: u32,
}

impl Backoff {
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Delay before the next attempt, counting one more failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.unjittered(self.failures);
        self.failures = self.failures.saturating_add(1);

        let spread = self.config.jitter.clamp(0.0, MAX_JITTER);
        if spread.is_nan() || spread == 0.0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(-spread..=spread);
        saturating_secs(delay.as_secs_f64() * (1.0 + jitter), delay)
    }

    pub const fn reset(&mut self) {
        self.failures = 0;
    }

    fn unjittered(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures).unwrap_or(i32::MAX);
        let secs = self.config.base_delay.as_secs_f64() * self.config.multiplier.powi(exponent);

        saturating_secs(secs.min(self.config.max_delay.as_secs_f64()), self.config.max_delay)
    }
}

/// Jitter is kept below 100% so a delay never reaches zero or goes negative.
const MAX_JITTER: f64 = 0.99;

/// Converts `secs`, falling back to `fallback` when it is negative, NaN or
/// does not fit a `Duration`.
fn saturating_secs(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn without_jitter() -> BackoffConfig {
        BackoffConfig {
            jitter: 0.0,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let mut backoff = Backoff::new(without_jitter());

        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1600));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2560));

        for _ in 0..20 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(120));
    }

    #[test]
    fn test_reset_returns_to_base_delay() {
        let mut backoff = Backoff::new(without_jitter());
        for _ in 0..5 {
            backoff.next_delay();
        }

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_out_of_range_settings_never_panic() {
        let configs = [
            BackoffConfig {
                jitter: 3.0,
                ..BackoffConfig::default()
            },
            BackoffConfig {
                multiplier: -2.0,
                ..BackoffConfig::default()
            },
            BackoffConfig {
                multiplier: f64::NAN,
                jitter: f64::NAN,
                ..BackoffConfig::default()
            },
            BackoffConfig {
                max_delay: Duration::MAX,
                multiplier: f64::INFINITY,
                ..BackoffConfig::default()
            },
        ];

        for config in configs {
            let mut backoff = Backoff::new(config);
            for _ in 0..10 {
                let delay = backoff.next_delay();
                assert!(delay <= config.max_delay.max(config.base_delay).saturating_mul(2), "{config:?}: {delay:?}");
            }
        }
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        for _ in 0..100 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(800), "{delay:?}");
            assert!(delay <= Duration::from_millis(1200), "{delay:?}");
        }
    }
}
