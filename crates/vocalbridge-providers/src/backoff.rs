//! Retry policy and backoff computation
//!
//! Delay math is pure so the bounds are testable without sleeping.

use rand::Rng;
use std::time::Duration;

/// Retry behavior for one provider path.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per path (primary and fallback each get this many).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Uniform jitter added on top of the base delay, as a fraction of it.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Base delay before the k-th retry (1-based):
    /// `min(max_delay, initial_delay * multiplier^(k-1))`.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exp);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Base delay plus uniform jitter in `[0, jitter * base]`.
    pub fn jittered_delay(&self, retry: u32, rng: &mut impl Rng) -> Duration {
        let base = self.base_delay(retry);
        let spread = base.as_millis() as f64 * self.jitter;
        let extra = if spread > 0.0 {
            rng.random_range(0.0..=spread)
        } else {
            0.0
        };
        base + Duration::from_millis(extra as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_doubles_until_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay(4), Duration::from_millis(800));
        // Far past the cap.
        assert_eq!(policy.base_delay(10), Duration::from_secs(5));
        assert_eq!(policy.base_delay(30), Duration::from_secs(5));
    }

    #[test]
    fn test_jittered_delay_within_bounds() {
        let policy = RetryPolicy::default();
        let mut rng = rand::rng();
        for retry in 1..=8 {
            let base = policy.base_delay(retry);
            for _ in 0..100 {
                let delay = policy.jittered_delay(retry, &mut rng);
                assert!(delay >= base, "retry {}: {:?} < base {:?}", retry, delay, base);
                let ceiling = base.mul_f64(1.0 + policy.jitter);
                assert!(
                    delay <= ceiling,
                    "retry {}: {:?} > ceiling {:?}",
                    retry,
                    delay,
                    ceiling
                );
            }
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        let mut rng = rand::rng();
        assert_eq!(
            policy.jittered_delay(2, &mut rng),
            Duration::from_millis(200)
        );
    }
}
