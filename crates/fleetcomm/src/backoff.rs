// ABOUTME: Bounded exponential reconnect backoff with jitter.
// ABOUTME: Delays never shrink between consecutive failures and settle at the cap.

use rand::Rng;
use std::time::Duration;

/// Tuning for reconnect delays.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Extra random delay as a fraction of the base delay, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }
}

/// Stateful delay generator for one connection.
///
/// The base delay doubles per attempt (`initial * 2^n`) up to `max`. Jitter is
/// added on top of the base and the result is clamped to
/// `[previous delay, max]`, so consecutive delays are non-decreasing and stay
/// at `max` once reached.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
    last: Option<Duration>,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            last: None,
        }
    }

    /// Next delay using the thread-local RNG.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    /// Next delay using the given RNG.
    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let base = self.base_delay();
        let extra = if self.policy.jitter > 0.0 {
            base.mul_f64(rng.gen_range(0.0..self.policy.jitter))
        } else {
            Duration::ZERO
        };

        let mut delay = base.saturating_add(extra).min(self.policy.max);
        if let Some(last) = self.last {
            delay = delay.max(last);
        }

        self.last = Some(delay);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Forget accumulated failures (after a successful connect).
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = None;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn base_delay(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(31));
        self.policy
            .initial
            .saturating_mul(factor)
            .min(self.policy.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_exponential_without_jitter() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(1000));
        let mut backoff = Backoff::new(policy);

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.attempt(), 6);
    }

    #[test]
    fn test_monotonic_then_constant_with_jitter() {
        for seed in 0..200u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let jitter = (seed % 11) as f64 / 10.0;
            let policy =
                BackoffPolicy::new(Duration::from_millis(50), Duration::from_millis(3_000))
                    .with_jitter(jitter);
            let mut backoff = Backoff::new(policy.clone());

            let mut previous = Duration::ZERO;
            let mut capped = false;
            for _ in 0..40 {
                let delay = backoff.next_delay_with(&mut rng);
                assert!(delay >= previous, "seed {seed}: {delay:?} < {previous:?}");
                assert!(delay <= policy.max);
                if capped {
                    assert_eq!(delay, policy.max, "seed {seed}: left the cap");
                }
                capped = delay == policy.max;
                previous = delay;
            }
            assert!(capped, "seed {seed}: never reached the cap");
        }
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(5));
        let mut backoff = Backoff::new(policy);

        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_many_attempts_do_not_overflow() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30));
        let mut backoff = Backoff::new(policy);
        for _ in 0..1_000 {
            assert!(backoff.next_delay() <= Duration::from_secs(30));
        }
    }

    #[test]
    fn test_jitter_is_clamped() {
        let policy = BackoffPolicy::default().with_jitter(4.0);
        assert_eq!(policy.jitter, 1.0);
        let policy = BackoffPolicy::default().with_jitter(-1.0);
        assert_eq!(policy.jitter, 0.0);
    }

    #[test]
    fn test_initial_above_max_is_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(20), Duration::from_secs(5));
        let mut backoff = Backoff::new(policy);
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }
}
