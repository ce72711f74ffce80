//! Exponential backoff for outbound sends.
//!
//! ```
//! use core::time::Duration;
//! use tether_core::backoff::RetryPolicy;
//!
//! let policy = RetryPolicy::default();
//! let delays: Vec<_> = policy.delays().collect();
//! assert_eq!(
//!     delays,
//!     [1, 2, 4, 8].map(Duration::from_secs).to_vec()
//! );
//! ```

use core::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of send attempts (attempts `0..=4`).
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Exponential backoff with optional jitter.
///
/// The delay after failed attempt `n` is `min(base * factor^n, max)`, scaled
/// by a jitter factor in `[1 - jitter, 1 + jitter]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(with = "millis")]
    base: Duration,
    #[serde(with = "millis")]
    max: Duration,
    factor: f64,
    jitter: f64,
    #[serde(skip)]
    attempt: usize,
}

impl Backoff {
    /// Create a new backoff with custom parameters.
    ///
    /// # Arguments
    ///
    /// * `base` - Delay after the first failed attempt
    /// * `max` - Cap on any single delay
    /// * `factor` - Multiplier per attempt (typically 2.0)
    /// * `jitter` - Randomization factor (0.0-1.0), applied as ±jitter
    #[must_use]
    pub const fn new(base: Duration, max: Duration, factor: f64, jitter: f64) -> Self {
        Self {
            base,
            max,
            factor,
            jitter,
            attempt: 0,
        }
    }

    /// The delay that follows failed attempt `attempt`, without jitter.
    #[must_use]
    pub fn nominal_delay(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let multiplier = self.factor.powi(exponent);
        if !multiplier.is_finite() {
            return self.max;
        }
        let max_secs = self.max.as_secs_f64();
        let secs = (self.base.as_secs_f64() * multiplier).clamp(0.0, max_secs);
        Duration::from_secs_f64(secs)
    }

    /// The delay to sleep after the current attempt; advances the counter.
    #[must_use]
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.jittered(self.attempt);
        self.attempt += 1;
        delay
    }

    /// The delay that follows failed attempt `attempt`, jitter included.
    ///
    /// The jitter is a pure function of the attempt number, so the same
    /// schedule comes out every time.
    #[must_use]
    pub fn jittered(&self, attempt: usize) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter <= 0.0 {
            return nominal;
        }
        let offset = spread(attempt).mul_add(2.0, -1.0) * self.jitter;
        nominal.mul_f64((1.0 + offset).max(0.0))
    }

    /// Reset the attempt counter to zero.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// The current attempt number.
    #[must_use]
    pub const fn attempt(&self) -> usize {
        self.attempt
    }
}

/// Maps an attempt number onto `[0, 1)` with a splitmix64 finalizer.
#[allow(clippy::cast_precision_loss)]
fn spread(attempt: usize) -> f64 {
    let mut x = u64::try_from(attempt)
        .unwrap_or(u64::MAX)
        .wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^= x >> 31;
    (x >> 11) as f64 / (1_u64 << 53) as f64
}

impl Default for Backoff {
    /// 1s base, doubling, capped at 60s, no jitter.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0, 0.0)
    }
}

/// How many times to try a send and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// The delay schedule.
    pub backoff: Backoff,

    /// Total attempts, including the first one. Zero behaves like one.
    pub max_attempts: usize,
}

impl RetryPolicy {
    /// Create a new [`RetryPolicy`].
    #[must_use]
    pub const fn new(backoff: Backoff, max_attempts: usize) -> Self {
        Self {
            backoff,
            max_attempts,
        }
    }

    /// Never retry: a single attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(Backoff::default(), 1)
    }

    /// Total attempts actually made, never less than one.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Delays slept between consecutive attempts, in order.
    ///
    /// There is one fewer delay than there are attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let mut backoff = self.backoff;
        backoff.reset();
        (1..self.attempts()).map(move |_| backoff.next_delay())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Backoff::default(), DEFAULT_MAX_ATTEMPTS)
    }
}

pub(crate) mod millis {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(dur: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(dur.as_millis()).unwrap_or(u64::MAX))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_doubles_from_one_second() {
        let mut backoff = Backoff::default();
        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, [1, 2, 4, 8].map(Duration::from_secs).to_vec());
    }

    #[test]
    fn respects_max_delay() {
        let mut backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
            2.0,
            0.0,
        );

        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn huge_attempt_numbers_saturate_at_max() {
        let backoff = Backoff::default();
        assert_eq!(backoff.nominal_delay(10_000), Duration::from_secs(60));
    }

    #[test]
    fn reset_clears_attempt_counter() {
        let mut backoff = Backoff::default();
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_in_range() {
        let mut backoff = Backoff::new(
            Duration::from_millis(1000),
            Duration::from_secs(30),
            2.0,
            0.2,
        );

        let d = backoff.next_delay();
        assert!(d >= Duration::from_millis(800));
        assert!(d <= Duration::from_millis(1200));
    }

    #[test]
    fn jitter_is_repeatable_and_bounded() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 2.0, 0.5);
        for attempt in 0..32 {
            let nominal = backoff.nominal_delay(attempt);
            let delay = backoff.jittered(attempt);
            assert_eq!(delay, backoff.jittered(attempt));
            assert!(delay >= nominal.mul_f64(0.5));
            assert!(delay <= nominal.mul_f64(1.5));
        }
    }

    mod retry_policy {
        use super::*;

        #[test]
        fn default_has_four_delays_for_five_attempts() {
            let policy = RetryPolicy::default();
            assert_eq!(policy.attempts(), 5);
            assert_eq!(policy.delays().count(), 4);
        }

        #[test]
        fn zero_attempts_still_tries_once() {
            let policy = RetryPolicy::new(Backoff::default(), 0);
            assert_eq!(policy.attempts(), 1);
            assert_eq!(policy.delays().count(), 0);
        }

        #[test]
        fn serializes_durations_as_millis() {
            let policy = RetryPolicy::default();
            let value = serde_json::to_value(policy).expect("serializable");
            assert_eq!(value["backoff"]["base"], serde_json::json!(1000));
            assert_eq!(value["max_attempts"], serde_json::json!(5));
        }
    }
}
