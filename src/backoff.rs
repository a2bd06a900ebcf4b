//! Exponential reconnect backoff with jitter.
//!
//! [`backoff_delay`] is a pure function so the schedule can be tested without
//! timers; [`next_delay`] samples the jitter with `rand`. Jitter is a
//! fraction of `base` in `[0, 1)`, which keeps the sequence non-decreasing:
//! `base·2ⁿ + jitter < base·2ⁿ⁺¹` for every `n`.

use std::time::Duration;

/// Delay before reconnect attempt number `attempt` (zero-based).
///
/// Returns `min(base · 2^attempt + jitter_fraction · base, max)`.
/// `jitter_fraction` is clamped into `[0, 1)`; overflow saturates to `max`.
///
/// ```
/// use outpost_live_client::backoff::backoff_delay;
/// use std::time::Duration;
///
/// let base = Duration::from_secs(1);
/// let max = Duration::from_secs(30);
/// assert_eq!(backoff_delay(0, base, max, 0.0), Duration::from_secs(1));
/// assert_eq!(backoff_delay(3, base, max, 0.5), Duration::from_millis(8_500));
/// assert_eq!(backoff_delay(10, base, max, 0.0), max);
/// ```
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration, jitter_fraction: f64) -> Duration {
    let fraction = if jitter_fraction.is_finite() {
        jitter_fraction.clamp(0.0, 0.999_999)
    } else {
        0.0
    };
    let exponential = 2u32
        .checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor));
    let Some(exponential) = exponential else {
        return max;
    };
    let jitter = base.mul_f64(fraction);
    exponential.saturating_add(jitter).min(max)
}

/// [`backoff_delay`] with a freshly sampled jitter.
pub fn next_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    backoff_delay(attempt, base, max, rand::random::<f64>())
}

/// Attempt counter plus the parameters of the schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    attempts: u32,
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            base,
            max: max.max(base),
            max_attempts,
        }
    }

    /// Number of attempts made since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// `true` once the attempt ceiling has been reached.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Consume one attempt and return the delay to wait before it, or `None`
    /// when exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = next_delay(self.attempts, self.base, self.max);
        self.attempts += 1;
        Some(delay)
    }

    /// Back to zero attempts; called on every successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(30);

    #[test]
    fn doubles_without_jitter() {
        let delays: Vec<_> = (0..5).map(|n| backoff_delay(n, BASE, MAX, 0.0)).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 16].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn never_exceeds_max() {
        for attempt in 0..64 {
            for jitter in [0.0, 0.25, 0.999] {
                assert!(backoff_delay(attempt, BASE, MAX, jitter) <= MAX);
            }
        }
        assert_eq!(backoff_delay(u32::MAX, BASE, MAX, 0.5), MAX);
    }

    #[test]
    fn non_decreasing_under_worst_case_jitter() {
        // Highest jitter on attempt n, lowest on attempt n + 1.
        for attempt in 0..40 {
            let this = backoff_delay(attempt, BASE, MAX, 0.999);
            let next = backoff_delay(attempt + 1, BASE, MAX, 0.0);
            assert!(this <= next, "attempt {attempt}: {this:?} > {next:?}");
        }
    }

    #[test]
    fn jitter_fraction_is_clamped() {
        assert_eq!(backoff_delay(0, BASE, MAX, -3.0), BASE);
        assert!(backoff_delay(0, BASE, MAX, 7.0) < BASE * 2);
        assert_eq!(backoff_delay(0, BASE, MAX, f64::NAN), BASE);
    }

    #[test]
    fn sampled_delay_stays_in_band() {
        for attempt in 0..6 {
            let delay = next_delay(attempt, BASE, MAX);
            let floor = backoff_delay(attempt, BASE, MAX, 0.0);
            assert!(delay >= floor && delay <= MAX);
        }
    }

    #[test]
    fn policy_exhausts_and_resets() {
        let mut policy = ReconnectPolicy::new(BASE, MAX, 3);
        let mut previous = Duration::ZERO;
        for _ in 0..3 {
            let delay = policy.next_delay().unwrap();
            assert!(delay >= previous);
            previous = delay;
        }
        assert!(policy.is_exhausted());
        assert_eq!(policy.next_delay(), None);

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        let delay = policy.next_delay().unwrap();
        assert!(delay >= BASE && delay < BASE * 2);
    }
}
