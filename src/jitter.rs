//! Jitter strategies for spreading retry delays.
//!
//! Strategy guide:
//! - `None`: deterministic delays for tests and tightly controlled retries.
//! - `Full`: uniform in `[0, delay]`, a good default for spreading load.
//! - `Equal`: uniform in `[delay/2, delay]`, keeps a floor under the delay.
//! - `Factor(f)`: uniform in `[delay*(1-f), delay*(1+f)]`, clamped at zero.
//! - `Decorrelated`: AWS-style stateful jitter growing from the previous sleep.
//!
//! Uses the thread-local RNG by default; `apply_with_rng` accepts a seeded
//! RNG for deterministic tests. Millisecond conversions saturate rather
//! than panic on very large durations.

use rand::{rng, Rng};
use std::time::Duration;

/// Internal state for decorrelated jitter; fields stay private so the
/// base/max relation holds.
#[derive(Debug)]
pub struct DecorrelatedConfig {
    base: Duration,
    max: Duration,
    previous: std::sync::Mutex<Duration>,
}

impl Clone for DecorrelatedConfig {
    fn clone(&self) -> Self {
        let previous = *self.previous.lock().unwrap();
        Self { base: self.base, max: self.max, previous: std::sync::Mutex::new(previous) }
    }
}

/// Randomization applied to a computed retry delay.
#[derive(Debug, Clone)]
pub enum Jitter {
    /// Use the exact delay
    None,
    /// Uniform in `[0, delay]`
    Full,
    /// Uniform in `[delay/2, delay]`
    Equal,
    /// Uniform in `[delay*(1-f), delay*(1+f)]`
    Factor(f64),
    /// Stateful decorrelated jitter
    Decorrelated(DecorrelatedConfig),
}

/// Errors returned by jitter configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum JitterError {
    FactorOutOfRange { factor: f64 },
    BaseExceedsMax,
}

impl std::fmt::Display for JitterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JitterError::FactorOutOfRange { factor } => {
                write!(f, "jitter factor must be in (0.0, 1.0] (got {})", factor)
            }
            JitterError::BaseExceedsMax => {
                write!(f, "decorrelated jitter: base must not exceed max")
            }
        }
    }
}

impl std::error::Error for JitterError {}

impl Jitter {
    /// Uniform jitter over `[0, delay]`.
    pub fn full() -> Self {
        Jitter::Full
    }

    /// Uniform jitter over `[delay/2, delay]`.
    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Proportional jitter over `[delay*(1-f), delay*(1+f)]` with `f` in `(0, 1]`.
    pub fn factor(factor: f64) -> Result<Self, JitterError> {
        if factor.is_nan() || factor <= 0.0 || factor > 1.0 {
            return Err(JitterError::FactorOutOfRange { factor });
        }
        Ok(Jitter::Factor(factor))
    }

    /// Decorrelated jitter bounded by `[base, max]`.
    pub fn decorrelated(base: Duration, max: Duration) -> Result<Self, JitterError> {
        if base > max {
            return Err(JitterError::BaseExceedsMax);
        }
        Ok(Jitter::Decorrelated(DecorrelatedConfig {
            base,
            max,
            previous: std::sync::Mutex::new(base),
        }))
    }

    /// Randomize a delay with the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_internal(delay, &mut rng)
    }

    /// Randomize a delay with a caller-supplied RNG (deterministic tests).
    pub fn apply_with_rng<G: Rng>(&self, delay: Duration, rng: &mut G) -> Duration {
        self.apply_internal(delay, rng)
    }

    fn as_millis_saturated(duration: Duration) -> u64 {
        duration.as_millis().try_into().unwrap_or(u64::MAX)
    }

    fn apply_internal<G: Rng>(&self, delay: Duration, rng: &mut G) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let millis = Self::as_millis_saturated(delay);
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(0..=millis))
            }
            Jitter::Equal => {
                let millis = Self::as_millis_saturated(delay);
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(millis / 2..=millis))
            }
            Jitter::Factor(factor) => {
                let millis = Self::as_millis_saturated(delay);
                if millis == 0 {
                    return Duration::ZERO;
                }
                let spread = (millis as f64 * factor) as u64;
                let lower = millis.saturating_sub(spread);
                let upper = millis.saturating_add(spread);
                Duration::from_millis(rng.random_range(lower..=upper))
            }
            Jitter::Decorrelated(config) => {
                // sleep = min(max, random(base, prev * 3)), tracking prev internally
                let base_millis = Self::as_millis_saturated(config.base);
                let max_millis = Self::as_millis_saturated(config.max);
                let mut prev = config.previous.lock().unwrap();
                let prev_millis = Self::as_millis_saturated(*prev);
                let upper = prev_millis.saturating_mul(3).min(max_millis);
                let lower = base_millis.min(upper);
                let jittered = rng.random_range(lower..=upper);
                *prev = Duration::from_millis(jittered);
                *prev
            }
        }
    }
}
