//! Backoff strategies for computing retry delays.
//!
//! Attempt semantics: attempt `0` is the initial call (no delay); retries
//! start at attempt `1`. Overflowing computations saturate at [`MAX_BACKOFF`].

use std::time::Duration;

/// Ceiling applied when delay arithmetic overflows (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffError {
    ConstantDoesNotSupportMax,
    MaxMustBePositive,
    MaxLessThanBase { base: Duration, max: Duration },
    FactorBelowOne { factor: f64 },
}

impl std::fmt::Display for BackoffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackoffError::ConstantDoesNotSupportMax => {
                write!(f, "with_max is only valid for linear or exponential backoff")
            }
            BackoffError::MaxMustBePositive => write!(f, "max must be greater than zero"),
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "max ({:?}) must be >= base ({:?})", max, base)
            }
            BackoffError::FactorBelowOne { factor } => {
                write!(f, "exponential factor must be >= 1.0 (got {})", factor)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

/// Delay progression between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Fixed delay between retries
    Constant { delay: Duration },
    /// Delay growing linearly with the attempt number, with optional cap
    Linear { base: Duration, max: Option<Duration> },
    /// Delay growing geometrically by `factor` per attempt, with optional cap
    Exponential { base: Duration, factor: f64, max: Option<Duration> },
}

impl Backoff {
    /// Fixed delay between retries.
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    /// No delay at all. Useful in tests and for immediate retries.
    pub fn none() -> Self {
        Backoff::Constant { delay: Duration::ZERO }
    }

    /// Linearly increasing delay: `base`, `2*base`, `3*base`, ...
    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base, max: None }
    }

    /// Doubling delay: `base`, `2*base`, `4*base`, ...
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, factor: 2.0, max: None }
    }

    /// Exponential delay with an explicit growth factor (>= 1.0).
    pub fn exponential_with_factor(base: Duration, factor: f64) -> Result<Self, BackoffError> {
        if factor.is_nan() || factor < 1.0 {
            return Err(BackoffError::FactorBelowOne { factor });
        }
        Ok(Backoff::Exponential { base, factor, max: None })
    }

    /// Cap the computed delay. Invalid for constant backoff, zero caps, and
    /// caps below the base delay.
    pub fn with_max(mut self, cap: Duration) -> Result<Self, BackoffError> {
        if cap.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self {
            Backoff::Linear { base, max } | Backoff::Exponential { base, max, .. } => {
                if cap < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max: cap });
                }
                *max = Some(cap);
                Ok(self)
            }
            Backoff::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Delay before the given attempt (0-based; attempt 0 has no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Linear { base, max } => {
                let multiplier = u32::try_from(attempt).unwrap_or(u32::MAX);
                let delay = base.checked_mul(multiplier).unwrap_or(MAX_BACKOFF);
                cap(delay, *max)
            }
            Backoff::Exponential { base, factor, max } => {
                let exponent = u32::try_from(attempt - 1).unwrap_or(u32::MAX);
                let scale = factor.powi(exponent.min(i32::MAX as u32) as i32);
                let nanos = base.as_nanos() as f64 * scale;
                let delay = if nanos.is_finite() && nanos < MAX_BACKOFF.as_nanos() as f64 {
                    Duration::from_nanos(nanos as u64)
                } else {
                    MAX_BACKOFF
                };
                cap(delay, *max)
            }
        }
    }
}

fn cap(delay: Duration, max: Option<Duration>) -> Duration {
    match max {
        Some(max) => delay.min(max),
        None => delay.min(MAX_BACKOFF),
    }
}
