//! Rate limiter: bounds how often executions are admitted.
//!
//! Two algorithms share one mutex-guarded state and an injectable clock:
//!
//! - **smooth**: one permit per fixed interval, reservation style. The next
//!   free slot marches forward as permits are taken, spreading admissions
//!   evenly across the period.
//! - **bursty**: a fixed window admitting up to `max_permits` per period,
//!   resetting when the window rolls over.
//!
//! Admission computes the wait until a slot is free. Without `max_wait` any
//! nonzero wait rejects immediately; with it, the async path sleeps out
//! waits inside the bound. The sync path never blocks on admission.

use crate::clock::{Clock, MonotonicClock};
use crate::policy::{BoxFuture, Policy, PolicyExecutor};
use crate::result::ExecutionResult;
use crate::{ExecutionError, SharedState};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Errors returned by rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimiterError {
    ZeroPermits,
    ZeroPeriod,
}

impl std::fmt::Display for RateLimiterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimiterError::ZeroPermits => write!(f, "permits per period must be greater than zero"),
            RateLimiterError::ZeroPeriod => write!(f, "period must be non-zero"),
        }
    }
}

impl std::error::Error for RateLimiterError {}

#[derive(Debug)]
enum LimiterState {
    Smooth { interval: Duration, next_free: Duration },
    Bursty { max_permits: usize, period: Duration, window_start: Option<Duration>, used: usize },
}

/// Shared, thread-safe rate limiter policy.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<LimiterState>>,
    max_wait: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Smooth limiter: `max_executions` spread evenly over each `period`.
    pub fn smooth(max_executions: u32, period: Duration) -> Result<Self, RateLimiterError> {
        if max_executions == 0 {
            return Err(RateLimiterError::ZeroPermits);
        }
        if period.is_zero() {
            return Err(RateLimiterError::ZeroPeriod);
        }
        let interval = period / max_executions;
        Ok(Self {
            state: Arc::new(Mutex::new(LimiterState::Smooth {
                interval,
                next_free: Duration::ZERO,
            })),
            max_wait: None,
            clock: Arc::new(MonotonicClock::new()),
        })
    }

    /// Bursty limiter: up to `max_permits` per fixed `period` window.
    pub fn bursty(max_permits: usize, period: Duration) -> Result<Self, RateLimiterError> {
        if max_permits == 0 {
            return Err(RateLimiterError::ZeroPermits);
        }
        if period.is_zero() {
            return Err(RateLimiterError::ZeroPeriod);
        }
        Ok(Self {
            state: Arc::new(Mutex::new(LimiterState::Bursty {
                max_permits,
                period,
                window_start: None,
                used: 0,
            })),
            max_wait: None,
            clock: Arc::new(MonotonicClock::new()),
        })
    }

    /// Async admissions sleep out waits up to `max_wait` instead of
    /// rejecting immediately.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Substitute the time source (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Reserve a permit if one is free within `max_wait`. `Ok(wait)` means
    /// the permit is reserved after waiting `wait` (zero = immediately);
    /// `Err(earliest)` means no slot inside the bound, with the earliest
    /// wait that would have succeeded.
    pub fn try_acquire(&self, max_wait: Duration) -> Result<Duration, Duration> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            LimiterState::Smooth { interval, next_free } => {
                let wait = next_free.saturating_sub(now);
                if wait > max_wait {
                    return Err(wait);
                }
                *next_free = (*next_free).max(now) + *interval;
                Ok(wait)
            }
            LimiterState::Bursty { max_permits, period, window_start, used } => {
                let start = *window_start.get_or_insert(now);
                if now.saturating_sub(start) >= *period {
                    *window_start = Some(now);
                    *used = 1;
                    return Ok(Duration::ZERO);
                }
                if *used < *max_permits {
                    *used += 1;
                    return Ok(Duration::ZERO);
                }
                let wait = (start + *period).saturating_sub(now);
                if wait > max_wait {
                    return Err(wait);
                }
                // Reserve the first slot of the next window
                *window_start = Some(start + *period);
                *used = 1;
                Ok(wait)
            }
        }
    }
}

impl<R, E> Policy<R, E> for RateLimiter
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn to_executor(self: Arc<Self>, policy_index: usize) -> Arc<dyn PolicyExecutor<R, E>> {
        Arc::new(RateLimiterExecutor { policy: self, index: policy_index })
    }
}

struct RateLimiterExecutor {
    policy: Arc<RateLimiter>,
    index: usize,
}

impl RateLimiterExecutor {
    fn rejection<R, E>(&self, retry_after: Duration) -> ExecutionResult<R, E> {
        ExecutionResult::failure(ExecutionError::RateLimitExceeded { retry_after })
            .with_rejected_by(self.index)
    }
}

impl<R, E> PolicyExecutor<R, E> for RateLimiterExecutor
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn policy_index(&self) -> usize {
        self.index
    }

    fn pre_execute(&self, _execution: &SharedState<R, E>) -> Option<ExecutionResult<R, E>> {
        match self.policy.try_acquire(Duration::ZERO) {
            Ok(_) => None,
            Err(retry_after) => Some(self.rejection(retry_after)),
        }
    }

    fn pre_execute_async<'a>(
        &'a self,
        _execution: &'a SharedState<R, E>,
    ) -> BoxFuture<'a, Option<ExecutionResult<R, E>>> {
        Box::pin(async move {
            let max_wait = self.policy.max_wait.unwrap_or(Duration::ZERO);
            match self.policy.try_acquire(max_wait) {
                Ok(wait) => {
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                    None
                }
                Err(retry_after) => Some(self.rejection(retry_after)),
            }
        })
    }
}
