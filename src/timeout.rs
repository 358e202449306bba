//! Timeout policy: bounds the duration of a single attempt.
//!
//! Timeouts fail the attempt, never the whole call; an outer retry policy
//! may retry a timed-out attempt like any other failure. On the sync path a
//! watcher thread races the operation under the execution's interrupt lock:
//! whichever records first wins, and an intended interruption makes the
//! operation's own outcome moot. On the async path the attempt future is
//! bounded by the tokio timer and dropped on expiry.
//!
//! With `with_interrupt`, expiry also marks the execution's interrupt flag,
//! which cooperative operations observe through their context.

use crate::policy::{BoxFuture, Policy, PolicyExecutor};
use crate::result::ExecutionResult;
use crate::{ExecutionError, SharedState};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Errors returned by timeout configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError {
    ZeroDuration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutError::ZeroDuration => write!(f, "timeout duration must be non-zero"),
        }
    }
}

impl std::error::Error for TimeoutError {}

/// Attempt deadline with optional interruption.
#[derive(Debug, Clone)]
pub struct Timeout {
    duration: Duration,
    with_interrupt: bool,
}

impl Timeout {
    /// Bound each attempt to `duration`.
    pub fn of(duration: Duration) -> Result<Self, TimeoutError> {
        if duration.is_zero() {
            return Err(TimeoutError::ZeroDuration);
        }
        Ok(Self { duration, with_interrupt: false })
    }

    /// On expiry, also mark the execution interrupted so a cooperative
    /// operation can stop early.
    pub fn with_interrupt(mut self) -> Self {
        self.with_interrupt = true;
        self
    }

    /// The configured attempt bound.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether expiry requests interruption.
    pub fn interrupts(&self) -> bool {
        self.with_interrupt
    }
}

impl<R, E> Policy<R, E> for Timeout
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn to_executor(self: Arc<Self>, policy_index: usize) -> Arc<dyn PolicyExecutor<R, E>> {
        Arc::new(TimeoutExecutor { policy: self, index: policy_index })
    }
}

struct TimeoutExecutor {
    policy: Arc<Timeout>,
    index: usize,
}

impl TimeoutExecutor {
    fn expired<R, E>(&self) -> ExecutionResult<R, E> {
        ExecutionResult::failure(ExecutionError::Timeout { timeout: self.policy.duration })
    }
}

impl<R, E> PolicyExecutor<R, E> for TimeoutExecutor
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn policy_index(&self) -> usize {
        self.index
    }

    fn around_sync(
        &self,
        execution: &SharedState<R, E>,
        inner: &mut dyn FnMut() -> ExecutionResult<R, E>,
    ) -> ExecutionResult<R, E> {
        // done flag + condvar let the watcher exit as soon as the attempt
        // finishes instead of sleeping out the full timeout
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let watcher_gate = Arc::clone(&gate);
        let state = Arc::clone(execution);
        let duration = self.policy.duration;
        let interrupts = self.policy.with_interrupt;
        let timeout_result = self.expired::<R, E>();
        let watcher = std::thread::spawn(move || {
            let (lock, cvar) = &*watcher_gate;
            let deadline = Instant::now() + duration;
            let mut done = lock.lock().unwrap();
            loop {
                if *done {
                    return;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (guard, _) = cvar.wait_timeout(done, deadline - now).unwrap();
                done = guard;
            }
            drop(done);
            // Record before marking, so an operation that notices the
            // interrupt can never publish its own outcome first
            tracing::debug!(timeout_ms = duration.as_millis() as u64, "attempt timed out");
            state.record_attempt_result(timeout_result);
            if interrupts {
                state.mark_interrupted_if_running();
            }
        });

        let result = inner();

        {
            let (lock, cvar) = &*gate;
            *lock.lock().unwrap() = true;
            cvar.notify_one();
        }
        let _ = watcher.join();

        // Whatever was recorded first for this attempt stands
        execution.attempt_result().unwrap_or(result)
    }

    fn around_async<'a>(
        &'a self,
        execution: &'a SharedState<R, E>,
        inner: BoxFuture<'a, ExecutionResult<R, E>>,
    ) -> BoxFuture<'a, ExecutionResult<R, E>> {
        Box::pin(async move {
            match tokio::time::timeout(self.policy.duration, inner).await {
                Ok(result) => result,
                Err(_) => {
                    if self.policy.with_interrupt {
                        execution.set_interrupted();
                    }
                    tracing::debug!(
                        timeout_ms = self.policy.duration.as_millis() as u64,
                        "attempt timed out"
                    );
                    execution.record_attempt_result(self.expired())
                }
            }
        })
    }
}
