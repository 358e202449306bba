//! Externally-completed executions.
//!
//! Some operations cannot return their outcome from a function body: a
//! callback API, a message handler, a side channel. For those the engine
//! hands the operation an [`AsyncExecution`] and parks the attempt until
//! the handle records an outcome. The first record per attempt wins;
//! duplicates and records from stale attempts are dropped. When a retry
//! policy asks for another attempt the operation is re-invoked with a fresh
//! handle.

use crate::execution::{ExecutionContext, SharedState};
use crate::result::ExecutionResult;
use crate::ExecutionError;
use std::sync::Arc;
use std::time::Duration;

/// Recording handle for one attempt of an externally-completed execution.
///
/// Cheap to clone; clones refer to the same attempt.
#[derive(Debug)]
pub struct AsyncExecution<R, E> {
    state: SharedState<R, E>,
    attempt: usize,
}

impl<R, E> Clone for AsyncExecution<R, E> {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state), attempt: self.attempt }
    }
}

impl<R, E> AsyncExecution<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(state: SharedState<R, E>, attempt: usize) -> Self {
        Self { state, attempt }
    }

    /// Record this attempt's outcome. A failure takes precedence over a
    /// value; recording neither is a no-op. Returns whether this call was
    /// the one that recorded.
    pub fn record(&self, value: Option<R>, failure: Option<ExecutionError<E>>) -> bool {
        let result = match (value, failure) {
            (_, Some(failure)) => ExecutionResult::failure(failure),
            (Some(value), None) => ExecutionResult::success(value),
            (None, None) => return false,
        };
        self.record_internal(result)
    }

    /// Record a successful outcome.
    pub fn record_result(&self, value: R) -> bool {
        self.record_internal(ExecutionResult::success(value))
    }

    /// Record an operation failure.
    pub fn record_failure(&self, failure: E) -> bool {
        self.record_internal(ExecutionResult::failure(ExecutionError::Inner(failure)))
    }

    /// Record a policy-level or engine-level failure.
    pub fn record_error(&self, failure: ExecutionError<E>) -> bool {
        self.record_internal(ExecutionResult::failure(failure))
    }

    /// Complete with a default success if nothing was recorded yet.
    pub fn complete(&self) -> bool
    where
        R: Default,
    {
        self.record_internal(ExecutionResult::success(R::default()))
    }

    fn record_internal(&self, result: ExecutionResult<R, E>) -> bool {
        if self.state.is_cancelled() {
            // The future already completed with cancellation
            return false;
        }
        self.state.try_record_for_attempt(self.attempt, result)
    }

    /// Whether an outcome was already recorded for this attempt.
    pub fn is_attempt_recorded(&self) -> bool {
        self.state.attempt_result().is_some() && self.state.attempts() == self.attempt
    }

    /// Whether the whole execution reached a terminal outcome.
    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    /// Attempts started so far, this one included.
    pub fn attempts(&self) -> usize {
        self.state.attempts()
    }

    /// Time since the first attempt started.
    pub fn elapsed(&self) -> Duration {
        self.state.elapsed()
    }

    /// Whether a timeout or cancellation asked this attempt to stop.
    pub fn is_interrupted(&self) -> bool {
        self.state.is_interrupted()
    }

    /// Read-only view of the execution.
    pub fn context(&self) -> ExecutionContext<R, E> {
        ExecutionContext::new(Arc::clone(&self.state))
    }
}
