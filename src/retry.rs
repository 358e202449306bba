//! Retry policy: re-attempts failing executions with backoff and jitter.
//!
//! The retry policy is the outer decider for repeated attempts: it is the
//! only policy whose failure hook can return a not-complete result, which
//! the engine treats as "wait, then re-enter my inner chain".

use crate::policy::{Policy, PolicyExecutor};
use crate::result::ExecutionResult;
use crate::{Backoff, ExecutionError, Jitter, SharedState};
use std::sync::Arc;
use std::time::Duration;

type ErrorPredicate<E> = Arc<dyn Fn(&ExecutionError<E>) -> bool + Send + Sync>;
type ValuePredicate<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;
type DelayFn<E> = Arc<dyn Fn(usize, Option<&ExecutionError<E>>) -> Duration + Send + Sync>;

/// Errors returned by retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    InvalidMaxAttempts(usize),
}

impl std::fmt::Display for RetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::InvalidMaxAttempts(n) => {
                write!(f, "max_attempts must be > 0 (got {})", n)
            }
        }
    }
}

impl std::error::Error for RetryError {}

/// Configurable retry policy.
///
/// With no configured classifiers, every failure is retryable and every
/// value is a success. `handle_*` narrows which failures count; `abort_*`
/// marks outcomes that terminate immediately regardless of remaining
/// attempts.
#[derive(Clone)]
pub struct RetryPolicy<R, E> {
    max_attempts: Option<usize>,
    backoff: Backoff,
    jitter: Jitter,
    delay_fn: Option<DelayFn<E>>,
    max_duration: Option<Duration>,
    handle_errors: Vec<ErrorPredicate<E>>,
    handle_values: Vec<ValuePredicate<R>>,
    abort_errors: Vec<ErrorPredicate<E>>,
    abort_values: Vec<ValuePredicate<R>>,
}

impl<R, E> std::fmt::Debug for RetryPolicy<R, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("max_duration", &self.max_duration)
            .finish()
    }
}

impl<R, E> RetryPolicy<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn builder() -> RetryPolicyBuilder<R, E> {
        RetryPolicyBuilder::new()
    }

    fn is_failure(&self, result: &ExecutionResult<R, E>) -> bool {
        if let Some(error) = result.error() {
            return self.handle_errors.is_empty()
                || self.handle_errors.iter().any(|p| p(error));
        }
        if let Some(value) = result.value() {
            return self.handle_values.iter().any(|p| p(value));
        }
        false
    }

    fn is_abort(&self, result: &ExecutionResult<R, E>) -> bool {
        if let Some(error) = result.error() {
            if self.abort_errors.iter().any(|p| p(error)) {
                return true;
            }
        }
        if let Some(value) = result.value() {
            if self.abort_values.iter().any(|p| p(value)) {
                return true;
            }
        }
        false
    }
}

/// Builder with early validation, following the crate-wide builder style.
pub struct RetryPolicyBuilder<R, E> {
    max_attempts: Option<usize>,
    backoff: Backoff,
    jitter: Jitter,
    delay_fn: Option<DelayFn<E>>,
    max_duration: Option<Duration>,
    handle_errors: Vec<ErrorPredicate<E>>,
    handle_values: Vec<ValuePredicate<R>>,
    abort_errors: Vec<ErrorPredicate<E>>,
    abort_values: Vec<ValuePredicate<R>>,
}

impl<R, E> RetryPolicyBuilder<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            max_attempts: Some(3),
            backoff: Backoff::none(),
            jitter: Jitter::None,
            delay_fn: None,
            max_duration: None,
            handle_errors: Vec::new(),
            handle_values: Vec::new(),
            abort_errors: Vec::new(),
            abort_values: Vec::new(),
        }
    }

    /// Total attempts allowed, counting the first.
    pub fn max_attempts(mut self, attempts: usize) -> Result<Self, RetryError> {
        if attempts == 0 {
            return Err(RetryError::InvalidMaxAttempts(attempts));
        }
        self.max_attempts = Some(attempts);
        Ok(self)
    }

    /// Retries after the first attempt; `max_retries(2)` allows 3 attempts.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_attempts = Some(retries + 1);
        self
    }

    /// Remove the attempt bound; `max_duration` or an abort classifier
    /// should bound the execution instead.
    pub fn unlimited_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Fixed delay between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.backoff = Backoff::constant(delay);
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Computed delay overriding the backoff; receives the attempt number
    /// and the failure that triggered the retry.
    pub fn delay_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, Option<&ExecutionError<E>>) -> Duration + Send + Sync + 'static,
    {
        self.delay_fn = Some(Arc::new(f));
        self
    }

    /// Bound on total elapsed time across attempts and waits.
    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    /// Only failures matching `predicate` are retried. May be called
    /// repeatedly; predicates are OR-ed.
    pub fn handle_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ExecutionError<E>) -> bool + Send + Sync + 'static,
    {
        self.handle_errors.push(Arc::new(predicate));
        self
    }

    /// Treat values matching `predicate` as failures.
    pub fn handle_result_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.handle_values.push(Arc::new(predicate));
        self
    }

    /// Treat a specific value as a failure.
    pub fn handle_result(self, value: R) -> Self
    where
        R: PartialEq + Sync,
    {
        self.handle_result_if(move |v| *v == value)
    }

    /// Failures matching `predicate` abort immediately, skipping remaining
    /// retries.
    pub fn abort_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ExecutionError<E>) -> bool + Send + Sync + 'static,
    {
        self.abort_errors.push(Arc::new(predicate));
        self
    }

    /// A specific value aborts immediately.
    pub fn abort_on_result(mut self, value: R) -> Self
    where
        R: PartialEq + Sync,
    {
        self.abort_values.push(Arc::new(move |v| *v == value));
        self
    }

    pub fn build(self) -> RetryPolicy<R, E> {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            delay_fn: self.delay_fn,
            max_duration: self.max_duration,
            handle_errors: self.handle_errors,
            handle_values: self.handle_values,
            abort_errors: self.abort_errors,
            abort_values: self.abort_values,
        }
    }
}

impl<R, E> Default for RetryPolicyBuilder<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R, E> Policy<R, E> for RetryPolicy<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn to_executor(self: Arc<Self>, policy_index: usize) -> Arc<dyn PolicyExecutor<R, E>> {
        Arc::new(RetryExecutor { policy: self, index: policy_index })
    }
}

struct RetryExecutor<R, E> {
    policy: Arc<RetryPolicy<R, E>>,
    index: usize,
}

impl<R, E> PolicyExecutor<R, E> for RetryExecutor<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn policy_index(&self) -> usize {
        self.index
    }

    fn is_failure(&self, result: &ExecutionResult<R, E>) -> bool {
        self.policy.is_failure(result)
    }

    fn on_failure(
        &self,
        execution: &SharedState<R, E>,
        result: ExecutionResult<R, E>,
    ) -> ExecutionResult<R, E> {
        if self.policy.is_abort(&result) {
            return result.with_abort();
        }
        if result.is_abortive() {
            // An inner policy already aborted; never retry past it
            return result.with_complete();
        }
        let attempts = execution.attempts();
        let elapsed = execution.elapsed();
        let attempts_exhausted = self.policy.max_attempts.is_some_and(|max| attempts >= max);
        let duration_exhausted = self.policy.max_duration.is_some_and(|max| elapsed >= max);
        if attempts_exhausted || duration_exhausted {
            return result.with_complete();
        }
        let delay = match &self.policy.delay_fn {
            Some(f) => f(attempts, result.error()),
            None => self.policy.backoff.delay(attempts),
        };
        let delay = self.policy.jitter.apply(delay);
        let delay = match self.policy.max_duration {
            Some(max) => delay.min(max.saturating_sub(elapsed)),
            None => delay,
        };
        tracing::debug!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "retrying failed attempt"
        );
        result.with_wait(delay).with_not_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionState;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn executor(policy: RetryPolicy<i32, TestError>) -> Arc<dyn PolicyExecutor<i32, TestError>> {
        Arc::new(policy).to_executor(0)
    }

    fn failure() -> ExecutionResult<i32, TestError> {
        ExecutionResult::failure(ExecutionError::Inner(TestError("boom")))
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        let err = RetryPolicy::<i32, TestError>::builder()
            .max_attempts(0)
            .err()
            .expect("zero attempts should fail");
        assert_eq!(err, RetryError::InvalidMaxAttempts(0));
    }

    #[test]
    fn requests_retry_until_attempts_exhaust() {
        let policy =
            RetryPolicy::<i32, TestError>::builder().max_attempts(2).unwrap().build();
        let executor = executor(policy);
        let state = Arc::new(ExecutionState::new());

        state.record_attempt();
        let first = executor.post_execute(&state, failure());
        assert!(!first.is_complete(), "one attempt left, retry expected");

        state.record_attempt();
        let second = executor.post_execute(&state, failure());
        assert!(second.is_complete(), "attempts exhausted");
    }

    #[test]
    fn abort_classifier_terminates_immediately() {
        let policy = RetryPolicy::<i32, TestError>::builder()
            .max_attempts(10)
            .unwrap()
            .abort_if(|e| matches!(e, ExecutionError::Inner(TestError("fatal"))))
            .build();
        let executor = executor(policy);
        let state = Arc::new(ExecutionState::new());

        state.record_attempt();
        let result = executor.post_execute(
            &state,
            ExecutionResult::failure(ExecutionError::Inner(TestError("fatal"))),
        );
        assert!(result.is_complete());
        assert!(result.is_abortive());
    }

    #[test]
    fn handle_if_narrows_retryable_failures() {
        let policy = RetryPolicy::<i32, TestError>::builder()
            .max_attempts(5)
            .unwrap()
            .handle_if(|e| matches!(e, ExecutionError::Inner(TestError("flaky"))))
            .build();
        let executor = executor(policy);
        let state = Arc::new(ExecutionState::new());

        state.record_attempt();
        let other = executor.post_execute(
            &state,
            ExecutionResult::failure(ExecutionError::Inner(TestError("other"))),
        );
        assert!(other.is_complete(), "non-matching failure is not retried");
        assert!(other.error().is_some(), "the failure still surfaces to the caller");

        let flaky = executor.post_execute(
            &state,
            ExecutionResult::failure(ExecutionError::Inner(TestError("flaky"))),
        );
        assert!(!flaky.is_complete());
    }

    #[test]
    fn handle_result_treats_a_value_as_failure() {
        let policy = RetryPolicy::<i32, TestError>::builder()
            .max_attempts(2)
            .unwrap()
            .handle_result(-1)
            .build();
        let executor = executor(policy);
        let state = Arc::new(ExecutionState::new());

        state.record_attempt();
        let retried = executor.post_execute(&state, ExecutionResult::success(-1));
        assert!(!retried.is_complete());

        let passed = executor.post_execute(&state, ExecutionResult::success(0));
        assert!(passed.is_complete());
        assert!(passed.is_success());
    }

    #[test]
    fn retry_wait_follows_the_backoff() {
        let policy = RetryPolicy::<i32, TestError>::builder()
            .max_attempts(5)
            .unwrap()
            .backoff(Backoff::linear(Duration::from_millis(100)))
            .build();
        let executor = executor(policy);
        let state = Arc::new(ExecutionState::new());

        state.record_attempt();
        let first = executor.post_execute(&state, failure());
        assert_eq!(first.wait(), Duration::from_millis(100));

        state.record_attempt();
        let second = executor.post_execute(&state, failure());
        assert_eq!(second.wait(), Duration::from_millis(200));
    }

    #[test]
    fn delay_fn_overrides_the_backoff() {
        let policy = RetryPolicy::<i32, TestError>::builder()
            .max_attempts(5)
            .unwrap()
            .backoff(Backoff::constant(Duration::from_secs(9)))
            .delay_fn(|attempt, _err| Duration::from_millis(10 * attempt as u64))
            .build();
        let executor = executor(policy);
        let state = Arc::new(ExecutionState::new());

        state.record_attempt();
        let result = executor.post_execute(&state, failure());
        assert_eq!(result.wait(), Duration::from_millis(10));
    }

    #[test]
    fn max_duration_completes_when_spent() {
        let policy = RetryPolicy::<i32, TestError>::builder()
            .unlimited_attempts()
            .max_duration(Duration::ZERO)
            .build();
        let executor = executor(policy);
        let state = Arc::new(ExecutionState::new());

        state.record_attempt();
        let result = executor.post_execute(&state, failure());
        assert!(result.is_complete());
    }
}
