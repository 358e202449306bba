//! Circuit breaker: fails fast while a downstream dependency is unhealthy.
//!
//! Three states behind a single mutex: `Closed` records outcomes in a ring
//! window and opens once enough of them are failures; `Open` rejects until
//! the configured delay passes; `HalfOpen` admits a bounded number of trial
//! executions and closes or reopens on their outcomes. One breaker instance
//! is shared by every execution composed over it.

use crate::clock::{Clock, MonotonicClock};
use crate::policy::{Policy, PolicyExecutor};
use crate::result::ExecutionResult;
use crate::{ExecutionError, SharedState};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type ErrorPredicate<E> = Arc<dyn Fn(&ExecutionError<E>) -> bool + Send + Sync>;
type ValuePredicate<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Errors returned by breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError {
    ZeroThreshold,
    ThresholdExceedsWindow { required: usize, window: usize },
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::ZeroThreshold => {
                write!(f, "thresholds must be greater than zero")
            }
            CircuitBreakerError::ThresholdExceedsWindow { required, window } => {
                write!(f, "threshold {} exceeds its window of {}", required, window)
            }
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

/// `required` qualifying outcomes out of the last `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Threshold {
    required: usize,
    window: usize,
}

/// Ring buffer of recent outcomes; `true` entries are failures.
#[derive(Debug)]
struct OutcomeWindow {
    outcomes: VecDeque<bool>,
    capacity: usize,
    failures: usize,
}

impl OutcomeWindow {
    fn new(capacity: usize) -> Self {
        Self { outcomes: VecDeque::with_capacity(capacity), capacity, failures: 0 }
    }

    fn record(&mut self, failure: bool) {
        if self.outcomes.len() == self.capacity {
            if let Some(evicted) = self.outcomes.pop_front() {
                if evicted {
                    self.failures -= 1;
                }
            }
        }
        self.outcomes.push_back(failure);
        if failure {
            self.failures += 1;
        }
    }

    fn failures(&self) -> usize {
        self.failures
    }

    fn successes(&self) -> usize {
        self.outcomes.len() - self.failures
    }
}

#[derive(Debug)]
enum BreakerInner {
    Closed { window: OutcomeWindow },
    Open { opened_at: Duration },
    HalfOpen { window: OutcomeWindow, trials_left: usize },
}

/// Shared, thread-safe circuit breaker policy.
#[derive(Clone)]
pub struct CircuitBreaker<R, E> {
    inner: Arc<Mutex<BreakerInner>>,
    failure_threshold: Threshold,
    success_threshold: Threshold,
    delay: Duration,
    slow_call_threshold: Option<Duration>,
    handle_errors: Vec<ErrorPredicate<E>>,
    handle_values: Vec<ValuePredicate<R>>,
    clock: Arc<dyn Clock>,
}

impl<R, E> std::fmt::Debug for CircuitBreaker<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("failure_threshold", &self.failure_threshold)
            .field("success_threshold", &self.success_threshold)
            .field("delay", &self.delay)
            .finish()
    }
}

impl<R, E> CircuitBreaker<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn builder() -> CircuitBreakerBuilder<R, E> {
        CircuitBreakerBuilder::new()
    }

    /// Current state, as last transitioned. An expired open delay shows as
    /// `Open` until an execution is attempted.
    pub fn state(&self) -> CircuitState {
        match *self.inner.lock().unwrap() {
            BreakerInner::Closed { .. } => CircuitState::Closed,
            BreakerInner::Open { .. } => CircuitState::Open,
            BreakerInner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Whether an execution would currently be admitted, without claiming a
    /// trial slot.
    pub fn allows_execution(&self) -> bool {
        match &*self.inner.lock().unwrap() {
            BreakerInner::Closed { .. } => true,
            BreakerInner::Open { opened_at } => {
                self.clock.now().saturating_sub(*opened_at) >= self.delay
            }
            BreakerInner::HalfOpen { trials_left, .. } => *trials_left > 0,
        }
    }

    /// Admit an execution, claiming a trial slot in half-open state. An
    /// expired open delay transitions to half-open here, in the same
    /// critical section. Rejections report the remaining delay.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.inner.lock().unwrap();
        match &mut *inner {
            BreakerInner::Closed { .. } => Ok(()),
            BreakerInner::Open { opened_at } => {
                let elapsed = self.clock.now().saturating_sub(*opened_at);
                if elapsed >= self.delay {
                    tracing::info!("circuit breaker half-open, probing recovery");
                    *inner = BreakerInner::HalfOpen {
                        window: OutcomeWindow::new(self.success_threshold.window),
                        trials_left: self.success_threshold.window - 1,
                    };
                    Ok(())
                } else {
                    Err(self.delay - elapsed)
                }
            }
            BreakerInner::HalfOpen { trials_left, .. } => {
                if *trials_left > 0 {
                    *trials_left -= 1;
                    Ok(())
                } else {
                    Err(Duration::ZERO)
                }
            }
        }
    }

    /// Record a successful execution; slow successes past the configured
    /// bound count as failures.
    pub fn record_success(&self, elapsed: Duration) {
        let slow = self.slow_call_threshold.is_some_and(|bound| elapsed > bound);
        self.record_outcome(slow);
    }

    /// Record a failed execution.
    pub fn record_failure(&self, _elapsed: Duration) {
        self.record_outcome(true);
    }

    fn record_outcome(&self, failure: bool) {
        let mut inner = self.inner.lock().unwrap();
        match &mut *inner {
            BreakerInner::Closed { window } => {
                window.record(failure);
                if window.failures() >= self.failure_threshold.required {
                    tracing::warn!(
                        failures = window.failures(),
                        window = self.failure_threshold.window,
                        "circuit breaker opened"
                    );
                    *inner = BreakerInner::Open { opened_at: self.clock.now() };
                }
            }
            // Late results while open carry no signal
            BreakerInner::Open { .. } => {}
            BreakerInner::HalfOpen { window, .. } => {
                window.record(failure);
                let threshold = self.success_threshold;
                if window.successes() >= threshold.required {
                    tracing::info!("circuit breaker closed");
                    *inner = BreakerInner::Closed {
                        window: OutcomeWindow::new(self.failure_threshold.window),
                    };
                } else if window.failures() > threshold.window - threshold.required {
                    tracing::warn!("circuit breaker reopened after failed trial");
                    *inner = BreakerInner::Open { opened_at: self.clock.now() };
                }
            }
        }
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
}

/// Builder with early validation.
pub struct CircuitBreakerBuilder<R, E> {
    failure_threshold: Threshold,
    success_threshold: Threshold,
    delay: Duration,
    slow_call_threshold: Option<Duration>,
    handle_errors: Vec<ErrorPredicate<E>>,
    handle_values: Vec<ValuePredicate<R>>,
    clock: Arc<dyn Clock>,
}

impl<R, E> CircuitBreakerBuilder<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            failure_threshold: Threshold { required: 1, window: 1 },
            success_threshold: Threshold { required: 1, window: 1 },
            delay: Duration::from_secs(60),
            slow_call_threshold: None,
            handle_errors: Vec::new(),
            handle_values: Vec::new(),
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Open after `count` consecutive failures.
    pub fn failure_threshold(self, count: usize) -> Result<Self, CircuitBreakerError> {
        self.failure_threshold_in(count, count)
    }

    /// Open after `required` failures within the last `window` outcomes.
    pub fn failure_threshold_in(
        mut self,
        required: usize,
        window: usize,
    ) -> Result<Self, CircuitBreakerError> {
        validate_threshold(required, window)?;
        self.failure_threshold = Threshold { required, window };
        Ok(self)
    }

    /// Close after `count` consecutive trial successes.
    pub fn success_threshold(self, count: usize) -> Result<Self, CircuitBreakerError> {
        self.success_threshold_in(count, count)
    }

    /// Close after `required` successes within `window` trial outcomes. The
    /// half-open state admits at most `window` trials.
    pub fn success_threshold_in(
        mut self,
        required: usize,
        window: usize,
    ) -> Result<Self, CircuitBreakerError> {
        validate_threshold(required, window)?;
        self.success_threshold = Threshold { required, window };
        Ok(self)
    }

    /// How long the breaker stays open before probing recovery.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Successful executions slower than `bound` count as failures.
    pub fn slow_call_threshold(mut self, bound: Duration) -> Self {
        self.slow_call_threshold = Some(bound);
        self
    }

    /// Only failures matching `predicate` are counted. OR-ed when repeated.
    pub fn handle_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ExecutionError<E>) -> bool + Send + Sync + 'static,
    {
        self.handle_errors.push(Arc::new(predicate));
        self
    }

    /// Values matching `predicate` count as failures.
    pub fn handle_result_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.handle_values.push(Arc::new(predicate));
        self
    }

    /// Substitute the time source (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> CircuitBreaker<R, E> {
        CircuitBreaker {
            inner: Arc::new(Mutex::new(BreakerInner::Closed {
                window: OutcomeWindow::new(self.failure_threshold.window),
            })),
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            delay: self.delay,
            slow_call_threshold: self.slow_call_threshold,
            handle_errors: self.handle_errors,
            handle_values: self.handle_values,
            clock: self.clock,
        }
    }
}

impl<R, E> Default for CircuitBreakerBuilder<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn validate_threshold(required: usize, window: usize) -> Result<(), CircuitBreakerError> {
    if required == 0 || window == 0 {
        return Err(CircuitBreakerError::ZeroThreshold);
    }
    if required > window {
        return Err(CircuitBreakerError::ThresholdExceedsWindow { required, window });
    }
    Ok(())
}

impl<R, E> Policy<R, E> for CircuitBreaker<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn to_executor(self: Arc<Self>, policy_index: usize) -> Arc<dyn PolicyExecutor<R, E>> {
        Arc::new(CircuitBreakerExecutor { policy: self, index: policy_index })
    }
}

/// Admission and outcome recording; the breaker never retries or transforms.
struct CircuitBreakerExecutor<R, E> {
    policy: Arc<CircuitBreaker<R, E>>,
    index: usize,
}

impl<R, E> PolicyExecutor<R, E> for CircuitBreakerExecutor<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn policy_index(&self) -> usize {
        self.index
    }

    fn pre_execute(&self, _execution: &SharedState<R, E>) -> Option<ExecutionResult<R, E>> {
        match self.policy.try_acquire() {
            Ok(()) => None,
            Err(remaining) => Some(
                ExecutionResult::failure(ExecutionError::CircuitOpen { remaining })
                    .with_rejected_by(self.index),
            ),
        }
    }

    fn is_failure(&self, result: &ExecutionResult<R, E>) -> bool {
        self.policy.is_failure(result)
    }

    fn on_failure(
        &self,
        execution: &SharedState<R, E>,
        result: ExecutionResult<R, E>,
    ) -> ExecutionResult<R, E> {
        self.policy.record_failure(execution.attempt_elapsed());
        result
    }

    fn post_execute(
        &self,
        execution: &SharedState<R, E>,
        result: ExecutionResult<R, E>,
    ) -> ExecutionResult<R, E> {
        // This breaker's own admission rejections are not attempt outcomes;
        // recording one would dilute the window it is deciding with
        if result.rejected_by() == Some(self.index) {
            return result.with_success(false);
        }
        if self.is_failure(&result) {
            self.on_failure(execution, result.with_success(false))
        } else {
            let result = result.with_success(true);
            self.policy.record_success(execution.attempt_elapsed());
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    type Breaker = CircuitBreaker<i32, TestError>;

    #[test]
    fn builder_validates_thresholds() {
        assert!(matches!(
            Breaker::builder().failure_threshold(0),
            Err(CircuitBreakerError::ZeroThreshold)
        ));
        assert!(matches!(
            Breaker::builder().failure_threshold_in(5, 3),
            Err(CircuitBreakerError::ThresholdExceedsWindow { .. })
        ));
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let breaker = Breaker::builder().failure_threshold(3).unwrap().build();
        for _ in 0..2 {
            breaker.record_failure(Duration::ZERO);
            assert!(breaker.is_closed());
        }
        breaker.record_failure(Duration::ZERO);
        assert!(breaker.is_open());
        assert!(!breaker.allows_execution());
    }

    #[test]
    fn windowed_threshold_tolerates_interleaved_successes() {
        let breaker = Breaker::builder().failure_threshold_in(2, 4).unwrap().build();
        breaker.record_failure(Duration::ZERO);
        breaker.record_success(Duration::ZERO);
        assert!(breaker.is_closed());
        breaker.record_failure(Duration::ZERO);
        assert!(breaker.is_open(), "2 failures within the last 4 outcomes");
    }

    #[test]
    fn window_eviction_forgets_old_failures() {
        let breaker = Breaker::builder().failure_threshold_in(2, 2).unwrap().build();
        breaker.record_failure(Duration::ZERO);
        breaker.record_success(Duration::ZERO);
        breaker.record_failure(Duration::ZERO);
        assert!(breaker.is_closed(), "window is [success, failure]");
        breaker.record_failure(Duration::ZERO);
        assert!(breaker.is_open());
    }

    #[test]
    fn open_rejects_until_the_delay_passes() {
        let clock = ManualClock::new();
        let delay = Duration::from_secs(30);
        let breaker = Breaker::builder()
            .failure_threshold(1)
            .unwrap()
            .delay(delay)
            .with_clock(clock)
            .build();

        breaker.record_failure(Duration::ZERO);
        assert!(breaker.is_open());
        let remaining = breaker.try_acquire().expect_err("open breaker rejects");
        assert_eq!(remaining, delay);
    }

    #[test]
    fn half_open_admits_a_bounded_number_of_trials() {
        let clock = Arc::new(ManualClock::new());
        let breaker = Breaker::builder()
            .failure_threshold(1)
            .unwrap()
            .success_threshold_in(2, 2)
            .unwrap()
            .delay(Duration::from_secs(10))
            .with_clock(Arc::clone(&clock))
            .build();

        breaker.record_failure(Duration::ZERO);
        assert!(breaker.is_open());
        assert!(breaker.try_acquire().is_err(), "delay has not passed");

        clock.advance(Duration::from_secs(11));
        assert!(breaker.allows_execution());
        assert!(breaker.try_acquire().is_ok(), "first trial admitted");
        assert!(breaker.is_half_open());
        assert!(breaker.try_acquire().is_ok(), "second trial slot");
        assert_eq!(breaker.try_acquire().unwrap_err(), Duration::ZERO);
    }

    #[test]
    fn half_open_outcomes_drive_the_transition() {
        let breaker = Breaker::builder()
            .failure_threshold(1)
            .unwrap()
            .success_threshold(2)
            .unwrap()
            .delay(Duration::ZERO)
            .build();

        breaker.record_failure(Duration::ZERO);
        assert!(breaker.is_open());

        assert!(breaker.try_acquire().is_ok(), "zero delay probes immediately");
        assert!(breaker.is_half_open());
        breaker.record_success(Duration::ZERO);
        assert!(breaker.is_half_open(), "one of two required successes");
        breaker.record_success(Duration::ZERO);
        assert!(breaker.is_closed());
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = Breaker::builder()
            .failure_threshold(1)
            .unwrap()
            .delay(Duration::ZERO)
            .build();

        breaker.record_failure(Duration::ZERO);
        assert!(breaker.try_acquire().is_ok());
        assert!(breaker.is_half_open());
        breaker.record_failure(Duration::ZERO);
        assert!(breaker.is_open());
    }

    #[test]
    fn slow_successes_count_as_failures() {
        let breaker = Breaker::builder()
            .failure_threshold(1)
            .unwrap()
            .slow_call_threshold(Duration::from_millis(100))
            .build();

        breaker.record_success(Duration::from_millis(50));
        assert!(breaker.is_closed());
        breaker.record_success(Duration::from_millis(500));
        assert!(breaker.is_open());
    }

    #[test]
    fn clones_share_the_state_machine() {
        let breaker = Breaker::builder().failure_threshold(1).unwrap().build();
        let clone = breaker.clone();
        breaker.record_failure(Duration::ZERO);
        assert!(clone.is_open());
    }

    #[test]
    fn own_admission_rejection_is_not_a_trial_outcome() {
        let breaker = Breaker::builder()
            .failure_threshold(1)
            .unwrap()
            .success_threshold(1)
            .unwrap()
            .delay(Duration::ZERO)
            .build();
        let executor = Arc::new(breaker.clone()).to_executor(0);
        let state = Arc::new(crate::execution::ExecutionState::new());

        breaker.record_failure(Duration::ZERO);
        assert!(breaker.is_open());

        // Zero delay: the first admission claims the only half-open trial
        assert!(executor.pre_execute(&state).is_none());
        assert!(breaker.is_half_open());

        // Trials exhausted: the next pass is rejected at admission
        let rejection = executor.pre_execute(&state).expect("no trial slot left");
        let routed = executor.post_execute(&state, rejection);
        assert!(routed.error().unwrap().is_circuit_open());
        assert!(!routed.is_success());
        assert!(
            breaker.is_half_open(),
            "the rejection must not be recorded into the trial window"
        );
    }

    #[test]
    fn narrowed_classifier_does_not_turn_rejections_into_successes() {
        let breaker = Breaker::builder()
            .failure_threshold(1)
            .unwrap()
            .success_threshold(1)
            .unwrap()
            .delay(Duration::ZERO)
            .handle_if(|e| e.is_inner())
            .build();
        let executor = Arc::new(breaker.clone()).to_executor(0);
        let state = Arc::new(crate::execution::ExecutionState::new());

        breaker.record_failure(Duration::ZERO);
        assert!(executor.pre_execute(&state).is_none());
        assert!(breaker.is_half_open());

        let rejection = executor.pre_execute(&state).expect("no trial slot left");
        let _ = executor.post_execute(&state, rejection);
        assert!(
            breaker.is_half_open(),
            "a rejection the classifier ignores is still not a trial success"
        );

        // The admitted trial's real outcome decides the transition
        state.record_attempt();
        let failed = executor.post_execute(
            &state,
            ExecutionResult::failure(ExecutionError::Inner(TestError("still down"))),
        );
        assert!(!failed.is_success());
        assert!(breaker.is_open());
    }
}
