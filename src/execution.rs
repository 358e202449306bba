//! Per-call execution state and the manual recording API.
//!
//! One [`ExecutionState`] exists per composed call. The owning driver
//! mutates it between attempts; a timeout watcher may race it on the
//! attempt-result slot and the interrupt pair, which is why those sit
//! behind their own locks. The first result recorded for an attempt wins;
//! later records observe the winner and change nothing.

use crate::policy::{Policy, PolicyExecutor};
use crate::result::ExecutionResult;
use crate::ExecutionError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Shared handle to per-call state, passed to every executor hook.
pub type SharedState<R, E> = Arc<ExecutionState<R, E>>;

/// Interrupt pair guarded by its own mutex: `can_interrupt` is true only
/// while the operation is running on a known thread, and `interrupted`
/// flips only under the same lock, so the attempt-completion vs timeout
/// race resolves deterministically.
#[derive(Debug, Default)]
struct InterruptState {
    can_interrupt: bool,
    interrupted: bool,
}

#[derive(Debug)]
struct StateInner<R, E> {
    attempts: usize,
    executions: usize,
    started_at: Option<Instant>,
    attempt_started_at: Option<Instant>,
    attempt_result: Option<ExecutionResult<R, E>>,
    last_result: Option<ExecutionResult<R, E>>,
    completed: bool,
    wait: Duration,
}

impl<R, E> StateInner<R, E> {
    fn empty() -> Self {
        Self {
            attempts: 0,
            executions: 0,
            started_at: None,
            attempt_started_at: None,
            attempt_result: None,
            last_result: None,
            completed: false,
            wait: Duration::ZERO,
        }
    }
}

/// Mutable context for one composed call.
#[derive(Debug)]
pub struct ExecutionState<R, E> {
    inner: Mutex<StateInner<R, E>>,
    interrupt: Mutex<InterruptState>,
    cancelled: AtomicBool,
    record_signal: tokio::sync::Notify,
}

impl<R, E> ExecutionState<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Normally created by the engine; public for custom executor tests.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner::empty()),
            interrupt: Mutex::new(InterruptState::default()),
            cancelled: AtomicBool::new(false),
            record_signal: tokio::sync::Notify::new(),
        }
    }

    /// Attempts started, including ones rejected by a policy's admission.
    pub fn attempts(&self) -> usize {
        self.inner.lock().unwrap().attempts
    }

    /// Attempts where the user operation actually began running.
    pub fn executions(&self) -> usize {
        self.inner.lock().unwrap().executions
    }

    /// Time since the first attempt started.
    pub fn elapsed(&self) -> Duration {
        self.inner.lock().unwrap().started_at.map(|s| s.elapsed()).unwrap_or(Duration::ZERO)
    }

    /// Time since the current attempt started.
    pub fn attempt_elapsed(&self) -> Duration {
        self.inner
            .lock()
            .unwrap()
            .attempt_started_at
            .map(|s| s.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Whether a terminal result was accepted.
    pub fn is_complete(&self) -> bool {
        self.inner.lock().unwrap().completed
    }

    /// Whether the execution's future was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether a timeout or cancellation requested interruption of the
    /// running attempt. Cooperative operations poll this.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.lock().unwrap().interrupted
    }

    /// The delay the orchestrator should wait before the next attempt.
    pub fn wait_duration(&self) -> Duration {
        self.inner.lock().unwrap().wait
    }

    /// The most recent outcome after policy hooks ran.
    pub fn last_result(&self) -> Option<ExecutionResult<R, E>> {
        self.inner.lock().unwrap().last_result.clone()
    }

    pub(crate) fn record_attempt(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.attempts += 1;
        inner.started_at.get_or_insert(now);
        inner.attempt_started_at = Some(now);
    }

    pub(crate) fn mark_execution_started(&self) {
        self.inner.lock().unwrap().executions += 1;
    }

    /// The result already recorded for the current attempt, if any.
    pub(crate) fn attempt_result(&self) -> Option<ExecutionResult<R, E>> {
        self.inner.lock().unwrap().attempt_result.clone()
    }

    /// First record for the attempt wins; returns the winner either way.
    pub(crate) fn record_attempt_result(
        &self,
        result: ExecutionResult<R, E>,
    ) -> ExecutionResult<R, E> {
        let winner = {
            let mut inner = self.inner.lock().unwrap();
            inner.attempt_result.get_or_insert(result).clone()
        };
        self.record_signal.notify_waiters();
        winner
    }

    /// Record on behalf of attempt number `attempt`; stale handles from an
    /// earlier attempt and duplicate records are dropped.
    pub(crate) fn try_record_for_attempt(
        &self,
        attempt: usize,
        result: ExecutionResult<R, E>,
    ) -> bool {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.completed || inner.attempts != attempt || inner.attempt_result.is_some() {
                return false;
            }
            inner.attempt_result = Some(result);
        }
        self.record_signal.notify_waiters();
        true
    }

    /// Wait until a result is recorded for the current attempt.
    pub(crate) async fn wait_for_attempt_record(&self) {
        loop {
            let notified = self.record_signal.notified();
            if self.attempt_result().is_some() {
                return;
            }
            notified.await;
        }
    }

    /// Reset per-attempt state before re-entering the inner composition.
    pub(crate) fn prepare_retry(&self) {
        self.inner.lock().unwrap().attempt_result = None;
        let mut interrupt = self.interrupt.lock().unwrap();
        interrupt.can_interrupt = false;
        interrupt.interrupted = false;
    }

    /// Accept a folded outcome as the call's latest (possibly final) result.
    pub(crate) fn finish(&self, result: &ExecutionResult<R, E>) {
        let mut inner = self.inner.lock().unwrap();
        inner.completed = result.is_complete();
        inner.wait = result.wait();
        inner.last_result = Some(result.clone());
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Mark the interrupt flag unconditionally (async cancellation path).
    pub(crate) fn set_interrupted(&self) {
        self.interrupt.lock().unwrap().interrupted = true;
    }

    /// The operation is about to run on the current thread.
    pub(crate) fn begin_interruptible(&self) {
        self.interrupt.lock().unwrap().can_interrupt = true;
    }

    /// The operation finished; returns whether an interruption was intended,
    /// in which case the caller must report the recorded timeout result
    /// instead of the operation's own outcome.
    pub(crate) fn end_interruptible(&self) -> bool {
        let mut interrupt = self.interrupt.lock().unwrap();
        interrupt.can_interrupt = false;
        interrupt.interrupted
    }

    /// Watcher-side interruption: only fires while the operation runs.
    pub(crate) fn mark_interrupted_if_running(&self) -> bool {
        let mut interrupt = self.interrupt.lock().unwrap();
        if interrupt.can_interrupt {
            interrupt.interrupted = true;
            true
        } else {
            false
        }
    }
}

impl<R, E> Default for ExecutionState<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of an execution handed to user operations.
#[derive(Debug)]
pub struct ExecutionContext<R, E> {
    state: SharedState<R, E>,
}

impl<R, E> Clone for ExecutionContext<R, E> {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state) }
    }
}

impl<R, E> ExecutionContext<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(state: SharedState<R, E>) -> Self {
        Self { state }
    }

    /// Attempts started so far, counting the current one.
    pub fn attempts(&self) -> usize {
        self.state.attempts()
    }

    /// Attempts where the operation actually ran, counting the current one.
    pub fn executions(&self) -> usize {
        self.state.executions()
    }

    /// Time since the first attempt started.
    pub fn elapsed(&self) -> Duration {
        self.state.elapsed()
    }

    /// Time since the current attempt started.
    pub fn attempt_elapsed(&self) -> Duration {
        self.state.attempt_elapsed()
    }

    /// Whether the execution's future was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Whether a timeout or cancellation asked this attempt to stop.
    /// Long-running cooperative operations should poll this.
    pub fn is_interrupted(&self) -> bool {
        self.state.is_interrupted()
    }

    /// The previous attempt's outcome, if any.
    pub fn last_result(&self) -> Option<ExecutionResult<R, E>> {
        self.state.last_result()
    }
}

/// Manually driven execution: the caller runs the operation itself and
/// records outcomes; policies decide whether another attempt is allowed.
///
/// Records fold through the composed policies innermost-first. Once a
/// terminal outcome is accepted, further records are no-ops.
pub struct Execution<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    state: SharedState<R, E>,
    executors: Vec<Arc<dyn PolicyExecutor<R, E>>>,
}

impl<R, E> Execution<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Build from policies listed outermost first.
    pub fn new(policies: Vec<Arc<dyn Policy<R, E>>>) -> Self {
        let executors = policies
            .iter()
            .rev()
            .enumerate()
            .map(|(index, policy)| Arc::clone(policy).to_executor(index))
            .collect();
        Self { state: Arc::new(ExecutionState::new()), executors }
    }

    /// Record a successful attempt.
    pub fn record_result(&mut self, value: R) {
        self.record(Some(value), None);
    }

    /// Record a failed attempt with an operation error.
    pub fn record_failure(&mut self, failure: E) {
        self.record(None, Some(ExecutionError::Inner(failure)));
    }

    /// Record an attempt outcome. A failure takes precedence over a value.
    pub fn record(&mut self, value: Option<R>, failure: Option<ExecutionError<E>>) {
        if self.state.is_complete() {
            return;
        }
        self.state.record_attempt();
        self.state.mark_execution_started();
        let mut result = match failure {
            Some(failure) => ExecutionResult::failure(failure),
            None => ExecutionResult::success_option(value),
        };
        for executor in &self.executors {
            result = executor.post_execute(&self.state, result);
        }
        self.state.finish(&result);
    }

    /// Record the outcome and report whether another attempt is allowed.
    pub fn can_retry_for(&mut self, value: Option<R>, failure: Option<ExecutionError<E>>) -> bool {
        self.record(value, failure);
        !self.is_complete()
    }

    /// Whether the composition accepted a terminal outcome.
    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    /// Delay the caller should wait before the next attempt.
    pub fn wait_duration(&self) -> Duration {
        self.state.wait_duration()
    }

    /// The most recent folded outcome.
    pub fn last_result(&self) -> Option<ExecutionResult<R, E>> {
        self.state.last_result()
    }

    /// Attempts recorded so far.
    pub fn attempts(&self) -> usize {
        self.state.attempts()
    }

    /// Read-only view of this execution.
    pub fn context(&self) -> ExecutionContext<R, E> {
        ExecutionContext::new(Arc::clone(&self.state))
    }
}
