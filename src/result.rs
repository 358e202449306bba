//! Immutable outcome of a single execution attempt
//!
//! Policies never mutate a result in place; they derive new values through
//! the `with_*` copies, so an outcome observed by one hook cannot change
//! under another.

use crate::ExecutionError;
use std::time::Duration;

/// The outcome of one attempt, as seen and transformed by policy hooks.
///
/// At most one of `value` / `error` is set. `complete` means the pipeline
/// accepts the outcome as final; a retry policy requests another attempt by
/// clearing it and supplying a wait. `success` records how the most recent
/// policy classified the outcome. `abortive` forces termination regardless
/// of remaining retries.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult<R, E> {
    value: Option<R>,
    failure: Option<ExecutionError<E>>,
    complete: bool,
    success: bool,
    wait: Duration,
    abortive: bool,
    // Index of the policy whose admission refused this pass, if any. That
    // policy must not count the rejection as one of its own outcomes.
    rejected_by: Option<usize>,
}

impl<R, E> ExecutionResult<R, E> {
    /// A successful outcome carrying `value`. Complete until a policy says otherwise.
    pub fn success(value: R) -> Self {
        Self::success_option(Some(value))
    }

    pub(crate) fn success_option(value: Option<R>) -> Self {
        Self {
            value,
            failure: None,
            complete: true,
            success: true,
            wait: Duration::ZERO,
            abortive: false,
            rejected_by: None,
        }
    }

    /// A failed outcome carrying `failure`. Complete until a policy requests a retry.
    pub fn failure(failure: ExecutionError<E>) -> Self {
        Self {
            value: None,
            failure: Some(failure),
            complete: true,
            success: false,
            wait: Duration::ZERO,
            abortive: false,
            rejected_by: None,
        }
    }

    /// Borrow the success value, if any.
    pub fn value(&self) -> Option<&R> {
        self.value.as_ref()
    }

    /// Borrow the failure, if any.
    pub fn error(&self) -> Option<&ExecutionError<E>> {
        self.failure.as_ref()
    }

    /// Whether the most recent policy classified this outcome as non-failing.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Whether the pipeline accepts this outcome as final.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether an abort classifier fired, terminating regardless of retries.
    pub fn is_abortive(&self) -> bool {
        self.abortive
    }

    /// Delay the orchestrator should wait before the next attempt.
    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Copy with a retry wait.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Copy marked final.
    pub fn with_complete(mut self) -> Self {
        self.complete = true;
        self
    }

    /// Copy requesting continuation (a retry).
    pub fn with_not_complete(mut self) -> Self {
        self.complete = false;
        self
    }

    /// Copy marked abortive. Abortive outcomes are always final.
    pub fn with_abort(mut self) -> Self {
        self.abortive = true;
        self.complete = true;
        self
    }

    pub(crate) fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }

    /// Copy marked as an admission rejection by the policy at `policy_index`.
    pub(crate) fn with_rejected_by(mut self, policy_index: usize) -> Self {
        self.rejected_by = Some(policy_index);
        self
    }

    /// The policy index whose admission refused this pass, if any.
    pub(crate) fn rejected_by(&self) -> Option<usize> {
        self.rejected_by
    }

    /// Compact description for trace output.
    pub fn summary(&self) -> String {
        let kind = match (&self.value, &self.failure) {
            (_, Some(_)) => "failure",
            (Some(_), None) => "success",
            (None, None) => "empty",
        };
        format!(
            "{}(complete={}, success={}, wait={:?}{})",
            kind,
            self.complete,
            self.success,
            self.wait,
            if self.abortive { ", abortive" } else { "" },
        )
    }

    /// Collapse into the caller-facing result.
    pub(crate) fn into_result(self) -> Result<R, ExecutionError<E>> {
        match (self.value, self.failure) {
            (_, Some(failure)) => Err(failure),
            (Some(value), None) => Ok(value),
            // Supplier-based executions always record a value or a failure
            (None, None) => unreachable!("terminal result carries neither value nor failure"),
        }
    }
}
