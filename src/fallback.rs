//! Fallback policy: replaces a failing outcome with an alternative result.
//!
//! Fallback is terminal. Its failure hook returns a complete result, so no
//! inner retry runs afterwards and outer policies observe the substituted
//! outcome.

use crate::policy::{Policy, PolicyExecutor};
use crate::result::ExecutionResult;
use crate::{ExecutionError, SharedState};
use std::sync::Arc;

type FallbackFn<R, E> =
    Arc<dyn Fn(&ExecutionResult<R, E>) -> Result<R, ExecutionError<E>> + Send + Sync>;
type ErrorPredicate<E> = Arc<dyn Fn(&ExecutionError<E>) -> bool + Send + Sync>;
type AttemptHook<R, E> = Arc<dyn Fn(&ExecutionResult<R, E>) + Send + Sync>;

/// Substitutes failing outcomes. Built from a fixed value or a function of
/// the failed result.
#[derive(Clone)]
pub struct Fallback<R, E> {
    fallback: FallbackFn<R, E>,
    handle_errors: Vec<ErrorPredicate<E>>,
    on_failed_attempt: Option<AttemptHook<R, E>>,
}

impl<R, E> std::fmt::Debug for Fallback<R, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fallback").finish_non_exhaustive()
    }
}

impl<R, E> Fallback<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Always substitute `value`.
    pub fn value(value: R) -> Self
    where
        R: Sync,
    {
        Self::of(move |_| Ok(value.clone()))
    }

    /// Substitute with a function of the failed result; returning an error
    /// replaces the failure instead.
    pub fn of<F>(fallback: F) -> Self
    where
        F: Fn(&ExecutionResult<R, E>) -> Result<R, ExecutionError<E>> + Send + Sync + 'static,
    {
        Self { fallback: Arc::new(fallback), handle_errors: Vec::new(), on_failed_attempt: None }
    }

    /// Only failures matching `predicate` are replaced; others pass through
    /// untouched. OR-ed when repeated.
    pub fn handle_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ExecutionError<E>) -> bool + Send + Sync + 'static,
    {
        self.handle_errors.push(Arc::new(predicate));
        self
    }

    /// Observe each failed attempt before it is replaced.
    pub fn on_failed_attempt<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ExecutionResult<R, E>) + Send + Sync + 'static,
    {
        self.on_failed_attempt = Some(Arc::new(hook));
        self
    }

    fn is_failure(&self, result: &ExecutionResult<R, E>) -> bool {
        match result.error() {
            Some(error) => {
                self.handle_errors.is_empty() || self.handle_errors.iter().any(|p| p(error))
            }
            None => false,
        }
    }
}

impl<R, E> Policy<R, E> for Fallback<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn to_executor(self: Arc<Self>, policy_index: usize) -> Arc<dyn PolicyExecutor<R, E>> {
        Arc::new(FallbackExecutor { policy: self, index: policy_index })
    }
}

struct FallbackExecutor<R, E> {
    policy: Arc<Fallback<R, E>>,
    index: usize,
}

impl<R, E> PolicyExecutor<R, E> for FallbackExecutor<R, E>
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
        _execution: &SharedState<R, E>,
        result: ExecutionResult<R, E>,
    ) -> ExecutionResult<R, E> {
        if let Some(hook) = &self.policy.on_failed_attempt {
            hook(&result);
        }
        match (self.policy.fallback)(&result) {
            Ok(value) => ExecutionResult::success(value).with_complete(),
            Err(error) => ExecutionResult::failure(error).with_complete(),
        }
    }
}
