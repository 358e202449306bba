//! Policy SPI: the hook contract every fault-handling strategy satisfies.
//!
//! A [`Policy`] is shared configuration plus (for stateful policies) a
//! thread-safe state machine. For each composed call it produces a
//! [`PolicyExecutor`], the per-call adaptor that wraps one layer of the
//! pipeline. Executors expose a uniform set of hooks with default bodies;
//! each policy overrides only the hooks it needs, and a single dispatcher in
//! the engine drives them in a fixed order: `pre_execute`, the inner
//! composition (via `around_*`), then `post_execute` routing to
//! `on_failure` or `on_success`.

use crate::execution::SharedState;
use crate::result::ExecutionResult;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future used across executor hook boundaries.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A fault-handling strategy that can wrap an execution.
pub trait Policy<R, E>: Send + Sync
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Build the executor for this policy at `policy_index` (0 = innermost).
    fn to_executor(self: Arc<Self>, policy_index: usize) -> Arc<dyn PolicyExecutor<R, E>>;
}

/// Per-call adaptor wrapping one policy around the inner composition.
pub trait PolicyExecutor<R, E>: Send + Sync
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Position in the composition; 0 is innermost.
    fn policy_index(&self) -> usize;

    /// Called before the inner composition runs. Returning a result
    /// short-circuits the attempt (open breaker, full bulkhead, exhausted
    /// rate limit); it is routed through `on_failure` like any failure.
    fn pre_execute(&self, _execution: &SharedState<R, E>) -> Option<ExecutionResult<R, E>> {
        None
    }

    /// Async admission. Defaults to the sync `pre_execute`; policies with a
    /// bounded wait (bulkhead, rate limiter) override this to wait before
    /// rejecting.
    fn pre_execute_async<'a>(
        &'a self,
        execution: &'a SharedState<R, E>,
    ) -> BoxFuture<'a, Option<ExecutionResult<R, E>>> {
        let pre = self.pre_execute(execution);
        Box::pin(std::future::ready(pre))
    }

    /// Classify an outcome. The default treats any present failure as a
    /// failure; policies with configured classifiers override this.
    fn is_failure(&self, result: &ExecutionResult<R, E>) -> bool {
        result.error().is_some()
    }

    /// Observe a successful outcome. Never transforms.
    fn on_success(&self, _result: &ExecutionResult<R, E>) {}

    /// Handle a failing outcome. May request a retry (`with_not_complete`
    /// plus a wait), transform the result (fallback), or pass it through.
    fn on_failure(
        &self,
        _execution: &SharedState<R, E>,
        result: ExecutionResult<R, E>,
    ) -> ExecutionResult<R, E> {
        result
    }

    /// Route an outcome through this policy's classifier and hooks,
    /// stamping the success flag. Shared by the drivers and by manual
    /// recording.
    fn post_execute(
        &self,
        execution: &SharedState<R, E>,
        result: ExecutionResult<R, E>,
    ) -> ExecutionResult<R, E> {
        if self.is_failure(&result) {
            self.on_failure(execution, result.with_success(false))
        } else {
            let result = result.with_success(true);
            self.on_success(&result);
            result
        }
    }

    /// Wrap the inner composition on the sync path. The timeout executor
    /// overrides this to run its watcher around the attempt.
    fn around_sync(
        &self,
        _execution: &SharedState<R, E>,
        inner: &mut dyn FnMut() -> ExecutionResult<R, E>,
    ) -> ExecutionResult<R, E> {
        inner()
    }

    /// Wrap the inner composition on the async path.
    fn around_async<'a>(
        &'a self,
        _execution: &'a SharedState<R, E>,
        inner: BoxFuture<'a, ExecutionResult<R, E>>,
    ) -> BoxFuture<'a, ExecutionResult<R, E>> {
        inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionState;
    use crate::ExecutionError;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    struct PassThrough;

    impl PolicyExecutor<i32, TestError> for PassThrough {
        fn policy_index(&self) -> usize {
            0
        }
    }

    #[test]
    fn default_post_execute_stamps_success() {
        let state = Arc::new(ExecutionState::<i32, TestError>::new());
        let executor = PassThrough;

        let ok = executor.post_execute(&state, ExecutionResult::success(5));
        assert!(ok.is_success());
        assert!(ok.is_complete());

        let failed = executor.post_execute(
            &state,
            ExecutionResult::failure(ExecutionError::Inner(TestError("x"))),
        );
        assert!(!failed.is_success());
        assert!(failed.is_complete());
    }

    #[test]
    fn default_pre_execute_admits_everything() {
        let state = Arc::new(ExecutionState::<i32, TestError>::new());
        assert!(PassThrough.pre_execute(&state).is_none());
    }

    #[tokio::test]
    async fn default_async_admission_delegates_to_sync() {
        let state = Arc::new(ExecutionState::<i32, TestError>::new());
        assert!(PassThrough.pre_execute_async(&state).await.is_none());
    }
}
