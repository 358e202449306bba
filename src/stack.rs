//! Composed execution surfaces.
//!
//! A [`Failgate`] holds an ordered stack of policies, outermost first, and
//! runs operations through them. The outer policy observes the final result
//! of everything inside it; ordering is the caller's choice and both
//! retry-outside-breaker and breaker-outside-retry are legitimate:
//!
//! - `Failgate::with(retry).compose(breaker)`: retries see the breaker's
//!   open rejections and may retry them.
//! - `Failgate::with(breaker).compose(retry)`: the breaker counts the whole
//!   retried sequence as one logical outcome.
//!
//! Sync surfaces (`run`, `get`) execute on the caller thread and sleep
//! between retries. Async surfaces (`run_async`, `get_async`,
//! `get_async_execution`) hand the first invocation to the [`Scheduler`],
//! wait out retry delays on the [`Sleeper`], and return an
//! [`ExecutionFuture`] supporting cancellation.

use crate::async_execution::AsyncExecution;
use crate::engine::{AsyncBase, Pipeline, SupplierFn};
use crate::execution::{Execution, ExecutionContext, ExecutionState, SharedState};
use crate::future::{ExecutionFuture, FutureShared, ORCHESTRATION_INDEX};
use crate::policy::{Policy, PolicyExecutor};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::ExecutionError;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An ordered policy composition around user operations.
pub struct Failgate<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    policies: Vec<Arc<dyn Policy<R, E>>>,
    scheduler: Arc<dyn Scheduler>,
    sleeper: Arc<dyn Sleeper>,
}

impl<R, E> Clone for Failgate<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            policies: self.policies.clone(),
            scheduler: Arc::clone(&self.scheduler),
            sleeper: Arc::clone(&self.sleeper),
        }
    }
}

impl<R, E> std::fmt::Debug for Failgate<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Failgate").field("policies", &self.policies.len()).finish()
    }
}

impl<R, E> Failgate<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Start a composition with its outermost policy.
    pub fn with<P: Policy<R, E> + 'static>(policy: P) -> Self {
        Self::with_policies(vec![Arc::new(policy)])
    }

    /// Build from policies listed outermost first.
    pub fn with_policies(policies: Vec<Arc<dyn Policy<R, E>>>) -> Self {
        Self {
            policies,
            scheduler: Arc::new(TokioScheduler),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Add a policy inside the current stack.
    pub fn compose<P: Policy<R, E> + 'static>(mut self, policy: P) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Substitute the scheduler used for async orchestration.
    pub fn with_scheduler<S: Scheduler + 'static>(mut self, scheduler: S) -> Self {
        self.scheduler = Arc::new(scheduler);
        self
    }

    /// Substitute the sleeper used for async retry waits.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Executors for one call, innermost first.
    fn executors(&self) -> Vec<Arc<dyn PolicyExecutor<R, E>>> {
        self.policies
            .iter()
            .rev()
            .enumerate()
            .map(|(index, policy)| Arc::clone(policy).to_executor(index))
            .collect()
    }

    fn pipeline(&self) -> Pipeline<R, E> {
        Pipeline {
            executors: self.executors(),
            state: Arc::new(ExecutionState::new()),
            sleeper: Arc::clone(&self.sleeper),
        }
    }

    /// Run a sync operation through the composition on the caller thread.
    pub fn get<F>(&self, mut operation: F) -> Result<R, ExecutionError<E>>
    where
        F: FnMut(&ExecutionContext<R, E>) -> Result<R, ExecutionError<E>>,
    {
        self.pipeline().run_sync(&mut operation).into_result()
    }

    /// Run an async operation through the composition.
    pub fn get_async<F, Fut>(&self, mut operation: F) -> ExecutionFuture<R, E>
    where
        F: FnMut(ExecutionContext<R, E>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, ExecutionError<E>>> + Send + 'static,
    {
        let supplier: SupplierFn<R, E> = Box::new(move |ctx| Box::pin(operation(ctx)));
        self.launch(AsyncBase::Supplier(Mutex::new(supplier)))
    }

    /// Run an externally-completed operation: it receives an
    /// [`AsyncExecution`] handle and must record the outcome itself. The
    /// operation is re-invoked for every retry attempt.
    pub fn get_async_execution<F>(&self, operation: F) -> ExecutionFuture<R, E>
    where
        F: FnMut(AsyncExecution<R, E>) + Send + 'static,
    {
        self.launch(AsyncBase::External(Mutex::new(Box::new(operation))))
    }

    /// A manually driven execution over the same composition.
    pub fn execution(&self) -> Execution<R, E> {
        Execution::new(self.policies.clone())
    }

    fn launch(&self, base: AsyncBase<R, E>) -> ExecutionFuture<R, E> {
        let state: SharedState<R, E> = Arc::new(ExecutionState::new());
        let pipeline = Pipeline {
            executors: self.executors(),
            state: Arc::clone(&state),
            sleeper: Arc::clone(&self.sleeper),
        };
        let shared = FutureShared::new();
        let completion = Arc::clone(&shared);
        let task = self.scheduler.schedule(
            Duration::ZERO,
            Box::pin(async move {
                let result = pipeline.run_async(&base).await;
                completion.complete(result);
            }),
        );
        shared.register_cancel(
            ORCHESTRATION_INDEX,
            Box::new(move |may_interrupt, _result| {
                state.cancel();
                if may_interrupt {
                    state.set_interrupted();
                }
                task.cancel();
            }),
        );
        ExecutionFuture::new(shared)
    }
}

impl<E> Failgate<(), E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Run a sync operation with no produced value.
    pub fn run<F>(&self, operation: F) -> Result<(), ExecutionError<E>>
    where
        F: FnMut(&ExecutionContext<(), E>) -> Result<(), ExecutionError<E>>,
    {
        self.get(operation)
    }

    /// Run an async operation with no produced value.
    pub fn run_async<F, Fut>(&self, operation: F) -> ExecutionFuture<(), E>
    where
        F: FnMut(ExecutionContext<(), E>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ExecutionError<E>>> + Send + 'static,
    {
        self.get_async(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Fallback, RetryPolicy};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[test]
    fn sync_get_retries_until_success() {
        let retry = RetryPolicy::<i32, TestError>::builder().max_attempts(3).unwrap().build();
        let guarded = Failgate::with(retry);

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let value = guarded
            .get(move |_ctx| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ExecutionError::Inner(TestError("flaky")))
                } else {
                    Ok(42)
                }
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn composition_order_is_outermost_first() {
        // Fallback sits inside retry, so it terminates before any retry runs
        let retry = RetryPolicy::<&str, TestError>::builder().max_attempts(5).unwrap().build();
        let guarded = Failgate::with(retry).compose(Fallback::value("fallback"));

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let value = guarded
            .get(move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ExecutionError::Inner(TestError("down")))
            })
            .unwrap();

        assert_eq!(value, "fallback");
        assert_eq!(attempts.load(Ordering::SeqCst), 1, "fallback preempts retries");
    }

    #[tokio::test]
    async fn async_get_resolves_through_the_future() {
        let retry = RetryPolicy::<i32, TestError>::builder().max_attempts(2).unwrap().build();
        let guarded = Failgate::with(retry);
        let value = guarded.get_async(|_ctx| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn run_async_produces_unit() {
        let retry = RetryPolicy::<(), TestError>::builder().max_attempts(1).unwrap().build();
        let guarded = Failgate::with(retry);
        guarded.run_async(|_ctx| async { Ok(()) }).await.unwrap();
    }
}
