//! Composition driver: folds the executor chain around the user operation.
//!
//! Executors are stored innermost-first (policy index 0 is innermost). Each
//! level runs `pre_execute`, the inner composition wrapped by `around_*`,
//! then `post_execute`. A not-complete post result is a retry request: the
//! same level waits the requested delay and re-enters its inner chain. Only
//! a retry policy produces such results, so every other level runs at most
//! once per attempt. Exactly one attempt is counted per pass: at the base,
//! or at the admission check that rejected it.

use crate::async_execution::AsyncExecution;
use crate::execution::{ExecutionContext, SharedState};
use crate::policy::{BoxFuture, PolicyExecutor};
use crate::result::ExecutionResult;
use crate::sleeper::Sleeper;
use crate::ExecutionError;
use std::sync::{Arc, Mutex};

/// Sync user operation: runs on the caller thread each attempt.
pub(crate) type SyncOperation<'o, R, E> =
    dyn FnMut(&ExecutionContext<R, E>) -> Result<R, ExecutionError<E>> + 'o;

/// Async supplier: produces one future per attempt.
pub(crate) type SupplierFn<R, E> =
    Box<dyn FnMut(ExecutionContext<R, E>) -> BoxFuture<'static, Result<R, ExecutionError<E>>> + Send>;

/// Externally-completed operation: receives the execution handle and must
/// record the outcome itself.
pub(crate) type ExternalFn<R, E> = Box<dyn FnMut(AsyncExecution<R, E>) + Send>;

/// The innermost function of an async composition. Invocations go through a
/// mutex so a supplier is never applied concurrently with its own prior
/// completion path.
pub(crate) enum AsyncBase<R, E> {
    Supplier(Mutex<SupplierFn<R, E>>),
    External(Mutex<ExternalFn<R, E>>),
}

pub(crate) struct Pipeline<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) executors: Vec<Arc<dyn PolicyExecutor<R, E>>>,
    pub(crate) state: SharedState<R, E>,
    pub(crate) sleeper: Arc<dyn Sleeper>,
}

impl<R, E> Pipeline<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn run_sync(&self, operation: &mut SyncOperation<'_, R, E>) -> ExecutionResult<R, E> {
        let result = self.run_sync_level(self.executors.len(), operation);
        self.state.finish(&result);
        result
    }

    fn run_sync_level(
        &self,
        level: usize,
        operation: &mut SyncOperation<'_, R, E>,
    ) -> ExecutionResult<R, E> {
        if level == 0 {
            return self.run_sync_attempt(operation);
        }
        let executor = Arc::clone(&self.executors[level - 1]);
        loop {
            let mut result = match executor.pre_execute(&self.state) {
                Some(rejection) => {
                    self.state.record_attempt();
                    rejection
                }
                None => {
                    let mut inner = || self.run_sync_level(level - 1, operation);
                    executor.around_sync(&self.state, &mut inner)
                }
            };
            result = executor.post_execute(&self.state, result);
            if result.is_complete() {
                return result;
            }
            let wait = result.wait();
            if !wait.is_zero() {
                std::thread::sleep(wait);
            }
            self.state.prepare_retry();
        }
    }

    fn run_sync_attempt(&self, operation: &mut SyncOperation<'_, R, E>) -> ExecutionResult<R, E> {
        self.state.record_attempt();
        // A result recorded during admission (timeout watcher) stands
        if let Some(existing) = self.state.attempt_result() {
            return existing;
        }
        self.state.mark_execution_started();
        let context = ExecutionContext::new(Arc::clone(&self.state));
        self.state.begin_interruptible();
        let outcome = operation(&context);
        let result = match outcome {
            Ok(value) => ExecutionResult::success(value),
            Err(failure) => ExecutionResult::failure(failure),
        };
        // Close the interruption window before publishing; if a timeout
        // watcher recorded first, its result wins and this one is dropped.
        let _ = self.state.end_interruptible();
        self.state.record_attempt_result(result)
    }

    pub(crate) async fn run_async(&self, base: &AsyncBase<R, E>) -> ExecutionResult<R, E> {
        let result = self.run_async_level(self.executors.len(), base).await;
        self.state.finish(&result);
        result
    }

    fn run_async_level<'a>(
        &'a self,
        level: usize,
        base: &'a AsyncBase<R, E>,
    ) -> BoxFuture<'a, ExecutionResult<R, E>> {
        Box::pin(async move {
            if level == 0 {
                return self.run_async_attempt(base).await;
            }
            let executor = Arc::clone(&self.executors[level - 1]);
            loop {
                let mut result = match executor.pre_execute_async(&self.state).await {
                    Some(rejection) => {
                        self.state.record_attempt();
                        rejection
                    }
                    None => {
                        let inner = self.run_async_level(level - 1, base);
                        executor.around_async(&self.state, inner).await
                    }
                };
                result = executor.post_execute(&self.state, result);
                if result.is_complete() {
                    return result;
                }
                if self.state.is_cancelled() {
                    return ExecutionResult::failure(ExecutionError::Cancelled);
                }
                let wait = result.wait();
                if !wait.is_zero() {
                    self.sleeper.sleep(wait).await;
                }
                if self.state.is_cancelled() {
                    return ExecutionResult::failure(ExecutionError::Cancelled);
                }
                self.state.prepare_retry();
            }
        })
    }

    async fn run_async_attempt(&self, base: &AsyncBase<R, E>) -> ExecutionResult<R, E> {
        self.state.record_attempt();
        // An already-recorded attempt short-circuits without re-invoking the
        // operation; retries always clear the slot first
        if let Some(existing) = self.state.attempt_result() {
            return existing;
        }
        match base {
            AsyncBase::Supplier(operation) => {
                self.state.mark_execution_started();
                let context = ExecutionContext::new(Arc::clone(&self.state));
                let future = { (operation.lock().unwrap())(context) };
                let result = match future.await {
                    Ok(value) => ExecutionResult::success(value),
                    Err(failure) => ExecutionResult::failure(failure),
                };
                self.state.record_attempt_result(result)
            }
            AsyncBase::External(runnable) => {
                self.state.mark_execution_started();
                let handle =
                    AsyncExecution::new(Arc::clone(&self.state), self.state.attempts());
                {
                    (runnable.lock().unwrap())(handle);
                }
                self.state.wait_for_attempt_record().await;
                match self.state.attempt_result() {
                    Some(result) => result,
                    None => unreachable!("record latch released without a result"),
                }
            }
        }
    }
}
