//! Bulkhead: caps how many executions run concurrently.
//!
//! Backed by a bounded semaphore. Admission acquires a permit held while
//! the wrapped composition runs (a retry policy nested inside holds it
//! across its attempts) and released when this layer records the outcome.
//! Without a permit the attempt is rejected; with `max_wait` the async
//! path waits up to the bound before rejecting. The sync path never blocks
//! on admission, since a blocked caller thread could not observe
//! cancellation.

use crate::policy::{BoxFuture, Policy, PolicyExecutor};
use crate::result::ExecutionResult;
use crate::{ExecutionError, SharedState};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Errors returned by bulkhead configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkheadError {
    ZeroCapacity,
}

impl std::fmt::Display for BulkheadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BulkheadError::ZeroCapacity => write!(f, "bulkhead capacity must be greater than zero"),
        }
    }
}

impl std::error::Error for BulkheadError {}

/// Concurrency limiter shared by every execution composed over it.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    max_wait: Option<Duration>,
}

impl Bulkhead {
    /// Allow at most `max_concurrency` executions at once.
    pub fn new(max_concurrency: usize) -> Result<Self, BulkheadError> {
        if max_concurrency == 0 {
            return Err(BulkheadError::ZeroCapacity);
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            max_wait: None,
        })
    }

    /// Async admissions wait up to `max_wait` for a permit before rejecting.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Configured concurrency cap.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Permits currently available.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    fn rejection<R, E>(&self, policy_index: usize) -> ExecutionResult<R, E> {
        ExecutionResult::failure(ExecutionError::BulkheadFull {
            max_concurrency: self.max_concurrency,
        })
        .with_rejected_by(policy_index)
    }
}

impl<R, E> Policy<R, E> for Bulkhead
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn to_executor(self: Arc<Self>, policy_index: usize) -> Arc<dyn PolicyExecutor<R, E>> {
        Arc::new(BulkheadExecutor { policy: self, index: policy_index, permit: Mutex::new(None) })
    }
}

/// Per-call executor holding the permit for the attempt in flight.
struct BulkheadExecutor {
    policy: Arc<Bulkhead>,
    index: usize,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl BulkheadExecutor {
    fn park(&self, permit: OwnedSemaphorePermit) {
        *self.permit.lock().unwrap() = Some(permit);
    }

    fn release(&self) {
        self.permit.lock().unwrap().take();
    }
}

impl<R, E> PolicyExecutor<R, E> for BulkheadExecutor
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn policy_index(&self) -> usize {
        self.index
    }

    fn pre_execute(&self, _execution: &SharedState<R, E>) -> Option<ExecutionResult<R, E>> {
        match Arc::clone(&self.policy.semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.park(permit);
                None
            }
            Err(_) => Some(self.policy.rejection(self.index)),
        }
    }

    fn pre_execute_async<'a>(
        &'a self,
        _execution: &'a SharedState<R, E>,
    ) -> BoxFuture<'a, Option<ExecutionResult<R, E>>> {
        Box::pin(async move {
            let semaphore = Arc::clone(&self.policy.semaphore);
            if let Ok(permit) = semaphore.clone().try_acquire_owned() {
                self.park(permit);
                return None;
            }
            let Some(max_wait) = self.policy.max_wait else {
                return Some(self.policy.rejection(self.index));
            };
            match tokio::time::timeout(max_wait, semaphore.acquire_owned()).await {
                Ok(Ok(permit)) => {
                    self.park(permit);
                    None
                }
                // Closed semaphores do not occur; the bulkhead never closes it
                Ok(Err(_)) | Err(_) => Some(self.policy.rejection(self.index)),
            }
        })
    }

    fn on_success(&self, _result: &ExecutionResult<R, E>) {
        self.release();
    }

    fn on_failure(
        &self,
        _execution: &SharedState<R, E>,
        result: ExecutionResult<R, E>,
    ) -> ExecutionResult<R, E> {
        self.release();
        result
    }
}
