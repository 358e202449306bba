//! User-visible future for async executions, with cancellation.
//!
//! A single-shot promise: the orchestration task completes it once, and
//! cancellation completes it immediately with a cancellation outcome while
//! running every registered cancel function exactly once, outer to inner
//! (descending policy index, the orchestration layer at index -1 last).
//! Results recorded after cancellation never change the outcome.

use crate::result::ExecutionResult;
use crate::ExecutionError;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// Cancel-function slot for the orchestration layer itself.
pub(crate) const ORCHESTRATION_INDEX: i64 = -1;

/// Callback invoked on cancellation with the interrupt request and the
/// cancellation outcome.
pub(crate) type CancelFn<R, E> = Box<dyn FnOnce(bool, &ExecutionResult<R, E>) + Send>;

struct FutureInner<R, E> {
    outcome: Option<ExecutionResult<R, E>>,
    cancelled_with_interrupt: Option<bool>,
    waker: Option<Waker>,
    cancel_fns: BTreeMap<i64, CancelFn<R, E>>,
}

pub(crate) struct FutureShared<R, E> {
    inner: Mutex<FutureInner<R, E>>,
}

impl<R, E> FutureShared<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(FutureInner {
                outcome: None,
                cancelled_with_interrupt: None,
                waker: None,
                cancel_fns: BTreeMap::new(),
            }),
        })
    }

    /// Complete once; later completions (including late records after
    /// cancellation) are dropped.
    pub(crate) fn complete(&self, result: ExecutionResult<R, E>) -> bool {
        let waker = {
            let mut inner = self.inner.lock().unwrap();
            if inner.outcome.is_some() {
                return false;
            }
            inner.outcome = Some(result);
            inner.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Register a cancel function for a policy layer. If cancellation
    /// already happened the function runs immediately.
    pub(crate) fn register_cancel(&self, index: i64, f: CancelFn<R, E>) {
        let already_cancelled = {
            let mut inner = self.inner.lock().unwrap();
            match inner.cancelled_with_interrupt {
                Some(may_interrupt) => inner.outcome.clone().map(|outcome| (may_interrupt, outcome)),
                None => {
                    inner.cancel_fns.insert(index, f);
                    return;
                }
            }
        };
        if let Some((may_interrupt, outcome)) = already_cancelled {
            f(may_interrupt, &outcome);
        }
    }

    /// Cancel: complete with a cancellation outcome and run every
    /// registered cancel function once, in descending index order. Returns
    /// false when the future already completed.
    pub(crate) fn cancel(&self, may_interrupt: bool) -> bool {
        let (result, fns, waker) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.outcome.is_some() {
                return false;
            }
            let result: ExecutionResult<R, E> =
                ExecutionResult::failure(ExecutionError::Cancelled);
            inner.outcome = Some(result.clone());
            inner.cancelled_with_interrupt = Some(may_interrupt);
            let fns = std::mem::take(&mut inner.cancel_fns);
            (result, fns, inner.waker.take())
        };
        tracing::debug!(may_interrupt, "execution cancelled");
        // Outer to inner: descending index, the orchestration layer last
        for (_, f) in fns.into_iter().rev() {
            f(may_interrupt, &result);
        }
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    pub(crate) fn is_done(&self) -> bool {
        self.inner.lock().unwrap().outcome.is_some()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.lock().unwrap().cancelled_with_interrupt.is_some()
    }

    fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<Result<R, ExecutionError<E>>> {
        let mut inner = self.inner.lock().unwrap();
        match &inner.outcome {
            Some(outcome) => Poll::Ready(outcome.clone().into_result()),
            None => {
                inner.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

/// Future resolving to the execution's terminal outcome.
pub struct ExecutionFuture<R, E> {
    shared: Arc<FutureShared<R, E>>,
}

impl<R, E> ExecutionFuture<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(shared: Arc<FutureShared<R, E>>) -> Self {
        Self { shared }
    }

    /// Cancel the execution. With `may_interrupt` the running attempt is
    /// asked to stop through the cooperative interrupt flag. Returns false
    /// when the execution already completed.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.shared.cancel(may_interrupt)
    }

    /// Whether a terminal outcome is available.
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    /// Whether the execution was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Cloneable handle for cancelling from elsewhere.
    pub fn handle(&self) -> ExecutionHandle<R, E> {
        ExecutionHandle { shared: Arc::clone(&self.shared) }
    }
}

impl<R, E> Future for ExecutionFuture<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Output = Result<R, ExecutionError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.shared.poll_outcome(cx)
    }
}

/// Cloneable cancellation handle for an [`ExecutionFuture`].
pub struct ExecutionHandle<R, E> {
    shared: Arc<FutureShared<R, E>>,
}

impl<R, E> Clone for ExecutionHandle<R, E> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<R, E> ExecutionHandle<R, E>
where
    R: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Cancel the execution; see [`ExecutionFuture::cancel`].
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.shared.cancel(may_interrupt)
    }

    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }
}
