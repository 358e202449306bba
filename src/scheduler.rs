//! Deferred task submission with cancellable handles
//!
//! Async executions are handed to a [`Scheduler`] rather than spawned
//! directly, so orchestration can be cancelled before an attempt starts and
//! tests can substitute their own submission strategy. The contract is
//! minimal: delayed tasks eventually run, and cancelling prevents a
//! not-yet-started task from running. No fairness or FIFO order is assumed.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Submits a task for execution after `delay`, returning a cancellable handle.
pub trait Scheduler: Send + Sync + std::fmt::Debug {
    fn schedule(
        &self,
        delay: Duration,
        task: Pin<Box<dyn Future<Output = ()> + Send + 'static>>,
    ) -> ScheduledTask;
}

/// Handle to a scheduled task.
#[derive(Clone)]
pub struct ScheduledTask {
    inner: Arc<ScheduledInner>,
}

struct ScheduledInner {
    cancelled: AtomicBool,
    started: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledTask {
    fn new(handle: Option<JoinHandle<()>>) -> (Self, Arc<ScheduledInner>) {
        let inner = Arc::new(ScheduledInner {
            cancelled: AtomicBool::new(false),
            started: AtomicBool::new(false),
            handle: Mutex::new(handle),
        });
        (Self { inner: Arc::clone(&inner) }, inner)
    }

    /// Cancel the task: a not-yet-started task will never run, and a running
    /// task is aborted at its next await point.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Some(handle) = self.inner.handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Whether the task body began running.
    pub fn has_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Whether `cancel` was called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("started", &self.has_started())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Scheduler backed by the current tokio runtime.
///
/// Must be used from within a runtime; the delay rides the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(
        &self,
        delay: Duration,
        task: Pin<Box<dyn Future<Output = ()> + Send + 'static>>,
    ) -> ScheduledTask {
        let (scheduled, inner) = ScheduledTask::new(None);
        let gate = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if gate.cancelled.load(Ordering::SeqCst) {
                return;
            }
            gate.started.store(true, Ordering::SeqCst);
            task.await;
        });
        *inner.handle.lock().unwrap() = Some(handle);
        scheduled
    }
}
