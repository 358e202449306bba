//! Timeout attempts racing operations, with and without retries.

use failgate::{Failgate, RetryPolicy, Timeout};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestError(&'static str);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestError: {}", self.0)
    }
}

impl std::error::Error for TestError {}

#[test]
fn sync_timeout_with_retry_times_out_every_attempt() {
    let retry = RetryPolicy::<u32, TestError>::builder().max_retries(1).build();
    let timeout = Timeout::of(Duration::from_millis(10)).unwrap().with_interrupt();
    let guarded = Failgate::with(retry).compose(timeout);

    let executions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&executions);
    let err = guarded
        .get(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            Ok(1)
        })
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(executions.load(Ordering::SeqCst), 2, "both attempts ran and timed out");
}

#[test]
fn sync_interrupt_flag_is_reset_between_attempts() {
    let retry = RetryPolicy::<u32, TestError>::builder().max_retries(1).build();
    let timeout = Timeout::of(Duration::from_millis(15)).unwrap().with_interrupt();
    let guarded = Failgate::with(retry).compose(timeout);

    let fresh_flags = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&fresh_flags);
    let err = guarded
        .get(move |ctx| {
            sink.lock().unwrap().push(ctx.is_interrupted());
            std::thread::sleep(Duration::from_millis(80));
            Ok(1)
        })
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(
        *fresh_flags.lock().unwrap(),
        vec![false, false],
        "each attempt starts uninterrupted"
    );
}

#[test]
fn sync_timeout_discards_a_late_success() {
    let timeout = Timeout::of(Duration::from_millis(20)).unwrap();
    let guarded: Failgate<u32, TestError> = Failgate::with(timeout);

    let err = guarded
        .get(|_ctx| {
            std::thread::sleep(Duration::from_millis(80));
            Ok(5)
        })
        .unwrap_err();

    assert!(err.is_timeout(), "the timeout recorded first, the success is dropped");
}

#[test]
fn sync_fast_operation_is_untouched() {
    let timeout = Timeout::of(Duration::from_secs(5)).unwrap();
    let guarded: Failgate<u32, TestError> = Failgate::with(timeout);
    assert_eq!(guarded.get(|_ctx| Ok(5)).unwrap(), 5);
}

#[tokio::test]
async fn async_timeout_with_retry_cancels_every_attempt() {
    let retry = RetryPolicy::<u32, TestError>::builder().max_retries(1).build();
    let timeout = Timeout::of(Duration::from_millis(30)).unwrap().with_interrupt();
    let guarded = Failgate::with(retry).compose(timeout);

    let executions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&executions);
    let start = Instant::now();
    let err = guarded
        .get_async(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(1)
            }
        })
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(executions.load(Ordering::SeqCst), 2);
    assert!(
        start.elapsed() < Duration::from_millis(400),
        "attempts were dropped at expiry, not run to completion"
    );
}

#[tokio::test]
async fn async_timeout_failure_is_retryable_like_any_other() {
    // Attempt 1 times out, attempt 2 is fast and succeeds
    let retry = RetryPolicy::<u32, TestError>::builder().max_retries(1).build();
    let timeout = Timeout::of(Duration::from_millis(50)).unwrap();
    let guarded = Failgate::with(retry).compose(timeout);

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let value = guarded
        .get_async(move |_ctx| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
                Ok(n as u32)
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
