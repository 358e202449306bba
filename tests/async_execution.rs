//! Externally-completed executions and future cancellation.

use failgate::{CircuitBreaker, ExecutionError, Failgate, RetryPolicy};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestError(&'static str);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestError: {}", self.0)
    }
}

impl std::error::Error for TestError {}

#[tokio::test]
async fn external_records_drive_retries() {
    let retry = RetryPolicy::<u32, TestError>::builder().max_retries(2).build();
    let guarded = Failgate::with(retry);

    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invocations);
    let err = guarded
        .get_async_execution(move |execution| {
            counter.fetch_add(1, Ordering::SeqCst);
            execution.record(None, Some(ExecutionError::Inner(TestError("down"))));
        })
        .await
        .unwrap_err();

    assert_eq!(err, ExecutionError::Inner(TestError("down")));
    assert_eq!(invocations.load(Ordering::SeqCst), 3, "the operation re-ran for every retry");
}

#[tokio::test]
async fn external_success_completes_the_future() {
    let retry = RetryPolicy::<u32, TestError>::builder().max_retries(3).build();
    let guarded = Failgate::with(retry);

    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invocations);
    let value = guarded
        .get_async_execution(move |execution| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                execution.record_failure(TestError("warming up"));
            } else {
                execution.record_result(17);
            }
        })
        .await
        .unwrap();

    assert_eq!(value, 17);
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn duplicate_records_within_an_attempt_are_dropped() {
    let guarded: Failgate<u32, TestError> =
        Failgate::with(RetryPolicy::builder().max_retries(0).build());

    let second_record = Arc::new(AtomicBool::new(true));
    let observed = Arc::clone(&second_record);
    let value = guarded
        .get_async_execution(move |execution| {
            assert!(execution.record_result(1));
            observed.store(execution.record_result(2), Ordering::SeqCst);
        })
        .await
        .unwrap();

    assert_eq!(value, 1, "the first record wins");
    assert!(!second_record.load(Ordering::SeqCst), "the duplicate reported as dropped");
}

#[tokio::test]
async fn records_from_a_spawned_task_complete_the_attempt() {
    let guarded: Failgate<u32, TestError> =
        Failgate::with(RetryPolicy::builder().max_retries(0).build());

    let value = guarded
        .get_async_execution(|execution| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                execution.record_result(23);
            });
        })
        .await
        .unwrap();

    assert_eq!(value, 23);
}

#[tokio::test]
async fn cancellation_during_the_retry_delay_stops_the_execution() {
    let retry = RetryPolicy::<u32, TestError>::builder()
        .max_retries(5)
        .with_delay(Duration::from_secs(1))
        .build();
    let breaker =
        CircuitBreaker::<u32, TestError>::builder().failure_threshold(5).unwrap().build();
    let guarded = Failgate::with(retry).compose(breaker.clone());

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let future = guarded.get_async(move |_ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<u32, _>(ExecutionError::Inner(TestError("down"))) }
    });

    let handle = future.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.cancel(false));
    });

    let err = future.await.unwrap_err();
    assert!(err.is_cancelled());

    // Give an aborted second attempt a chance to show up if one existed
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1, "no attempt ran after cancellation");
    assert!(breaker.is_closed(), "policy state did not change after cancellation");
}

#[tokio::test]
async fn cancellation_with_interrupt_reaches_a_running_external_task() {
    let guarded: Failgate<u32, TestError> =
        Failgate::with(RetryPolicy::builder().max_retries(0).build());

    let saw_interrupt = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&saw_interrupt);
    let future = guarded.get_async_execution(move |execution| {
        let flag = Arc::clone(&flag);
        tokio::spawn(async move {
            for _ in 0..100 {
                if execution.is_interrupted() {
                    flag.store(true, Ordering::SeqCst);
                    // Late record after cancellation is ignored
                    execution.record_result(99);
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
    });

    let handle = future.handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel(true);
    });

    let err = future.await.unwrap_err();
    assert!(err.is_cancelled());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(saw_interrupt.load(Ordering::SeqCst), "the task observed the interrupt flag");
}

#[tokio::test]
async fn cancelling_a_completed_future_is_refused() {
    let guarded: Failgate<u32, TestError> =
        Failgate::with(RetryPolicy::builder().max_retries(0).build());

    let future = guarded.get_async(|_ctx| async { Ok(4) });
    let handle = future.handle();
    let value = future.await.unwrap();
    assert_eq!(value, 4);
    assert!(!handle.cancel(true));
    assert!(!handle.is_cancelled());
}
