#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # failgate
//!
//! A composable resilience execution engine: wrap any operation, sync or
//! async, in an ordered stack of fault-handling policies and let them
//! decide, attempt by attempt, whether to retry, short-circuit, transform,
//! or accept the outcome.
//!
//! ## Policies
//!
//! - **Retry** with backoff, jitter, classifiers, and abort conditions
//! - **Circuit breaker** with ring-buffer thresholds and half-open probing
//! - **Timeout** per attempt, with cooperative interruption
//! - **Fallback** substituting failing outcomes
//! - **Bulkhead** capping concurrent executions
//! - **Rate limiter**, smooth or bursty
//!
//! Policies compose outermost first: the outer policy observes the final
//! result of everything inside it. Async executions return an
//! [`ExecutionFuture`] with cancellation that propagates into the running
//! attempt; externally-completed operations record their outcomes through
//! an [`AsyncExecution`] handle; manual orchestration is available via
//! [`Execution`].
//!
//! Result and failure types must be `Clone`: attempt outcomes are shared
//! between the pipeline, timeout watchers, and the user-visible future.
//!
//! ## Quick Start
//!
//! ```rust
//! use failgate::{Backoff, CircuitBreaker, ExecutionError, Failgate, Jitter, RetryPolicy};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ExecutionError<String>> {
//!     let retry = RetryPolicy::<u32, String>::builder()
//!         .max_attempts(3).expect("max_attempts > 0")
//!         .backoff(Backoff::exponential(Duration::from_millis(50)))
//!         .with_jitter(Jitter::full())
//!         .build();
//!
//!     let breaker = CircuitBreaker::<u32, String>::builder()
//!         .failure_threshold(5).expect("threshold > 0")
//!         .delay(Duration::from_secs(30))
//!         .build();
//!
//!     // Retries observe the breaker's rejections and may retry them
//!     let guarded = Failgate::with(retry).compose(breaker);
//!
//!     let value = guarded.get_async(|_ctx| async { Ok(42) }).await?;
//!     assert_eq!(value, 42);
//!     Ok(())
//! }
//! ```

pub mod async_execution;
pub mod backoff;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
mod engine;
pub mod error;
pub mod execution;
pub mod fallback;
pub mod future;
pub mod jitter;
pub mod policy;
pub mod rate_limiter;
pub mod result;
pub mod retry;
pub mod scheduler;
pub mod sleeper;
pub mod stack;
pub mod timeout;

// Re-exports
pub use async_execution::AsyncExecution;
pub use backoff::{Backoff, BackoffError, MAX_BACKOFF};
pub use bulkhead::{Bulkhead, BulkheadError};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilder, CircuitBreakerError, CircuitState,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::ExecutionError;
pub use execution::{Execution, ExecutionContext, ExecutionState, SharedState};
pub use fallback::Fallback;
pub use future::{ExecutionFuture, ExecutionHandle};
pub use jitter::{Jitter, JitterError};
pub use policy::{BoxFuture, Policy, PolicyExecutor};
pub use rate_limiter::{RateLimiter, RateLimiterError};
pub use result::ExecutionResult;
pub use retry::{RetryError, RetryPolicy, RetryPolicyBuilder};
pub use scheduler::{ScheduledTask, Scheduler, TokioScheduler};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::Failgate;
pub use timeout::{Timeout, TimeoutError};
