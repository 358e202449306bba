//! Error types shared by every policy
use std::fmt;
use std::time::Duration;

/// Unified failure type threaded through policy composition.
///
/// Policy rejections (open breaker, full bulkhead, exhausted rate limit) and
/// engine failures (timeout, cancellation) are ordinary variants, so outer
/// policies can classify and handle them like any other failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError<E> {
    /// The circuit breaker rejected the attempt while open
    CircuitOpen {
        /// Time remaining until the breaker will admit a trial execution
        remaining: Duration,
    },
    /// The attempt exceeded a timeout policy's bound
    Timeout { timeout: Duration },
    /// The bulkhead had no free permit
    BulkheadFull { max_concurrency: usize },
    /// The rate limiter had no slot within the permitted wait
    RateLimitExceeded {
        /// Earliest point at which a permit would have been available
        retry_after: Duration,
    },
    /// The execution's future was cancelled
    Cancelled,
    /// The underlying operation failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ExecutionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen { remaining } => {
                write!(f, "circuit breaker open (retry possible in {:?})", remaining)
            }
            Self::Timeout { timeout } => {
                write!(f, "execution timed out (limit: {:?})", timeout)
            }
            Self::BulkheadFull { max_concurrency } => {
                write!(f, "bulkhead full ({} concurrent executions)", max_concurrency)
            }
            Self::RateLimitExceeded { retry_after } => {
                write!(f, "rate limit exceeded (slot available in {:?})", retry_after)
            }
            Self::Cancelled => write!(f, "execution cancelled"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ExecutionError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> ExecutionError<E> {
    /// Check if this error came from an open circuit breaker.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Check if this error came from a timeout policy.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error came from a full bulkhead.
    pub fn is_bulkhead_full(&self) -> bool {
        matches!(self, Self::BulkheadFull { .. })
    }

    /// Check if this error came from an exhausted rate limiter.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    /// Check if the execution was cancelled through its future.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this error wraps an operation failure.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Extract the operation failure, if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the operation failure, if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Access the timeout bound for timeout errors.
    pub fn timeout_bound(&self) -> Option<Duration> {
        match self {
            Self::Timeout { timeout } => Some(*timeout),
            _ => None,
        }
    }

    /// Access the suggested wait for rate-limit and circuit-open errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after } => Some(*retry_after),
            Self::CircuitOpen { remaining } => Some(*remaining),
            _ => None,
        }
    }
}
