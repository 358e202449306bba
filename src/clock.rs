//! Clock abstraction used by time-based policy state machines.
//!
//! Circuit breakers and rate limiters read time through [`Clock`] so tests
//! can substitute a controllable source instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Thread-safe monotonic time source.
///
/// Readings are durations since the implementer's own origin; only
/// differences between readings are meaningful. Implementations must be
/// non-decreasing and safe to call concurrently.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current reading relative to this clock's origin.
    fn now(&self) -> Duration;
}

/// Monotonic clock backed by `Instant::now()`.
///
/// Clones share the origin captured at creation, so their readings are
/// directly comparable. Independently created instances are not.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the reading by `delta`.
    pub fn advance(&self, delta: Duration) {
        let nanos = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn monotonic_readings_never_decrease() {
        let clock = MonotonicClock::new();
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[test]
    fn clones_share_the_origin() {
        let clock = MonotonicClock::new();
        let clone = clock.clone();
        let diff = clock.now().abs_diff(clone.now());
        assert!(diff < Duration::from_millis(50), "clones differ by {:?}", diff);
    }

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), Duration::ZERO);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), Duration::from_millis(250));
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now(), Duration::from_millis(1250));
    }

    #[test]
    fn usable_behind_a_trait_object_across_threads() {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let mut handles = vec![];
        for _ in 0..4 {
            let c = Arc::clone(&clock);
            handles.push(thread::spawn(move || {
                let _ = c.now();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
