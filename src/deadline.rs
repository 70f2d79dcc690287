// Time boxes and cancellation for move requests
//
// A `CancelToken` is the stop signal of one turn loop worker. A `Deadline` pairs it
// with a point in time: the search polls `expired()` at every node, the mailbox
// waits at most `remaining()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared stop flag, cloned into every deadline of a worker
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A per-move time box tied to a worker's stop signal
#[derive(Debug, Clone)]
pub struct Deadline {
    until: Instant,
    cancel: CancelToken,
}

impl Deadline {
    pub fn new(until: Instant, cancel: CancelToken) -> Self {
        Deadline { until, cancel }
    }

    /// Deadline `budget` from now
    pub fn after(budget: Duration, cancel: CancelToken) -> Self {
        Deadline::new(Instant::now() + budget, cancel)
    }

    /// A deadline that only ends when cancelled, for offline tools and tests
    pub fn unbounded() -> Self {
        // About a century; far enough that Instant arithmetic never overflows.
        Deadline::after(Duration::from_secs(60 * 60 * 24 * 365 * 100), CancelToken::new())
    }

    /// True once the stop signal fired, regardless of time
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once either the time box ran out or the stop signal fired
    pub fn expired(&self) -> bool {
        self.is_cancelled() || Instant::now() >= self.until
    }

    /// Time left before expiry, `None` once expired
    pub fn remaining(&self) -> Option<Duration> {
        if self.is_cancelled() {
            return None;
        }
        let left = self.until.saturating_duration_since(Instant::now());
        if left.is_zero() {
            None
        } else {
            Some(left)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_expires_deadline() {
        let token = CancelToken::new();
        let deadline = Deadline::after(Duration::from_secs(60), token.clone());
        assert!(!deadline.expired());
        assert!(deadline.remaining().is_some());

        token.cancel();
        assert!(deadline.expired());
        assert!(deadline.is_cancelled());
        assert_eq!(deadline.remaining(), None);
    }

    #[test]
    fn test_elapsed_deadline_is_not_cancelled() {
        let deadline = Deadline::after(Duration::ZERO, CancelToken::new());
        assert!(deadline.expired());
        assert!(!deadline.is_cancelled());
    }
}
