//! Offset Tracker
//!
//! A single counter advanced by exactly one per successfully persisted event.
//! It is never stored on its own; recovery recomputes it from the log.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global, strictly increasing position counter
#[derive(Debug, Default)]
pub struct OffsetTracker {
    current: AtomicU64,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events appended since genesis (also the last assigned offset)
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Offset the next append will receive, without claiming it
    pub fn peek_next(&self) -> u64 {
        self.current() + 1
    }

    /// Record one successful append and return its offset
    pub(crate) fn advance(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reset to a recovered value
    pub(crate) fn restore(&self, offset: u64) {
        self.current.store(offset, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_is_one_based() {
        let tracker = OffsetTracker::new();
        assert_eq!(tracker.current(), 0);
        assert_eq!(tracker.peek_next(), 1);
        assert_eq!(tracker.advance(), 1);
        assert_eq!(tracker.advance(), 2);
        assert_eq!(tracker.current(), 2);
    }

    #[test]
    fn test_restore() {
        let tracker = OffsetTracker::new();
        tracker.restore(41);
        assert_eq!(tracker.advance(), 42);
    }
}
