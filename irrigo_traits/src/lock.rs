use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::clock::{Clock, timer_finished};

const POLL: Duration = Duration::from_millis(1);

/// A lock that can be acquired with a bounded wait.
pub trait TimedLock {
    fn try_lock(&self) -> bool;
    fn unlock(&self);

    fn is_locked(&self) -> bool;

    /// Try once immediately, then poll until `timeout` elapses.
    fn lock_timeout(&self, clock: &dyn Clock, timeout: Duration) -> bool {
        if self.try_lock() {
            return true;
        }
        let total = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let begin = clock.millis();
        while !timer_finished(begin, total, clock.millis()) {
            clock.sleep(POLL);
            if self.try_lock() {
                return true;
            }
        }
        false
    }
}

/// Atomic-flag lock usable from timer callbacks.
#[derive(Debug, Default)]
pub struct SpinLock {
    held: AtomicBool,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }
}

impl TimedLock for SpinLock {
    fn try_lock(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn unlock(&self) {
        self.held.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_clock::TestClock;

    #[test]
    fn try_lock_is_exclusive() {
        let l = SpinLock::new();
        assert!(l.try_lock());
        assert!(!l.try_lock());
        l.unlock();
        assert!(l.try_lock());
    }

    #[test]
    fn lock_timeout_gives_up_after_deadline() {
        let clock = TestClock::new();
        let l = SpinLock::new();
        assert!(l.try_lock());
        assert!(!l.lock_timeout(&clock, Duration::from_millis(20)));
        assert!(clock.millis() >= 20);
    }

    #[test]
    fn lock_timeout_immediate_when_free() {
        let clock = TestClock::new();
        let l = SpinLock::new();
        assert!(l.lock_timeout(&clock, Duration::ZERO));
        assert_eq!(clock.millis(), 0);
    }
}
