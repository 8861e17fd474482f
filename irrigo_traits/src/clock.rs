use std::thread;
use std::time::{Duration, Instant};

/// Monotonic clock abstraction for control and timing across the stack.
///
/// - now(): returns a monotonic Instant
/// - millis(): wrapping 32-bit millisecond counter, rolls over after ~49.7 days
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - ms_since(): helper to compute elapsed milliseconds from an epoch Instant
///
/// All interval checks against `millis()` must go through wrapping
/// subtraction (see [`timer_finished`]) so they stay correct across rollover.
pub trait Clock {
    fn now(&self) -> Instant;
    fn millis(&self) -> u32;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        u64::try_from(dur.as_millis()).unwrap_or(u64::MAX)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn millis(&self) -> u32 {
        (**self).millis()
    }

    fn sleep(&self, d: Duration) {
        (**self).sleep(d);
    }
}

/// True once `total_ms` have elapsed since `begin_ms`, using wrapping arithmetic.
#[inline]
pub fn timer_finished(begin_ms: u32, total_ms: u32, now_ms: u32) -> bool {
    now_ms.wrapping_sub(begin_ms) >= total_ms
}

/// Default, real-time monotonic clock backed by std::time::Instant.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn millis(&self) -> u32 {
        // truncation is the rollover
        self.epoch.elapsed().as_millis() as u32
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

pub mod test_clock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Deterministic test clock whose time can be advanced manually.
    ///
    /// now() = origin + offset
    /// millis() = start_ms + offset (wrapping)
    /// sleep(d) advances internal time by d without actually sleeping.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: Instant,
        start_ms: u32,
        offset: Arc<Mutex<Duration>>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestClock {
        pub fn new() -> Self {
            Self::starting_at(0)
        }

        /// Clock whose millisecond counter starts at `start_ms`; handy for
        /// exercising rollover with values close to `u32::MAX`.
        pub fn starting_at(start_ms: u32) -> Self {
            Self {
                origin: Instant::now(),
                start_ms,
                offset: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        /// Advance the clock by the given duration.
        pub fn advance(&self, d: Duration) {
            if let Ok(mut off) = self.offset.lock() {
                *off = off.saturating_add(d);
            }
        }

        pub fn advance_ms(&self, ms: u64) {
            self.advance(Duration::from_millis(ms));
        }

        /// Set the absolute offset relative to origin (useful for tests).
        pub fn set_offset(&self, d: Duration) {
            if let Ok(mut off) = self.offset.lock() {
                *off = d;
            }
        }

        fn offset(&self) -> Duration {
            self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO)
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            self.origin + self.offset()
        }

        #[allow(clippy::cast_possible_truncation)]
        fn millis(&self) -> u32 {
            self.start_ms
                .wrapping_add(self.offset().as_millis() as u32)
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_clock::TestClock;
    use super::*;

    #[test]
    fn timer_survives_rollover() {
        let begin = u32::MAX - 10;
        assert!(!timer_finished(begin, 20, begin.wrapping_add(19)));
        assert!(timer_finished(begin, 20, begin.wrapping_add(20)));
        assert!(timer_finished(begin, 0, begin));
    }

    #[test]
    fn test_clock_wraps_millis() {
        let clock = TestClock::starting_at(u32::MAX - 4);
        let begin = clock.millis();
        clock.advance_ms(10);
        assert_eq!(clock.millis(), 5);
        assert!(timer_finished(begin, 10, clock.millis()));
        assert!(!timer_finished(begin, 11, clock.millis()));
    }

    #[test]
    fn sleep_advances_test_clock() {
        let clock = TestClock::new();
        let t0 = clock.now();
        clock.sleep(Duration::from_millis(250));
        assert_eq!(clock.ms_since(t0), 250);
        assert_eq!(clock.millis(), 250);
    }
}
