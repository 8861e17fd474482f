//! Small time and counting helpers shared by the actuators and the loop.

use std::time::Duration;

/// Number of microseconds in one millisecond.
pub const MICROS_PER_MILLI: u64 = 1_000;

/// Whole increments of length `pulse` covering `run_us` microseconds,
/// rounded up. A zero-length pulse counts as 1 µs.
#[inline]
pub fn pulses_for(run_us: u64, pulse: Duration) -> u32 {
    let pulse_us = u64::try_from(pulse.as_micros()).unwrap_or(u64::MAX).max(1);
    u32::try_from(run_us.div_ceil(pulse_us)).unwrap_or(u32::MAX)
}

/// Milliseconds as a `Duration`, clamping zero to 1 ms.
#[inline]
pub fn period_ms(ms: u32) -> Duration {
    Duration::from_millis(u64::from(ms.max(1)))
}
