use std::time::Duration;

use irrigo_traits::{Clock, timer_finished};

use crate::error::{HwError, Result};

/// Wait until the provided `is_high` predicate becomes false (i.e., line goes low),
/// or a timeout expires. Sleeps in small intervals to avoid CPU spinning.
///
/// The deadline is tracked on the clock's wrapping millisecond counter, so a
/// wait that straddles the rollover still times out after `timeout`.
pub fn wait_until_low_with_timeout(
    mut is_high: impl FnMut() -> bool,
    clock: &dyn Clock,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let total = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
    let begin = clock.millis();
    while is_high() {
        if timer_finished(begin, total, clock.millis()) {
            return Err(HwError::DataReadyTimeout);
        }
        clock.sleep(poll_interval);
    }
    Ok(())
}
