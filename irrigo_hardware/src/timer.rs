use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use irrigo_traits::{HwResult, RepeatingTimer, TimerAction, TimerCallback};

use crate::error::HwError;

/// Repeating timer backed by a dedicated thread.
///
/// Periods are scheduled against absolute deadlines so a slow callback does
/// not accumulate drift.
///
/// Dropping the timer detaches the thread: the callback keeps running until
/// it returns [`TimerAction::Stop`]. Only [`RepeatingTimer::cancel`] and a
/// fresh `start` cut a callback short.
#[derive(Default)]
pub struct ThreadTimer {
    cancel: Option<Arc<AtomicBool>>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn stop_thread(&mut self) {
        if let Some(flag) = self.cancel.take() {
            flag.store(true, Ordering::Release);
        }
        if let Some(h) = self.handle.take() {
            // the callback may be the one cancelling; never join ourselves
            if h.thread().id() != thread::current().id() {
                let _ = h.join();
            }
        }
    }
}

impl RepeatingTimer for ThreadTimer {
    fn start(&mut self, period: Duration, mut callback: TimerCallback) -> HwResult<()> {
        self.stop_thread();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name("irrigo-timer".into())
            .spawn(move || {
                let mut next = Instant::now() + period;
                loop {
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    }
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    if callback() == TimerAction::Stop {
                        break;
                    }
                    next += period;
                }
            })
            .map_err(|e| HwError::Timer(e.to_string()))?;
        self.cancel = Some(cancel);
        self.handle = Some(handle);
        Ok(())
    }

    /// Abort the callback between periods. A journaled move driven by this
    /// timer is left in progress.
    fn cancel(&mut self) {
        self.stop_thread();
    }
}
