use std::time::Duration;

use crate::HwResult;

/// What a repeating timer should do after running its callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    Repeat,
    Stop,
}

pub type TimerCallback = Box<dyn FnMut() -> TimerAction + Send + 'static>;

/// A periodic timer that runs a callback until it returns [`TimerAction::Stop`].
///
/// Callbacks may run on another thread (or in interrupt context on a
/// microcontroller) and must not block.
pub trait RepeatingTimer {
    /// Start calling `callback` every `period`. Starting a timer that is
    /// still running replaces its callback.
    fn start(&mut self, period: Duration, callback: TimerCallback) -> HwResult<()>;

    fn cancel(&mut self);
}
