//! Capability traits at the hardware seam.
//!
//! Everything the controller touches on the board goes through one of these
//! traits so the core stays testable on a desktop: digital pins, PWM outputs,
//! interrupt masking, the load cell ADC, repeating timers, the actuator
//! journal, the blob store used for persisted documents and a timed lock.

pub mod clock;
pub mod journal;
pub mod lock;
pub mod pins;
pub mod store;
pub mod timer;

pub use clock::{Clock, MonotonicClock, timer_finished};
pub use journal::{JournalEntry, JournalStore};
pub use lock::{SpinLock, TimedLock};
pub use pins::{InputPin, InterruptMask, NoMask, OutputPin, PwmOutput};
pub use store::BlobStore;
pub use timer::{RepeatingTimer, TimerAction, TimerCallback};

/// Error type carried across trait boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for trait-boundary calls.
pub type HwResult<T> = Result<T, BoxError>;

/// A 24-bit load cell front end shared by all multiplexed channels.
pub trait LoadCell {
    /// Wait for a conversion (bounded by `timeout`) and return the signed raw value.
    fn read_raw(&mut self, timeout: std::time::Duration) -> HwResult<i32>;

    /// Put the converter to sleep. When `wait` is set the call blocks for the
    /// settle time the part needs before it is considered powered down.
    fn power_down(&mut self, wait: bool) -> HwResult<()>;

    fn power_up(&mut self) -> HwResult<()>;
}

impl<T: LoadCell + ?Sized> LoadCell for Box<T> {
    fn read_raw(&mut self, timeout: std::time::Duration) -> HwResult<i32> {
        (**self).read_raw(timeout)
    }

    fn power_down(&mut self, wait: bool) -> HwResult<()> {
        (**self).power_down(wait)
    }

    fn power_up(&mut self) -> HwResult<()> {
        (**self).power_up()
    }
}
