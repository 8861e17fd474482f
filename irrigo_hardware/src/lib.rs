//! Hardware layer: the HX711 driver, timers, journals and persistence
//! backends, plus a simulated bench for running without a board.
//!
//! Real GPIO is only compiled with the `hardware` feature on Linux.

pub mod error;
pub mod hx711;
pub mod journal;
pub mod sim;
pub mod store;
pub mod timer;
pub mod util;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod rpi;

pub use error::HwError;
pub use hx711::{Gain, Hx711};
pub use journal::FileJournal;
pub use sim::{SimHx711Bus, SimOutputPin, SimPwm};
pub use store::DirStore;
pub use timer::ThreadTimer;
