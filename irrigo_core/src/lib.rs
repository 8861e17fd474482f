#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Irrigation control core (hardware-agnostic).
//!
//! All board access goes through the capability traits in `irrigo_traits`:
//! the load cell, selector pins, PWM outputs, repeating timers, journals and
//! the blob store.
//!
//! ## Architecture
//!
//! - **Statistics**: streaming mean/spread of raw samples (`stats`)
//! - **Calibration**: tare-and-slope model with error propagation (`calibration`)
//! - **Channels**: multiplexed load cells sharing one ADC (`channels`)
//! - **Protocols**: per-channel step sequences (`protocol`)
//! - **Run configuration**: positions, protocols and cadence (`run`)
//! - **Actuation**: journaled stepper/servo/pump moves (`actuation`)
//! - **Control loop**: reads, ticks and watering jobs (`controller`)
//!
//! ## Time
//!
//! Control timing uses the wrapping `u32` millisecond clock from
//! [`irrigo_traits::Clock::millis`]; every interval check goes through
//! [`irrigo_traits::timer_finished`].

pub mod actuation;
pub mod calibration;
pub mod channels;
pub mod controller;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod protocol;
pub mod run;
pub mod stats;
pub mod util;

pub use actuation::{Actuator, ActuatorArena, ActuatorId, ActuatorKind, Direction, Pump, Servo, Stepper};
pub use calibration::{Calibration, Estimate};
pub use channels::{ChannelManager, LoadReport, MuxSelector};
pub use controller::{ChannelReport, Controller, DispenseState, Dispenser, WaterAction, WateringRig};
pub use error::{ErrorKind, IrrigoError, Result, SoftWarning};
pub use protocol::{Sequencer, SequencerTick, Step, StepKind, StepOutcome, StepProgress};
pub use run::{ChannelPosition, RunConfig, RunLimits};
pub use stats::{Reading, Welford};
