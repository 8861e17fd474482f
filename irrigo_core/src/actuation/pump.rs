//! PWM-driven pump metered in fixed-length pulses.
//!
//! The journaled position is a running pulse counter. It only moves
//! forward, so an interrupted run shows up at startup like any other
//! interrupted move.

use std::time::Duration;

use irrigo_config::PumpCfg;
use irrigo_traits::PwmOutput;

use super::{Actuator, ActuatorKind, Direction};
use crate::error::{IrrigoError, Result};
use crate::hw_error::map_boxed;
use crate::util::pulses_for;

pub struct Pump<W> {
    pwm: W,
    frequency_hz: f64,
    pulse: Duration,
    intensity: u8,
}

impl<W: PwmOutput> Pump<W> {
    pub fn new(pwm: W, frequency_hz: f64, pulse: Duration) -> Self {
        Self {
            pwm,
            frequency_hz,
            pulse,
            intensity: 100,
        }
    }

    pub fn from_cfg(pwm: W, cfg: &PumpCfg) -> Self {
        Self::new(pwm, cfg.frequency_hz, Duration::from_micros(cfg.pulse_us))
    }

    /// Drive strength in percent for the next run.
    pub fn set_intensity(&mut self, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(IrrigoError::Validation(format!(
                "pump intensity {percent}% above 100%"
            )));
        }
        self.intensity = percent;
        Ok(())
    }

    pub fn intensity(&self) -> u8 {
        self.intensity
    }

    /// Pulses needed to run for `run_us` microseconds.
    pub fn pulses_for(&self, run_us: u32) -> u32 {
        pulses_for(u64::from(run_us), self.pulse)
    }
}

impl<W: PwmOutput + Send> Actuator for Pump<W> {
    fn kind(&self) -> ActuatorKind {
        ActuatorKind::Pump
    }

    fn increment_period(&self) -> Duration {
        self.pulse
    }

    fn validate_target(&self, from: i32, to: i32) -> Result<()> {
        if to < from {
            return Err(IrrigoError::Validation(format!(
                "pump counter cannot run backwards ({from} -> {to})"
            )));
        }
        Ok(())
    }

    fn start(&mut self, _from: i32, _to: i32) -> Result<()> {
        let duty = f64::from(self.intensity) / 100.0;
        self.pwm
            .set_pwm(self.frequency_hz, duty)
            .map_err(map_boxed)
    }

    fn increment(&mut self, _dir: Direction, _position: i32) -> Result<()> {
        // the pump is already running; one increment is one pulse period
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.pwm.disable().map_err(map_boxed)
    }
}
