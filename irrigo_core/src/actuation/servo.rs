//! Hobby servo stepped one degree per increment.

use std::time::Duration;

use irrigo_config::ServoCfg;
use irrigo_traits::PwmOutput;

use super::{Actuator, ActuatorKind, Direction};
use crate::error::{IrrigoError, Result};
use crate::hw_error::map_boxed;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoParams {
    pub min_angle: i32,
    pub max_angle: i32,
    pub step_delay: Duration,
    pub frequency_hz: f64,
    pub min_pulse_us: u32,
    pub max_pulse_us: u32,
    pub inverted: bool,
}

impl From<&ServoCfg> for ServoParams {
    fn from(c: &ServoCfg) -> Self {
        Self {
            min_angle: c.min_angle,
            max_angle: c.max_angle,
            step_delay: Duration::from_micros(c.step_delay_us),
            frequency_hz: c.frequency_hz,
            min_pulse_us: c.min_pulse_us,
            max_pulse_us: c.max_pulse_us,
            inverted: c.inverted,
        }
    }
}

pub struct Servo<W> {
    pwm: W,
    params: ServoParams,
}

impl<W: PwmOutput> Servo<W> {
    pub fn new(pwm: W, params: ServoParams) -> Self {
        Self { pwm, params }
    }

    pub fn from_cfg(pwm: W, cfg: &ServoCfg) -> Self {
        Self::new(pwm, ServoParams::from(cfg))
    }

    pub fn params(&self) -> &ServoParams {
        &self.params
    }

    /// Output duty for `angle`, clamped to the configured range.
    pub fn duty(&self, angle: i32) -> f64 {
        let p = &self.params;
        let span = f64::from(p.max_angle - p.min_angle);
        let frac = if span > 0.0 {
            f64::from(angle.clamp(p.min_angle, p.max_angle) - p.min_angle) / span
        } else {
            0.0
        };
        let pulse_us = f64::from(p.min_pulse_us)
            + frac * (f64::from(p.max_pulse_us) - f64::from(p.min_pulse_us));
        let period_us = 1_000_000.0 / p.frequency_hz;
        let duty = (pulse_us / period_us).clamp(0.0, 1.0);
        if p.inverted { 1.0 - duty } else { duty }
    }

    fn drive(&mut self, angle: i32) -> Result<()> {
        let duty = self.duty(angle);
        self.pwm
            .set_pwm(self.params.frequency_hz, duty)
            .map_err(map_boxed)
    }
}

impl<W: PwmOutput + Send> Actuator for Servo<W> {
    fn kind(&self) -> ActuatorKind {
        ActuatorKind::Servo
    }

    fn increment_period(&self) -> Duration {
        self.params.step_delay
    }

    fn validate_target(&self, _from: i32, to: i32) -> Result<()> {
        let p = &self.params;
        if to < p.min_angle || to > p.max_angle {
            return Err(IrrigoError::Validation(format!(
                "servo angle {to} outside {}..={}",
                p.min_angle, p.max_angle
            )));
        }
        Ok(())
    }

    fn start(&mut self, from: i32, _to: i32) -> Result<()> {
        self.drive(from)
    }

    fn increment(&mut self, _dir: Direction, position: i32) -> Result<()> {
        self.drive(position)
    }

    fn finish(&mut self) -> Result<()> {
        self.pwm.disable().map_err(map_boxed)
    }
}
