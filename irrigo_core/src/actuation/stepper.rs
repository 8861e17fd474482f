//! Four-coil stepper driven in half steps.

use std::time::Duration;

use irrigo_config::StepperCfg;
use irrigo_traits::OutputPin;

use super::{Actuator, ActuatorKind, Direction};
use crate::error::Result;

/// Coil pattern for each of the eight half-step phases.
const HALF_STEP: [[bool; 4]; 8] = [
    [true, false, false, false],
    [true, true, false, false],
    [false, true, false, false],
    [false, true, true, false],
    [false, false, true, false],
    [false, false, true, true],
    [false, false, false, true],
    [true, false, false, true],
];

/// The phase is derived from the absolute position, so a restored position
/// picks up the coil pattern the motor was left in.
pub struct Stepper<P> {
    coils: [P; 4],
    step_delay: Duration,
    release_on_finish: bool,
}

impl<P: OutputPin> Stepper<P> {
    pub fn new(coils: [P; 4], step_delay: Duration) -> Self {
        Self {
            coils,
            step_delay,
            release_on_finish: true,
        }
    }

    pub fn from_cfg(coils: [P; 4], cfg: &StepperCfg) -> Self {
        Self::new(coils, Duration::from_micros(cfg.step_delay_us))
            .with_release(cfg.release_on_finish)
    }

    pub fn with_release(mut self, release: bool) -> Self {
        self.release_on_finish = release;
        self
    }

    fn energize(&mut self, position: i32) {
        #[allow(clippy::cast_sign_loss)]
        let row = HALF_STEP[position.rem_euclid(8) as usize];
        for (coil, on) in self.coils.iter_mut().zip(row) {
            coil.set_level(on);
        }
    }

    fn release(&mut self) {
        for coil in &mut self.coils {
            coil.set_low();
        }
    }
}

impl<P: OutputPin + Send> Actuator for Stepper<P> {
    fn kind(&self) -> ActuatorKind {
        ActuatorKind::Stepper
    }

    fn increment_period(&self) -> Duration {
        self.step_delay
    }

    fn start(&mut self, from: i32, _to: i32) -> Result<()> {
        self.energize(from);
        Ok(())
    }

    fn increment(&mut self, _dir: Direction, position: i32) -> Result<()> {
        self.energize(position);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.release_on_finish {
            self.release();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use irrigo_hardware::SimOutputPin;

    fn coils() -> [SimOutputPin; 4] {
        std::array::from_fn(|_| SimOutputPin::new())
    }

    fn levels(c: &[SimOutputPin; 4]) -> [bool; 4] {
        std::array::from_fn(|i| c[i].level().unwrap_or(false))
    }

    #[test]
    fn walks_half_step_table() {
        let c = coils();
        let mut s = Stepper::new(c.clone(), Duration::from_micros(1000));
        s.start(0, 3).unwrap();
        assert_eq!(levels(&c), HALF_STEP[0]);
        s.increment(Direction::Forward, 1).unwrap();
        assert_eq!(levels(&c), HALF_STEP[1]);
        s.increment(Direction::Backward, -1).unwrap();
        assert_eq!(levels(&c), HALF_STEP[7]);
    }

    #[test]
    fn release_on_finish_is_optional() {
        let c = coils();
        let mut s = Stepper::new(c.clone(), Duration::ZERO).with_release(false);
        s.start(2, 3).unwrap();
        s.finish().unwrap();
        assert_eq!(levels(&c), HALF_STEP[2]);

        let mut s = s.with_release(true);
        s.finish().unwrap();
        assert_eq!(levels(&c), [false; 4]);
    }
}
